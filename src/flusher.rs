// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::clock;
use crate::sink::Sink;

/// Drains the aggregator on demand and hands the result to a sink.
/// Owned by [`crate::dogstatsd::DogStatsD`] and driven by its flush
/// tick, but kept as its own type — mirroring the teacher's
/// `Flusher`/`FlusherConfig` split — so a caller (tests, an
/// alternate ingress) can trigger a flush without going through the
/// UDP loop.
///
/// Per §4.4, `interval` (which drives every rate-derived field:
/// `count_ps`, a counter's `rate`) is measured against
/// `std::time::Instant` — a monotonic clock immune to wall-clock
/// steps — while eviction and sample timestamps use [`clock::now_secs`]'s
/// wall clock. Deriving `interval` from the wall clock instead would
/// let an NTP correction or manual clock change drive it negative or
/// to zero, silently dropping rate fields for that flush.
pub struct Flusher {
    aggregator: Arc<Mutex<Aggregator>>,
    sink: Arc<dyn Sink>,
    last_flush: Instant,
}

pub struct FlusherConfig {
    pub aggregator: Arc<Mutex<Aggregator>>,
    pub sink: Arc<dyn Sink>,
}

impl Flusher {
    #[must_use]
    pub fn new(params: FlusherConfig) -> Self {
        Flusher {
            aggregator: params.aggregator,
            sink: params.sink,
            last_flush: Instant::now(),
        }
    }

    /// Flush everything due, using the actual elapsed time since the
    /// previous flush (not the configured target interval) for
    /// rate-derived fields, so a delayed tick doesn't skew `count_ps`.
    pub async fn flush(&mut self) {
        let monotonic_now = Instant::now();
        let interval = monotonic_now.duration_since(self.last_flush).as_secs_f64();
        let wall_now = clock::now_secs();
        let batch = {
            let mut aggregator = self.aggregator.lock().expect("lock poisoned");
            aggregator.flush(wall_now, interval)
        };
        self.last_flush = monotonic_now;

        if batch.is_empty() {
            return;
        }
        let n = batch.len();
        debug!("flushing {n} samples");
        if let Err(err) = self.sink.send(batch).await {
            warn!("sink failed to accept flushed batch: {err}");
        }
    }
}
