// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The one place that reads the wall clock, so every wall-clock
//! timestamp in the crate (arrival time, flush time, eviction
//! comparisons, client timestamps) comes from the same source. This is
//! deliberately *not* used for the flusher's `interval` computation —
//! see [`crate::flusher::Flusher`], which uses `std::time::Instant`
//! instead so a wall-clock step (NTP correction, manual clock change)
//! can't corrupt the rate math.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Falls back to `0.0` on a clock set
/// before 1970 rather than panicking; eviction and rate math degrade
/// gracefully (they only ever compare two readings of this same
/// function) rather than crashing ingestion.
#[must_use]
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
