// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The outbound boundary: consumers of flushed samples implement
//! [`Sink`]. Shipping samples to Datadog, a file, or any other
//! destination is an external concern (see the spec's Non-goals);
//! this crate only defines the seam and a few implementations used by
//! its own tests.
//!
//! The teacher's dependency stack has no `async-trait`, so rather than
//! add one, `send` returns a manually boxed future the way `Future`
//! trait objects are built by hand elsewhere in the ecosystem when
//! `async fn` in a trait isn't dyn-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{DropCounters, SinkError};
use crate::outbound::OutboundBuffer;
use crate::sample::OutgoingSample;

pub trait Sink: Send + Sync {
    fn send<'a>(
        &'a self,
        batch: Vec<OutgoingSample>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// Discards every batch. Useful for benchmarking ingestion without
/// paying for a real transport, and as the default when a caller
/// hasn't wired one up.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn send<'a>(
        &'a self,
        batch: Vec<OutgoingSample>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            debug!(batch_len = batch.len(), "discarding batch in NullSink");
            Ok(())
        })
    }
}

/// Hands each batch to an [`OutboundBuffer`], decoupling the
/// single-threaded aggregation loop from whatever sibling task
/// actually ships the data out. The drop-oldest policy lives in the
/// buffer itself; `send` always succeeds from the flusher's point of
/// view; a full buffer just means the stalest batch was evicted, which
/// bumps [`DropCounters::sink_overflows`] per the error handling design
/// (sink errors are reported, never propagated back to ingestion).
pub struct ChannelSink {
    buffer: Arc<OutboundBuffer<Vec<OutgoingSample>>>,
    drops: Arc<DropCounters>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(buffer: Arc<OutboundBuffer<Vec<OutgoingSample>>>, drops: Arc<DropCounters>) -> Self {
        ChannelSink { buffer, drops }
    }
}

impl Sink for ChannelSink {
    fn send<'a>(
        &'a self,
        batch: Vec<OutgoingSample>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if self.buffer.push(batch) {
                self.drops.sink_overflows.fetch_add(1, Ordering::Relaxed);
                debug!("outbound buffer full, dropped oldest batch");
            }
            Ok(())
        })
    }
}

/// Serializes each batch to a JSON array before handing it to an
/// [`OutboundBuffer`] of already-encoded payloads, the way the
/// teacher's `datadog.rs` turns a `Series` into a request body with
/// `serde_json::to_vec` ahead of shipping it. A serialization failure
/// (unrepresentable float, in practice) is counted as a sink error and
/// the batch is dropped rather than poisoning the outbound queue.
pub struct JsonSink {
    buffer: Arc<OutboundBuffer<Vec<u8>>>,
    drops: Arc<DropCounters>,
}

impl JsonSink {
    #[must_use]
    pub fn new(buffer: Arc<OutboundBuffer<Vec<u8>>>, drops: Arc<DropCounters>) -> Self {
        JsonSink { buffer, drops }
    }
}

impl Sink for JsonSink {
    fn send<'a>(
        &'a self,
        batch: Vec<OutgoingSample>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&batch).map_err(|err| {
                self.drops.sink_overflows.fetch_add(1, Ordering::Relaxed);
                SinkError::Transport(format!("failed to serialize batch: {err}"))
            })?;
            if self.buffer.push(payload) {
                self.drops.sink_overflows.fetch_add(1, Ordering::Relaxed);
                debug!("outbound buffer full, dropped oldest json batch");
            }
            Ok(())
        })
    }
}
