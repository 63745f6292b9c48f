// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types and drop accounting for the aggregator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Errors for [`crate::parser::parse_line`].
///
/// All variants are recoverable: the caller drops the offending line
/// (or, for [`ParseError::BadSample`], just the offending sample) and
/// bumps a counter in [`DropCounters`]; the parser never panics on
/// untrusted input.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    /// Line failed the `name (":" sample)+` grammar outright.
    #[error("line did not match the statsd grammar: {0}")]
    Malformed(String),
    /// Metric name is not `[A-Za-z][A-Za-z0-9_]*`.
    #[error("metric name is not a valid identifier: {0}")]
    InvalidName(String),
    /// A tag in the `|#...` section failed the tag regex.
    #[error("tag failed validation: {0}")]
    InvalidTag(String),
    /// More tags than [`crate::constants::MAX_TAGS`].
    #[error("too many tags, more than {0}")]
    TooManyTags(usize),
    /// `bucket=<value>` where `<value>` is not an identifier.
    #[error("bucket override is not a valid identifier: {0}")]
    InvalidBucket(String),
    /// `timestamp` tag present but outside `recv_ts ± timestamp_window`.
    #[error("client timestamp outside the accepted window")]
    TimestampOutOfWindow,
}

/// Failure to create an [`crate::aggregator::Aggregator`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// `percentile_thresholds` contained no value in `(0, 100]`.
    #[error("no usable percentile thresholds were configured")]
    NoPercentiles,
}

/// Failures from [`crate::sink::Sink::send`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The outbound buffer exceeded its high-water mark; the oldest
    /// batch was dropped to make room for this one.
    #[error("outbound buffer overflow, dropped oldest batch")]
    Overflow,
    /// Sink-specific transport failure (network, encoding, ...).
    #[error("sink transport error: {0}")]
    Transport(String),
}

/// Counters for every class of input this crate drops rather than
/// propagates, per the error handling policy: parse/decode/range
/// errors are recovered locally, never raised to the caller.
#[derive(Debug, Default)]
pub struct DropCounters {
    /// Whole datagrams dropped for containing non-ASCII bytes.
    pub decode_errors: AtomicU64,
    /// Lines or samples dropped for failing the grammar.
    pub parse_errors: AtomicU64,
    /// Lines dropped for a `timestamp` tag outside the accepted window.
    pub range_errors: AtomicU64,
    /// Histogram samples dropped because the selector returned nothing.
    pub selector_misses: AtomicU64,
    /// Outbound batches dropped because the buffer was full.
    pub sink_overflows: AtomicU64,
}

/// Point-in-time snapshot of [`DropCounters`], convenient for logging
/// or exposing as self-metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    pub decode_errors: u64,
    pub parse_errors: u64,
    pub range_errors: u64,
    pub selector_misses: u64,
    pub sink_overflows: u64,
}

impl DropCounters {
    #[must_use]
    pub fn snapshot(&self) -> DropCounts {
        DropCounts {
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            range_errors: self.range_errors.load(Ordering::Relaxed),
            selector_misses: self.selector_misses.load(Ordering::Relaxed),
            sink_overflows: self.sink_overflows.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_parse_error(&self, err: &ParseError) {
        match err {
            ParseError::TimestampOutOfWindow => {
                self.range_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
