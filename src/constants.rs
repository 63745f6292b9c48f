// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed limits and defaults referenced throughout the aggregator.

/// Largest UDP datagram the ingress will read in one `recv_from`.
pub const MAX_DATAGRAM_BYTES: usize = 65_535;

/// Upper bound on tags accepted in a single line's `|#...` section.
/// Not part of the wire grammar itself, a safety bound against
/// pathological input.
pub const MAX_TAGS: usize = 100;

/// Default flush interval, in seconds, absent explicit configuration.
pub const DEFAULT_FLUSH_TIME_SECS: f64 = 10.0;

/// Default per-kind eviction timeout, in seconds.
pub const DEFAULT_KIND_TIMEOUT_SECS: f64 = 300.0;

/// Default window, in seconds, within which a client-supplied
/// `timestamp` tag must fall relative to `recv_ts`.
pub const DEFAULT_TIMESTAMP_WINDOW_SECS: f64 = 600.0;

/// Timestamps above this value are assumed to be given in milliseconds
/// rather than seconds (roughly 1 Jan 2050).
pub const TIMESTAMP_MS_THRESHOLD: f64 = 2_524_608_000.0;

/// Default destination bucket names, one per kind.
pub const DEFAULT_COUNTERS_BUCKET: &str = "counters";
pub const DEFAULT_GAUGES_BUCKET: &str = "gauges";
pub const DEFAULT_SETS_BUCKET: &str = "sets";
pub const DEFAULT_TIMERS_BUCKET: &str = "timers";
pub const DEFAULT_HISTOGRAMS_BUCKET: &str = "histograms";

/// Default high-water mark for the outbound sample queue before the
/// oldest batch is dropped.
pub const DEFAULT_OUTBOUND_HIGH_WATER_MARK: usize = 1_024;
