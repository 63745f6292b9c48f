// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for the aggregator, ingress, and flusher.
//!
//! Kept as a plain, explicitly-constructed struct rather than a
//! process-wide singleton, per the spec's design notes: callers build
//! one (or several, for tests) and pass it around rather than reading
//! from a global. `serde::Deserialize` is derived so a host binary can
//! load it from file or environment if it chooses, but no such loader
//! lives in this crate.

use std::time::Duration;

use crate::constants;

/// Per-kind destination bucket names, overridable by a `bucket` tag
/// on individual lines.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct BucketNames {
    pub counters: String,
    pub gauges: String,
    pub sets: String,
    pub timers: String,
    pub histograms: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        BucketNames {
            counters: constants::DEFAULT_COUNTERS_BUCKET.to_string(),
            gauges: constants::DEFAULT_GAUGES_BUCKET.to_string(),
            sets: constants::DEFAULT_SETS_BUCKET.to_string(),
            timers: constants::DEFAULT_TIMERS_BUCKET.to_string(),
            histograms: constants::DEFAULT_HISTOGRAMS_BUCKET.to_string(),
        }
    }
}

/// Per-kind eviction timeouts: how long a key may go without a new
/// sample before its kind's `retain()` pass in [`crate::aggregator::Aggregator::flush`]
/// drops it. Mirrors [`BucketNames`] — each kind is independently
/// configurable rather than sharing one timeout, per the five
/// `*_timeout` options in the configuration table.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct KindTimeouts {
    pub counters: Duration,
    pub gauges: Duration,
    pub sets: Duration,
    pub timers: Duration,
    pub histograms: Duration,
}

impl Default for KindTimeouts {
    fn default() -> Self {
        let default_timeout = Duration::from_secs_f64(constants::DEFAULT_KIND_TIMEOUT_SECS);
        KindTimeouts {
            counters: default_timeout,
            gauges: default_timeout,
            sets: default_timeout,
            timers: default_timeout,
            histograms: default_timeout,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// How often the flusher drains accumulators into outgoing samples.
    pub flush_time: Duration,
    /// How long a key may go without a new sample before it is evicted
    /// from its kind's table at flush time, one value per kind.
    pub kind_timeouts: KindTimeouts,
    /// Acceptable distance between a client-supplied `timestamp` tag
    /// and the receiver's own clock.
    pub timestamp_window: f64,
    /// Percentile thresholds (each in `(0, 100]`) the flusher computes
    /// for every timer key, e.g. `[50.0, 90.0, 99.0]`.
    pub percentile_thresholds: Vec<f64>,
    pub bucket_names: BucketNames,
    /// Outbound queue capacity before the oldest batch is dropped.
    pub outbound_high_water_mark: usize,
    /// Suppress the aggregator's own self-metrics (packets received,
    /// drop counters, ...) from being folded into its own tables. This
    /// core emits no self-metrics itself; the flag is recognized so a
    /// host process that layers one on top has a place to read it from.
    pub ignore_internal_stats: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            flush_time: Duration::from_secs_f64(constants::DEFAULT_FLUSH_TIME_SECS),
            kind_timeouts: KindTimeouts::default(),
            timestamp_window: constants::DEFAULT_TIMESTAMP_WINDOW_SECS,
            percentile_thresholds: vec![50.0, 90.0, 99.0],
            bucket_names: BucketNames::default(),
            outbound_high_water_mark: constants::DEFAULT_OUTBOUND_HIGH_WATER_MARK,
            ignore_internal_stats: false,
        }
    }
}

impl AggregatorConfig {
    /// Percentile thresholds filtered to the valid `(0, 100]` range,
    /// rounded to two decimal places (`bucky3.init_config`'s
    /// `round(float(t), 2)`) before sorting and de-duplicating, so a
    /// flusher can iterate them directly and the `percentile` tag never
    /// carries float noise. Invalid thresholds are silently dropped
    /// rather than causing a panic; if none survive, `Aggregator::new`
    /// reports [`crate::errors::Creation::NoPercentiles`].
    #[must_use]
    pub fn valid_percentiles(&self) -> Vec<f64> {
        let mut valid: Vec<f64> = self
            .percentile_thresholds
            .iter()
            .copied()
            .filter(|p| *p > 0.0 && *p <= 100.0)
            .map(|p| (p * 100.0).round() / 100.0)
            .collect();
        valid.sort_by(|a, b| a.partial_cmp(b).expect("percentile thresholds are never NaN"));
        valid.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        valid
    }
}
