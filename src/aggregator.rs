// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The aggregation of metrics: five disjoint per-kind tables keyed by
//! [`Key`], updated line by line and drained on each flush tick.
//!
//! Flush semantics (an Open Question the distilled spec leaves to the
//! implementation, resolved explicitly in its own favor): a key's
//! accumulator resets to its identity value after being read, but the
//! key itself survives until [`Aggregator::flush`] finds it has gone
//! longer than its kind's configured timeout without a new sample —
//! "preserve keys, reset accumulators," not "evict on every flush."
//! Gauges are the exception: their last value persists across flushes
//! unless overwritten, since a gauge represents a point-in-time
//! reading rather than an interval total.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::config::AggregatorConfig;
use crate::errors::{Creation, DropCounters};
use crate::histogram::{HistogramSelector, ValueClassifier};
use crate::key::{Key, BUCKET_TAG, HISTOGRAM_TAG, PERCENTILE_TAG};
use crate::parser::{ParsedLine, SampleKind};
use crate::sample::{interval_stats_map, OutgoingSample, SampleValue};

#[derive(Debug, Clone, Copy)]
struct CounterState {
    value: f64,
    last_recv_ts: f64,
    client_ts: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct GaugeState {
    value: f64,
    last_recv_ts: f64,
    client_ts: Option<f64>,
}

#[derive(Debug, Clone)]
struct SetState {
    members: HashSet<String>,
    last_recv_ts: f64,
    client_ts: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct TimerState {
    values: Vec<f64>,
    last_recv_ts: f64,
    client_ts: Option<f64>,
}

/// Running `(n, sum, sum_sq, min, max)` for one histogram bucket
/// label, per §3's per-kind state.
#[derive(Debug, Clone, Copy)]
struct BucketAccumulator {
    n: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl BucketAccumulator {
    fn record(&mut self, value: f64) {
        self.n += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

struct HistogramEntry {
    classifier: Arc<dyn ValueClassifier>,
    buckets: BTreeMap<String, BucketAccumulator>,
    last_recv_ts: f64,
    client_ts: Option<f64>,
}

pub struct Aggregator {
    counters: HashMap<Key, CounterState>,
    gauges: HashMap<Key, GaugeState>,
    sets: HashMap<Key, SetState>,
    timers: HashMap<Key, TimerState>,
    histograms: HashMap<Key, HistogramEntry>,
    histogram_selector: Option<Arc<dyn HistogramSelector>>,
    config: AggregatorConfig,
    drops: Arc<DropCounters>,
}

impl Aggregator {
    /// # Errors
    ///
    /// Returns [`Creation::NoPercentiles`] if, after filtering to
    /// `(0, 100]`, `config.percentile_thresholds` is empty — a timer
    /// flush with no thresholds configured can't produce anything
    /// useful.
    pub fn new(
        config: AggregatorConfig,
        histogram_selector: Option<Arc<dyn HistogramSelector>>,
        drops: Arc<DropCounters>,
    ) -> Result<Self, Creation> {
        if config.valid_percentiles().is_empty() {
            return Err(Creation::NoPercentiles);
        }
        Ok(Aggregator {
            counters: HashMap::new(),
            gauges: HashMap::new(),
            sets: HashMap::new(),
            timers: HashMap::new(),
            histograms: HashMap::new(),
            histogram_selector,
            config,
            drops,
        })
    }

    /// Apply every sample carried by one parsed line. `recv_ts` is the
    /// receiver's own clock and always drives eviction; `line.client_ts`,
    /// when present, is recorded separately and used only to stamp the
    /// sample this key eventually materializes into.
    pub fn insert_line(&mut self, line: ParsedLine, recv_ts: f64) {
        let client_ts = line.client_ts;
        for sample in line.samples {
            match sample.kind {
                SampleKind::Counter => {
                    let entry = self
                        .counters
                        .entry(line.key.clone())
                        .or_insert(CounterState {
                            value: 0.0,
                            last_recv_ts: recv_ts,
                            client_ts,
                        });
                    entry.value += sample.value;
                    entry.last_recv_ts = recv_ts;
                    entry.client_ts = client_ts;
                }
                SampleKind::Gauge => {
                    let is_delta = sample.raw_value.starts_with('+') || sample.raw_value.starts_with('-');
                    let existed = self.gauges.contains_key(&line.key);
                    let entry = self.gauges.entry(line.key.clone()).or_insert(GaugeState {
                        value: 0.0,
                        last_recv_ts: recv_ts,
                        client_ts,
                    });
                    if is_delta && existed {
                        entry.value += sample.value;
                    } else {
                        entry.value = sample.value;
                    }
                    entry.last_recv_ts = recv_ts;
                    entry.client_ts = client_ts;
                }
                SampleKind::Set => {
                    let entry = self.sets.entry(line.key.clone()).or_insert_with(|| SetState {
                        members: HashSet::new(),
                        last_recv_ts: recv_ts,
                        client_ts,
                    });
                    entry.members.insert(sample.raw_value.clone());
                    entry.last_recv_ts = recv_ts;
                    entry.client_ts = client_ts;
                }
                SampleKind::Timer => {
                    let entry = self.timers.entry(line.key.clone()).or_default();
                    entry.values.push(sample.value);
                    entry.last_recv_ts = recv_ts;
                    entry.client_ts = client_ts;
                }
                SampleKind::Histogram => {
                    self.insert_histogram_sample(&line, sample.value, recv_ts, client_ts);
                }
            }
        }
    }

    fn insert_histogram_sample(&mut self, line: &ParsedLine, value: f64, recv_ts: f64, client_ts: Option<f64>) {
        if !self.histograms.contains_key(&line.key) {
            let Some(selector) = self.histogram_selector.as_ref() else {
                self.drops.selector_misses.fetch_add(1, Ordering::Relaxed);
                return;
            };
            let Some(classifier) = selector.classify(&line.metadata) else {
                self.drops.selector_misses.fetch_add(1, Ordering::Relaxed);
                return;
            };
            self.histograms.insert(
                line.key.clone(),
                HistogramEntry {
                    classifier,
                    buckets: BTreeMap::new(),
                    last_recv_ts: recv_ts,
                    client_ts,
                },
            );
        }
        let entry = self.histograms.get_mut(&line.key).expect("just inserted or present");
        let labels = entry.classifier.labels_for(value);
        if labels.is_empty() {
            self.drops.selector_misses.fetch_add(1, Ordering::Relaxed);
        } else {
            for label in labels {
                entry
                    .buckets
                    .entry(label)
                    .or_insert(BucketAccumulator { n: 0, sum: 0.0, sum_sq: 0.0, min: value, max: value })
                    .record(value);
            }
        }
        entry.last_recv_ts = recv_ts;
        entry.client_ts = client_ts;
    }

    /// Drain every kind's table into its flushed samples, evicting any
    /// key untouched for longer than its kind's own configured timeout,
    /// and otherwise resetting accumulators (gauges excepted) to their
    /// identity value so the next interval starts clean without losing
    /// the key.
    ///
    /// `wall_now` is the flush's reference clock; `interval_secs` is
    /// the actual elapsed time since the previous flush, used for
    /// `count_ps` rather than the configured target interval so a
    /// delayed tick doesn't skew the rate.
    pub fn flush(&mut self, wall_now: f64, interval_secs: f64) -> Vec<OutgoingSample> {
        let timeouts = &self.config.kind_timeouts;
        let counters_timeout = timeouts.counters.as_secs_f64();
        let gauges_timeout = timeouts.gauges.as_secs_f64();
        let sets_timeout = timeouts.sets.as_secs_f64();
        let timers_timeout = timeouts.timers.as_secs_f64();
        let histograms_timeout = timeouts.histograms.as_secs_f64();
        let mut out = Vec::new();

        let bucket_names = self.config.bucket_names.clone();

        self.counters.retain(|key, state| {
            if wall_now - state.last_recv_ts > counters_timeout {
                return false;
            }
            let ts = state.client_ts.unwrap_or(wall_now);
            let mut values = BTreeMap::new();
            if interval_secs > 0.0 {
                values.insert("rate".to_string(), state.value / interval_secs);
            }
            values.insert("count".to_string(), state.value);
            out.push(materialize(key, &bucket_names.counters, ts, SampleValue::Map(values), &[]));
            state.value = 0.0;
            true
        });

        self.gauges.retain(|key, state| {
            if wall_now - state.last_recv_ts > gauges_timeout {
                return false;
            }
            let ts = state.client_ts.unwrap_or(wall_now);
            out.push(materialize(key, &bucket_names.gauges, ts, SampleValue::Real(state.value), &[]));
            true
        });

        self.sets.retain(|key, state| {
            if wall_now - state.last_recv_ts > sets_timeout {
                return false;
            }
            let ts = state.client_ts.unwrap_or(wall_now);
            let mut values = BTreeMap::new();
            values.insert("count".to_string(), state.members.len() as f64);
            out.push(materialize(key, &bucket_names.sets, ts, SampleValue::Map(values), &[]));
            state.members.clear();
            true
        });

        let percentiles = self.config.valid_percentiles();
        self.timers.retain(|key, state| {
            if wall_now - state.last_recv_ts > timers_timeout {
                return false;
            }
            let ts = state.client_ts.unwrap_or(wall_now);
            if state.values.is_empty() {
                let mut values = BTreeMap::new();
                values.insert("count".to_string(), 0.0);
                values.insert("count_ps".to_string(), 0.0);
                out.push(materialize(key, &bucket_names.timers, ts, SampleValue::Map(values), &[]));
            } else {
                let mut sorted = state.values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("timer value is NaN"));
                let n = sorted.len();
                for &p in &percentiles {
                    let k = if p < 100.0 {
                        ((p / 100.0) * n as f64).floor() as usize
                    } else {
                        n
                    };
                    let k = k.clamp(1, n);
                    let prefix = &sorted[..k];
                    let sum: f64 = prefix.iter().sum();
                    let sum_sq: f64 = prefix.iter().map(|v| v * v).sum();
                    let values = interval_stats_map(k as u64, sum, sum_sq, prefix[0], prefix[k - 1], interval_secs);
                    out.push(materialize(
                        key,
                        &bucket_names.timers,
                        ts,
                        SampleValue::Map(values),
                        &[(PERCENTILE_TAG, format_percentile(p))],
                    ));
                }
            }
            state.values.clear();
            true
        });

        self.histograms.retain(|key, entry| {
            if wall_now - entry.last_recv_ts > histograms_timeout {
                return false;
            }
            let ts = entry.client_ts.unwrap_or(wall_now);
            for (label, bucket) in &entry.buckets {
                if bucket.n == 0 {
                    continue;
                }
                let values = interval_stats_map(bucket.n, bucket.sum, bucket.sum_sq, bucket.min, bucket.max, interval_secs);
                out.push(materialize(
                    key,
                    &bucket_names.histograms,
                    ts,
                    SampleValue::Map(values),
                    &[(HISTOGRAM_TAG, label.clone())],
                ));
            }
            entry.buckets.clear();
            true
        });

        out
    }

    #[must_use]
    pub fn drop_counters(&self) -> &DropCounters {
        &self.drops
    }

    #[cfg(test)]
    fn counter_value(&self, key: &Key) -> Option<f64> {
        self.counters.get(key).map(|s| s.value)
    }

    #[cfg(test)]
    fn gauge_value(&self, key: &Key) -> Option<f64> {
        self.gauges.get(key).map(|s| s.value)
    }
}

fn materialize(
    key: &Key,
    default_bucket: &str,
    timestamp: f64,
    value: SampleValue,
    extra_tags: &[(&str, String)],
) -> OutgoingSample {
    let bucket = key.get(BUCKET_TAG).map_or_else(|| default_bucket.to_string(), str::to_string);
    let mut metadata = key.to_metadata_without(BUCKET_TAG);
    for (tag, val) in extra_tags {
        metadata.insert((*tag).to_string(), val.clone());
    }
    OutgoingSample {
        metadata,
        bucket,
        timestamp,
        value,
    }
}

/// Textual form of a percentile threshold for the `percentile` tag:
/// whole numbers print without a trailing `.0` (`"90"`, not `"90.0"`),
/// matching bucky3's `str(int(p)) if p == int(p) else str(p)`.
fn format_percentile(p: f64) -> String {
    if (p - p.trunc()).abs() < f64::EPSILON {
        format!("{}", p as i64)
    } else {
        format!("{p}")
    }
}
