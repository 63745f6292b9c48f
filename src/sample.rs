// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The handoff schema between the aggregator's flush and a [`crate::sink::Sink`]:
//! one [`OutgoingSample`] per emitted series (a timer or histogram key
//! produces several, one per percentile or bucket label), carrying its
//! re-materialized metadata and a value that is either a bare real
//! (gauges) or a named mapping (everything else), per the spec's
//! "dynamic sample-value shape" design note.

use std::collections::BTreeMap;

/// The kind-specific payload of one flushed series. A gauge is a bare
/// point-in-time reading; every other kind emits a named mapping of
/// fields (`rate`/`count`, `count`/`count_ps`/`lower`/`upper`/...).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Real(f64),
    Map(BTreeMap<String, f64>),
}

/// One flushed series, ready to hand to a sink.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct OutgoingSample {
    /// Destination bucket this sample was routed to.
    pub bucket: String,
    pub value: SampleValue,
    /// `client_ts` if the key had one, else the flush's wall clock.
    pub timestamp: f64,
    /// Full tag set including `name`, and `percentile`/`histogram` when
    /// applicable; never `bucket`, which only ever routes.
    pub metadata: BTreeMap<String, String>,
}

/// Builds the `{count, count_ps, lower, upper, sum, sum_squares, mean,
/// stdev?}` mapping shared by timer percentile samples and histogram
/// bucket samples, per §4.4. `interval_secs <= 0.0` skips `count_ps`
/// rather than dividing by zero (§7's flush error-guard).
#[must_use]
pub fn interval_stats_map(
    count: u64,
    sum: f64,
    sum_squares: f64,
    lower: f64,
    upper: f64,
    interval_secs: f64,
) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    let count_f = count as f64;
    map.insert("count".to_string(), count_f);
    if interval_secs > 0.0 {
        map.insert("count_ps".to_string(), count_f / interval_secs);
    }
    map.insert("lower".to_string(), lower);
    map.insert("upper".to_string(), upper);
    map.insert("sum".to_string(), sum);
    map.insert("sum_squares".to_string(), sum_squares);
    let mean = sum / count_f;
    map.insert("mean".to_string(), mean);
    if count > 1 {
        let variance = (sum_squares - 2.0 * mean * sum + count_f * mean * mean) / (count_f - 1.0);
        map.insert("stdev".to_string(), variance.max(0.0).sqrt());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_stats_map_omits_stdev_for_single_sample() {
        let map = interval_stats_map(1, 5.0, 25.0, 5.0, 5.0, 10.0);
        assert_eq!(map.get("count"), Some(&1.0));
        assert_eq!(map.get("count_ps"), Some(&0.1));
        assert_eq!(map.get("mean"), Some(&5.0));
        assert!(!map.contains_key("stdev"));
    }

    #[test]
    fn interval_stats_map_skips_rate_derived_field_when_interval_nonpositive() {
        let map = interval_stats_map(1, 5.0, 25.0, 5.0, 5.0, 0.0);
        assert!(!map.contains_key("count_ps"));
        assert_eq!(map.get("count"), Some(&1.0));
    }

    #[test]
    fn interval_stats_map_computes_stdev_over_ten_ascending_values() {
        // matches the spec's p=100 scenario: values 1..=10
        let map = interval_stats_map(10, 55.0, 385.0, 1.0, 10.0, 10.0);
        assert_eq!(map.get("mean"), Some(&5.5));
        let stdev = *map.get("stdev").unwrap();
        assert!((stdev - (82.5_f64 / 9.0).sqrt()).abs() < 1e-9);
    }
}
