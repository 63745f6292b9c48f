// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns one line of the StatsD/DogStatsD wire protocol into a
//! [`ParsedLine`] ready for the aggregator.
//!
//! ```text
//! line     := name (":" sample)+ ("|#" tags)?
//! sample   := value "|" type ("|" rate)?
//! tags     := tag ("," tag)*
//! tag      := ident ( ":" | "=" ) tagvalue
//! ```
//!
//! Grounded on `bucky3.statsd.StatsDServer.handle_line` /
//! `handle_metadata` for the split-based multi-sample grammar, and on
//! the teacher's `metric::METRIC_REGEX` for the once-compiled-regex
//! idiom (here used for tag validation rather than the whole line,
//! since the packed-sample grammar doesn't fit one regex).

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::AggregatorConfig;
use crate::constants;
use crate::errors::{DropCounters, ParseError};
use crate::key::{Key, BUCKET_TAG, NAME_TAG, TIMESTAMP_TAG};

static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_name_regex() -> &'static Regex {
    #[allow(clippy::expect_used)]
    NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("failed to compile name regex")
    })
}

fn get_tag_regex() -> &'static Regex {
    #[allow(clippy::expect_used)]
    TAG_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<key>[A-Za-z][A-Za-z0-9_]*)[:=](?P<value>[A-Za-z0-9_:=+\-@?#./%<>*;&\[\]]+)$")
            .expect("failed to compile tag regex")
    })
}

fn is_valid_ident(s: &str) -> bool {
    get_name_regex().is_match(s)
}

/// The wire type of one sample, generalized from the single letter
/// (or pair of letters) that follows the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    Counter,
    Gauge,
    Set,
    Timer,
    Histogram,
}

impl SampleKind {
    /// Any type code the grammar doesn't recognize falls back to
    /// counter, per `bucky3.handle_line`'s trailing `else` branch.
    fn from_type_code(code: &str) -> SampleKind {
        match code {
            "g" => SampleKind::Gauge,
            "s" => SampleKind::Set,
            "ms" => SampleKind::Timer,
            "h" => SampleKind::Histogram,
            _ => SampleKind::Counter,
        }
    }
}

/// One `value|type[|rate]` chunk, already rate-scaled for counters.
#[derive(Clone, Debug)]
pub struct ParsedSample {
    pub kind: SampleKind,
    /// Original value text, needed by the aggregator to detect a
    /// leading `+`/`-` (gauge delta) or to record set membership by
    /// string identity rather than by parsed number.
    pub raw_value: String,
    /// Numeric value. Meaningless for `Set`, where `raw_value` is
    /// what gets recorded.
    pub value: f64,
}

/// A fully parsed line: its canonical [`Key`], the metadata that
/// produced it, any client-supplied timestamp, and the (possibly
/// empty, if every sample was individually malformed) list of samples
/// to apply.
#[derive(Clone, Debug)]
pub struct ParsedLine {
    pub key: Key,
    pub metadata: BTreeMap<String, String>,
    pub client_ts: Option<f64>,
    pub samples: Vec<ParsedSample>,
}

/// Parse one line, given the receiver's timestamp and the active
/// configuration (only `timestamp_window` is consulted).
///
/// Returns `Ok(None)` for lines that are *not errors* but carry no
/// metric (blank lines, DataDog service checks `sc|...` and events
/// `_e{...}`, dropped without error per §4.2).
///
/// Returns `Err` for the line-level failures that invalidate the
/// whole line: a bad name, a bad tag, too many tags, or a `timestamp`
/// tag outside the accepted window. A malformed individual sample
/// does *not* fail the line; it is dropped and its siblings survive,
/// matching `bucky3.handle_line`'s per-sample `try/except`.
pub fn parse_line(
    line: &str,
    recv_ts: f64,
    config: &AggregatorConfig,
    drops: &DropCounters,
) -> Result<Option<ParsedLine>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with("sc|") || line.starts_with("_e{") {
        return Ok(None);
    }

    let (body, tag_section) = match line.find("|#") {
        Some(idx) => (&line[..idx], Some(&line[idx + 2..])),
        None => (line, None),
    };

    let mut metadata = BTreeMap::new();
    let mut client_ts = None;

    if let Some(tag_section) = tag_section {
        let parts: Vec<&str> = tag_section.split(',').filter(|s| !s.is_empty()).collect();
        if parts.len() > constants::MAX_TAGS {
            return Err(ParseError::TooManyTags(constants::MAX_TAGS));
        }
        let tag_regex = get_tag_regex();
        for part in parts {
            let caps = tag_regex
                .captures(part)
                .ok_or_else(|| ParseError::InvalidTag(part.to_string()))?;
            let key = &caps["key"];
            let value = &caps["value"];
            match key {
                TIMESTAMP_TAG => {
                    let mut ts: f64 = value
                        .parse()
                        .map_err(|_| ParseError::InvalidTag(part.to_string()))?;
                    if ts > constants::TIMESTAMP_MS_THRESHOLD {
                        ts /= 1000.0;
                    }
                    if (recv_ts - ts).abs() > config.timestamp_window {
                        return Err(ParseError::TimestampOutOfWindow);
                    }
                    client_ts = Some(ts);
                }
                BUCKET_TAG => {
                    if !is_valid_ident(value) {
                        return Err(ParseError::InvalidBucket(value.to_string()));
                    }
                    metadata.insert(BUCKET_TAG.to_string(), value.to_string());
                }
                _ => {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    let mut segments = body.split(':');
    let name = segments
        .next()
        .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
    if !is_valid_ident(name) {
        return Err(ParseError::InvalidName(name.to_string()));
    }
    metadata.insert(NAME_TAG.to_string(), name.to_string());

    let mut samples = Vec::new();
    let mut saw_sample = false;
    for segment in segments {
        saw_sample = true;
        match parse_sample(segment) {
            Some(sample) => samples.push(sample),
            None => {
                drops.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    if !saw_sample {
        return Err(ParseError::Malformed(line.to_string()));
    }

    let key = Key::from_metadata(&metadata);
    Ok(Some(ParsedLine {
        key,
        metadata,
        client_ts,
        samples,
    }))
}

fn parse_sample(segment: &str) -> Option<ParsedSample> {
    let fields: Vec<&str> = segment.split('|').collect();
    if fields.len() < 2 {
        return None;
    }
    let value_text = fields[0];
    if value_text.is_empty() {
        return None;
    }
    let kind = SampleKind::from_type_code(fields[1]);
    let rate_text = fields.get(2).copied();

    if kind == SampleKind::Set {
        return Some(ParsedSample {
            kind,
            raw_value: value_text.to_string(),
            value: 0.0,
        });
    }

    let mut value: f64 = value_text.parse().ok()?;

    if kind == SampleKind::Counter {
        if let Some(rate_text) = rate_text {
            if let Some(rate_text) = rate_text.strip_prefix('@') {
                let rate: f64 = rate_text.parse().ok()?;
                if rate <= 0.0 || rate > 1.0 {
                    return None;
                }
                value /= rate;
            }
        }
    }

    Some(ParsedSample {
        kind,
        raw_value: value_text.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AggregatorConfig {
        AggregatorConfig::default()
    }

    #[test]
    fn counter_with_rate() {
        let drops = DropCounters::default();
        let parsed = parse_line("requests:3|c|@0.5", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.key.name(), "requests");
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].kind, SampleKind::Counter);
        assert!((parsed.samples[0].value - 6.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_rate_drops_only_that_sample() {
        let drops = DropCounters::default();
        let parsed = parse_line("requests:3|c|@2.0:5|c", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        // the first sample's rate is out of (0,1], the second has none and survives
        assert_eq!(parsed.samples.len(), 1);
        assert!((parsed.samples[0].value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn gauge_delta_keeps_sign_text() {
        let drops = DropCounters::default();
        let parsed = parse_line("temp:+2|g", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.samples[0].raw_value, "+2");
        assert!((parsed.samples[0].value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn set_keeps_string_identity() {
        let drops = DropCounters::default();
        let parsed = parse_line("users:alice|s", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.samples[0].raw_value, "alice");
        assert_eq!(parsed.samples[0].kind, SampleKind::Set);
    }

    #[test]
    fn unrecognized_type_falls_back_to_counter() {
        let drops = DropCounters::default();
        let parsed = parse_line("odd:4|xyz", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.samples[0].kind, SampleKind::Counter);
    }

    #[test]
    fn timestamp_tag_in_milliseconds_is_normalized() {
        let drops = DropCounters::default();
        let parsed = parse_line(
            "x:1|c|#timestamp=1700000000000",
            1_700_000_000.0,
            &cfg(),
            &drops,
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed.client_ts, Some(1_700_000_000.0));
    }

    #[test]
    fn timestamp_outside_window_drops_whole_line() {
        let drops = DropCounters::default();
        let err = parse_line("x:1|c|#timestamp=1000", 1_700_000_000.0, &cfg(), &drops).unwrap_err();
        assert_eq!(err, ParseError::TimestampOutOfWindow);
    }

    #[test]
    fn bucket_override_is_recorded_and_validated() {
        let drops = DropCounters::default();
        let parsed = parse_line("probe:1|c|#bucket=custom_bucket", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed.metadata.get(BUCKET_TAG),
            Some(&"custom_bucket".to_string())
        );

        let err = parse_line(
            "probe:1|c|#bucket=not-an-ident",
            1_700_000_000.0,
            &cfg(),
            &drops,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidBucket(_)));
    }

    #[test]
    fn permuted_tags_produce_identical_key() {
        let drops = DropCounters::default();
        let a = parse_line("reqs:1|c|#a:1,b:2", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        let b = parse_line("reqs:1|c|#b:2,a:1", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn service_checks_and_events_are_dropped_silently() {
        let drops = DropCounters::default();
        assert!(parse_line("sc|my.check|0", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .is_none());
        assert!(parse_line("_e{5,10}:title|text", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .is_none());
    }

    #[test]
    fn invalid_name_is_rejected() {
        let drops = DropCounters::default();
        let err = parse_line("1invalid:1|c", 1_700_000_000.0, &cfg(), &drops).unwrap_err();
        assert!(matches!(err, ParseError::InvalidName(_)));
    }

    #[test]
    fn multi_sample_line_dispatches_each_independently() {
        let drops = DropCounters::default();
        let parsed = parse_line("m:1|c:2|g:v|s", 1_700_000_000.0, &cfg(), &drops)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.samples.len(), 3);
        assert_eq!(parsed.samples[0].kind, SampleKind::Counter);
        assert_eq!(parsed.samples[1].kind, SampleKind::Gauge);
        assert_eq!(parsed.samples[2].kind, SampleKind::Set);
    }

    #[test]
    fn invalid_tag_rejects_whole_line() {
        let drops = DropCounters::default();
        let err = parse_line("m:1|c|#bad tag", 1_700_000_000.0, &cfg(), &drops).unwrap_err();
        assert!(matches!(err, ParseError::InvalidTag(_)));
    }

    proptest::proptest! {
        /// Any well-formed `name:value|c` counter line round-trips its
        /// numeric value through the parser regardless of magnitude or
        /// sign, since a bare counter sample carries no `@rate` scaling.
        #[test]
        fn counter_value_survives_arbitrary_magnitude(value in -1.0e6f64..1.0e6f64) {
            let drops = DropCounters::default();
            let line = format!("arbitrary.counter:{value}|c");
            let parsed = parse_line(&line, 1_700_000_000.0, &cfg(), &drops).unwrap().unwrap();
            prop_assert_eq!(parsed.samples.len(), 1);
            prop_assert!((parsed.samples[0].value - value).abs() < 1e-6);
        }

        /// Tag order never changes the canonical key, for any number of
        /// well-formed `key:value` tag pairs.
        #[test]
        fn tag_permutation_never_changes_the_canonical_key(
            raw in proptest::collection::hash_map("[a-z]{1,6}", "[a-z]{1,6}", 1..6),
        ) {
            let pairs: Vec<String> = raw.iter().map(|(k, v)| format!("{k}:{v}")).collect();
            let drops_a = DropCounters::default();
            let drops_b = DropCounters::default();
            let tags = pairs.join(",");
            let forward = format!("reqs:1|c|#{tags}");
            let reversed = format!("reqs:1|c|#{}", pairs.iter().rev().cloned().collect::<Vec<_>>().join(","));

            let a = parse_line(&forward, 1_700_000_000.0, &cfg(), &drops_a).unwrap();
            let b = parse_line(&reversed, 1_700_000_000.0, &cfg(), &drops_b).unwrap();
            if let (Some(a), Some(b)) = (a, b) {
                prop_assert_eq!(a.key, b.key);
            }
        }
    }
}
