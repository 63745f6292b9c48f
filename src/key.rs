// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The canonical sample key: a metric name plus a sorted tag set.
//!
//! Grounded on the teacher's `metric::SortedTags`, generalized so the
//! reserved `name` tag lives inside the same sorted vector rather than
//! alongside it — a `Key` is then self-sufficient and directly usable
//! as a hash map key, matching `bucky3.statsd.handle_key`'s
//! `tuple(sorted(metadata.items()))`.

use std::collections::BTreeMap;
use ustr::Ustr;

pub const NAME_TAG: &str = "name";
pub const BUCKET_TAG: &str = "bucket";
pub const TIMESTAMP_TAG: &str = "timestamp";
pub const PERCENTILE_TAG: &str = "percentile";
pub const HISTOGRAM_TAG: &str = "histogram";

/// A canonical, order-independent identity for one aggregated series.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    tags: Vec<(Ustr, Ustr)>,
}

impl Key {
    /// Build a `Key` from an arbitrary iterator of tag pairs,
    /// deduplicating and sorting so permuted input yields an identical
    /// key (the "key canonicalization" testable property).
    pub fn from_pairs<I, K, V>(pairs: I) -> Key
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tags: Vec<(Ustr, Ustr)> = pairs
            .into_iter()
            .map(|(k, v)| (Ustr::from(k.as_ref()), Ustr::from(v.as_ref())))
            .collect();
        tags.sort_unstable();
        tags.dedup();
        Key { tags }
    }

    /// Build a `Key` from a metadata map, as produced by the parser.
    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Key {
        Key::from_pairs(metadata.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// The metric name, which is always present as the reserved `name` tag.
    pub fn name(&self) -> &str {
        self.tags
            .iter()
            .find(|(k, _)| k.as_str() == NAME_TAG)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.as_str() == tag)
            .map(|(_, v)| v.as_str())
    }

    /// Re-materialize this key as a metadata map, e.g. to seed the
    /// metadata of a sample emitted at flush time.
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Same as [`Key::to_metadata`] but with `tag` removed — used when
    /// a `bucket` tag routes the sample and must not also appear in
    /// its emitted metadata.
    pub fn to_metadata_without(&self, tag: &str) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .filter(|(k, _)| k.as_str() != tag)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
