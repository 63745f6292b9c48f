// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pluggable classification of histogram sample values into labeled
//! buckets.
//!
//! Split into two traits mirroring `bucky3.statsd.handle_timer`'s two
//! call sites: [`HistogramSelector::classify`] runs once per *new*
//! key (the aggregator caches the resulting classifier alongside the
//! key's state), and [`ValueClassifier::labels_for`] runs once per
//! *value*. Splitting them lets a selector do expensive per-key setup
//! (e.g. picking thresholds based on a tag) without repeating it for
//! every sample.
//!
//! `labels_for` returns a `Vec<String>` rather than `Option<String>`
//! so the same trait covers both selector modes the spec asks for:
//! a single-label classifier returns at most one element, a
//! predicate-list classifier can return several. An empty vector
//! means the value matched nothing and is dropped, counted as a
//! `selector_misses` drop.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::key::NAME_TAG;

/// Chooses a [`ValueClassifier`] for a newly-seen histogram key.
pub trait HistogramSelector: Send + Sync {
    fn classify(&self, metadata: &BTreeMap<String, String>) -> Option<Arc<dyn ValueClassifier>>;
}

/// Maps one sample value to zero, one, or several bucket labels.
pub trait ValueClassifier: Send + Sync {
    fn labels_for(&self, value: f64) -> Vec<String>;
}

/// Single-label mode: a sorted list of `(upper_bound_inclusive, label)`
/// edges. The first edge the value doesn't exceed wins; a value past
/// every edge matches nothing (selector miss), matching bucky3's
/// bisect-based bucket lookup.
#[derive(Clone, Debug)]
pub struct ThresholdEdges {
    edges: Vec<(f64, String)>,
}

impl ThresholdEdges {
    /// `edges` need not be pre-sorted; construction sorts by bound.
    #[must_use]
    pub fn new(mut edges: Vec<(f64, String)>) -> Self {
        edges.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("threshold edge is NaN"));
        ThresholdEdges { edges }
    }
}

impl ValueClassifier for ThresholdEdges {
    fn labels_for(&self, value: f64) -> Vec<String> {
        for (bound, label) in &self.edges {
            if value <= *bound {
                return vec![label.clone()];
            }
        }
        Vec::new()
    }
}

/// Multi-label mode: every predicate whose condition holds contributes
/// its label, so one value can land in several buckets at once.
pub struct PredicateList {
    predicates: Vec<(String, Box<dyn Fn(f64) -> bool + Send + Sync>)>,
}

impl PredicateList {
    #[must_use]
    pub fn new(predicates: Vec<(String, Box<dyn Fn(f64) -> bool + Send + Sync>)>) -> Self {
        PredicateList { predicates }
    }
}

impl ValueClassifier for PredicateList {
    fn labels_for(&self, value: f64) -> Vec<String> {
        self.predicates
            .iter()
            .filter(|(_, predicate)| predicate(value))
            .map(|(label, _)| label.clone())
            .collect()
    }
}

/// A selector that hands out the same classifier for every key,
/// the common case when bucketing doesn't vary per metric.
pub struct StaticSelector {
    classifier: Arc<dyn ValueClassifier>,
}

impl StaticSelector {
    #[must_use]
    pub fn new(classifier: Arc<dyn ValueClassifier>) -> Self {
        StaticSelector { classifier }
    }
}

impl HistogramSelector for StaticSelector {
    fn classify(&self, _metadata: &BTreeMap<String, String>) -> Option<Arc<dyn ValueClassifier>> {
        Some(Arc::clone(&self.classifier))
    }
}

/// A selector that picks a classifier by metric name, for deployments
/// that bucket different histograms differently. Metric names absent
/// from the map yield no classifier, so keys for them are dropped with
/// a `selector_misses` count rather than accumulating unbounded state.
pub struct KeyedSelector {
    by_name: HashMap<String, Arc<dyn ValueClassifier>>,
}

impl KeyedSelector {
    #[must_use]
    pub fn new(by_name: HashMap<String, Arc<dyn ValueClassifier>>) -> Self {
        KeyedSelector { by_name }
    }
}

impl HistogramSelector for KeyedSelector {
    fn classify(&self, metadata: &BTreeMap<String, String>) -> Option<Arc<dyn ValueClassifier>> {
        let name = metadata.get(NAME_TAG)?;
        self.by_name.get(name).map(Arc::clone)
    }
}
