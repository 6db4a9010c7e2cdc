//! Flow tables: hospitalization counts keyed by origin, destination,
//! category and period, with an associative, commutative merge.

use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::period::Period;

/// Grouping key of an aggregated flow
///
/// `N` identifies a municipality: the raw record code before entity
/// resolution, the canonical key afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey<N> {
    pub origin: N,
    pub destination: N,
    pub category: Option<String>,
    pub period: Option<Period>,
}

impl<N> FlowKey<N> {
    /// Re-key the endpoints, keeping category and period
    pub fn map_nodes<M>(self, origin: M, destination: M) -> FlowKey<M> {
        FlowKey {
            origin,
            destination,
            category: self.category,
            period: self.period,
        }
    }
}

/// Hospitalization counts per flow key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTable<N: Eq + Hash> {
    counts: FxHashMap<FlowKey<N>, u64>,
}

impl<N: Eq + Hash> Default for FlowTable<N> {
    fn default() -> Self {
        Self {
            counts: FxHashMap::default(),
        }
    }
}

impl<N: Eq + Hash> FlowTable<N> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` hospitalizations to a key
    pub fn add(&mut self, key: FlowKey<N>, count: u64) {
        if count > 0 {
            *self.counts.entry(key).or_insert(0) += count;
        }
    }

    /// Merge another table into this one by summing counts per key
    ///
    /// Iterates the smaller table, so `a.merge(b)` and `b.merge(a)` cost the same.
    pub fn merge(&mut self, mut other: Self) {
        if other.counts.len() > self.counts.len() {
            std::mem::swap(&mut self.counts, &mut other.counts);
        }
        for (key, count) in other.counts {
            self.add(key, count);
        }
    }

    #[must_use]
    pub fn get(&self, key: &FlowKey<N>) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Total hospitalizations over all keys
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey<N>, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    /// Entries sorted by key, for deterministic downstream processing
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<(FlowKey<N>, u64)>
    where
        N: Ord,
    {
        let mut entries: Vec<_> = self.counts.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<N: Eq + Hash> FromIterator<(FlowKey<N>, u64)> for FlowTable<N> {
    fn from_iter<I: IntoIterator<Item = (FlowKey<N>, u64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, count) in iter {
            table.add(key, count);
        }
        table
    }
}
