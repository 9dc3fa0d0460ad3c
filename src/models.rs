//! Core data structures for collector membership
//!
//! This module defines the [`Collector`] identity and the [`MembershipSet`]
//! that tracks the currently live collector population.

use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;

// ============================================================================
// Collector
// ============================================================================

/// A live replica of the telemetry-collection workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collector {
    /// Replica name, the stable identity key
    pub name: String,
}

impl Collector {
    /// Create a collector from its replica name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// ============================================================================
// Membership Set
// ============================================================================

/// The known-live collector population, keyed by collector name
///
/// The watch loop owns the live set. Callbacks only ever receive a clone, so a
/// snapshot handed out never changes underneath its holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipSet {
    collectors: HashMap<String, Collector>,
}

impl MembershipSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a collector, keyed by its name
    ///
    /// Returns `true` if the name was not present before.
    pub fn insert(&mut self, collector: Collector) -> bool {
        self.collectors
            .insert(collector.name.clone(), collector)
            .is_none()
    }

    /// Remove a collector by name
    pub fn remove(&mut self, name: &str) -> Option<Collector> {
        self.collectors.remove(name)
    }

    /// Look up a collector by name
    pub fn get(&self, name: &str) -> Option<&Collector> {
        self.collectors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collectors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Iterate over the collectors in arbitrary order
    pub fn iter(&self) -> hash_map::Values<'_, String, Collector> {
        self.collectors.values()
    }

    /// Collector names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the whole population, returning whether membership changed
    pub fn replace_with(&mut self, other: MembershipSet) -> bool {
        if *self == other {
            return false;
        }
        *self = other;
        true
    }
}

impl FromIterator<Collector> for MembershipSet {
    fn from_iter<I: IntoIterator<Item = Collector>>(iter: I) -> Self {
        let mut set = Self::new();
        for collector in iter {
            set.insert(collector);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MembershipSet {
    type Item = &'a Collector;
    type IntoIter = hash_map::Values<'a, String, Collector>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================
