//! Matchings — scored correspondences between two revisions.
//!
//! A [`Matching`] pairs one artifact from each of two trees and carries the
//! score the matcher assigned to the pair (the number of matched node pairs
//! in the subtree matching rooted at it). The color is purely diagnostic;
//! it drives the diff-only dump and nothing else.

use std::collections::BTreeMap;

use serde::Serialize;

use super::artifact::{Arena, ArtifactId};

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Diagnostic quality classification of a matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// The matched subtrees are structurally identical.
    Green,
    /// The subtrees match partially.
    Yellow,
    /// A top-level pair whose roots only matched through look-ahead.
    Red,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// One matched pair of artifacts with its score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Matching {
    pub left: ArtifactId,
    pub right: ArtifactId,
    /// Number of matched node pairs in the subtree matching, this pair
    /// included when the roots themselves match.
    pub score: usize,
    pub color: Color,
}

// ---------------------------------------------------------------------------
// Matchings
// ---------------------------------------------------------------------------

/// A set of matchings between two trees, indexed from both sides.
///
/// At most one matching per artifact and side; insertion enforces it.
#[derive(Clone, Debug, Default)]
pub struct Matchings {
    store: Vec<Matching>,
    by_left: BTreeMap<ArtifactId, usize>,
    by_right: BTreeMap<ArtifactId, usize>,
}

impl Matchings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a matching.
    ///
    /// # Panics
    /// In debug builds, if either side already appears in the set.
    pub fn add(&mut self, matching: Matching) {
        debug_assert!(
            !self.by_left.contains_key(&matching.left),
            "artifact {} matched twice",
            matching.left
        );
        debug_assert!(
            !self.by_right.contains_key(&matching.right),
            "artifact {} matched twice",
            matching.right
        );
        let index = self.store.len();
        self.by_left.insert(matching.left, index);
        self.by_right.insert(matching.right, index);
        self.store.push(matching);
    }

    #[must_use]
    pub fn get_by_left(&self, left: ArtifactId) -> Option<&Matching> {
        self.by_left.get(&left).map(|&i| &self.store[i])
    }

    #[must_use]
    pub fn get_by_right(&self, right: ArtifactId) -> Option<&Matching> {
        self.by_right.get(&right).map(|&i| &self.store[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Matching> {
        self.store.iter()
    }

    /// Record every pair in the arena's symmetric matches maps.
    pub fn store_in(&self, arena: &mut Arena) {
        for matching in &self.store {
            arena.set_match(matching.left, matching.right);
        }
    }
}

impl<'a> IntoIterator for &'a Matchings {
    type Item = &'a Matching;
    type IntoIter = std::slice::Iter<'a, Matching>;

    fn into_iter(self) -> Self::IntoIter {
        self.store.iter()
    }
}
