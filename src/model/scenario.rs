//! Merge scenarios — the bundle of revisions being merged together.
//!
//! A [`MergeScenario`] maps revision names to their root artifacts. It is
//! immutable after construction and insertion-ordered, so n-way folds and
//! variant labels are deterministic regardless of how the caller built the
//! revision set.

use std::fmt;

use crate::error::MergeError;
use crate::model::artifact::{ArtifactId, Revision};

/// Revision roots participating in one merge, in fold order.
///
/// Arity 3 for an ordinary three-way merge, 2 for a base-less two-way
/// merge, and ≥2 for n-way variant merges.
#[derive(Clone, Debug)]
pub struct MergeScenario {
    entries: Vec<(Revision, ArtifactId)>,
}

impl MergeScenario {
    /// A standard three-way scenario.
    #[must_use]
    pub fn three_way(base: ArtifactId, left: ArtifactId, right: ArtifactId) -> Self {
        Self {
            entries: vec![
                (Revision::Left, left),
                (Revision::Base, base),
                (Revision::Right, right),
            ],
        }
    }

    /// A base-less two-way scenario.
    #[must_use]
    pub fn two_way(left: ArtifactId, right: ArtifactId) -> Self {
        Self {
            entries: vec![(Revision::Left, left), (Revision::Right, right)],
        }
    }

    /// An n-way scenario over named revisions, folded in the given order.
    ///
    /// # Errors
    /// `InternalAssertion` if fewer than two revisions are supplied or a
    /// revision name repeats.
    pub fn n_way(revisions: Vec<(Revision, ArtifactId)>) -> Result<Self, MergeError> {
        if revisions.len() < 2 {
            return Err(MergeError::InternalAssertion {
                detail: format!(
                    "n-way scenario needs at least 2 revisions, got {}",
                    revisions.len()
                ),
            });
        }
        for (index, (revision, _)) in revisions.iter().enumerate() {
            if revisions[..index].iter().any(|(r, _)| r == revision) {
                return Err(MergeError::InternalAssertion {
                    detail: format!("revision {revision} appears twice in scenario"),
                });
            }
        }
        Ok(Self { entries: revisions })
    }

    /// The root artifact of `revision`, if present.
    #[must_use]
    pub fn get(&self, revision: &Revision) -> Option<ArtifactId> {
        self.entries
            .iter()
            .find(|(r, _)| r == revision)
            .map(|&(_, id)| id)
    }

    /// Revision/root pairs in fold order.
    #[must_use]
    pub fn entries(&self) -> &[(Revision, ArtifactId)] {
        &self.entries
    }

    /// Number of participating revisions.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for MergeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (revision, _) in &self.entries {
            if !first {
                f.write_str(" <-> ")?;
            }
            first = false;
            write!(f, "{revision}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::artifact::{Arena, ArtifactKind};

    #[test]
    fn three_way_lookup() {
        let mut arena = Arena::new();
        let b = arena.alloc(Revision::Base, ArtifactKind::File, None);
        let l = arena.alloc(Revision::Left, ArtifactKind::File, None);
        let r = arena.alloc(Revision::Right, ArtifactKind::File, None);

        let scenario = MergeScenario::three_way(b, l, r);
        assert_eq!(scenario.arity(), 3);
        assert_eq!(scenario.get(&Revision::Base), Some(b));
        assert_eq!(scenario.get(&Revision::Left), Some(l));
        assert_eq!(scenario.get(&Revision::Right), Some(r));
        assert_eq!(scenario.get(&Revision::Merge), None);
    }

    #[test]
    fn two_way_has_no_base() {
        let mut arena = Arena::new();
        let l = arena.alloc(Revision::Left, ArtifactKind::File, None);
        let r = arena.alloc(Revision::Right, ArtifactKind::File, None);

        let scenario = MergeScenario::two_way(l, r);
        assert_eq!(scenario.arity(), 2);
        assert_eq!(scenario.get(&Revision::Base), None);
        assert_eq!(scenario.to_string(), "LEFT <-> RIGHT");
    }

    #[test]
    fn n_way_rejects_degenerate_input() {
        let mut arena = Arena::new();
        let v1 = arena.alloc(
            Revision::Named("v1".to_owned()),
            ArtifactKind::File,
            None,
        );
        assert!(MergeScenario::n_way(vec![(Revision::Named("v1".to_owned()), v1)]).is_err());

        let dup = vec![
            (Revision::Named("v1".to_owned()), v1),
            (Revision::Named("v1".to_owned()), v1),
        ];
        assert!(MergeScenario::n_way(dup).is_err());
    }
}
