//! N-way variant merge.
//!
//! Unifies two or more revisions into one tree annotated with choice
//! nodes. The driver is a left-fold: the accumulated result starts as the
//! first revision and each subsequent revision is merged in with
//! conditional merge forced on, so irreconcilable regions become choice
//! artifacts labeled by revision name instead of conflicts. A region that
//! already holds a choice node absorbs further variants, which is how
//! three diverging revisions end up as one choice with three labels.

use tracing::debug;

use super::{merge_two_way, MergeOutcome};
use crate::context::MergeContext;
use crate::error::MergeError;
use crate::model::artifact::{Arena, Revision};
use crate::model::scenario::MergeScenario;

/// Fold all scenario revisions into a variant-annotated MERGE tree.
///
/// The scenario must have arity ≥ 2; revisions are folded in scenario
/// order and choice labels accumulate the revision names.
pub fn merge_nway(
    arena: &mut Arena,
    ctx: &MergeContext,
    scenario: &MergeScenario,
) -> Result<MergeOutcome, MergeError> {
    ctx.cancellation().check(&scenario.to_string())?;
    if scenario.arity() < 2 {
        return Err(MergeError::InternalAssertion {
            detail: format!("n-way merge needs >= 2 revisions, got {}", scenario.arity()),
        });
    }

    // Sub-merges run under their own view with conditional merge forced
    // on; the caller's context stays untouched.
    let mut fold_ctx = ctx.isolated();
    fold_ctx.conditional_merge = true;

    let entries = scenario.entries();
    let (first_rev, first_root) = &entries[0];
    let mut acc = arena.clone_deep(*first_root, &Revision::Merge);
    let mut acc_label = first_rev.label().to_owned();
    let mut conflicts = 0usize;

    for (revision, root) in &entries[1..] {
        debug!(%revision, "folding revision into variant merge");
        let outcome = merge_two_way(
            arena,
            &fold_ctx,
            acc,
            *root,
            &acc_label,
            revision.label(),
        )?;
        acc = outcome.root.ok_or_else(|| MergeError::InternalAssertion {
            detail: "n-way fold produced an empty tree".to_owned(),
        })?;
        conflicts += outcome.conflicts;
        acc_label.push(',');
        acc_label.push_str(revision.label());
    }

    Ok(MergeOutcome {
        root: Some(acc),
        conflicts,
    })
}
