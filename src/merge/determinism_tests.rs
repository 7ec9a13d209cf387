//! Property tests for merge determinism.
//!
//! The engine promises byte-identical output for identical inputs when
//! the cost model is disabled or seeded. These tests generate random line
//! files and random statement trees and verify the determinism and
//! trivial-merge invariants over them.
//!
//! Gated behind the `proptests` feature so `cargo test` stays fast; CI
//! runs `--features proptests`.

#![allow(clippy::all, clippy::pedantic)]

use proptest::prelude::*;

use crate::context::{CostModelConfig, MergeContext};
use crate::merge::linebased::merge_lines;
use crate::merge::merge_three_way;
use crate::model::artifact::{Arena, ArtifactId, ArtifactKind, Revision};
use crate::vfs::unparse;

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A short file over a tiny line alphabet, maximizing collisions.
fn arb_lines() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e"]), 0..8)
        .prop_map(|lines| lines.into_iter().map(|line| format!("{line}\n")).collect())
}

/// A statement list for one method body.
fn arb_statements() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["s0;", "s1;", "s2;", "s3;"]), 0..6)
        .prop_map(|statements| statements.into_iter().map(str::to_owned).collect())
}

fn method(arena: &mut Arena, revision: Revision, statements: &[String]) -> ArtifactId {
    let root = arena.alloc(revision.clone(), ArtifactKind::Method, Some("m".to_owned()));
    for statement in statements {
        let leaf = arena.alloc(
            revision.clone(),
            ArtifactKind::Statement,
            Some(statement.clone()),
        );
        arena.add_child(root, leaf);
    }
    root
}

/// Run one structured three-way merge and render the result.
fn run_structured(
    base: &[String],
    left: &[String],
    right: &[String],
    ctx: &MergeContext,
) -> (String, usize) {
    let mut arena = Arena::new();
    let b = method(&mut arena, Revision::Base, base);
    let l = method(&mut arena, Revision::Left, left);
    let r = method(&mut arena, Revision::Right, right);
    let outcome = merge_three_way(&mut arena, ctx, b, l, r).expect("merge failed");
    let text = outcome
        .root
        .map(|root| unparse(&arena, root))
        .unwrap_or_default();
    (text, outcome.conflicts)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn line_merge_is_deterministic(
        base in arb_lines(),
        left in arb_lines(),
        right in arb_lines(),
    ) {
        let first = merge_lines(&base, &left, &right, "LEFT", "RIGHT");
        let second = merge_lines(&base, &left, &right, "LEFT", "RIGHT");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn unchanged_left_adopts_right(base in arb_lines(), right in arb_lines()) {
        let result = merge_lines(&base, &base, &right, "LEFT", "RIGHT");
        prop_assert_eq!(result.merged, right);
        prop_assert_eq!(result.conflicts, 0);
    }

    #[test]
    fn unchanged_right_adopts_left(base in arb_lines(), left in arb_lines()) {
        let result = merge_lines(&base, &left, &base, "LEFT", "RIGHT");
        prop_assert_eq!(result.merged, left);
        prop_assert_eq!(result.conflicts, 0);
    }

    #[test]
    fn identical_inputs_merge_to_themselves(text in arb_lines()) {
        let result = merge_lines(&text, &text, &text, "LEFT", "RIGHT");
        prop_assert_eq!(result.merged, text);
        prop_assert_eq!(result.conflicts, 0);
    }

    #[test]
    fn structured_merge_is_deterministic(
        base in arb_statements(),
        left in arb_statements(),
        right in arb_statements(),
    ) {
        let ctx = MergeContext::new();
        let first = run_structured(&base, &left, &right, &ctx);
        let second = run_structured(&base, &left, &right, &ctx);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn seeded_cost_model_is_deterministic(
        base in arb_statements(),
        left in arb_statements(),
        right in arb_statements(),
    ) {
        let mut ctx = MergeContext::new();
        let mut config = CostModelConfig::default();
        config.iterations = 30;
        config.seed = Some(7);
        ctx.cost_model = Some(config);

        let first = run_structured(&base, &left, &right, &ctx);
        let second = run_structured(&base, &left, &right, &ctx);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn structured_identity_on_equal_inputs(statements in arb_statements()) {
        let ctx = MergeContext::new();
        let (text, conflicts) =
            run_structured(&statements, &statements, &statements, &ctx);
        let expected: String = statements
            .iter()
            .map(|statement| format!("{statement}\n"))
            .collect();
        prop_assert_eq!(text, expected);
        prop_assert_eq!(conflicts, 0);
    }
}
