//! Tree matching — node correspondences between two revisions.
//!
//! [`tree_match`] is the single entry point: given two roots it produces
//! the set of matched node pairs that maximizes the total score, where the
//! score of a pair is the number of matched node pairs in the optimal
//! matching of its subtrees (the pair itself included when the roots
//! match).
//!
//! Dispatch per node kind: sequence children go through the dynamic
//! program in [`ordered`], set children through the maximum-weight
//! bipartite matcher in [`unordered`]. When the cost model is enabled on
//! the context, the global assignment search in [`cost_model`] replaces
//! both.
//!
//! # Look-ahead
//!
//! Two nodes whose kind or payload differ normally contribute an empty
//! matching. With a look-ahead budget the matcher keeps descending into
//! the mismatched subtrees, up to the configured depth, and reports the
//! best matching found below; per-kind overrides supersede the global
//! depth.
//!
//! Subtree results are memoized per (left, right, budget) within one
//! invocation, so the quadratic child grids never recompute a pair.

pub mod cost_model;
pub mod ordered;
pub mod unordered;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::context::{LookAhead, MergeContext};
use crate::error::MergeError;
use crate::model::artifact::{Arena, ArtifactId};
use crate::model::matching::{Color, Matching, Matchings};

// ---------------------------------------------------------------------------
// MatchResult
// ---------------------------------------------------------------------------

/// Outcome of matching one subtree pair: total score plus the matched
/// pairs, in left pre-order.
#[derive(Clone, Debug, Default)]
pub struct MatchResult {
    pub score: usize,
    pub pairs: Vec<(ArtifactId, ArtifactId)>,
}

impl MatchResult {
    fn empty() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Compute the matching between the trees rooted at `left` and `right`.
///
/// The returned set satisfies at-most-one per artifact and, for ordered
/// kinds, order preservation. Pairs are *not* yet stored in the arena;
/// callers decide via [`Matchings::store_in`].
pub fn tree_match(
    arena: &Arena,
    ctx: &MergeContext,
    left: ArtifactId,
    right: ArtifactId,
) -> Result<Matchings, MergeError> {
    ctx.cancellation().check("matcher")?;

    if let Some(config) = &ctx.cost_model {
        return cost_model::tree_match(arena, ctx, config, left, right);
    }

    let mut matcher = Matcher::new(arena, ctx);
    let budget = ctx.lookahead_for(arena.node(left).kind);
    let result = matcher.match_pair(left, right, budget);
    debug!(
        score = result.score,
        pairs = result.pairs.len(),
        "tree match finished"
    );
    Ok(matcher.into_matchings(&result))
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// One matching run: arena access plus the memo tables.
pub(crate) struct Matcher<'a> {
    pub(crate) arena: &'a Arena,
    ctx: &'a MergeContext,
    memo: HashMap<(ArtifactId, ArtifactId, LookAhead), Rc<MatchResult>>,
    hashes: HashMap<ArtifactId, u64>,
}

impl<'a> Matcher<'a> {
    fn new(arena: &'a Arena, ctx: &'a MergeContext) -> Self {
        Self {
            arena,
            ctx,
            memo: HashMap::new(),
            hashes: HashMap::new(),
        }
    }

    /// Whether two nodes may be matched to each other directly: same kind
    /// and same payload. Subtrees decide the rest recursively.
    fn roots_match(&self, left: ArtifactId, right: ArtifactId) -> bool {
        let (l, r) = (self.arena.node(left), self.arena.node(right));
        l.kind == r.kind && l.payload == r.payload
    }

    /// Memoized structural hash; the cheap equality prefilter.
    fn hash_of(&mut self, id: ArtifactId) -> u64 {
        if let Some(&hash) = self.hashes.get(&id) {
            return hash;
        }
        let hash = self.arena.structural_hash(id);
        self.hashes.insert(id, hash);
        hash
    }

    /// Match a subtree pair under the given look-ahead budget.
    pub(crate) fn match_pair(
        &mut self,
        left: ArtifactId,
        right: ArtifactId,
        budget: LookAhead,
    ) -> Rc<MatchResult> {
        let key = (left, right, budget);
        if let Some(cached) = self.memo.get(&key) {
            return Rc::clone(cached);
        }

        // Identical subtrees short-circuit the recursion: hash first,
        // then confirm, then pair node-for-node in pre-order.
        if self.hash_of(left) == self.hash_of(right)
            && self.arena.equals_structurally(left, right)
        {
            let pairs: Vec<(ArtifactId, ArtifactId)> = preorder(self.arena, left)
                .into_iter()
                .zip(preorder(self.arena, right))
                .collect();
            let result = Rc::new(MatchResult {
                score: pairs.len(),
                pairs,
            });
            self.memo.insert(key, Rc::clone(&result));
            return result;
        }

        let result = if self.roots_match(left, right) {
            let children = if self.arena.node(left).kind.ordered_children() {
                ordered::match_children(self, left, right)
            } else {
                unordered::match_children(self, left, right)
            };
            let mut pairs = Vec::with_capacity(children.pairs.len() + 1);
            pairs.push((left, right));
            pairs.extend_from_slice(&children.pairs);
            Rc::new(MatchResult {
                score: children.score + 1,
                pairs,
            })
        } else {
            self.lookahead(left, right, budget)
        };

        self.memo.insert(key, Rc::clone(&result));
        result
    }

    /// Root mismatch: descend into the subtrees searching for the best
    /// matching below, within the remaining budget.
    fn lookahead(
        &mut self,
        left: ArtifactId,
        right: ArtifactId,
        budget: LookAhead,
    ) -> Rc<MatchResult> {
        let Some(remaining) = budget.descend() else {
            return MatchResult::empty();
        };

        let mut best = MatchResult::empty();
        for &rc in self.arena.node(right).children() {
            let candidate = self.match_pair(left, rc, remaining);
            if candidate.score > best.score {
                best = candidate;
            }
        }
        for &lc in self.arena.node(left).children() {
            let candidate = self.match_pair(lc, right, remaining);
            if candidate.score > best.score {
                best = candidate;
            }
        }
        best
    }

    /// The look-ahead budget to use when recursing into a matched pair's
    /// children. A fresh per-kind budget applies below every matched node.
    pub(crate) fn child_budget(&self, child: ArtifactId) -> LookAhead {
        self.ctx.lookahead_for(self.arena.node(child).kind)
    }

    /// Convert a final result into an indexed, colored matching set.
    fn into_matchings(self, result: &MatchResult) -> Matchings {
        collect_matchings(self.arena, &result.pairs)
    }
}

/// Assemble an indexed, colored matching set from raw pairs. Per-pair
/// score is the number of matched pairs inside the left subtree; the color
/// heuristic classifies diagnostic quality only.
pub(crate) fn collect_matchings(arena: &Arena, pairs: &[(ArtifactId, ArtifactId)]) -> Matchings {
    let mut matchings = Matchings::new();
    for &(left, right) in pairs {
        let score = pairs
            .iter()
            .filter(|&&(l, _)| in_subtree(arena, left, l))
            .count();
        let color = if arena.equals_structurally(left, right) {
            Color::Green
        } else if score * 2 < arena.size(left).min(arena.size(right)) {
            Color::Red
        } else {
            Color::Yellow
        };
        matchings.add(Matching {
            left,
            right,
            score,
            color,
        });
    }
    matchings
}

/// Pre-order node list of a subtree.
pub(crate) fn preorder(arena: &Arena, root: ArtifactId) -> Vec<ArtifactId> {
    let mut nodes = Vec::with_capacity(arena.size(root));
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        nodes.push(id);
        for &child in arena.node(id).children().iter().rev() {
            stack.push(child);
        }
    }
    nodes
}

/// `true` if `node` lies in the subtree rooted at `root` (root included).
/// Walks parent links; trees are shallow enough that this beats
/// materializing descendant sets.
pub(crate) fn in_subtree(arena: &Arena, root: ArtifactId, node: ArtifactId) -> bool {
    let mut cursor = Some(node);
    while let Some(id) = cursor {
        if id == root {
            return true;
        }
        cursor = arena.node(id).parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::artifact::{ArtifactKind, Revision};

    fn method(arena: &mut Arena, rev: &Revision, name: &str, lines: &[&str]) -> ArtifactId {
        let m = arena.alloc(rev.clone(), ArtifactKind::Method, Some(name.to_owned()));
        for line in lines {
            let leaf = arena.alloc(rev.clone(), ArtifactKind::Line, Some((*line).to_owned()));
            arena.add_child(m, leaf);
        }
        m
    }

    fn class(arena: &mut Arena, rev: &Revision, methods: &[ArtifactId]) -> ArtifactId {
        let c = arena.alloc(rev.clone(), ArtifactKind::Class, Some("C".to_owned()));
        for &m in methods {
            arena.add_child(c, m);
        }
        c
    }

    #[test]
    fn identical_trees_match_completely() {
        let mut arena = Arena::new();
        let l = method(&mut arena, &Revision::Left, "m", &["a", "b"]);
        let r = method(&mut arena, &Revision::Right, "m", &["a", "b"]);

        let ctx = MergeContext::new();
        let matchings = tree_match(&arena, &ctx, l, r).unwrap();
        assert_eq!(matchings.len(), 3);
        let top = matchings.get_by_left(l).unwrap();
        assert_eq!(top.score, 3);
        assert_eq!(top.color, Color::Green);
    }

    #[test]
    fn reordered_set_children_still_match() {
        let mut arena = Arena::new();
        let l1 = method(&mut arena, &Revision::Left, "m1", &["a"]);
        let l2 = method(&mut arena, &Revision::Left, "m2", &["b"]);
        let left = class(&mut arena, &Revision::Left, &[l2, l1]);

        let r1 = method(&mut arena, &Revision::Right, "m1", &["a"]);
        let r2 = method(&mut arena, &Revision::Right, "m2", &["b"]);
        let right = class(&mut arena, &Revision::Right, &[r1, r2]);

        let ctx = MergeContext::new();
        let matchings = tree_match(&arena, &ctx, left, right).unwrap();
        // Root + two methods + two bodies, despite the reorder.
        assert_eq!(matchings.len(), 5);
        assert_eq!(matchings.get_by_left(l1).unwrap().right, r1);
        assert_eq!(matchings.get_by_left(l2).unwrap().right, r2);
    }

    #[test]
    fn ordered_children_preserve_order() {
        let mut arena = Arena::new();
        let left = method(&mut arena, &Revision::Left, "m", &["a", "b", "c"]);
        let right = method(&mut arena, &Revision::Right, "m", &["c", "a", "b"]);

        let ctx = MergeContext::new();
        let matchings = tree_match(&arena, &ctx, left, right).unwrap();

        // Root plus the longest in-order subsequence ["a", "b"].
        assert_eq!(matchings.len(), 3);
        let mut matched_positions: Vec<(usize, usize)> = Vec::new();
        for (i, &lc) in arena.node(left).children().iter().enumerate() {
            if let Some(m) = matchings.get_by_left(lc) {
                let j = arena
                    .node(right)
                    .children()
                    .iter()
                    .position(|&rc| rc == m.right)
                    .unwrap();
                matched_positions.push((i, j));
            }
        }
        for window in matched_positions.windows(2) {
            assert!(window[0].0 < window[1].0);
            assert!(window[0].1 < window[1].1);
        }
    }

    #[test]
    fn mismatched_roots_need_lookahead() {
        let mut arena = Arena::new();
        // Left: the method directly. Right: the method wrapped in a class.
        let lm = method(&mut arena, &Revision::Left, "m", &["a"]);
        let rm = method(&mut arena, &Revision::Right, "m", &["a"]);
        let right = class(&mut arena, &Revision::Right, &[rm]);

        let mut ctx = MergeContext::new();
        let matchings = tree_match(&arena, &ctx, lm, right).unwrap();
        assert!(matchings.is_empty());

        ctx.lookahead = LookAhead::Depth(1);
        let matchings = tree_match(&arena, &ctx, lm, right).unwrap();
        assert_eq!(matchings.get_by_left(lm).unwrap().right, rm);

        ctx.lookahead = LookAhead::Full;
        let matchings = tree_match(&arena, &ctx, lm, right).unwrap();
        assert_eq!(matchings.get_by_left(lm).unwrap().right, rm);
    }

    #[test]
    fn matching_is_symmetric_in_the_arena() {
        let mut arena = Arena::new();
        let l = method(&mut arena, &Revision::Left, "m", &["a", "b"]);
        let r = method(&mut arena, &Revision::Right, "m", &["b", "a"]);

        let ctx = MergeContext::new();
        let matchings = tree_match(&arena, &ctx, l, r).unwrap();
        matchings.store_in(&mut arena);

        for matching in &matchings {
            let left = arena.node(matching.left);
            let right = arena.node(matching.right);
            assert_eq!(left.get_match(&Revision::Right), Some(matching.right));
            assert_eq!(right.get_match(&Revision::Left), Some(matching.left));
        }
    }
}
