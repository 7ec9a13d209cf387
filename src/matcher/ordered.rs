//! Ordered child matching.
//!
//! Dynamic program over the grid of child indices, the Hunt–Szymanski
//! family: the "match" move takes the recursive subtree score on the
//! diagonal, the "skip" moves carry the running maximum up and left. The
//! traceback yields a matching that maximizes total score while preserving
//! child order, with each child in at most one pair.

use super::{MatchResult, Matcher};
use crate::model::artifact::ArtifactId;

/// Match the ordered child sequences of `left` and `right`.
///
/// Returns the combined children result; the caller adds the root pair.
pub(crate) fn match_children(
    matcher: &mut Matcher<'_>,
    left: ArtifactId,
    right: ArtifactId,
) -> MatchResult {
    let left_children: Vec<ArtifactId> = matcher.arena.node(left).children().to_vec();
    let right_children: Vec<ArtifactId> = matcher.arena.node(right).children().to_vec();
    let (n, m) = (left_children.len(), right_children.len());
    if n == 0 || m == 0 {
        return MatchResult::default();
    }

    // Subtree score for every child pair; memoized inside the matcher, so
    // the grid costs one lookup per cell after the first computation.
    let mut scores = vec![vec![0usize; m]; n];
    for (i, &lc) in left_children.iter().enumerate() {
        for (j, &rc) in right_children.iter().enumerate() {
            let budget = matcher.child_budget(lc);
            scores[i][j] = matcher.match_pair(lc, rc, budget).score;
        }
    }

    // dp[i][j]: best total over the first i left and j right children.
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            let skip = dp[i - 1][j].max(dp[i][j - 1]);
            let matched = dp[i - 1][j - 1] + scores[i - 1][j - 1];
            dp[i][j] = skip.max(matched);
        }
    }

    // Traceback; prefer the diagonal so equal-score alternatives resolve
    // to the leftmost alignment deterministically.
    let mut pairs = Vec::new();
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        let s = scores[i - 1][j - 1];
        if s > 0 && dp[i][j] == dp[i - 1][j - 1] + s {
            let budget = matcher.child_budget(left_children[i - 1]);
            let sub = matcher.match_pair(left_children[i - 1], right_children[j - 1], budget);
            pairs.extend_from_slice(&sub.pairs);
            i -= 1;
            j -= 1;
        } else if dp[i][j] == dp[i - 1][j] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();

    MatchResult {
        score: dp[n][m],
        pairs,
    }
}
