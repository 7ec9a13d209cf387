//! Unordered child matching.
//!
//! Children whose order carries no meaning (class members, directory
//! entries) are matched by a maximum-weight bipartite assignment over all
//! child pairs, edge weights being the recursive subtree scores. The
//! implementation is the Kuhn–Munkres potential/augmenting-path algorithm
//! on the negated score matrix, O(n³); zero-weight assignments are
//! dropped from the result so unmatched children stay unmatched.

use super::{MatchResult, Matcher};
use crate::model::artifact::ArtifactId;

/// Match the unordered child sets of `left` and `right`.
pub(crate) fn match_children(
    matcher: &mut Matcher<'_>,
    left: ArtifactId,
    right: ArtifactId,
) -> MatchResult {
    let left_children: Vec<ArtifactId> = matcher.arena.node(left).children().to_vec();
    let right_children: Vec<ArtifactId> = matcher.arena.node(right).children().to_vec();
    if left_children.is_empty() || right_children.is_empty() {
        return MatchResult::default();
    }

    let mut scores = vec![vec![0usize; right_children.len()]; left_children.len()];
    for (i, &lc) in left_children.iter().enumerate() {
        for (j, &rc) in right_children.iter().enumerate() {
            let budget = matcher.child_budget(lc);
            scores[i][j] = matcher.match_pair(lc, rc, budget).score;
        }
    }

    let assignment = max_weight_assignment(&scores);

    let mut pairs = Vec::new();
    let mut total = 0usize;
    // Emit in left child order so the result is deterministic.
    for (i, &lc) in left_children.iter().enumerate() {
        if let Some(j) = assignment[i] {
            if scores[i][j] > 0 {
                total += scores[i][j];
                let budget = matcher.child_budget(lc);
                let sub = matcher.match_pair(lc, right_children[j], budget);
                pairs.extend_from_slice(&sub.pairs);
            }
        }
    }

    MatchResult {
        score: total,
        pairs,
    }
}

/// Maximum-weight assignment over a rectangular weight matrix.
///
/// Returns, per row, the assigned column (every row of the smaller side is
/// assigned; callers filter zero-weight pairs). Implemented as Hungarian
/// minimization over negated weights with row/column potentials.
fn max_weight_assignment(weights: &[Vec<usize>]) -> Vec<Option<usize>> {
    let n = weights.len();
    let m = weights[0].len();
    let transposed = n > m;
    // The algorithm needs rows <= columns.
    let (rows, cols) = if transposed { (m, n) } else { (n, m) };
    let cost = |i: usize, j: usize| -> i64 {
        let w = if transposed {
            weights[j][i]
        } else {
            weights[i][j]
        };
        -(w as i64)
    };

    const INF: i64 = i64::MAX / 4;
    let mut u = vec![0i64; rows + 1];
    let mut v = vec![0i64; cols + 1];
    // p[j]: row matched to column j (1-based; 0 = free).
    let mut p = vec![0usize; cols + 1];
    let mut way = vec![0usize; cols + 1];

    for i in 1..=rows {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![INF; cols + 1];
        let mut used = vec![false; cols + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = INF;
            let mut j1 = 0usize;
            for j in 1..=cols {
                if !used[j] {
                    let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=cols {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![None; n];
    for j in 1..=cols {
        if p[j] != 0 {
            let (row, col) = (p[j] - 1, j - 1);
            if transposed {
                assignment[col] = Some(row);
            } else {
                assignment[row] = Some(col);
            }
        }
    }
    assignment
}
