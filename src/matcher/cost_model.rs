//! Cost-model matching — global assignment search.
//!
//! Instead of dividing along the tree structure, this matcher considers
//! every pairing between the two whole trees and searches for the
//! assignment minimizing a weighted cost with five terms:
//!
//! | term | meaning | weight |
//! |------|---------|--------|
//! | renaming  | matched pair differs in payload                    | `wr` |
//! | ancestry  | parents of a matched pair are not matched together | `wn` |
//! | sibling   | matched siblings whose partners are not siblings   | `ws` |
//! | order     | order inversions among matched ordered siblings    | `wo` |
//! | unmatched | node left without a partner                        | `wa` |
//!
//! The search is an iterated probabilistic local improvement: starting
//! from a greedy assignment, each iteration reassigns one node (with
//! probability `p_assign` by a roulette over candidate partners weighted
//! by the inverse cost increase, otherwise to a uniformly random free
//! candidate) and keeps the move when the total cost does not grow.
//! Optionally a random fraction of the assignment is pinned per
//! iteration. Runs are deterministic for a fixed seed; independent
//! restarts may run on worker threads, lowest cost winning (ties to the
//! lowest restart index).
//!
//! Subtrees whose local assignment cost exceeds `re_match_bound` times
//! the best local cost among their siblings are re-matched recursively
//! and their pairs spliced into the result.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{collect_matchings, preorder};
use crate::context::{CostModelConfig, MergeContext};
use crate::error::MergeError;
use crate::model::artifact::{Arena, ArtifactId};
use crate::model::matching::Matchings;

/// Number of independent restarts when `parallel` is on.
const PARALLEL_RESTARTS: u64 = 4;

/// Entry point used by [`super::tree_match`] when the cost model is
/// enabled.
pub(crate) fn tree_match(
    arena: &Arena,
    ctx: &MergeContext,
    config: &CostModelConfig,
    left: ArtifactId,
    right: ArtifactId,
) -> Result<Matchings, MergeError> {
    let search = Search::new(arena, config, left, right);
    let (cost, assignment) = search.run(ctx)?;
    debug!(cost, "cost-model search finished");

    let mut pairs = search.to_pairs(&assignment);
    search.refine(ctx, &mut pairs)?;
    Ok(collect_matchings(arena, &pairs))
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Injective partial mapping between the node lists of the two trees.
#[derive(Clone, Debug)]
struct Assignment {
    to_right: Vec<Option<usize>>,
    to_left: Vec<Option<usize>>,
}

impl Assignment {
    fn empty(left_len: usize, right_len: usize) -> Self {
        Self {
            to_right: vec![None; left_len],
            to_left: vec![None; right_len],
        }
    }

    fn link(&mut self, i: usize, j: usize) {
        if let Some(old) = self.to_right[i] {
            self.to_left[old] = None;
        }
        if let Some(old) = self.to_left[j] {
            self.to_right[old] = None;
        }
        self.to_right[i] = Some(j);
        self.to_left[j] = Some(i);
    }

    fn unlink(&mut self, i: usize) {
        if let Some(j) = self.to_right[i].take() {
            self.to_left[j] = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

struct Search<'a> {
    arena: &'a Arena,
    config: &'a CostModelConfig,
    root_left: ArtifactId,
    root_right: ArtifactId,
    left_nodes: Vec<ArtifactId>,
    right_nodes: Vec<ArtifactId>,
    left_index: HashMap<ArtifactId, usize>,
    right_index: HashMap<ArtifactId, usize>,
    /// Per left node, the same-kind right nodes it may pair with.
    candidates: Vec<Vec<usize>>,
}

impl<'a> Search<'a> {
    fn new(
        arena: &'a Arena,
        config: &'a CostModelConfig,
        left: ArtifactId,
        right: ArtifactId,
    ) -> Self {
        let left_nodes = preorder(arena, left);
        let right_nodes = preorder(arena, right);
        let left_index = left_nodes
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let right_index: HashMap<ArtifactId, usize> = right_nodes
            .iter()
            .enumerate()
            .map(|(j, &id)| (id, j))
            .collect();

        let candidates = left_nodes
            .iter()
            .map(|&l| {
                let kind = arena.node(l).kind;
                right_nodes
                    .iter()
                    .enumerate()
                    .filter(|&(_, &r)| arena.node(r).kind == kind)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();

        Self {
            arena,
            config,
            root_left: left,
            root_right: right,
            left_nodes,
            right_nodes,
            left_index,
            right_index,
            candidates,
        }
    }

    /// Greedy start, in pre-order: first an unused structurally identical
    /// candidate (hash fast-path), else the first unused candidate with an
    /// equal payload.
    fn greedy(&self) -> Assignment {
        let left_hashes: Vec<u64> = self
            .left_nodes
            .iter()
            .map(|&l| self.arena.structural_hash(l))
            .collect();
        let right_hashes: Vec<u64> = self
            .right_nodes
            .iter()
            .map(|&r| self.arena.structural_hash(r))
            .collect();

        let mut assignment = Assignment::empty(self.left_nodes.len(), self.right_nodes.len());
        for (i, &l) in self.left_nodes.iter().enumerate() {
            let identical = self.candidates[i].iter().copied().find(|&j| {
                assignment.to_left[j].is_none()
                    && right_hashes[j] == left_hashes[i]
                    && self.arena.equals_structurally(l, self.right_nodes[j])
            });
            let chosen = identical.or_else(|| {
                let payload = &self.arena.node(l).payload;
                self.candidates[i].iter().copied().find(|&j| {
                    assignment.to_left[j].is_none()
                        && &self.arena.node(self.right_nodes[j]).payload == payload
                })
            });
            if let Some(j) = chosen {
                assignment.link(i, j);
            }
        }
        assignment
    }

    /// Total weighted cost of an assignment.
    fn cost(&self, assignment: &Assignment) -> f64 {
        let c = self.config;
        let mut total = 0.0;

        for (i, &l) in self.left_nodes.iter().enumerate() {
            let Some(j) = assignment.to_right[i] else {
                total += c.wa;
                continue;
            };
            let r = self.right_nodes[j];
            if self.arena.node(l).payload != self.arena.node(r).payload {
                total += c.wr;
            }
            if !self.parents_paired(assignment, l, r) {
                total += c.wn;
            }
        }
        total += c.wa
            * assignment
                .to_left
                .iter()
                .filter(|slot| slot.is_none())
                .count() as f64;

        // Sibling and order terms, per unordered pair of matched siblings.
        for (i, &l) in self.left_nodes.iter().enumerate() {
            let Some(j) = assignment.to_right[i] else {
                continue;
            };
            let Some(parent) = self.arena.node(l).parent() else {
                continue;
            };
            let siblings = self.arena.node(parent).children();
            let pos = siblings.iter().position(|&s| s == l).unwrap_or(0);
            for (pos2, &sibling) in siblings.iter().enumerate().skip(pos + 1) {
                let Some(&i2) = self.left_index.get(&sibling) else {
                    continue;
                };
                let Some(j2) = assignment.to_right[i2] else {
                    continue;
                };
                let r = self.right_nodes[j];
                let r2 = self.right_nodes[j2];
                let rp = self.arena.node(r).parent();
                let rp2 = self.arena.node(r2).parent();
                if rp.is_none() || rp != rp2 {
                    total += c.ws;
                } else if self.arena.node(parent).kind.ordered_children() {
                    let rsibs = self.arena.node(rp.unwrap_or(r)).children();
                    let rpos = rsibs.iter().position(|&s| s == r);
                    let rpos2 = rsibs.iter().position(|&s| s == r2);
                    if let (Some(rpos), Some(rpos2)) = (rpos, rpos2) {
                        if (pos < pos2) != (rpos < rpos2) {
                            total += c.wo;
                        }
                    }
                }
            }
        }
        total
    }

    fn parents_paired(&self, assignment: &Assignment, l: ArtifactId, r: ArtifactId) -> bool {
        let lp = self.arena.node(l).parent();
        let rp = self.arena.node(r).parent();
        match (lp, rp) {
            (None, None) => true,
            (Some(lp), Some(rp)) => {
                let Some(&lpi) = self.left_index.get(&lp) else {
                    return false;
                };
                let Some(&rpi) = self.right_index.get(&rp) else {
                    return false;
                };
                assignment.to_right[lpi] == Some(rpi)
            }
            _ => false,
        }
    }

    /// One seeded search restart.
    fn restart(
        &self,
        ctx: &MergeContext,
        restart_index: u64,
    ) -> Result<(f64, Assignment), MergeError> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(restart_index)),
            None => StdRng::from_entropy(),
        };

        let mut current = self.greedy();
        let mut current_cost = self.cost(&current);

        for _ in 0..self.config.iterations {
            ctx.cancellation().check("cost-model matcher")?;

            let pinned = self.pin_set(&mut rng, &current);
            let i = rng.gen_range(0..self.left_nodes.len());
            if pinned.contains(&i) || self.candidates[i].is_empty() {
                continue;
            }

            let proposal = if rng.gen::<f64>() < self.config.p_assign {
                self.roulette(&mut rng, &current, current_cost, i)
            } else {
                self.random_free(&mut rng, &current, i)
            };

            let mut next = current.clone();
            match proposal {
                Some(j) => next.link(i, j),
                None => next.unlink(i),
            }
            let next_cost = self.cost(&next);
            if next_cost <= current_cost {
                current = next;
                current_cost = next_cost;
            }
        }
        Ok((current_cost, current))
    }

    /// The pinned fraction of matched nodes for one iteration.
    fn pin_set(&self, rng: &mut StdRng, current: &Assignment) -> HashSet<usize> {
        if !self.config.fix_random_percentage {
            return HashSet::new();
        }
        let fraction = if self.config.fix_upper > self.config.fix_lower {
            rng.gen_range(self.config.fix_lower..=self.config.fix_upper)
        } else {
            self.config.fix_lower
        };
        let matched: Vec<usize> = (0..self.left_nodes.len())
            .filter(|&i| current.to_right[i].is_some())
            .collect();
        let count = (fraction * matched.len() as f64).floor() as usize;
        let mut pool = matched;
        let mut pinned = HashSet::new();
        for _ in 0..count {
            let pick = rng.gen_range(0..pool.len());
            pinned.insert(pool.swap_remove(pick));
        }
        pinned
    }

    /// Roulette proposal: candidates weighted by the inverse cost
    /// increase of reassigning `i` to them.
    fn roulette(
        &self,
        rng: &mut StdRng,
        current: &Assignment,
        current_cost: f64,
        i: usize,
    ) -> Option<usize> {
        let mut weighted = Vec::with_capacity(self.candidates[i].len());
        let mut total = 0.0;
        for &j in &self.candidates[i] {
            if current.to_right[i] == Some(j) {
                continue;
            }
            let mut trial = current.clone();
            trial.link(i, j);
            let delta = self.cost(&trial) - current_cost;
            let weight = 1.0 / (1.0 + delta.max(0.0));
            total += weight;
            weighted.push((j, weight));
        }
        if weighted.is_empty() || total <= 0.0 {
            return None;
        }
        let mut ticket = rng.gen::<f64>() * total;
        for (j, weight) in weighted {
            ticket -= weight;
            if ticket <= 0.0 {
                return Some(j);
            }
        }
        None
    }

    /// Uniform proposal over the currently free candidates of `i`.
    fn random_free(&self, rng: &mut StdRng, current: &Assignment, i: usize) -> Option<usize> {
        let free: Vec<usize> = self.candidates[i]
            .iter()
            .copied()
            .filter(|&j| current.to_left[j].is_none())
            .collect();
        if free.is_empty() {
            None
        } else {
            Some(free[rng.gen_range(0..free.len())])
        }
    }

    /// Run the configured number of restarts, in parallel when requested,
    /// and keep the best result.
    fn run(&self, ctx: &MergeContext) -> Result<(f64, Assignment), MergeError> {
        if !self.config.parallel {
            return self.restart(ctx, 0);
        }

        let results: Vec<Result<(f64, Assignment), MergeError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..PARALLEL_RESTARTS)
                .map(|index| scope.spawn(move || self.restart(ctx, index)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("cost-model worker panicked"))
                .collect()
        });

        let mut best: Option<(f64, Assignment)> = None;
        for result in results {
            let (cost, assignment) = result?;
            // Strict less-than keeps the lowest restart index on ties.
            if best.as_ref().map_or(true, |(b, _)| cost < *b) {
                best = Some((cost, assignment));
            }
        }
        best.ok_or_else(|| MergeError::InternalAssertion {
            detail: "cost-model search produced no result".to_owned(),
        })
    }

    /// Matched pairs in left pre-order.
    fn to_pairs(&self, assignment: &Assignment) -> Vec<(ArtifactId, ArtifactId)> {
        (0..self.left_nodes.len())
            .filter_map(|i| {
                assignment.to_right[i].map(|j| (self.left_nodes[i], self.right_nodes[j]))
            })
            .collect()
    }

    /// Re-match subtrees whose local cost sticks out beyond the
    /// configured bound, splicing the recursive result into `pairs`.
    fn refine(
        &self,
        ctx: &MergeContext,
        pairs: &mut Vec<(ArtifactId, ArtifactId)>,
    ) -> Result<(), MergeError> {
        if self.config.re_match_bound <= 0.0 {
            return Ok(());
        }
        let top_pairs: Vec<(ArtifactId, ArtifactId)> = pairs
            .iter()
            .copied()
            .filter(|&(l, _)| self.arena.node(l).parent() == Some(self.root_left))
            .filter(|&(l, _)| !self.arena.node(l).is_leaf())
            .collect();
        if top_pairs.len() < 2 {
            return Ok(());
        }

        let locals: Vec<f64> = top_pairs
            .iter()
            .map(|&(l, r)| self.local_cost(pairs, l, r))
            .collect();
        let best_local = locals.iter().copied().fold(f64::INFINITY, f64::min);
        if best_local <= 0.0 {
            return Ok(());
        }

        let mut inner = self.config.clone();
        inner.parallel = false;
        for (&(l, r), &local) in top_pairs.iter().zip(&locals) {
            if local > self.config.re_match_bound * best_local {
                debug!(local, best_local, "re-matching outlier subtree");
                let sub = tree_match(self.arena, ctx, &inner, l, r)?;
                pairs.retain(|&(pl, pr)| {
                    !super::in_subtree(self.arena, l, pl) && !super::in_subtree(self.arena, r, pr)
                });
                pairs.extend(sub.iter().map(|m| (m.left, m.right)));
            }
        }
        Ok(())
    }

    /// Cost of the assignment restricted to one matched subtree pair.
    fn local_cost(
        &self,
        pairs: &[(ArtifactId, ArtifactId)],
        left: ArtifactId,
        right: ArtifactId,
    ) -> f64 {
        let mut local = Assignment::empty(self.left_nodes.len(), self.right_nodes.len());
        for &(l, r) in pairs {
            if super::in_subtree(self.arena, left, l) && super::in_subtree(self.arena, right, r) {
                local.link(self.left_index[&l], self.right_index[&r]);
            }
        }
        // Nodes outside the subtree pair would all count as unmatched;
        // subtract that baseline so only the subtree contributes.
        let outside = self
            .left_nodes
            .iter()
            .filter(|&&l| !super::in_subtree(self.arena, left, l))
            .count()
            + self
                .right_nodes
                .iter()
                .filter(|&&r| !super::in_subtree(self.arena, right, r))
                .count();
        self.cost(&local) - self.config.wa * outside as f64
    }
}
