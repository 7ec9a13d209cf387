//! The merge driver — classification and tree synthesis.
//!
//! Given the matchings BASE↔LEFT and BASE↔RIGHT, every base node is
//! classified per side as *unchanged* (matched, subtrees structurally
//! equal), *deleted* (no match), or *changed*; nodes without a base
//! correspondent are *added*. Synthesis walks the three trees together and
//! emits a fresh tree in the MERGE revision:
//!
//! 1. unchanged on both sides → clone of BASE;
//! 2. changed on exactly one side → that side;
//! 3. deleted on one side, unchanged on the other → removed;
//! 4. deleted on one side, changed on the other → conflict;
//! 5. changed on both sides, matched to each other through BASE → recurse
//!    into the children, splicing unmatched additions;
//! 6. changed on both sides, irreconcilable → conflict at the parent;
//! 7. added on one side → inserted;
//! 8. added identically on both sides → one copy;
//! 9. added differently on both sides at the same anchor → conflict.
//!
//! Leaf artifacts with textual payloads delegate to the line merger; a
//! clean line merge produces a merged leaf, a conflicting one becomes a
//! conflict artifact wrapping both variants.
//!
//! Under conditional merge, rules 4/6/9 produce choice artifacts labeled
//! by revision instead of conflicts (suppressed outside method scope
//! unless configured otherwise). A left-hand choice node absorbs the
//! right variant instead of nesting, which is what lets the n-way fold
//! accumulate one variant per revision.
//!
//! Splicing tie-breaks are fixed: matched children follow LEFT's order;
//! additions attach after the merged output of their nearest preceding
//! matched sibling, LEFT additions before RIGHT additions at the same
//! anchor.

pub mod linebased;
pub mod nway;

#[cfg(all(test, feature = "proptests"))]
mod determinism_tests;

use tracing::{debug, trace};

use crate::context::MergeContext;
use crate::error::MergeError;
use crate::matcher::tree_match;
use crate::model::artifact::{Arena, ArtifactId, ArtifactKind, Revision};

// ---------------------------------------------------------------------------
// MergeOutcome
// ---------------------------------------------------------------------------

/// Result of one tree merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Root of the synthesized MERGE tree; `None` when the merge removed
    /// the artifact entirely (both sides deleted it).
    pub root: Option<ArtifactId>,
    /// Number of conflict artifacts in the output.
    pub conflicts: usize,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Three-way merge of the trees rooted at `base`, `left`, and `right`.
///
/// Runs the matcher on (BASE, LEFT) and (BASE, RIGHT), stores the
/// matchings in the arena, and synthesizes the merged tree.
pub fn merge_three_way(
    arena: &mut Arena,
    ctx: &MergeContext,
    base: ArtifactId,
    left: ArtifactId,
    right: ArtifactId,
) -> Result<MergeOutcome, MergeError> {
    ctx.cancellation().check("three-way merge")?;

    tree_match(arena, ctx, base, left)?.store_in(arena);
    tree_match(arena, ctx, base, right)?.store_in(arena);

    let mut driver = Driver {
        arena,
        ctx,
        base_rev: Some(Revision::Base),
        left_rev: Revision::Left,
        right_rev: Revision::Right,
        left_label: Revision::Left.label().to_owned(),
        right_label: Revision::Right.label().to_owned(),
        conflicts: 0,
    };
    let root = driver.merge_triple(Some(base), Some(left), Some(right))?;
    let conflicts = driver.conflicts;
    debug!(conflicts, "three-way merge finished");
    Ok(MergeOutcome { root, conflicts })
}

/// Base-less two-way merge, used by the n-way fold. `left_label` names
/// the accumulated variant(s), `right_label` the incoming revision.
pub fn merge_two_way(
    arena: &mut Arena,
    ctx: &MergeContext,
    left: ArtifactId,
    right: ArtifactId,
    left_label: &str,
    right_label: &str,
) -> Result<MergeOutcome, MergeError> {
    ctx.cancellation().check("two-way merge")?;

    tree_match(arena, ctx, left, right)?.store_in(arena);

    let left_rev = arena.node(left).revision.clone();
    let right_rev = arena.node(right).revision.clone();
    let mut driver = Driver {
        arena,
        ctx,
        base_rev: None,
        left_rev,
        right_rev,
        left_label: left_label.to_owned(),
        right_label: right_label.to_owned(),
        conflicts: 0,
    };
    let root = driver.merge_triple(None, Some(left), Some(right))?;
    let conflicts = driver.conflicts;
    Ok(MergeOutcome { root, conflicts })
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver<'a> {
    arena: &'a mut Arena,
    ctx: &'a MergeContext,
    /// `None` in two-way mode.
    base_rev: Option<Revision>,
    left_rev: Revision,
    right_rev: Revision,
    left_label: String,
    right_label: String,
    conflicts: usize,
}

/// Origin of one entry in a merged child sequence; drives the splicing
/// tie-breaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// Output of a matched triple (or pair), in LEFT child order.
    Matched,
    /// Unmatched LEFT addition.
    LeftAdd,
    /// Unmatched RIGHT addition.
    RightAdd,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    /// Merged output; `None` for cleanly deleted children, kept so later
    /// additions can still anchor to the position.
    output: Option<ArtifactId>,
    origin: Origin,
    /// The RIGHT child whose content this entry represents, when any;
    /// RIGHT additions anchor to the entry of their preceding sibling
    /// through this.
    right_source: Option<ArtifactId>,
    /// For LEFT additions, the unconsumed source child. Cleared once the
    /// addition is re-paired with a base deletion from the same gap.
    left_source: Option<ArtifactId>,
}

impl<'a> Driver<'a> {
    /// Merge one aligned node triple. `None` components mean the node has
    /// no correspondent in that revision.
    fn merge_triple(
        &mut self,
        base: Option<ArtifactId>,
        left: Option<ArtifactId>,
        right: Option<ArtifactId>,
    ) -> Result<Option<ArtifactId>, MergeError> {
        match (base, left, right) {
            (Some(b), Some(l), Some(r)) => self.merge_full(b, l, r),
            // Deleted on both sides.
            (Some(_), None, None) => Ok(None),
            // Deleted on one side; rule 3 or 4.
            (Some(b), None, Some(r)) => {
                if self.arena.equals_structurally(b, r) {
                    Ok(None)
                } else {
                    trace!("delete (left) vs modify (right)");
                    let kind = self.arena.node(r).kind;
                    Ok(Some(self.conflict_or_choice(kind, None, Some(r))))
                }
            }
            (Some(b), Some(l), None) => {
                if self.arena.equals_structurally(b, l) {
                    Ok(None)
                } else {
                    trace!("modify (left) vs delete (right)");
                    let kind = self.arena.node(l).kind;
                    Ok(Some(self.conflict_or_choice(kind, Some(l), None)))
                }
            }
            // Added on one side; rule 7.
            (None, Some(l), None) => Ok(Some(self.clone_added(l))),
            (None, None, Some(r)) => Ok(Some(self.clone_added(r))),
            // Added on both sides (two-way pair); rules 8 and 9.
            (None, Some(l), Some(r)) => self.merge_pair(l, r),
            (None, None, None) => Err(MergeError::InternalAssertion {
                detail: "merge_triple called with no artifacts".to_owned(),
            }),
        }
    }

    /// Rule 1/2/5/6 classification for a fully present triple.
    fn merge_full(
        &mut self,
        base: ArtifactId,
        left: ArtifactId,
        right: ArtifactId,
    ) -> Result<Option<ArtifactId>, MergeError> {
        let left_unchanged = self.arena.equals_structurally(base, left);
        let right_unchanged = self.arena.equals_structurally(base, right);

        if left_unchanged && right_unchanged {
            return Ok(Some(self.arena.clone_deep(base, &Revision::Merge)));
        }
        if left_unchanged {
            return Ok(Some(self.arena.clone_deep(right, &Revision::Merge)));
        }
        if right_unchanged {
            return Ok(Some(self.arena.clone_deep(left, &Revision::Merge)));
        }
        // Changed on both sides with identical result.
        if self.arena.equals_structurally(left, right) {
            return Ok(Some(self.arena.clone_deep(left, &Revision::Merge)));
        }

        let (lk, rk) = (self.arena.node(left).kind, self.arena.node(right).kind);
        if lk != rk {
            // Both changed, not reconcilable at this node; rule 6.
            let kind = self.arena.node(base).kind;
            return Ok(Some(self.conflict_or_choice(kind, Some(left), Some(right))));
        }

        let leaves = self.arena.node(left).is_leaf() && self.arena.node(right).is_leaf();
        match self.merge_payload(Some(base), left, right) {
            PayloadOutcome::Agreed(text) => {
                let node = self.alloc_merged(lk, text);
                self.merge_children(Some(base), left, right, node)?;
                Ok(Some(node))
            }
            PayloadOutcome::Diverged if leaves => {
                Ok(Some(self.merge_leaf(Some(base), left, right)))
            }
            PayloadOutcome::Diverged => {
                let kind = self.arena.node(base).kind;
                Ok(Some(self.conflict_or_choice(kind, Some(left), Some(right))))
            }
        }
    }

    /// Two-way pair of added (or fold-accumulated) nodes.
    fn merge_pair(
        &mut self,
        left: ArtifactId,
        right: ArtifactId,
    ) -> Result<Option<ArtifactId>, MergeError> {
        // Rule 8: identical additions collapse.
        if self.arena.equals_structurally(left, right) {
            return Ok(Some(self.arena.clone_deep(left, &Revision::Merge)));
        }
        // An accumulated choice node absorbs the incoming variant.
        if self.arena.node(left).choice {
            let copy = self.arena.clone_deep(left, &Revision::Merge);
            let variant = self.arena.clone_deep(right, &Revision::Merge);
            let label = self.right_label.clone();
            self.arena.add_variant(copy, &label, variant);
            return Ok(Some(copy));
        }

        let (lk, rk) = (self.arena.node(left).kind, self.arena.node(right).kind);
        if lk != rk {
            return Ok(Some(self.conflict_or_choice(lk, Some(left), Some(right))));
        }
        let leaves = self.arena.node(left).is_leaf() && self.arena.node(right).is_leaf();
        match self.merge_payload(None, left, right) {
            PayloadOutcome::Agreed(text) => {
                let node = self.alloc_merged(lk, text);
                self.merge_children(None, left, right, node)?;
                Ok(Some(node))
            }
            PayloadOutcome::Diverged if leaves => {
                Ok(Some(self.merge_leaf(None, left, right)))
            }
            PayloadOutcome::Diverged => {
                // Rule 9.
                Ok(Some(self.conflict_or_choice(lk, Some(left), Some(right))))
            }
        }
    }

    /// Three-way reconciliation of the payload attribute.
    fn merge_payload(
        &self,
        base: Option<ArtifactId>,
        left: ArtifactId,
        right: ArtifactId,
    ) -> PayloadOutcome {
        let bp = base.and_then(|b| self.arena.node(b).payload.clone());
        let lp = self.arena.node(left).payload.clone();
        let rp = self.arena.node(right).payload.clone();

        if lp == rp {
            PayloadOutcome::Agreed(lp)
        } else if base.is_some() && lp == bp {
            PayloadOutcome::Agreed(rp)
        } else if base.is_some() && rp == bp {
            PayloadOutcome::Agreed(lp)
        } else {
            PayloadOutcome::Diverged
        }
    }

    /// A leaf whose payload changed on both sides: delegate to the line
    /// merger. Clean merges produce a merged leaf; conflicting ones one
    /// conflict (or choice) artifact wrapping both variants.
    fn merge_leaf(
        &mut self,
        base: Option<ArtifactId>,
        left: ArtifactId,
        right: ArtifactId,
    ) -> ArtifactId {
        let empty = String::new();
        let bp = base
            .and_then(|b| self.arena.node(b).payload.clone())
            .unwrap_or_default();
        let lp = self.arena.node(left).payload.clone().unwrap_or(empty.clone());
        let rp = self.arena.node(right).payload.clone().unwrap_or(empty);

        let merged = linebased::merge_lines(&bp, &lp, &rp, &self.left_label, &self.right_label);
        if merged.is_clean() {
            let kind = self.arena.node(left).kind;
            self.alloc_merged(kind, Some(merged.merged))
        } else {
            let kind = self.arena.node(left).kind;
            self.conflict_or_choice(kind, Some(left), Some(right))
        }
    }

    // -----------------------------------------------------------------------
    // Child sequence synthesis
    // -----------------------------------------------------------------------

    /// Merge the child sequences of a reconciled triple (or two-way pair)
    /// into `parent`.
    fn merge_children(
        &mut self,
        base: Option<ArtifactId>,
        left: ArtifactId,
        right: ArtifactId,
        parent: ArtifactId,
    ) -> Result<(), MergeError> {
        let left_children: Vec<ArtifactId> = self.arena.node(left).children().to_vec();
        let right_children: Vec<ArtifactId> = self.arena.node(right).children().to_vec();
        let base_children: Vec<ArtifactId> =
            base.map_or_else(Vec::new, |b| self.arena.node(b).children().to_vec());

        let mut entries: Vec<Entry> = Vec::with_capacity(left_children.len());
        // Index into `entries` per base child handled in the left walk.
        let mut base_entry: Vec<Option<usize>> = vec![None; base_children.len()];
        // Right children consumed by the left walk.
        let mut right_done: Vec<bool> = vec![false; right_children.len()];

        // Matched children and LEFT additions, in LEFT order.
        for &lc in &left_children {
            if let Some(b) = base {
                let bc = self
                    .base_match(lc)
                    .filter(|&bc| self.arena.node(bc).parent() == Some(b));
                if let Some(bc) = bc {
                    let rc = self
                        .right_match(bc)
                        .filter(|&rc| self.arena.node(rc).parent() == Some(right));
                    if let Some(rc) = rc {
                        if let Some(index) = right_children.iter().position(|&c| c == rc) {
                            right_done[index] = true;
                        }
                    }
                    let output = self.merge_triple(Some(bc), Some(lc), rc)?;
                    if let Some(position) = base_children.iter().position(|&c| c == bc) {
                        base_entry[position] = Some(entries.len());
                    }
                    entries.push(Entry {
                        output,
                        origin: Origin::Matched,
                        right_source: rc,
                        left_source: None,
                    });
                } else {
                    let output = self.clone_added(lc);
                    entries.push(Entry {
                        output: Some(output),
                        origin: Origin::LeftAdd,
                        right_source: None,
                        left_source: Some(lc),
                    });
                }
            } else {
                // Two-way: pair directly through the LEFT↔RIGHT matching.
                let rc = self
                    .arena
                    .node(lc)
                    .get_match(&self.right_rev)
                    .filter(|&rc| self.arena.node(rc).parent() == Some(right));
                if let Some(rc) = rc {
                    if let Some(index) = right_children.iter().position(|&c| c == rc) {
                        right_done[index] = true;
                    }
                    let output = self.merge_triple(None, Some(lc), Some(rc))?;
                    entries.push(Entry {
                        output,
                        origin: Origin::Matched,
                        right_source: Some(rc),
                        left_source: None,
                    });
                } else {
                    let output = self.clone_added(lc);
                    entries.push(Entry {
                        output: Some(output),
                        origin: Origin::LeftAdd,
                        right_source: None,
                        left_source: Some(lc),
                    });
                }
            }
        }

        // Base children deleted on the left but surviving modified on the
        // right: delete-vs-modify, spliced in at the base position.
        for (position, &bc) in base_children.iter().enumerate() {
            if self.left_match(bc).is_some() {
                continue;
            }
            let Some(rc) = self
                .right_match(bc)
                .filter(|&rc| self.arena.node(rc).parent() == Some(right))
            else {
                continue;
            };
            if let Some(index) = right_children.iter().position(|&c| c == rc) {
                right_done[index] = true;
            }
            let output = self.merge_triple(Some(bc), None, Some(rc))?;
            let at = base_entry[..position]
                .iter()
                .rev()
                .find_map(|entry| *entry)
                .map_or(0, |anchor| self.run_end(&entries, anchor + 1));
            entries.insert(
                at,
                Entry {
                    output,
                    origin: Origin::Matched,
                    right_source: Some(rc),
                    left_source: None,
                },
            );
            for slot in base_entry.iter_mut().flatten() {
                if *slot >= at {
                    *slot += 1;
                }
            }
            base_entry[position] = Some(at);
        }

        // Base children with no match on either side: the region was
        // rewritten (or deleted) on both sides. Remember each one keyed by
        // the start of its gap so the addition passes can re-pair it with
        // the replacement content.
        let mut pending: Vec<(usize, ArtifactId)> = Vec::new();
        for (position, &bc) in base_children.iter().enumerate() {
            if self.left_match(bc).is_some()
                || self
                    .right_match(bc)
                    .filter(|&rc| self.arena.node(rc).parent() == Some(right))
                    .is_some()
            {
                continue;
            }
            let gap_start = base_entry[..position]
                .iter()
                .rev()
                .find_map(|entry| *entry)
                .map_or(0, |anchor| anchor + 1);
            pending.push((gap_start, bc));
        }

        // RIGHT additions: pair with a rewritten base child from the same
        // gap when one exists, otherwise splice after the merged output of
        // the nearest preceding matched sibling, at the end of that
        // anchor's run so LEFT additions keep precedence.
        for (index, &rc) in right_children.iter().enumerate() {
            if right_done[index] {
                continue;
            }
            let handled = if self.base_rev.is_some() {
                self.base_match_of_right(rc).is_some()
            } else {
                self.arena.node(rc).get_match(&self.left_rev).is_some()
            };
            if handled {
                // Matched to a node outside this child list; its content
                // is represented wherever that match lives.
                continue;
            }

            // Anchor: last preceding right sibling already placed.
            let anchor = right_children[..index].iter().rev().find_map(|&prev| {
                entries
                    .iter()
                    .position(|entry| entry.right_source == Some(prev))
            });
            let run_start = anchor.map_or(0, |a| a + 1);
            let run_end = self.run_end(&entries, run_start);
            let this_gap = gap_start(&entries, run_start);

            let rc_kind = self.arena.node(rc).kind;
            let rewritten = pending
                .iter()
                .position(|&(gap, bc)| gap == this_gap && self.arena.node(bc).kind == rc_kind);
            if let Some(pending_index) = rewritten {
                let (_, bc) = pending.remove(pending_index);
                // A LEFT addition of the same kind in this gap is the left
                // side of the rewrite; without one the left side deleted.
                let left_entry = (this_gap..run_end).find(|&i| {
                    entries[i].origin == Origin::LeftAdd
                        && entries[i]
                            .left_source
                            .is_some_and(|lc| self.arena.node(lc).kind == rc_kind)
                });
                let survivor = left_entry.and_then(|i| {
                    entries[i].left_source.take().map(|lc| (i, lc))
                });
                if let Some((i, lc)) = survivor {
                    entries[i].output = self.merge_triple(Some(bc), Some(lc), Some(rc))?;
                    entries[i].right_source = Some(rc);
                } else {
                    let output = self.merge_triple(Some(bc), None, Some(rc))?;
                    entries.insert(
                        run_end,
                        Entry {
                            output,
                            origin: Origin::RightAdd,
                            right_source: Some(rc),
                            left_source: None,
                        },
                    );
                    for slot in pending.iter_mut() {
                        if slot.0 > run_end {
                            slot.0 += 1;
                        }
                    }
                }
                continue;
            }

            if !self.absorb_into_run(&mut entries, run_start, run_end, rc) {
                let output = self.clone_added(rc);
                entries.insert(
                    run_end,
                    Entry {
                        output: Some(output),
                        origin: Origin::RightAdd,
                        right_source: Some(rc),
                        left_source: None,
                    },
                );
                for slot in pending.iter_mut() {
                    if slot.0 > run_end {
                        slot.0 += 1;
                    }
                }
            }
        }

        // Leftover rewritten base children: the right side deleted them.
        // A same-gap LEFT addition is the modified survivor and conflicts;
        // with no survivor the node is gone on both sides.
        for (gap, bc) in pending {
            let bc_kind = self.arena.node(bc).kind;
            let end = self.run_end(&entries, gap);
            let left_entry = (gap..end).find(|&i| {
                entries[i].origin == Origin::LeftAdd
                    && entries[i]
                        .left_source
                        .is_some_and(|lc| self.arena.node(lc).kind == bc_kind)
            });
            let survivor = left_entry.and_then(|i| {
                entries[i].left_source.take().map(|lc| (i, lc))
            });
            if let Some((i, lc)) = survivor {
                entries[i].output = self.merge_triple(Some(bc), Some(lc), None)?;
                trace!("rewrite (left) vs delete (right)");
            }
        }

        for entry in entries {
            if let Some(output) = entry.output {
                self.arena.add_child(parent, output);
            }
        }
        Ok(())
    }

    /// End of the run of addition entries starting at `start`: the index
    /// of the next `Matched` entry, or the end of the list.
    fn run_end(&self, entries: &[Entry], start: usize) -> usize {
        entries[start..]
            .iter()
            .position(|entry| entry.origin == Origin::Matched)
            .map_or(entries.len(), |offset| start + offset)
    }

    /// Examine the additions already placed in `[run_start, run_end)` for
    /// an interaction with the incoming RIGHT addition `rc`:
    ///
    /// - a structurally equal output collapses the addition (rule 8),
    /// - a choice node of the same kind absorbs it as a variant,
    /// - a same-kind same-payload LEFT addition conflicts (rule 9).
    ///
    /// Returns `true` when the run already accounts for `rc`.
    fn absorb_into_run(
        &mut self,
        entries: &mut [Entry],
        run_start: usize,
        run_end: usize,
        rc: ArtifactId,
    ) -> bool {
        for entry in entries.iter_mut().take(run_end).skip(run_start) {
            let Some(existing) = entry.output else {
                continue;
            };
            if self.arena.equals_structurally(existing, rc) {
                trace!("identical add/add collapsed");
                return true;
            }
            let existing_node = self.arena.node(existing);
            let rc_node = self.arena.node(rc);
            let same_kind = existing_node.kind == rc_node.kind;
            let same_payload = existing_node.payload == rc_node.payload;
            let is_choice = existing_node.choice;
            let is_left_add = entry.origin == Origin::LeftAdd;
            if is_choice && same_kind {
                let variant = self.arena.clone_deep(rc, &Revision::Merge);
                let label = self.right_label.clone();
                self.arena.add_variant(existing, &label, variant);
                return true;
            }
            // In three-way mode only additions of "the same node" (same
            // kind and payload, e.g. a method added under one name on
            // both sides) collide; distinct additions coexist. Without a
            // base every node is an addition, so any same-kind divergence
            // at one anchor is a variant pair.
            if is_left_add && same_kind && (same_payload || self.base_rev.is_none()) {
                trace!("divergent add/add at one anchor");
                let kind = self.arena.node(rc).kind;
                let replacement = self.conflict_or_choice_premerged(kind, existing, rc);
                entry.output = Some(replacement);
                return true;
            }
        }
        false
    }

    // -----------------------------------------------------------------------
    // Node construction
    // -----------------------------------------------------------------------

    fn alloc_merged(
        &mut self,
        kind: ArtifactKind,
        payload: Option<String>,
    ) -> ArtifactId {
        let node = self.arena.alloc(Revision::Merge, kind, payload);
        self.arena.node_mut(node).merged = true;
        node
    }

    /// Clone an addition into the MERGE revision and flag it.
    fn clone_added(&mut self, id: ArtifactId) -> ArtifactId {
        let copy = self.arena.clone_deep(id, &Revision::Merge);
        self.arena.node_mut(copy).added = true;
        copy
    }

    /// Whether conflicts at `kind` become choice nodes under the current
    /// configuration.
    fn conditional(&self, kind: ArtifactKind) -> bool {
        self.ctx.conditional_merge
            && (self.ctx.conditional_outside_methods || kind.method_scope())
    }

    /// Build a conflict artifact (or, under conditional merge, a choice
    /// artifact) from source-revision sides.
    fn conflict_or_choice(
        &mut self,
        kind: ArtifactKind,
        left: Option<ArtifactId>,
        right: Option<ArtifactId>,
    ) -> ArtifactId {
        // A left-hand choice node absorbs the right side as a variant.
        if self.conditional(kind) {
            if let Some(l) = left {
                if self.arena.node(l).choice {
                    let copy = self.arena.clone_deep(l, &Revision::Merge);
                    if let Some(r) = right {
                        let variant = self.arena.clone_deep(r, &Revision::Merge);
                        let label = self.right_label.clone();
                        self.arena.add_variant(copy, &label, variant);
                    }
                    return copy;
                }
            }
        }

        let left_copy = left.map(|l| self.arena.clone_deep(l, &Revision::Merge));
        let right_copy = right.map(|r| self.arena.clone_deep(r, &Revision::Merge));

        let (left_label, right_label) = (self.left_label.clone(), self.right_label.clone());
        if self.conditional(kind) {
            let choice = self.arena.new_choice(kind);
            let left_variant =
                left_copy.unwrap_or_else(|| self.arena.alloc(Revision::Merge, kind, None));
            let right_variant =
                right_copy.unwrap_or_else(|| self.arena.alloc(Revision::Merge, kind, None));
            self.arena.add_variant(choice, &left_label, left_variant);
            self.arena.add_variant(choice, &right_label, right_variant);
            choice
        } else {
            self.conflicts += 1;
            self.arena
                .new_conflict(kind, left_copy, right_copy, &left_label, &right_label)
        }
    }

    /// Like [`conflict_or_choice`], but the left side is already a MERGE
    /// revision node (an addition placed earlier in the child walk).
    fn conflict_or_choice_premerged(
        &mut self,
        kind: ArtifactKind,
        left_merged: ArtifactId,
        right_source: ArtifactId,
    ) -> ArtifactId {
        let right_copy = self.arena.clone_deep(right_source, &Revision::Merge);
        let (left_label, right_label) = (self.left_label.clone(), self.right_label.clone());
        if self.conditional(kind) {
            let choice = self.arena.new_choice(kind);
            self.arena.add_variant(choice, &left_label, left_merged);
            self.arena.add_variant(choice, &right_label, right_copy);
            choice
        } else {
            self.conflicts += 1;
            self.arena.new_conflict(
                kind,
                Some(left_merged),
                Some(right_copy),
                &left_label,
                &right_label,
            )
        }
    }

    // -----------------------------------------------------------------------
    // Match lookups
    // -----------------------------------------------------------------------

    fn base_match(&self, side: ArtifactId) -> Option<ArtifactId> {
        let base_rev = self.base_rev.as_ref()?;
        self.arena.node(side).get_match(base_rev)
    }

    fn left_match(&self, base: ArtifactId) -> Option<ArtifactId> {
        self.arena.node(base).get_match(&self.left_rev)
    }

    fn right_match(&self, base: ArtifactId) -> Option<ArtifactId> {
        self.arena.node(base).get_match(&self.right_rev)
    }

    fn base_match_of_right(&self, right: ArtifactId) -> Option<ArtifactId> {
        let base_rev = self.base_rev.as_ref()?;
        self.arena.node(right).get_match(base_rev)
    }
}

/// Outcome of payload reconciliation.
enum PayloadOutcome {
    Agreed(Option<String>),
    Diverged,
}

/// Start of the gap containing `run_start`: the first index of the
/// maximal stretch of non-`Matched` entries ending there. Anchors inside
/// a gap (earlier additions) must not hide the gap's rewritten base
/// children.
fn gap_start(entries: &[Entry], run_start: usize) -> usize {
    let mut start = run_start;
    while start > 0 && entries[start - 1].origin != Origin::Matched {
        start -= 1;
    }
    start
}
