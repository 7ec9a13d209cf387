//! The artifact tree model.
//!
//! Every node the engine touches (files, classes, methods, statements,
//! lines) is an [`Artifact`] stored in an [`Arena`]. One arena holds all
//! nodes of all revisions participating in a merge run; an [`ArtifactId`]
//! is an index into it. Parent back-references, child lists, and
//! cross-revision matches are all ids resolved through the arena, so the
//! model is cycle-free despite the parent/child/match graph being cyclic.
//!
//! # Identity
//!
//! Ids are unique arena-wide, which subsumes the per-revision uniqueness
//! invariant. Ids carry no meaning across revisions; correspondence between
//! revisions is expressed only through the matches map.
//!
//! # Matches
//!
//! `matches` on an artifact of revision `s` maps a revision `r` to the
//! matched artifact in `r`. The relation is symmetric and is kept so by
//! routing every insertion through [`Arena::set_match`]. Matches are never
//! cloned by [`Arena::clone_deep`].
//!
//! # Conflict and choice nodes
//!
//! A conflict node has exactly two variant children (left, right) labeled
//! with their revision names; a side emptied by deletion is represented by
//! an empty placeholder child of the same kind. A choice node has one
//! variant child per named revision label. Variant labels are stored
//! positionally, parallel to the child list.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// A named version of an artifact tree.
///
/// The three-way roles are first-class; n-way scenarios use `Named`
/// revisions carrying user-supplied labels.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Revision {
    Base,
    Left,
    Right,
    /// The synthesized output revision.
    Merge,
    /// A user-supplied revision label (n-way variants).
    Named(String),
}

impl Revision {
    /// The label used in conflict markers and choice conditions.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Base => "BASE",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Merge => "MERGE",
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

/// The semantic role of an artifact.
///
/// The engine does not prescribe kinds for any particular language; this
/// enumeration covers the roles the built-in outline parser and the file
/// layer produce. The two capability predicates below are the only places
/// the engine consults a kind.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Directory,
    File,
    CompilationUnit,
    Class,
    Method,
    Block,
    Statement,
    Expression,
    Token,
    Line,
}

impl ArtifactKind {
    /// Whether child order is semantically significant for this kind.
    ///
    /// Unordered kinds get the bipartite matcher; ordered kinds get the
    /// sequence matcher.
    #[must_use]
    pub fn ordered_children(self) -> bool {
        !matches!(self, Self::Directory | Self::Class)
    }

    /// Whether artifacts of this kind live inside a method body (or are
    /// plain content lines).
    ///
    /// Used to suppress choice-node substitution outside methods when
    /// `conditional_outside_methods` is off.
    #[must_use]
    pub fn method_scope(self) -> bool {
        matches!(
            self,
            Self::Method
                | Self::Block
                | Self::Statement
                | Self::Expression
                | Self::Token
                | Self::Line
        )
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::CompilationUnit => "compilation-unit",
            Self::Class => "class",
            Self::Method => "method",
            Self::Block => "block",
            Self::Statement => "statement",
            Self::Expression => "expression",
            Self::Token => "token",
            Self::Line => "line",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ArtifactId
// ---------------------------------------------------------------------------

/// Index of an artifact within its [`Arena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId(u32);

impl ArtifactId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// A node in the artifact tree. Owned by its [`Arena`].
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Which input (or output) version this node belongs to.
    pub revision: Revision,
    /// Semantic role.
    pub kind: ArtifactKind,
    /// Text content for leaves, structural label for inner nodes
    /// (method name, class name). `None` for anonymous structure.
    pub payload: Option<String>,
    children: Vec<ArtifactId>,
    parent: Option<ArtifactId>,
    matches: BTreeMap<Revision, ArtifactId>,
    /// Marks a conflict node (two variant children, left and right).
    pub conflict: bool,
    /// Marks a choice node (one variant child per revision label).
    pub choice: bool,
    /// Set on nodes that did not exist in BASE.
    pub added: bool,
    /// Set on nodes synthesized by the merge driver.
    pub merged: bool,
    /// Variant labels, positionally parallel to `children`. Non-empty only
    /// on conflict and choice nodes.
    labels: Vec<String>,
}

impl Artifact {
    /// Child ids in order.
    #[must_use]
    pub fn children(&self) -> &[ArtifactId] {
        &self.children
    }

    /// The containing artifact, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ArtifactId> {
        self.parent
    }

    /// `true` if the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The matched artifact in `revision`, if any.
    #[must_use]
    pub fn get_match(&self, revision: &Revision) -> Option<ArtifactId> {
        self.matches.get(revision).copied()
    }

    /// Variant labels of a conflict or choice node.
    #[must_use]
    pub fn variant_labels(&self) -> &[String] {
        &self.labels
    }

    /// The variant child stored under `label`, if any.
    #[must_use]
    pub fn variant(&self, label: &str) -> Option<ArtifactId> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.children[i])
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Owner of every artifact in a merge run.
#[derive(Clone, Debug, Default)]
pub struct Arena {
    nodes: Vec<Artifact>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of artifacts allocated so far, across all revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a fresh artifact with no children and no matches.
    pub fn alloc(
        &mut self,
        revision: Revision,
        kind: ArtifactKind,
        payload: Option<String>,
    ) -> ArtifactId {
        let id = ArtifactId(u32::try_from(self.nodes.len()).expect("arena overflow"));
        self.nodes.push(Artifact {
            revision,
            kind,
            payload,
            children: Vec::new(),
            parent: None,
            matches: BTreeMap::new(),
            conflict: false,
            choice: false,
            added: false,
            merged: false,
            labels: Vec::new(),
        });
        id
    }

    #[must_use]
    pub fn node(&self, id: ArtifactId) -> &Artifact {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: ArtifactId) -> &mut Artifact {
        &mut self.nodes[id.index()]
    }

    /// Append `child` to `parent`'s child list and set its back-reference.
    ///
    /// # Panics
    /// In debug builds, if `child` already has a parent.
    pub fn add_child(&mut self, parent: ArtifactId, child: ArtifactId) {
        debug_assert!(
            self.node(child).parent.is_none(),
            "artifact {child} already has a parent"
        );
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parent = Some(parent);
    }

    /// Insert `child` into `parent`'s child list at `index`.
    pub fn insert_child(&mut self, parent: ArtifactId, index: usize, child: ArtifactId) {
        debug_assert!(self.node(child).parent.is_none());
        self.nodes[parent.index()].children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);
    }

    /// Record a symmetric match between `a` and `b`.
    ///
    /// `a` learns `b` under `b`'s revision and vice versa, preserving the
    /// symmetry invariant by construction.
    pub fn set_match(&mut self, a: ArtifactId, b: ArtifactId) {
        let rev_a = self.node(a).revision.clone();
        let rev_b = self.node(b).revision.clone();
        self.nodes[a.index()].matches.insert(rev_b, b);
        self.nodes[b.index()].matches.insert(rev_a, a);
    }

    /// Subtree node count, root included.
    #[must_use]
    pub fn size(&self, id: ArtifactId) -> usize {
        1 + self
            .node(id)
            .children()
            .iter()
            .map(|&c| self.size(c))
            .sum::<usize>()
    }

    /// Deep-clone the subtree at `id` into `revision`.
    ///
    /// Fresh ids are minted for every node, the revision is re-tagged, and
    /// the matches map is left empty: matches are relations between the
    /// original trees, not properties of their copies.
    pub fn clone_deep(&mut self, id: ArtifactId, revision: &Revision) -> ArtifactId {
        let node = self.node(id);
        let kind = node.kind;
        let payload = node.payload.clone();
        let conflict = node.conflict;
        let choice = node.choice;
        let labels = node.labels.clone();
        let children = node.children.clone();

        let copy = self.alloc(revision.clone(), kind, payload);
        self.nodes[copy.index()].conflict = conflict;
        self.nodes[copy.index()].choice = choice;
        self.nodes[copy.index()].labels = labels;
        for child in children {
            let child_copy = self.clone_deep(child, revision);
            self.add_child(copy, child_copy);
        }
        copy
    }

    /// Structural hash over kind, payload, and ordered children. A cheap
    /// prefilter: equal subtrees hash equal; hash inequality proves
    /// structural inequality.
    #[must_use]
    pub fn structural_hash(&self, id: ArtifactId) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_into(id, &mut hasher);
        hasher.finish()
    }

    fn hash_into(&self, id: ArtifactId, hasher: &mut DefaultHasher) {
        let node = self.node(id);
        node.kind.hash(hasher);
        node.payload.hash(hasher);
        node.children.len().hash(hasher);
        for &child in node.children() {
            self.hash_into(child, hasher);
        }
    }

    /// Structural equality: kind, payload, and ordered children, ignoring
    /// identity, revision, and matches.
    #[must_use]
    pub fn equals_structurally(&self, a: ArtifactId, b: ArtifactId) -> bool {
        if a == b {
            return true;
        }
        let (na, nb) = (self.node(a), self.node(b));
        na.kind == nb.kind
            && na.payload == nb.payload
            && na.children.len() == nb.children.len()
            && na
                .children
                .iter()
                .zip(&nb.children)
                .all(|(&ca, &cb)| self.equals_structurally(ca, cb))
    }

    // -----------------------------------------------------------------------
    // Conflict and choice construction
    // -----------------------------------------------------------------------

    /// Build a conflict node in the MERGE revision.
    ///
    /// A `None` side means the variant was deleted; it is represented by an
    /// empty placeholder child of the same kind so the node always carries
    /// exactly two variant children.
    pub fn new_conflict(
        &mut self,
        kind: ArtifactKind,
        left: Option<ArtifactId>,
        right: Option<ArtifactId>,
        left_label: &str,
        right_label: &str,
    ) -> ArtifactId {
        let conflict = self.alloc(Revision::Merge, kind, None);
        self.nodes[conflict.index()].conflict = true;
        self.nodes[conflict.index()].merged = true;

        let left = left.unwrap_or_else(|| self.alloc(Revision::Merge, kind, None));
        let right = right.unwrap_or_else(|| self.alloc(Revision::Merge, kind, None));
        self.add_child(conflict, left);
        self.add_child(conflict, right);
        self.nodes[conflict.index()].labels = vec![left_label.to_owned(), right_label.to_owned()];
        conflict
    }

    /// Build an empty choice node in the MERGE revision.
    pub fn new_choice(&mut self, kind: ArtifactKind) -> ArtifactId {
        let choice = self.alloc(Revision::Merge, kind, None);
        self.nodes[choice.index()].choice = true;
        self.nodes[choice.index()].merged = true;
        choice
    }

    /// Add a labeled variant to a choice node.
    ///
    /// A variant structurally equal to one already present merges its label
    /// into the existing entry (`"v1,v3"`) instead of duplicating content.
    pub fn add_variant(&mut self, choice: ArtifactId, label: &str, variant: ArtifactId) {
        debug_assert!(self.node(choice).choice, "add_variant on non-choice node");
        let existing = self
            .node(choice)
            .children()
            .iter()
            .position(|&c| self.equals_structurally(c, variant));
        if let Some(index) = existing {
            let merged = format!("{},{label}", self.nodes[choice.index()].labels[index]);
            self.nodes[choice.index()].labels[index] = merged;
        } else {
            self.add_child(choice, variant);
            self.nodes[choice.index()].labels.push(label.to_owned());
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Indented plaintext dump of the subtree at `id`, one node per line:
    /// revision, kind, payload, and conflict/choice annotations. Used by
    /// diff-only output and error diagnostics.
    #[must_use]
    pub fn dump(&self, id: ArtifactId) -> String {
        let mut out = String::new();
        self.dump_into(id, 0, &mut out);
        out
    }

    fn dump_into(&self, id: ArtifactId, depth: usize, out: &mut String) {
        let node = self.node(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = write!(out, "{} {}", node.revision, node.kind);
        if let Some(payload) = &node.payload {
            let _ = write!(out, " {payload:?}");
        }
        if node.conflict {
            out.push_str(" <conflict>");
        }
        if node.choice {
            out.push_str(" <choice>");
        }
        out.push('\n');
        for (index, &child) in node.children().iter().enumerate() {
            if let Some(label) = node.labels.get(index) {
                for _ in 0..=depth {
                    out.push_str("  ");
                }
                let _ = writeln!(out, "[{label}]");
                self.dump_into(child, depth + 2, out);
            } else {
                self.dump_into(child, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(arena: &mut Arena, rev: Revision, text: &str) -> ArtifactId {
        arena.alloc(rev, ArtifactKind::Line, Some(text.to_owned()))
    }

    #[test]
    fn parent_pointers_track_containment() {
        let mut arena = Arena::new();
        let root = arena.alloc(Revision::Base, ArtifactKind::Method, Some("m".to_owned()));
        let child = leaf(&mut arena, Revision::Base, "return 0;");
        arena.add_child(root, child);

        assert_eq!(arena.node(child).parent(), Some(root));
        assert_eq!(arena.node(root).children(), &[child]);
        assert!(arena.node(child).is_leaf());
        assert!(!arena.node(root).is_leaf());
    }

    #[test]
    fn matches_are_symmetric() {
        let mut arena = Arena::new();
        let b = leaf(&mut arena, Revision::Base, "x");
        let l = leaf(&mut arena, Revision::Left, "x");
        arena.set_match(b, l);

        assert_eq!(arena.node(b).get_match(&Revision::Left), Some(l));
        assert_eq!(arena.node(l).get_match(&Revision::Base), Some(b));
    }

    #[test]
    fn clone_deep_mints_fresh_ids_and_drops_matches() {
        let mut arena = Arena::new();
        let root = arena.alloc(Revision::Left, ArtifactKind::Method, Some("m".to_owned()));
        let child = leaf(&mut arena, Revision::Left, "body");
        arena.add_child(root, child);
        let base = leaf(&mut arena, Revision::Base, "body");
        arena.set_match(child, base);

        let copy = arena.clone_deep(root, &Revision::Merge);
        assert_ne!(copy, root);
        assert_eq!(arena.node(copy).revision, Revision::Merge);
        assert!(arena.equals_structurally(copy, root));

        let copied_child = arena.node(copy).children()[0];
        assert_eq!(arena.node(copied_child).revision, Revision::Merge);
        assert_eq!(arena.node(copied_child).get_match(&Revision::Base), None);
    }

    #[test]
    fn structural_equality_ignores_revision_and_identity() {
        let mut arena = Arena::new();
        let a = leaf(&mut arena, Revision::Left, "x");
        let b = leaf(&mut arena, Revision::Right, "x");
        let c = leaf(&mut arena, Revision::Right, "y");

        assert!(arena.equals_structurally(a, b));
        assert!(!arena.equals_structurally(a, c));
        assert_eq!(arena.structural_hash(a), arena.structural_hash(b));
        assert_ne!(arena.structural_hash(a), arena.structural_hash(c));
    }

    #[test]
    fn conflict_node_always_has_two_variants() {
        let mut arena = Arena::new();
        let right = leaf(&mut arena, Revision::Merge, "modified");
        let conflict =
            arena.new_conflict(ArtifactKind::Line, None, Some(right), "LEFT", "RIGHT");

        let node = arena.node(conflict);
        assert!(node.conflict);
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.variant_labels(), ["LEFT", "RIGHT"]);
        // The deleted side is an empty placeholder.
        let left = node.variant("LEFT").unwrap();
        assert!(arena.node(left).is_leaf());
        assert_eq!(arena.node(left).payload, None);
    }

    #[test]
    fn choice_variants_dedupe_by_structure() {
        let mut arena = Arena::new();
        let choice = arena.new_choice(ArtifactKind::Statement);
        let v1 = leaf(&mut arena, Revision::Merge, "x = 1;");
        let v2 = leaf(&mut arena, Revision::Merge, "x = 2;");
        let v3 = leaf(&mut arena, Revision::Merge, "x = 1;");

        arena.add_variant(choice, "v1", v1);
        arena.add_variant(choice, "v2", v2);
        arena.add_variant(choice, "v3", v3);

        let node = arena.node(choice);
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.variant_labels(), ["v1,v3", "v2"]);
    }

    #[test]
    fn kind_capabilities() {
        assert!(!ArtifactKind::Class.ordered_children());
        assert!(!ArtifactKind::Directory.ordered_children());
        assert!(ArtifactKind::Method.ordered_children());
        assert!(ArtifactKind::Statement.method_scope());
        assert!(!ArtifactKind::Class.method_scope());
    }
}
