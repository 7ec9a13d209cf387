//! File artifacts, the parser collaborator contract, and text rendering.
//!
//! [`FileArtifact`] is the engine's whole view of the filesystem: probe,
//! sorted listing, read, write. Language parsers are collaborators behind
//! the [`TreeParser`] trait; the crate ships only [`OutlineParser`], a
//! minimal indentation-based parser used by tests and demos.
//!
//! [`unparse`] is the inverse rendering used to serialize merged trees:
//! conflict nodes render as marker blocks, choice nodes as `#if
//! <revision>` / `#endif` brackets around each variant.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::MergeError;
use crate::model::artifact::{Arena, ArtifactId, ArtifactKind, Revision};

// ---------------------------------------------------------------------------
// FileArtifact
// ---------------------------------------------------------------------------

/// A file or directory participating in a merge scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileArtifact {
    path: PathBuf,
}

impl FileArtifact {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The final path component, used to pair directory entries across
    /// revisions.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.path.is_file()
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.path.is_dir()
    }

    /// Directory entries, sorted by file name for deterministic pairing.
    pub fn list_children(&self) -> Result<Vec<FileArtifact>, MergeError> {
        let entries = fs::read_dir(&self.path).map_err(|source| MergeError::InputInaccessible {
            path: self.path.clone(),
            source,
        })?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MergeError::InputInaccessible {
                path: self.path.clone(),
                source,
            })?;
            children.push(FileArtifact::new(entry.path()));
        }
        children.sort_by_key(FileArtifact::name);
        Ok(children)
    }

    /// Read the file as UTF-8 text.
    pub fn read(&self) -> Result<String, MergeError> {
        if !self.exists() {
            return Err(MergeError::InputMissing {
                path: self.path.clone(),
            });
        }
        fs::read_to_string(&self.path).map_err(|source| MergeError::InputInaccessible {
            path: self.path.clone(),
            source,
        })
    }

    /// Write merged content, creating parent directories as needed.
    pub fn write(&self, content: &str) -> Result<(), MergeError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| MergeError::InputInaccessible {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, content).map_err(|source| MergeError::InputInaccessible {
            path: self.path.clone(),
            source,
        })
    }

    /// The child with the given name, whether or not it exists yet.
    #[must_use]
    pub fn child(&self, name: &str) -> FileArtifact {
        FileArtifact::new(self.path.join(name))
    }
}

// ---------------------------------------------------------------------------
// TreeParser
// ---------------------------------------------------------------------------

/// The parser collaborator: turns file text into an artifact tree inside
/// the run's arena. Inner-node kinds and their ordered/unordered child
/// semantics are the parser's to declare; the engine treats the tree as
/// opaque beyond the artifact contract.
pub trait TreeParser {
    fn parse(
        &self,
        text: &str,
        file: &Path,
        revision: Revision,
        arena: &mut Arena,
    ) -> Result<ArtifactId, MergeError>;
}

// ---------------------------------------------------------------------------
// OutlineParser
// ---------------------------------------------------------------------------

/// A deliberately small reference parser over an indented outline format:
///
/// ```text
/// class Calculator
///   method add
///     return a + b;
///   method sub
///     return a - b;
/// ```
///
/// Two spaces per level. `class <name>` and `method <name>` open inner
/// nodes; any other line is a statement leaf. The root is a
/// compilation-unit. Tabs and indentation jumps are parse failures, which
/// is what the combined strategy's fallback path exercises.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutlineParser;

impl TreeParser for OutlineParser {
    fn parse(
        &self,
        text: &str,
        file: &Path,
        revision: Revision,
        arena: &mut Arena,
    ) -> Result<ArtifactId, MergeError> {
        let root = arena.alloc(revision.clone(), ArtifactKind::CompilationUnit, None);
        // Stack of (level, node); the root sits at level -1 conceptually,
        // tracked separately to keep levels unsigned.
        let mut stack: Vec<(usize, ArtifactId)> = Vec::new();

        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with('\t') {
                return Err(MergeError::ParseFailure {
                    file: file.to_path_buf(),
                    detail: format!("line {}: tab indentation", number + 1),
                });
            }
            let indent = line.len() - line.trim_start().len();
            if indent % 2 != 0 {
                return Err(MergeError::ParseFailure {
                    file: file.to_path_buf(),
                    detail: format!("line {}: odd indentation", number + 1),
                });
            }
            let level = indent / 2;

            while stack.last().is_some_and(|&(l, _)| l >= level) {
                stack.pop();
            }
            let parent = stack.last().map_or(root, |&(_, node)| node);
            let depth = stack.len();
            if level > depth {
                return Err(MergeError::ParseFailure {
                    file: file.to_path_buf(),
                    detail: format!("line {}: indentation jumps a level", number + 1),
                });
            }

            let content = line.trim_start();
            let (kind, payload) = if let Some(name) = content.strip_prefix("class ") {
                (ArtifactKind::Class, name.trim().to_owned())
            } else if let Some(name) = content.strip_prefix("method ") {
                (ArtifactKind::Method, name.trim().to_owned())
            } else {
                (ArtifactKind::Statement, content.to_owned())
            };

            let node = arena.alloc(revision.clone(), kind, Some(payload));
            arena.add_child(parent, node);
            if kind != ArtifactKind::Statement {
                stack.push((level, node));
            }
        }
        Ok(root)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a tree back to outline text. The serialization contract for
/// synthesized nodes: conflict nodes become git-style marker blocks,
/// choice nodes become `#if <revision>` / `#endif` brackets per variant.
#[must_use]
pub fn unparse(arena: &Arena, root: ArtifactId) -> String {
    let mut out = String::new();
    for &child in arena.node(root).children() {
        unparse_into(arena, child, 0, &mut out);
    }
    if arena.node(root).children().is_empty() {
        if let Some(payload) = &arena.node(root).payload {
            out.push_str(payload);
            if !payload.is_empty() && !payload.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

fn unparse_into(arena: &Arena, id: ArtifactId, depth: usize, out: &mut String) {
    let node = arena.node(id);

    if node.conflict {
        let labels = node.variant_labels();
        let (left_label, right_label) = (labels[0].as_str(), labels[1].as_str());
        let _ = writeln!(out, "<<<<<<< {left_label}");
        unparse_variant(arena, node.children()[0], depth, out);
        out.push_str("=======\n");
        unparse_variant(arena, node.children()[1], depth, out);
        let _ = writeln!(out, ">>>>>>> {right_label}");
        return;
    }
    if node.choice {
        for (label, &variant) in node.variant_labels().iter().zip(node.children()) {
            let _ = writeln!(out, "#if {label}");
            unparse_variant(arena, variant, depth, out);
            out.push_str("#endif\n");
        }
        return;
    }

    match node.kind {
        ArtifactKind::Class => {
            indent(out, depth);
            let _ = writeln!(out, "class {}", node.payload.as_deref().unwrap_or(""));
            for &child in node.children() {
                unparse_into(arena, child, depth + 1, out);
            }
        }
        ArtifactKind::Method => {
            indent(out, depth);
            let _ = writeln!(out, "method {}", node.payload.as_deref().unwrap_or(""));
            for &child in node.children() {
                unparse_into(arena, child, depth + 1, out);
            }
        }
        _ => {
            if let Some(payload) = &node.payload {
                for line in payload.lines() {
                    indent(out, depth);
                    out.push_str(line);
                    out.push('\n');
                }
            }
            for &child in node.children() {
                unparse_into(arena, child, depth + 1, out);
            }
        }
    }
}

/// Render one conflict/choice variant. Empty placeholder variants (a
/// deleted side) render as nothing.
fn unparse_variant(arena: &Arena, variant: ArtifactId, depth: usize, out: &mut String) {
    let node = arena.node(variant);
    if node.payload.is_none() && node.is_leaf() {
        return;
    }
    unparse_into(arena, variant, depth, out);
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (Arena, ArtifactId) {
        let mut arena = Arena::new();
        let root = OutlineParser
            .parse(text, Path::new("test.outline"), Revision::Base, &mut arena)
            .unwrap();
        (arena, root)
    }

    #[test]
    fn outline_round_trips() {
        let text = "class Calculator\n  method add\n    return a + b;\n  method sub\n    return a - b;\n";
        let (arena, root) = parse(text);

        let class = arena.node(root).children()[0];
        assert_eq!(arena.node(class).kind, ArtifactKind::Class);
        assert_eq!(arena.node(class).payload.as_deref(), Some("Calculator"));
        assert_eq!(arena.node(class).children().len(), 2);

        assert_eq!(unparse(&arena, root), text);
    }

    #[test]
    fn statements_nest_under_methods() {
        let (arena, root) = parse("class C\n  method m\n    a;\n    b;\n");
        let class = arena.node(root).children()[0];
        let method = arena.node(class).children()[0];
        let statements = arena.node(method).children();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            arena.node(statements[0]).payload.as_deref(),
            Some("a;")
        );
    }

    #[test]
    fn rejects_tabs_and_indent_jumps() {
        let mut arena = Arena::new();
        let result = OutlineParser.parse(
            "class C\n\tmethod m\n",
            Path::new("bad.outline"),
            Revision::Base,
            &mut arena,
        );
        assert!(matches!(result, Err(MergeError::ParseFailure { .. })));

        let result = OutlineParser.parse(
            "class C\n      deep;\n",
            Path::new("bad.outline"),
            Revision::Base,
            &mut arena,
        );
        assert!(matches!(result, Err(MergeError::ParseFailure { .. })));
    }

    #[test]
    fn top_level_statements_parse() {
        let (arena, root) = parse("a\nb\n");
        assert_eq!(arena.node(root).children().len(), 2);
        assert_eq!(unparse(&arena, root), "a\nb\n");
    }

    #[test]
    fn sorted_directory_listing() {
        let dir = std::env::temp_dir().join("treeway-vfs-test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();

        let artifact = FileArtifact::new(&dir);
        assert!(artifact.is_directory());
        let names: Vec<String> = artifact
            .list_children()
            .unwrap()
            .iter()
            .map(FileArtifact::name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_input_is_a_dedicated_error() {
        let artifact = FileArtifact::new("/nonexistent/treeway/input.txt");
        assert!(matches!(
            artifact.read(),
            Err(MergeError::InputMissing { .. })
        ));
    }
}
