//! treeway — structure-aware three-way and n-way merging.
//!
//! Given a common ancestor and two (or more) derived revisions of a
//! source artifact, treeway produces a merged artifact that combines the
//! changes from every side, reports conflicts where changes cannot be
//! reconciled, and can annotate the result with choice nodes describing
//! variant-specific content.
//!
//! The crate is the merge engine only: the artifact tree model, the
//! matchers (ordered, unordered, and the optional cost-model search), the
//! three-way merge driver, the n-way variant fold, the line-based
//! fallback merger, and the strategy dispatcher. Language parsers, CLI
//! front-ends, and statistics live outside, behind the collaborator
//! contracts in [`vfs`].
//!
//! ```
//! use treeway::merge::linebased::merge_lines;
//!
//! let merged = merge_lines("a\nb\nc\n", "a\nB\nc\n", "a\nb\nC\n", "LEFT", "RIGHT");
//! assert_eq!(merged.merged, "a\nB\nC\n");
//! assert_eq!(merged.conflicts, 0);
//! ```

pub mod cancel;
pub mod context;
pub mod error;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod strategy;
pub mod vfs;

pub use cancel::CancellationToken;
pub use context::{CostModelConfig, LookAhead, MergeContext, MergeOptions};
pub use error::MergeError;
pub use merge::{merge_three_way, merge_two_way, MergeOutcome};
pub use model::artifact::{Arena, Artifact, ArtifactId, ArtifactKind, Revision};
pub use model::matching::{Color, Matching, Matchings};
pub use model::scenario::MergeScenario;
pub use strategy::{merge_files, MergeReport, MergeStrategy};
pub use vfs::{unparse, FileArtifact, OutlineParser, TreeParser};
