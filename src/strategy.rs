//! Strategy dispatch — selecting and composing merge algorithms.
//!
//! A [`MergeStrategy`] is a value selected by name (case-insensitive,
//! whitespace-trimmed); unknown names fail with
//! [`MergeError::StrategyNotFound`] before any merging begins.
//!
//! | name | behavior |
//! |------|----------|
//! | `linebased`, `unstructured` | line merger only |
//! | `structured`                | matcher + merge driver on parsed trees |
//! | `combined`, `autotuning`    | structured, falling back to linebased per file on parse failure |
//! | `nway`, `variants`          | n-way variant fold with conditional merge |
//!
//! [`merge_files`] is the dispatcher entry point. Directory scenarios
//! recurse pairing entries by name; files present in only some revisions
//! follow the add/delete rules of the tree driver at the filesystem
//! level. Per-file failures honor `keep_going` (recorded in the crash
//! registry) and `exit_on_error`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::MergeContext;
use crate::error::MergeError;
use crate::matcher::tree_match;
use crate::merge::linebased::merge_lines;
use crate::merge::nway::merge_nway;
use crate::merge::{merge_three_way, MergeOutcome};
use crate::model::artifact::{Arena, ArtifactId, Revision};
use crate::model::scenario::MergeScenario;
use crate::vfs::{unparse, FileArtifact, TreeParser};

// ---------------------------------------------------------------------------
// MergeStrategy
// ---------------------------------------------------------------------------

/// The algorithm family applied to a scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    LineBased,
    Structured,
    Combined,
    NWay,
}

impl MergeStrategy {
    /// Canonical strategy names and their aliases.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &[
            "linebased",
            "unstructured",
            "structured",
            "combined",
            "autotuning",
            "nway",
            "variants",
        ]
    }

    /// Resolve a strategy by name, ignoring case and surrounding
    /// whitespace.
    pub fn parse(name: &str) -> Result<Self, MergeError> {
        let normalized = name.trim().to_lowercase();
        match normalized.as_str() {
            "linebased" | "unstructured" => Ok(Self::LineBased),
            "structured" => Ok(Self::Structured),
            "combined" | "autotuning" => Ok(Self::Combined),
            "nway" | "variants" => Ok(Self::NWay),
            _ => Err(MergeError::StrategyNotFound { name: normalized }),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = MergeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LineBased => "linebased",
            Self::Structured => "structured",
            Self::Combined => "combined",
            Self::NWay => "nway",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MergeReport
// ---------------------------------------------------------------------------

/// Exit status for a clean merge.
pub const EXIT_CLEAN: i32 = 0;
/// Exit status when conflicts remain in the output.
pub const EXIT_CONFLICTS: i32 = 1;
/// Exit status embedders should map internal errors to.
pub const EXIT_ERROR: i32 = 2;

/// Aggregated result of a dispatcher run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// File scenarios merged (directories expand to their files).
    pub files: usize,
    /// Total conflicts across all files.
    pub conflicts: usize,
    /// Files where `combined` fell back to the line merger.
    pub fallbacks: usize,
}

impl MergeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }

    /// CLI exit status: 0 clean, 1 conflicts remain. Internal errors
    /// never reach a report; embedders map `Err` to [`EXIT_ERROR`].
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            EXIT_CLEAN
        } else {
            EXIT_CONFLICTS
        }
    }

    /// Machine-readable form of the report.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("report serialization cannot fail")
    }

    fn absorb(&mut self, other: MergeReport) {
        self.files += other.files;
        self.conflicts += other.conflicts;
        self.fallbacks += other.fallbacks;
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Merge one scenario of file artifacts.
///
/// `files` binds each revision to its input, in fold order for n-way
/// scenarios. `output`, when present, receives the merged bytes unless
/// the context's `pretend` is on. The merged text also lands in the
/// context's output sink unless `quiet` is set.
pub fn merge_files(
    strategy: MergeStrategy,
    files: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    let scenario_name = scenario_name(files);
    if let Err(error) = ctx.cancellation().check(&scenario_name) {
        ctx.record_crash(&scenario_name, &error);
        return Err(error);
    }

    for (_, file) in files {
        if !file.exists() {
            return Err(MergeError::InputMissing {
                path: file.path().to_path_buf(),
            });
        }
    }

    if files.iter().all(|(_, file)| file.is_directory()) {
        if !ctx.recursive {
            return Err(MergeError::InputInaccessible {
                path: files[0].1.path().to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "directory scenario without the recursive option",
                ),
            });
        }
        return merge_directories(strategy, files, output, ctx, parser);
    }

    info!(%strategy, scenario = %scenario_name, "merging file scenario");
    let result = merge_one_file(strategy, files, output, ctx, parser);
    match result {
        Ok(report) => Ok(report),
        Err(error) => {
            if matches!(error, MergeError::Cancelled { .. }) {
                // Partial state is discarded; the registry records why.
                ctx.record_crash(&scenario_name, &error);
                Err(error)
            } else if error.recoverable() && ctx.keep_going && !ctx.exit_on_error {
                warn!(%error, "recording failure and continuing");
                ctx.record_crash(&scenario_name, &error);
                Ok(MergeReport::default())
            } else {
                Err(error)
            }
        }
    }
}

/// Scenario display name for logs and the crash registry.
fn scenario_name(files: &[(Revision, FileArtifact)]) -> String {
    let parts: Vec<String> = files
        .iter()
        .map(|(revision, file)| format!("{revision}:{}", file.path().display()))
        .collect();
    parts.join(" <-> ")
}

fn merge_one_file(
    strategy: MergeStrategy,
    files: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    match strategy {
        MergeStrategy::LineBased => merge_linebased(files, output, ctx),
        MergeStrategy::Structured => merge_structured(files, output, ctx, parser),
        MergeStrategy::Combined => {
            match merge_structured(files, output, ctx, parser) {
                Ok(report) => Ok(report),
                Err(MergeError::ParseFailure { file, detail }) => {
                    debug!(file = %file.display(), %detail, "falling back to line merge");
                    let mut report = merge_linebased(files, output, ctx)?;
                    report.fallbacks += 1;
                    Ok(report)
                }
                Err(error) => Err(error),
            }
        }
        MergeStrategy::NWay => merge_nway_files(files, output, ctx, parser),
    }
}

/// Pull the three-way roles out of a scenario.
fn three_way_contents(
    files: &[(Revision, FileArtifact)],
) -> Result<(String, String, String), MergeError> {
    let find = |revision: &Revision| -> Result<String, MergeError> {
        files
            .iter()
            .find(|(r, _)| r == revision)
            .ok_or_else(|| MergeError::InternalAssertion {
                detail: format!("scenario lacks the {revision} revision"),
            })
            .and_then(|(_, file)| file.read())
    };
    Ok((
        find(&Revision::Base)?,
        find(&Revision::Left)?,
        find(&Revision::Right)?,
    ))
}

fn merge_linebased(
    files: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
) -> Result<MergeReport, MergeError> {
    let (base, left, right) = three_way_contents(files)?;
    let merged = merge_lines(
        &base,
        &left,
        &right,
        Revision::Left.label(),
        Revision::Right.label(),
    );
    emit(ctx, output, &merged.merged)?;
    Ok(MergeReport {
        files: 1,
        conflicts: merged.conflicts,
        fallbacks: 0,
    })
}

fn merge_structured(
    files: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    let mut arena = Arena::new();
    let mut roots = Vec::with_capacity(files.len());
    for (revision, file) in files {
        let text = file.read()?;
        let root = parser.parse(&text, file.path(), revision.clone(), &mut arena)?;
        roots.push((revision.clone(), root));
    }

    if ctx.diff_only {
        return diff_only(&arena, ctx, &roots);
    }

    let scenario = MergeScenario::n_way(roots)?;
    let (base, left, right) = (
        scenario.get(&Revision::Base),
        scenario.get(&Revision::Left),
        scenario.get(&Revision::Right),
    );
    let (Some(base), Some(left), Some(right)) = (base, left, right) else {
        return Err(MergeError::InternalAssertion {
            detail: "structured strategy needs BASE, LEFT and RIGHT".to_owned(),
        });
    };

    let outcome = merge_three_way(&mut arena, ctx, base, left, right)?;
    finish_tree_merge(&arena, ctx, output, outcome)
}

/// Diff-only run: match LEFT against RIGHT and dump the matchings.
fn diff_only(
    arena: &Arena,
    ctx: &MergeContext,
    roots: &[(Revision, ArtifactId)],
) -> Result<MergeReport, MergeError> {
    let left = roots
        .iter()
        .find(|(r, _)| *r == Revision::Left)
        .map(|&(_, id)| id);
    let right = roots
        .iter()
        .find(|(r, _)| *r == Revision::Right)
        .map(|&(_, id)| id);
    let (Some(left), Some(right)) = (left, right) else {
        return Err(MergeError::InternalAssertion {
            detail: "diff-only run needs LEFT and RIGHT".to_owned(),
        });
    };

    let matchings = tree_match(arena, ctx, left, right)?;
    for matching in &matchings {
        let left_node = arena.node(matching.left);
        ctx.output().write_line(&format!(
            "{:?} score={} {} {}",
            matching.color,
            matching.score,
            left_node.kind,
            left_node.payload.as_deref().unwrap_or("-"),
        ));
    }
    ctx.diagnostics().write(arena.dump(left).as_bytes());
    ctx.diagnostics().write(arena.dump(right).as_bytes());
    Ok(MergeReport {
        files: 1,
        conflicts: 0,
        fallbacks: 0,
    })
}

fn merge_nway_files(
    files: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    let mut arena = Arena::new();
    let mut roots = Vec::with_capacity(files.len());
    for (revision, file) in files {
        let text = file.read()?;
        let root = parser.parse(&text, file.path(), revision.clone(), &mut arena)?;
        roots.push((revision.clone(), root));
    }
    let scenario = MergeScenario::n_way(roots)?;
    let outcome = merge_nway(&mut arena, ctx, &scenario)?;
    finish_tree_merge(&arena, ctx, output, outcome)
}

fn finish_tree_merge(
    arena: &Arena,
    ctx: &MergeContext,
    output: Option<&FileArtifact>,
    outcome: MergeOutcome,
) -> Result<MergeReport, MergeError> {
    let text = outcome
        .root
        .map_or_else(String::new, |root| unparse(arena, root));
    emit(ctx, output, &text)?;
    Ok(MergeReport {
        files: 1,
        conflicts: outcome.conflicts,
        fallbacks: 0,
    })
}

/// Route merged text to the output sink and, unless pretending, the
/// output file.
fn emit(ctx: &MergeContext, output: Option<&FileArtifact>, text: &str) -> Result<(), MergeError> {
    if !ctx.quiet {
        ctx.output().write(text.as_bytes());
    }
    if let Some(file) = output {
        if !ctx.pretend {
            file.write(text)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory recursion
// ---------------------------------------------------------------------------

fn merge_directories(
    strategy: MergeStrategy,
    dirs: &[(Revision, FileArtifact)],
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    let mut listings: Vec<(Revision, BTreeMap<String, FileArtifact>)> = Vec::new();
    let mut names: BTreeSet<String> = BTreeSet::new();
    for (revision, dir) in dirs {
        let children = dir.list_children()?;
        let map: BTreeMap<String, FileArtifact> = children
            .into_iter()
            .map(|child| (child.name(), child))
            .collect();
        names.extend(map.keys().cloned());
        listings.push((revision.clone(), map));
    }

    let mut report = MergeReport::default();
    for name in &names {
        ctx.cancellation().check(name)?;
        let present: Vec<(Revision, FileArtifact)> = listings
            .iter()
            .filter_map(|(revision, map)| {
                map.get(name).map(|file| (revision.clone(), file.clone()))
            })
            .collect();
        let child_output = output.map(|dir| dir.child(name));

        let result = merge_directory_entry(
            strategy,
            &present,
            listings.len(),
            child_output.as_ref(),
            ctx,
            parser,
        );
        match result {
            Ok(sub) => report.absorb(sub),
            Err(error) => {
                if error.recoverable() && ctx.keep_going && !ctx.exit_on_error {
                    warn!(%error, %name, "recording failure and continuing");
                    let scenario = scenario_name(&present);
                    ctx.record_crash(&scenario, &error);
                } else {
                    return Err(error);
                }
            }
        }
    }
    Ok(report)
}

/// One paired directory entry, applying the add/delete rules at the
/// filesystem level.
fn merge_directory_entry(
    strategy: MergeStrategy,
    present: &[(Revision, FileArtifact)],
    arity: usize,
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
    parser: &dyn TreeParser,
) -> Result<MergeReport, MergeError> {
    // Present everywhere: an ordinary sub-scenario.
    if present.len() == arity {
        return merge_files(strategy, present, output, ctx, parser);
    }

    let base = present.iter().find(|(r, _)| *r == Revision::Base);
    let sides: Vec<&(Revision, FileArtifact)> = present
        .iter()
        .filter(|(r, _)| *r != Revision::Base)
        .collect();

    match (base, sides.len()) {
        // Deleted in every derived revision.
        (Some(_), 0) => Ok(MergeReport::default()),
        // Present in exactly one derived revision.
        (base, 1) => {
            let (_, file) = sides[0];
            match base {
                None => {
                    // Added on one side: adopt it.
                    copy_entry(file, output, ctx)
                }
                Some((_, base_file)) => {
                    // Deleted on the other side: a clean delete when this
                    // side left it unchanged, a delete/modify conflict
                    // otherwise; the surviving side wins the write.
                    if file.is_file() && base_file.is_file() && file.read()? == base_file.read()? {
                        Ok(MergeReport::default())
                    } else {
                        let mut report = copy_entry(file, output, ctx)?;
                        report.conflicts += 1;
                        Ok(report)
                    }
                }
            }
        }
        // Added independently in several revisions (no base).
        (None, _) => {
            let all_files = sides.iter().all(|(_, file)| file.is_file());
            if all_files {
                let contents: Vec<String> = sides
                    .iter()
                    .map(|(_, file)| file.read())
                    .collect::<Result<_, _>>()?;
                if contents.windows(2).all(|pair| pair[0] == pair[1]) {
                    return copy_entry(&sides[0].1, output, ctx);
                }
                // Divergent add/add: fold a line merge against an empty
                // base, accumulating revision labels like the n-way driver.
                let mut text = contents[0].clone();
                let mut label = sides[0].0.label().to_owned();
                let mut conflicts = 0usize;
                for (side, content) in sides.iter().zip(&contents).skip(1) {
                    let merged = merge_lines("", &text, content, &label, side.0.label());
                    conflicts += merged.conflicts;
                    text = merged.merged;
                    label.push(',');
                    label.push_str(side.0.label());
                }
                emit(ctx, output, &text)?;
                return Ok(MergeReport {
                    files: 1,
                    conflicts,
                    fallbacks: 0,
                });
            }
            // Added directories recurse with the revisions that have them.
            merge_files(strategy, present, output, ctx, parser)
        }
        // Present in several revisions including base; recurse with the
        // missing revision treated as a deletion by the rules above only
        // when exactly one side remains, otherwise merge what is there.
        (Some(_), _) => merge_files(strategy, present, output, ctx, parser),
    }
}

/// Adopt a single-revision entry into the output.
fn copy_entry(
    file: &FileArtifact,
    output: Option<&FileArtifact>,
    ctx: &mut MergeContext,
) -> Result<MergeReport, MergeError> {
    if file.is_directory() {
        let mut report = MergeReport::default();
        for child in file.list_children()? {
            let name = child.name();
            let child_output = output.map(|dir| dir.child(&name));
            report.absorb(copy_entry(&child, child_output.as_ref(), ctx)?);
        }
        return Ok(report);
    }
    let text = file.read()?;
    emit(ctx, output, &text)?;
    Ok(MergeReport {
        files: 1,
        conflicts: 0,
        fallbacks: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_normalize() {
        assert_eq!(
            MergeStrategy::parse(" Structured ").unwrap(),
            MergeStrategy::Structured
        );
        assert_eq!(
            MergeStrategy::parse("LINEBASED").unwrap(),
            MergeStrategy::LineBased
        );
        assert_eq!(
            MergeStrategy::parse("unstructured").unwrap(),
            MergeStrategy::LineBased
        );
        assert_eq!(
            MergeStrategy::parse("autotuning").unwrap(),
            MergeStrategy::Combined
        );
        assert_eq!(
            MergeStrategy::parse("variants").unwrap(),
            MergeStrategy::NWay
        );
        for name in MergeStrategy::names() {
            assert!(MergeStrategy::parse(name).is_ok());
        }
    }

    #[test]
    fn unknown_strategy_is_a_dedicated_error() {
        let error = MergeStrategy::parse("semantic").unwrap_err();
        assert!(matches!(
            error,
            MergeError::StrategyNotFound { name } if name == "semantic"
        ));
    }

    #[test]
    fn report_exit_codes() {
        let clean = MergeReport {
            files: 2,
            conflicts: 0,
            fallbacks: 1,
        };
        assert_eq!(clean.exit_code(), EXIT_CLEAN);

        let conflicted = MergeReport {
            files: 2,
            conflicts: 3,
            fallbacks: 0,
        };
        assert_eq!(conflicted.exit_code(), EXIT_CONFLICTS);
        assert!(conflicted.to_json().contains("\"conflicts\":3"));
    }
}
