//! End-to-end merge scenarios.
//!
//! Drives the strategy dispatcher over real files in tempdirs: the
//! literal line-merge scenarios, the structured reorder/rename, add/add,
//! and delete/modify cases, the n-way variant fold, the combined
//! fallback, error policy, and the determinism and identity invariants.

use anyhow::Result;
use tempfile::TempDir;

use treeway::{
    merge_files, CancellationToken, CostModelConfig, FileArtifact, MergeContext, MergeError,
    MergeStrategy, OutlineParser, Revision,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write the three-way scenario into a tempdir and return the artifacts.
fn three_way_files(
    dir: &TempDir,
    base: &str,
    left: &str,
    right: &str,
) -> Result<Vec<(Revision, FileArtifact)>> {
    let write = |name: &str, content: &str| -> Result<FileArtifact> {
        let artifact = FileArtifact::new(dir.path().join(name));
        artifact.write(content)?;
        Ok(artifact)
    };
    Ok(vec![
        (Revision::Base, write("base.outline", base)?),
        (Revision::Left, write("left.outline", left)?),
        (Revision::Right, write("right.outline", right)?),
    ])
}

/// Run a strategy over a three-way file scenario, returning the merged
/// text from the output sink plus conflict and fallback counts.
fn run(
    strategy: MergeStrategy,
    base: &str,
    left: &str,
    right: &str,
    ctx: &mut MergeContext,
) -> Result<(String, usize, usize), MergeError> {
    let dir = TempDir::new().expect("tempdir");
    let files = three_way_files(&dir, base, left, right).expect("scenario files");
    let report = merge_files(strategy, &files, None, ctx, &OutlineParser)?;
    Ok((
        ctx.output().snapshot_string(),
        report.conflicts,
        report.fallbacks,
    ))
}

// ---------------------------------------------------------------------------
// Line-based scenarios
// ---------------------------------------------------------------------------

#[test]
fn s1_line_merge_without_conflict() -> Result<()> {
    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(
        MergeStrategy::LineBased,
        "a\nb\nc\n",
        "a\nB\nc\n",
        "a\nb\nC\n",
        &mut ctx,
    )?;
    assert_eq!(merged, "a\nB\nC\n");
    assert_eq!(conflicts, 0);
    Ok(())
}

#[test]
fn s2_line_merge_with_conflict_markers() -> Result<()> {
    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(
        MergeStrategy::LineBased,
        "a\nb\nc\n",
        "a\nX\nc\n",
        "a\nY\nc\n",
        &mut ctx,
    )?;
    assert_eq!(merged, "a\n<<<<<<< LEFT\nX\n=======\nY\n>>>>>>> RIGHT\nc\n");
    assert_eq!(conflicts, 1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured scenarios
// ---------------------------------------------------------------------------

#[test]
fn s3_reorder_and_rename_merge_without_conflict() -> Result<()> {
    let base = "class C\n  method m1\n    a;\n  method m2\n    b;\n";
    let left = "class C\n  method m2\n    b;\n  method m1\n    a;\n";
    let right = "class C\n  method m1\n    a;\n  method m2\n    B;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
    assert_eq!(
        merged,
        "class C\n  method m2\n    B;\n  method m1\n    a;\n"
    );
    assert_eq!(conflicts, 0);
    Ok(())
}

#[test]
fn s4_equal_additions_collapse_to_one_copy() -> Result<()> {
    let base = "class C\n  method m1\n    a;\n";
    let side = "class C\n  method m1\n    a;\n  method m2\n    b;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, side, side, &mut ctx)?;
    assert_eq!(merged, side);
    assert_eq!(conflicts, 0);
    assert_eq!(merged.matches("method m2").count(), 1);
    Ok(())
}

#[test]
fn s5_delete_versus_modify_conflicts() -> Result<()> {
    let base = "class C\n  method m\n    a;\n";
    let left = "class C\n";
    let right = "class C\n  method m\n    A;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
    assert_eq!(conflicts, 1);
    // The conflict wraps an empty LEFT variant and RIGHT's version.
    assert_eq!(
        merged,
        "class C\n<<<<<<< LEFT\n=======\n  method m\n    A;\n>>>>>>> RIGHT\n"
    );
    Ok(())
}

#[test]
fn divergent_additions_at_one_anchor_keep_left_first() -> Result<()> {
    let base = "class C\n  method m1\n    a;\n";
    let left = "class C\n  method m1\n    a;\n  method added_left\n    l;\n";
    let right = "class C\n  method m1\n    a;\n  method added_right\n    r;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
    assert_eq!(conflicts, 0);
    assert_eq!(
        merged,
        "class C\n  method m1\n    a;\n  method added_left\n    l;\n  method added_right\n    r;\n"
    );
    Ok(())
}

#[test]
fn same_name_additions_with_different_bodies_conflict() -> Result<()> {
    let base = "class C\n";
    let left = "class C\n  method m\n    left;\n";
    let right = "class C\n  method m\n    right;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
    assert_eq!(conflicts, 1);
    assert!(merged.contains("<<<<<<< LEFT"));
    assert!(merged.contains("    left;"));
    assert!(merged.contains("    right;"));
    Ok(())
}

#[test]
fn leaf_payload_conflict_under_conditional_merge_becomes_choice() -> Result<()> {
    let base = "class C\n  method m\n    x = 0;\n";
    let left = "class C\n  method m\n    x = 1;\n";
    let right = "class C\n  method m\n    x = 2;\n";

    let mut ctx = MergeContext::new();
    ctx.conditional_merge = true;
    let (merged, conflicts, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
    assert_eq!(conflicts, 0);
    assert!(merged.contains("#if LEFT"));
    assert!(merged.contains("x = 1;"));
    assert!(merged.contains("#if RIGHT"));
    assert!(merged.contains("x = 2;"));
    Ok(())
}

// ---------------------------------------------------------------------------
// N-way variants
// ---------------------------------------------------------------------------

#[test]
fn s6_three_variants_produce_one_choice_node() -> Result<()> {
    let dir = TempDir::new()?;
    let mut files = Vec::new();
    for (label, value) in [("v1", 1), ("v2", 2), ("v3", 3)] {
        let artifact = FileArtifact::new(dir.path().join(format!("{label}.outline")));
        artifact.write(&format!("setup;\nx = {value};\nteardown;\n"))?;
        files.push((Revision::Named(label.to_owned()), artifact));
    }

    let mut ctx = MergeContext::new();
    let report = merge_files(MergeStrategy::NWay, &files, None, &mut ctx, &OutlineParser)?;
    assert_eq!(report.conflicts, 0);

    let merged = ctx.output().snapshot_string();
    assert_eq!(
        merged,
        "setup;\n\
         #if v1\nx = 1;\n#endif\n\
         #if v2\nx = 2;\n#endif\n\
         #if v3\nx = 3;\n#endif\n\
         teardown;\n"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Combined fallback and error policy
// ---------------------------------------------------------------------------

#[test]
fn combined_falls_back_to_lines_on_parse_failure() -> Result<()> {
    // Tab indentation is a parse failure for the outline parser.
    let base = "\ta\nb\n";
    let left = "\ta\nB\n";
    let right = "\ta\nb\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, fallbacks) =
        run(MergeStrategy::Combined, base, left, right, &mut ctx)?;
    assert_eq!(fallbacks, 1);
    assert_eq!(conflicts, 0);
    assert_eq!(merged, "\ta\nB\n");
    Ok(())
}

#[test]
fn structured_surfaces_parse_failures() {
    let mut ctx = MergeContext::new();
    let result = run(
        MergeStrategy::Structured,
        "\ta\n",
        "\ta\n",
        "\ta\n",
        &mut ctx,
    );
    assert!(matches!(result, Err(MergeError::ParseFailure { .. })));
}

#[test]
fn keep_going_records_the_crash_and_continues() -> Result<()> {
    let mut ctx = MergeContext::new();
    ctx.keep_going = true;
    let (_, conflicts, _) = run(
        MergeStrategy::Structured,
        "\ta\n",
        "\ta\n",
        "\ta\n",
        &mut ctx,
    )?;
    assert_eq!(conflicts, 0);
    assert_eq!(ctx.crashes().len(), 1);
    let description = ctx.crashes().values().next().unwrap();
    assert!(description.contains("failed to parse"));
    Ok(())
}

#[test]
fn exit_on_error_overrides_keep_going() {
    let mut ctx = MergeContext::new();
    ctx.keep_going = true;
    ctx.exit_on_error = true;
    let result = run(
        MergeStrategy::Structured,
        "\ta\n",
        "\ta\n",
        "\ta\n",
        &mut ctx,
    );
    assert!(result.is_err());
}

#[test]
fn missing_input_fails_before_merging() {
    let mut ctx = MergeContext::new();
    let files = vec![
        (Revision::Base, FileArtifact::new("/nonexistent/base")),
        (Revision::Left, FileArtifact::new("/nonexistent/left")),
        (Revision::Right, FileArtifact::new("/nonexistent/right")),
    ];
    let result = merge_files(
        MergeStrategy::LineBased,
        &files,
        None,
        &mut ctx,
        &OutlineParser,
    );
    assert!(matches!(result, Err(MergeError::InputMissing { .. })));
}

#[test]
fn cancellation_surfaces_as_a_dedicated_error() {
    let mut ctx = MergeContext::new();
    let token = CancellationToken::new();
    ctx.set_cancellation(token.clone());
    token.cancel();

    let result = run(MergeStrategy::LineBased, "a\n", "a\n", "a\n", &mut ctx);
    assert!(matches!(result, Err(MergeError::Cancelled { .. })));
    // The scenario lands in the crash registry with the cancellation cause.
    assert_eq!(ctx.crashes().len(), 1);
    assert!(ctx.crashes().values().next().unwrap().contains("cancelled"));
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[test]
fn identity_on_equal_inputs() -> Result<()> {
    let text = "class C\n  method m\n    a;\n";
    for strategy in [MergeStrategy::LineBased, MergeStrategy::Structured] {
        let mut ctx = MergeContext::new();
        let (merged, conflicts, _) = run(strategy, text, text, text, &mut ctx)?;
        assert_eq!(merged, text);
        assert_eq!(conflicts, 0);
    }
    Ok(())
}

#[test]
fn trivial_side_merges_adopt_the_changed_side() -> Result<()> {
    let base = "class C\n  method m\n    a;\n";
    let changed = "class C\n  method m\n    b;\n  method extra\n    c;\n";

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) =
        run(MergeStrategy::Structured, base, base, changed, &mut ctx)?;
    assert_eq!(merged, changed);
    assert_eq!(conflicts, 0);

    let mut ctx = MergeContext::new();
    let (merged, conflicts, _) =
        run(MergeStrategy::Structured, base, changed, base, &mut ctx)?;
    assert_eq!(merged, changed);
    assert_eq!(conflicts, 0);
    Ok(())
}

#[test]
fn merging_the_output_back_is_idempotent() -> Result<()> {
    let base = "class C\n  method m1\n    a;\n  method m2\n    b;\n";
    let left = "class C\n  method m2\n    b;\n  method m1\n    a;\n";
    let right = "class C\n  method m1\n    a;\n  method m2\n    B;\n";

    let mut ctx = MergeContext::new();
    let (merged, _, _) = run(MergeStrategy::Structured, base, left, right, &mut ctx)?;

    let mut ctx = MergeContext::new();
    let (again, conflicts, _) =
        run(MergeStrategy::Structured, left, &merged, left, &mut ctx)?;
    assert_eq!(again, merged);
    assert_eq!(conflicts, 0);
    Ok(())
}

#[test]
fn seeded_cost_model_runs_are_reproducible() -> Result<()> {
    let base = "class C\n  method m1\n    a;\n  method m2\n    b;\n";
    let left = "class C\n  method m2\n    b;\n  method m1\n    a2;\n";
    let right = "class C\n  method m1\n    a;\n  method m3\n    c;\n";

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut ctx = MergeContext::new();
        let mut config = CostModelConfig::default();
        config.seed = Some(1234);
        ctx.cost_model = Some(config);
        let (merged, conflicts, _) =
            run(MergeStrategy::Structured, base, left, right, &mut ctx)?;
        outputs.push((merged, conflicts));
    }
    assert_eq!(outputs[0], outputs[1]);
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory scenarios and output files
// ---------------------------------------------------------------------------

#[test]
fn directory_scenario_applies_add_delete_rules() -> Result<()> {
    let dir = TempDir::new()?;
    let make = |name: &str| -> Result<FileArtifact> {
        let root = FileArtifact::new(dir.path().join(name));
        std::fs::create_dir_all(root.path())?;
        Ok(root)
    };
    let base = make("base")?;
    let left = make("left")?;
    let right = make("right")?;

    // shared.outline: changed on the left only.
    base.child("shared.outline").write("a;\n")?;
    left.child("shared.outline").write("a2;\n")?;
    right.child("shared.outline").write("a;\n")?;
    // added_left.outline: new on the left.
    left.child("added_left.outline").write("new;\n")?;
    // removed.outline: deleted on the right, unchanged on the left.
    base.child("removed.outline").write("gone;\n")?;
    left.child("removed.outline").write("gone;\n")?;

    let output = FileArtifact::new(dir.path().join("merged"));
    std::fs::create_dir_all(output.path())?;

    let mut ctx = MergeContext::new();
    ctx.recursive = true;
    ctx.pretend = false;
    let files = vec![
        (Revision::Base, base),
        (Revision::Left, left),
        (Revision::Right, right),
    ];
    let report = merge_files(
        MergeStrategy::Structured,
        &files,
        Some(&output),
        &mut ctx,
        &OutlineParser,
    )?;

    assert_eq!(report.conflicts, 0);
    assert_eq!(output.child("shared.outline").read()?, "a2;\n");
    assert_eq!(output.child("added_left.outline").read()?, "new;\n");
    assert!(!output.child("removed.outline").exists());
    Ok(())
}

#[test]
fn directory_scenario_requires_the_recursive_option() -> Result<()> {
    let dir = TempDir::new()?;
    let make = |name: &str| -> Result<FileArtifact> {
        let root = FileArtifact::new(dir.path().join(name));
        std::fs::create_dir_all(root.path())?;
        Ok(root)
    };
    let files = vec![
        (Revision::Base, make("base")?),
        (Revision::Left, make("left")?),
        (Revision::Right, make("right")?),
    ];

    let mut ctx = MergeContext::new();
    let result = merge_files(
        MergeStrategy::Structured,
        &files,
        None,
        &mut ctx,
        &OutlineParser,
    );
    assert!(matches!(result, Err(MergeError::InputInaccessible { .. })));
    Ok(())
}

#[test]
fn pretend_skips_the_output_file() -> Result<()> {
    let dir = TempDir::new()?;
    let files = three_way_files(&dir, "a\n", "b\n", "a\n")?;
    let output = FileArtifact::new(dir.path().join("merged.outline"));

    // Default context pretends; nothing lands on disk.
    let mut ctx = MergeContext::new();
    merge_files(
        MergeStrategy::LineBased,
        &files,
        Some(&output),
        &mut ctx,
        &OutlineParser,
    )?;
    assert!(!output.exists());

    let mut ctx = MergeContext::new();
    ctx.pretend = false;
    merge_files(
        MergeStrategy::LineBased,
        &files,
        Some(&output),
        &mut ctx,
        &OutlineParser,
    )?;
    assert_eq!(output.read()?, "b\n");
    Ok(())
}

#[test]
fn quiet_suppresses_the_output_echo() -> Result<()> {
    let mut ctx = MergeContext::new();
    ctx.quiet = true;
    let (merged, conflicts, _) = run(MergeStrategy::LineBased, "a\n", "b\n", "a\n", &mut ctx)?;
    assert_eq!(merged, "");
    assert_eq!(conflicts, 0);
    Ok(())
}

#[test]
fn diff_only_dumps_matchings_instead_of_merging() -> Result<()> {
    let mut ctx = MergeContext::new();
    ctx.diff_only = true;
    let text = "class C\n  method m\n    a;\n";
    let (output, conflicts, _) = run(MergeStrategy::Structured, text, text, text, &mut ctx)?;
    assert_eq!(conflicts, 0);
    assert!(output.contains("score="));
    assert!(output.contains("class"));
    // The tree dumps land in the diagnostics sink.
    assert!(ctx.diagnostics().snapshot_string().contains("LEFT class"));
    Ok(())
}
