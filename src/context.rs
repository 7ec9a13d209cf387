//! Merge context — configuration plus per-run mutable state.
//!
//! A [`MergeContext`] is constructed once per invocation and threaded
//! explicitly through every phase; there is no global state. It carries:
//!
//! - the look-ahead configuration (global depth plus per-kind overrides),
//! - the conditional-merge switches,
//! - run policy flags (`diff_only`, `quiet`, `pretend`, `recursive`,
//!   `keep_going`, `exit_on_error`),
//! - the optional cost-model matcher parameters,
//! - the crash registry (scenario → error, append-only),
//! - the buffered output and diagnostic sinks,
//! - the cooperative cancellation token.
//!
//! [`MergeContext::isolated`] hands a sub-merge a deep copy with fresh
//! sinks so it cannot observe the caller's later writes.
//!
//! [`MergeOptions`] is the serializable face of the same record: a plain
//! `serde` struct with defaults for every field, loadable from TOML.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::cancel::CancellationToken;
use crate::error::MergeError;
use crate::model::artifact::ArtifactKind;

// ---------------------------------------------------------------------------
// LookAhead
// ---------------------------------------------------------------------------

/// How far the matcher keeps descending after a root mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookAhead {
    /// Stop at the first mismatch.
    Off,
    /// Descend without bound.
    Full,
    /// Descend up to this many levels.
    Depth(u32),
}

impl LookAhead {
    /// Remaining budget after descending one level, or `None` when the
    /// budget is exhausted.
    #[must_use]
    pub fn descend(self) -> Option<LookAhead> {
        match self {
            Self::Off | Self::Depth(0) => None,
            Self::Full => Some(Self::Full),
            Self::Depth(depth) => Some(Self::Depth(depth - 1)),
        }
    }

    /// `true` unless the budget is exhausted.
    #[must_use]
    pub fn enabled(self) -> bool {
        !matches!(self, Self::Off | Self::Depth(0))
    }
}

impl FromStr for LookAhead {
    type Err = MergeError;

    /// Accepts `off` (= 0), `full` (= unbounded), or a non-negative
    /// integer, case-insensitively and ignoring surrounding whitespace.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().to_lowercase();
        match trimmed.as_str() {
            "off" => Ok(Self::Off),
            "full" => Ok(Self::Full),
            _ => match trimmed.parse::<u32>() {
                Ok(0) => Ok(Self::Off),
                Ok(depth) => Ok(Self::Depth(depth)),
                Err(_) => Err(MergeError::InvalidOption {
                    what: "lookahead",
                    value: value.to_owned(),
                    reason: "must be 'off', 'full' or a non-negative integer".to_owned(),
                }),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// CostModelConfig
// ---------------------------------------------------------------------------

/// Parameters of the optional cost-model matcher.
///
/// Presence of this record on the context enables the matcher; the
/// defaults reproduce the legacy tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct CostModelConfig {
    /// Number of search iterations per restart.
    pub iterations: u32,
    /// Probability of the roulette proposal (vs. a uniformly random one).
    pub p_assign: f64,
    /// Renaming cost weight: matched pair with differing payloads.
    pub wr: f64,
    /// Ancestry cost weight: parents of a matched pair not matched to
    /// each other.
    pub wn: f64,
    /// Unmatched-node cost weight.
    pub wa: f64,
    /// Broken-sibling-group cost weight.
    pub ws: f64,
    /// Child-order-violation cost weight.
    pub wo: f64,
    /// RNG seed; `None` means nondeterministic by design.
    pub seed: Option<u64>,
    /// Whether a random fraction of the assignment is pinned per iteration.
    pub fix_random_percentage: bool,
    /// Lower bound of the pinned fraction, in `[0, 1]`.
    pub fix_lower: f64,
    /// Upper bound of the pinned fraction, in `[0, 1]`.
    pub fix_upper: f64,
    /// Run independent restarts on worker threads.
    pub parallel: bool,
    /// Re-invoke the search on subtrees whose local cost exceeds this
    /// multiple of the best subtree cost.
    pub re_match_bound: f64,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            p_assign: 0.7,
            wr: 1.0,
            wn: 1.0,
            wa: 1.0,
            ws: 1.0,
            wo: 1.0,
            seed: Some(42),
            fix_random_percentage: false,
            fix_lower: 0.0,
            fix_upper: 0.0,
            parallel: false,
            re_match_bound: 3.0,
        }
    }
}

impl CostModelConfig {
    /// Parse the fixed-arity option tuple
    /// `iterations,p_assign,wr,wn,wa,ws,wo` into `self`.
    pub fn apply_tuple(&mut self, tuple: &str) -> Result<(), MergeError> {
        let invalid = |reason: String| MergeError::InvalidOption {
            what: "cost-model tuple",
            value: tuple.to_owned(),
            reason,
        };

        let parts: Vec<&str> = tuple.split(',').map(str::trim).collect();
        if parts.len() != 7 {
            return Err(invalid(format!("expected 7 fields, got {}", parts.len())));
        }

        self.iterations = parts[0]
            .parse()
            .map_err(|_| invalid(format!("'{}' is not an iteration count", parts[0])))?;
        if self.iterations == 0 {
            return Err(invalid("iteration count must be positive".to_owned()));
        }

        let mut floats = [0.0f64; 6];
        for (slot, part) in floats.iter_mut().zip(&parts[1..]) {
            *slot = part
                .parse()
                .map_err(|_| invalid(format!("'{part}' is not a number")))?;
            if *slot < 0.0 {
                return Err(invalid(format!("'{part}' must be non-negative")));
            }
        }
        if floats[0] > 1.0 {
            return Err(invalid("p_assign must be in [0, 1]".to_owned()));
        }
        let [p_assign, wr, wn, wa, ws, wo] = floats;
        self.p_assign = p_assign;
        self.wr = wr;
        self.wn = wn;
        self.wa = wa;
        self.ws = ws;
        self.wo = wo;
        Ok(())
    }

    /// Parse the fix-percentage tuple `fix_lower,fix_upper` into `self`
    /// and turn the pinning mode on.
    pub fn apply_fix_tuple(&mut self, tuple: &str) -> Result<(), MergeError> {
        let invalid = |reason: String| MergeError::InvalidOption {
            what: "fix-percentage tuple",
            value: tuple.to_owned(),
            reason,
        };

        let parts: Vec<&str> = tuple.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(invalid(format!("expected 2 fields, got {}", parts.len())));
        }
        let lower: f64 = parts[0]
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a number", parts[0])))?;
        let upper: f64 = parts[1]
            .parse()
            .map_err(|_| invalid(format!("'{}' is not a number", parts[1])))?;
        if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) {
            return Err(invalid("bounds must be in [0, 1]".to_owned()));
        }
        if lower > upper {
            return Err(invalid("lower bound exceeds upper bound".to_owned()));
        }

        self.fix_random_percentage = true;
        self.fix_lower = lower;
        self.fix_upper = upper;
        Ok(())
    }

    /// Parse a seed value: an integer, or the token `none` for
    /// nondeterministic runs.
    pub fn apply_seed(&mut self, value: &str) -> Result<(), MergeError> {
        let trimmed = value.trim().to_lowercase();
        if trimmed == "none" {
            self.seed = None;
            return Ok(());
        }
        match trimmed.parse::<u64>() {
            Ok(seed) => {
                self.seed = Some(seed);
                Ok(())
            }
            Err(_) => Err(MergeError::InvalidOption {
                what: "cost-model seed",
                value: value.to_owned(),
                reason: "must be an integer or 'none'".to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Append-only buffered byte sink with a snapshot accessor.
///
/// Writers serialize through an internal mutex; concurrent restarts and
/// sub-merges may hold clones of the same sink.
#[derive(Clone, Debug, Default)]
pub struct Sink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Sink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn write(&self, bytes: &[u8]) {
        self.buffer
            .lock()
            .expect("sink mutex poisoned")
            .extend_from_slice(bytes);
    }

    /// Append a string followed by a newline.
    pub fn write_line(&self, line: &str) {
        let mut buffer = self.buffer.lock().expect("sink mutex poisoned");
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
    }

    /// Copy of everything written so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.lock().expect("sink mutex poisoned").clone()
    }

    /// Lossy UTF-8 view of the snapshot.
    #[must_use]
    pub fn snapshot_string(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }
}

// ---------------------------------------------------------------------------
// MergeContext
// ---------------------------------------------------------------------------

/// Configuration record plus mutable per-run state, threaded explicitly
/// through every merge phase.
#[derive(Clone, Debug)]
pub struct MergeContext {
    /// Global look-ahead depth.
    pub lookahead: LookAhead,
    /// Per-kind look-ahead overrides; a present entry supersedes the
    /// global depth for that kind.
    pub kind_lookaheads: BTreeMap<ArtifactKind, LookAhead>,
    /// Emit choice nodes instead of conflicts (rules 4/6/9).
    pub conditional_merge: bool,
    /// Allow choice nodes outside method bodies.
    pub conditional_outside_methods: bool,
    /// Compute and report matchings only; skip synthesis.
    pub diff_only: bool,
    /// Record per-scenario failures and continue with the next scenario.
    pub keep_going: bool,
    /// Make the first failure fatal, overriding `keep_going`.
    pub exit_on_error: bool,
    /// Suppress the merged-output echo into the output sink.
    pub quiet: bool,
    /// Skip file-artifact writes; output stays in the buffered sink.
    pub pretend: bool,
    /// Recurse into directory scenarios.
    pub recursive: bool,
    /// Cost-model matcher parameters; `None` keeps the divide-and-conquer
    /// matchers.
    pub cost_model: Option<CostModelConfig>,
    crashes: BTreeMap<String, String>,
    output: Sink,
    diagnostics: Sink,
    cancel: CancellationToken,
}

impl Default for MergeContext {
    fn default() -> Self {
        Self {
            lookahead: LookAhead::Off,
            kind_lookaheads: BTreeMap::new(),
            conditional_merge: false,
            conditional_outside_methods: false,
            diff_only: false,
            keep_going: false,
            exit_on_error: false,
            quiet: false,
            pretend: true,
            recursive: false,
            cost_model: None,
            crashes: BTreeMap::new(),
            output: Sink::new(),
            diagnostics: Sink::new(),
            cancel: CancellationToken::new(),
        }
    }
}

impl MergeContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from deserialized [`MergeOptions`].
    pub fn from_options(options: &MergeOptions) -> Result<Self, MergeError> {
        let mut ctx = Self::new();
        ctx.lookahead = options.lookahead.parse()?;
        for (kind, value) in &options.lookaheads {
            ctx.kind_lookaheads.insert(*kind, value.parse()?);
        }
        ctx.conditional_merge = options.conditional_merge;
        ctx.conditional_outside_methods = options.conditional_outside_methods;
        ctx.diff_only = options.diff_only;
        ctx.keep_going = options.keep_going;
        ctx.exit_on_error = options.exit_on_error;
        ctx.quiet = options.quiet;
        ctx.pretend = options.pretend;
        ctx.recursive = options.recursive;

        if options.cost_model.is_some()
            || options.cost_model_fix.is_some()
            || options.cost_model_parallel
        {
            let mut config = CostModelConfig::default();
            if let Some(tuple) = &options.cost_model {
                config.apply_tuple(tuple)?;
            }
            if let Some(tuple) = &options.cost_model_fix {
                config.apply_fix_tuple(tuple)?;
            }
            if let Some(seed) = &options.cost_model_seed {
                config.apply_seed(seed)?;
            }
            config.parallel = options.cost_model_parallel;
            ctx.cost_model = Some(config);
        }
        Ok(ctx)
    }

    /// Look-ahead for `kind`: the per-kind override if present, else the
    /// global default.
    #[must_use]
    pub fn lookahead_for(&self, kind: ArtifactKind) -> LookAhead {
        self.kind_lookaheads
            .get(&kind)
            .copied()
            .unwrap_or(self.lookahead)
    }

    /// Deep copy for a sub-merge that must not observe the caller's later
    /// mutations. Options and the crash registry are copied; the sinks are
    /// fresh; the cancellation token is shared so a caller's cancel still
    /// reaches the sub-merge.
    #[must_use]
    pub fn isolated(&self) -> Self {
        let mut copy = self.clone();
        copy.output = Sink::new();
        copy.diagnostics = Sink::new();
        copy
    }

    /// Record a failed scenario in the crash registry.
    pub fn record_crash(&mut self, scenario: &str, error: &MergeError) {
        self.crashes
            .insert(scenario.to_owned(), error.to_string());
    }

    /// The crash registry: scenario → error description.
    #[must_use]
    pub fn crashes(&self) -> &BTreeMap<String, String> {
        &self.crashes
    }

    /// The buffered merge-output sink.
    #[must_use]
    pub fn output(&self) -> &Sink {
        &self.output
    }

    /// The buffered diagnostics sink.
    #[must_use]
    pub fn diagnostics(&self) -> &Sink {
        &self.diagnostics
    }

    /// The cancellation token checked between phases.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Install a caller-provided cancellation token.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }
}

// ---------------------------------------------------------------------------
// MergeOptions
// ---------------------------------------------------------------------------

/// Deserializable option record. Missing fields use the engine defaults;
/// a missing file means all defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeOptions {
    /// Strategy name, resolved by `MergeStrategy::parse`.
    pub strategy: String,
    /// Global look-ahead: `off`, `full`, or a depth.
    pub lookahead: String,
    /// Per-kind look-ahead overrides.
    pub lookaheads: BTreeMap<ArtifactKind, String>,
    pub conditional_merge: bool,
    pub conditional_outside_methods: bool,
    pub diff_only: bool,
    pub keep_going: bool,
    pub exit_on_error: bool,
    pub quiet: bool,
    pub pretend: bool,
    pub recursive: bool,
    /// Cost-model tuple `iterations,p_assign,wr,wn,wa,ws,wo`; presence
    /// enables the cost-model matcher.
    pub cost_model: Option<String>,
    /// Fix-percentage tuple `fix_lower,fix_upper`.
    pub cost_model_fix: Option<String>,
    /// Seed: integer or `none`.
    pub cost_model_seed: Option<String>,
    pub cost_model_parallel: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: "linebased".to_owned(),
            lookahead: "off".to_owned(),
            lookaheads: BTreeMap::new(),
            conditional_merge: false,
            conditional_outside_methods: false,
            diff_only: false,
            keep_going: false,
            exit_on_error: false,
            quiet: false,
            pretend: true,
            recursive: false,
            cost_model: None,
            cost_model_fix: None,
            cost_model_seed: None,
            cost_model_parallel: false,
        }
    }
}

impl MergeOptions {
    /// Parse options from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, MergeError> {
        toml::from_str(text).map_err(|err| MergeError::InvalidOption {
            what: "options",
            value: text.to_owned(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookahead_parsing() {
        assert_eq!("off".parse::<LookAhead>().unwrap(), LookAhead::Off);
        assert_eq!("  OFF ".parse::<LookAhead>().unwrap(), LookAhead::Off);
        assert_eq!("full".parse::<LookAhead>().unwrap(), LookAhead::Full);
        assert_eq!("0".parse::<LookAhead>().unwrap(), LookAhead::Off);
        assert_eq!("3".parse::<LookAhead>().unwrap(), LookAhead::Depth(3));
        assert!("-1".parse::<LookAhead>().is_err());
        assert!("many".parse::<LookAhead>().is_err());
    }

    #[test]
    fn lookahead_descend() {
        assert_eq!(LookAhead::Off.descend(), None);
        assert_eq!(LookAhead::Depth(1).descend(), Some(LookAhead::Depth(0)));
        assert_eq!(LookAhead::Full.descend(), Some(LookAhead::Full));
        assert!(!LookAhead::Depth(0).enabled());
    }

    #[test]
    fn per_kind_override_supersedes_global() {
        let mut ctx = MergeContext::new();
        ctx.lookahead = LookAhead::Depth(2);
        ctx.kind_lookaheads
            .insert(ArtifactKind::Method, LookAhead::Full);

        assert_eq!(ctx.lookahead_for(ArtifactKind::Method), LookAhead::Full);
        assert_eq!(
            ctx.lookahead_for(ArtifactKind::Statement),
            LookAhead::Depth(2)
        );
    }

    #[test]
    fn cost_model_tuple_roundtrip() {
        let mut config = CostModelConfig::default();
        config
            .apply_tuple("500, 0.5, 1, 0.5, 2, 0.25, 0.125")
            .unwrap();
        assert_eq!(config.iterations, 500);
        assert!((config.p_assign - 0.5).abs() < f64::EPSILON);
        assert!((config.wo - 0.125).abs() < f64::EPSILON);

        assert!(config.apply_tuple("1,2,3").is_err());
        assert!(config.apply_tuple("0,0.5,1,1,1,1,1").is_err());
        assert!(config.apply_tuple("10,1.5,1,1,1,1,1").is_err());
    }

    #[test]
    fn fix_tuple_validation() {
        let mut config = CostModelConfig::default();
        config.apply_fix_tuple("0.1, 0.3").unwrap();
        assert!(config.fix_random_percentage);
        assert!((config.fix_lower - 0.1).abs() < f64::EPSILON);

        assert!(config.apply_fix_tuple("0.5,0.2").is_err());
        assert!(config.apply_fix_tuple("0.5").is_err());
        assert!(config.apply_fix_tuple("0.5,1.2").is_err());
    }

    #[test]
    fn seed_parsing() {
        let mut config = CostModelConfig::default();
        config.apply_seed("1234").unwrap();
        assert_eq!(config.seed, Some(1234));
        config.apply_seed(" NONE ").unwrap();
        assert_eq!(config.seed, None);
        assert!(config.apply_seed("random").is_err());
    }

    #[test]
    fn sink_snapshots_append_only() {
        let sink = Sink::new();
        sink.write(b"a");
        sink.write_line("b");
        assert_eq!(sink.snapshot(), b"ab\n");
        assert_eq!(sink.snapshot_string(), "ab\n");
    }

    #[test]
    fn isolated_copies_options_but_not_sinks() {
        let mut ctx = MergeContext::new();
        ctx.quiet = true;
        ctx.output().write_line("parent output");
        ctx.record_crash(
            "a <- b -> c",
            &MergeError::InternalAssertion {
                detail: "boom".to_owned(),
            },
        );

        let sub = ctx.isolated();
        assert!(sub.quiet);
        assert_eq!(sub.crashes().len(), 1);
        assert!(sub.output().snapshot().is_empty());

        sub.output().write_line("sub output");
        assert_eq!(ctx.output().snapshot_string(), "parent output\n");
    }

    #[test]
    fn options_from_toml() {
        let options = MergeOptions::from_toml(
            r#"
            strategy = "combined"
            lookahead = "3"
            conditional_merge = true
            cost_model = "100,0.7,1,1,1,1,1"
            cost_model_seed = "none"

            [lookaheads]
            method = "full"
            "#,
        )
        .unwrap();
        assert_eq!(options.strategy, "combined");
        assert!(options.conditional_merge);
        assert_eq!(
            options.lookaheads.get(&ArtifactKind::Method),
            Some(&"full".to_owned())
        );

        let ctx = MergeContext::from_options(&options).unwrap();
        assert_eq!(ctx.lookahead, LookAhead::Depth(3));
        let cost_model = ctx.cost_model.unwrap();
        assert_eq!(cost_model.seed, None);
        assert_eq!(cost_model.iterations, 100);

        assert!(MergeOptions::from_toml("strategy = 3").is_err());
        assert!(MergeOptions::from_toml("unknown_field = true").is_err());
    }
}
