//! Per-run state and context records.
//!
//! `RunState` is the single mutable record every node reads and writes;
//! `RunContext` carries the handles (provider, runner, run id, deadline
//! budget) that stay fixed for the lifetime of one run.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use remorph_harness::TestRunner;
use remorph_llm::DynProvider;
use remorph_types::{TestCommand, TestReport};

// ---------------------------------------------------------------------------
// TestTarget
// ---------------------------------------------------------------------------

/// Which code variant the test phases write and execute.
///
/// Starts as `Original` so the baseline validation exercises the input code;
/// every generation call flips it to `Refactored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTarget {
    Original,
    Refactored,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything the caller supplies for one run. The CLI builds this from
/// files and flags; tests build it inline.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub original_code: String,
    pub rules: String,
    pub test_cases: String,
    pub max_retries: usize,
    pub output_file: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub save_stages: bool,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// The mutable record threaded through every node of one run.
///
/// Owned exclusively by the engine for the run's lifetime. `iteration`
/// counts generation (refactor/fix) calls and only ever grows; the decision
/// after each test phase compares it against `max_retries` to bound the
/// repair loop.
#[derive(Debug)]
pub struct RunState {
    pub original_code: String,
    pub rules: String,
    pub test_cases: String,
    /// The most recent candidate, absent until the first generation call.
    pub refactored_code: Option<String>,
    pub test_target: TestTarget,
    pub test_commands: Vec<TestCommand>,
    /// Report from the most recent test phase.
    pub test_report: Option<TestReport>,
    pub iteration: usize,
    pub max_retries: usize,
    pub output_file: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub save_stages: bool,
}

impl RunState {
    pub fn new(inputs: Inputs) -> Self {
        Self {
            original_code: inputs.original_code,
            rules: inputs.rules,
            test_cases: inputs.test_cases,
            refactored_code: None,
            test_target: TestTarget::Original,
            test_commands: Vec::new(),
            test_report: None,
            iteration: 0,
            max_retries: inputs.max_retries,
            output_file: inputs.output_file,
            work_dir: inputs.work_dir,
            save_stages: inputs.save_stages,
        }
    }

    /// The code variant selected by `test_target`. Asking for the candidate
    /// before one exists falls back to the original code, which is also what
    /// the generation nodes store when the provider fails outright.
    pub fn code_under_test(&self) -> &str {
        match self.test_target {
            TestTarget::Original => &self.original_code,
            TestTarget::Refactored => self
                .refactored_code
                .as_deref()
                .unwrap_or(&self.original_code),
        }
    }

    /// Module name synthesized commands import: the output artifact's file
    /// stem (`new_mymod` for `out/new_mymod.py`).
    pub fn module_name(&self) -> String {
        self.output_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Immutable per-run handles, threaded into every node call alongside the
/// state. Keeps the provider and runner out of the mutable record and gives
/// log lines a stable `run` field to correlate on.
pub struct RunContext {
    pub run_id: Uuid,
    pub provider: DynProvider,
    pub runner: TestRunner,
    run_budget: Option<Duration>,
}

impl RunContext {
    pub fn new(provider: DynProvider, runner: TestRunner) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider,
            runner,
            run_budget: None,
        }
    }

    /// Total wall-clock budget for the run, checked by the engine between
    /// nodes. Unset means the run may take as long as its calls do.
    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = Some(budget);
        self
    }

    pub fn run_budget(&self) -> Option<Duration> {
        self.run_budget
    }
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// What the engine hands back when the graph reaches its terminal marker.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Final code text: the last candidate, or the original code when no
    /// generation call ever produced one.
    pub code: String,
    /// Report from the last test phase, if any ran.
    pub report: Option<TestReport>,
    /// Generation calls performed.
    pub iterations: usize,
}

impl RunResult {
    pub fn all_passed(&self) -> bool {
        self.report.as_ref().map(|r| r.all_passed).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
