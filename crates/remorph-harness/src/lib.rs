//! Test execution harness.
//!
//! Writes a code artifact to disk and runs synthesized shell commands
//! against it, collecting per-command results into a [`TestReport`].
//! Commands run as subprocesses with the artifact directory on the
//! module search path; the harness never mutates its own environment.

mod runner;

pub use runner::TestRunner;

pub use remorph_types::{TestCommand, TestReport, TestResult};
