//! The refactor-test-fix orchestration graph.
//!
//! This crate implements the Remorph workflow proper: prompt templates,
//! code extraction and signature repair, test-command synthesis, the typed
//! run state, and the explicit five-node state machine that drives one
//! refactoring run from baseline validation to a passing (or exhausted)
//! candidate.

pub mod engine;
pub mod extract;
pub mod nodes;
pub mod prompt;
pub mod state;
pub mod synthesize;

pub use engine::{decide_after_test, NodeId, Step, Transition, Workflow, WorkflowNode};
pub use extract::{extract_code, function_name, restore_signature, SignatureFix};
pub use nodes::{CodegenNode, SynthesizeNode, TestPhaseNode};
pub use state::{Inputs, RunContext, RunResult, RunState, TestTarget};
pub use synthesize::{default_command, parse_commands, synthesize_commands};
