//! Test-command synthesis.
//!
//! One provider call turns the free-text test cases into a JSON array of
//! `{command, expected_result}` objects. Anything that goes wrong — a
//! provider error, stray prose, malformed JSON, a missing field — is
//! absorbed by substituting a single fixed placeholder command, so a test
//! phase can always run and report.

use std::path::Path;

use remorph_llm::DynProvider;
use remorph_types::{RemorphError, Result, TestCommand};

use crate::prompt;

/// File the synthesized command list is persisted to when staging is on.
pub const STAGE_FILE: &str = "test-commands.json";

/// The last-resort placeholder substituted on any synthesis failure. Its
/// fixed function name is unrelated to the actual input, so for most real
/// inputs it will fail and drive the repair loop; it exists to keep the
/// graph producing reports, not to be a meaningful check.
pub fn default_command(module_name: &str) -> TestCommand {
    TestCommand::new(
        format!("python -c 'from {module_name} import multiply_a_b; print(multiply_a_b(2, 3))'"),
        "6",
    )
}

/// Ask the provider for a command list. Never fails: every parse or
/// provider problem collapses into the single deterministic default.
pub async fn synthesize_commands(
    provider: &DynProvider,
    original_code: &str,
    test_cases: &str,
    module_name: &str,
) -> Vec<TestCommand> {
    let request = prompt::synthesize_commands(original_code, test_cases, module_name);
    let reply = match provider.generate(&request, None).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "test-command synthesis call failed, using default command");
            return vec![default_command(module_name)];
        }
    };

    match parse_commands(&reply) {
        Ok(commands) => {
            tracing::debug!(count = commands.len(), "synthesized test commands");
            commands
        }
        Err(e) => {
            tracing::warn!(error = %e, "unusable test-command reply, using default command");
            tracing::debug!(reply = %reply, "reply that failed to parse");
            vec![default_command(module_name)]
        }
    }
}

/// Parse the model's reply into commands. The reply may be wrapped in a
/// markdown fence; everything else about the shape is strict.
pub fn parse_commands(reply: &str) -> Result<Vec<TestCommand>> {
    let body = strip_fences(reply);
    serde_json::from_str(body)
        .map_err(|e| RemorphError::Synthesis(format!("expected a JSON array of commands: {e}")))
}

/// Drop a leading ```` ```json ```` (or bare ```` ``` ````) fence and its
/// closing counterpart. Only whole leading/trailing fences are handled;
/// anything fancier fails the parse and falls back.
fn strip_fences(reply: &str) -> &str {
    let mut body = reply.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Write the command list to `{work_dir}/test-commands.json`, pretty-printed.
/// Failures are logged and swallowed; staging is a convenience, never a gate.
pub async fn persist_commands(commands: &[TestCommand], work_dir: &Path) {
    let path = work_dir.join(STAGE_FILE);
    let json = match serde_json::to_vec_pretty(commands) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "could not serialize test commands");
            return;
        }
    };
    match tokio::fs::write(&path, json).await {
        Ok(()) => tracing::debug!(path = %path.display(), "saved test commands"),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "could not save test commands")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
