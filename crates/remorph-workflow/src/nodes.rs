//! Handlers for the refactoring graph's nodes.
//!
//! Three handlers cover the five node ids: synthesis, a test phase (run
//! twice, as baseline validation and candidate testing), and generation
//! (registered as both `refactor` and `fix`). Handlers absorb provider and
//! extraction failures locally; an error return from here aborts the run.

use async_trait::async_trait;

use remorph_types::{RemorphError, Result};

use crate::engine::WorkflowNode;
use crate::extract::{self, SignatureFix};
use crate::prompt;
use crate::state::{RunContext, RunState, TestTarget};
use crate::synthesize;

// ---------------------------------------------------------------------------
// SynthesizeNode
// ---------------------------------------------------------------------------

/// Turns the test-case text into the executable command list. Never fails:
/// the synthesizer falls back to its default command on any problem.
pub struct SynthesizeNode;

#[async_trait]
impl WorkflowNode for SynthesizeNode {
    async fn run(&self, ctx: &RunContext, state: &mut RunState) -> Result<()> {
        let module = state.module_name();
        let commands = synthesize::synthesize_commands(
            &ctx.provider,
            &state.original_code,
            &state.test_cases,
            &module,
        )
        .await;
        tracing::info!(run = %ctx.run_id, count = commands.len(), "test commands ready");

        if state.save_stages {
            if let Some(work_dir) = &state.work_dir {
                synthesize::persist_commands(&commands, work_dir).await;
            }
        }
        state.test_commands = commands;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestPhaseNode
// ---------------------------------------------------------------------------

/// Writes the variant selected by `test_target` to the output artifact and
/// runs the command list against it. Batch problems land inside the report,
/// so this handler never fails the run either.
pub struct TestPhaseNode;

#[async_trait]
impl WorkflowNode for TestPhaseNode {
    async fn run(&self, ctx: &RunContext, state: &mut RunState) -> Result<()> {
        let report = {
            let code = state.code_under_test();
            ctx.runner
                .run(code, &state.test_commands, &state.output_file)
                .await
        };
        tracing::info!(
            run = %ctx.run_id,
            target = ?state.test_target,
            passed = report.passed_count(),
            total = report.test_results.len(),
            all_passed = report.all_passed,
            "test phase finished"
        );
        state.test_report = Some(report);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CodegenNode
// ---------------------------------------------------------------------------

/// One generation attempt: build the prompt, call the provider, extract the
/// candidate, repair its signature.
///
/// The very first attempt (no candidate, iteration zero) uses the initial
/// refactor prompt; every later attempt repairs the current candidate
/// against the last report. A provider error or an unusable reply leaves
/// the previous candidate in place (seeding the original code when none
/// exists yet) so the attempt degrades into a normal failing iteration.
/// `iteration` increments on every attempt, keeping the run bounded even
/// under persistent provider failure.
pub struct CodegenNode;

#[async_trait]
impl WorkflowNode for CodegenNode {
    async fn run(&self, ctx: &RunContext, state: &mut RunState) -> Result<()> {
        let function = extract::function_name(&state.original_code);
        let initial = state.iteration == 0 && state.refactored_code.is_none();
        let request = if initial {
            prompt::initial_refactor(
                &state.original_code,
                &state.rules,
                &state.test_cases,
                function.as_deref(),
            )
        } else {
            prompt::repair(
                state
                    .refactored_code
                    .as_deref()
                    .unwrap_or(&state.original_code),
                state.test_report.as_ref(),
                &state.rules,
                function.as_deref(),
            )
        };
        tracing::info!(
            run = %ctx.run_id,
            iteration = state.iteration,
            mode = if initial { "initial" } else { "repair" },
            "generating candidate"
        );

        match ctx.provider.generate(&request, None).await {
            Ok(reply) => {
                let mut code = extract::extract_code(&reply);
                if code.is_empty() {
                    tracing::warn!(
                        run = %ctx.run_id,
                        "no code found in model reply, candidate unchanged"
                    );
                    keep_previous_candidate(state);
                } else {
                    if let Some(name) = function.as_deref() {
                        match extract::restore_signature(&mut code, name) {
                            SignatureFix::Intact => {}
                            SignatureFix::Renamed { from } => tracing::warn!(
                                run = %ctx.run_id,
                                from = %from,
                                to = name,
                                "model renamed the function, restored the original name"
                            ),
                            SignatureFix::NoDefinition => {
                                let e = RemorphError::Extraction(
                                    "no function definition in the extracted code".into(),
                                );
                                tracing::warn!(
                                    run = %ctx.run_id,
                                    error = %e,
                                    "signature repair skipped"
                                );
                            }
                        }
                    }
                    state.refactored_code = Some(code);
                }
            }
            Err(e) => {
                tracing::warn!(
                    run = %ctx.run_id,
                    error = %e,
                    "generation call failed, candidate unchanged"
                );
                keep_previous_candidate(state);
            }
        }

        // Both happen even on failure: the next test phase runs against the
        // candidate slot, and the attempt counts against max_retries.
        state.test_target = TestTarget::Refactored;
        state.iteration += 1;
        Ok(())
    }
}

/// On a failed attempt the candidate slot must still hold something for the
/// test phase to run against. The first attempt seeds it with the original
/// code; afterwards the previous candidate simply survives.
fn keep_previous_candidate(state: &mut RunState) {
    if state.refactored_code.is_none() {
        state.refactored_code = Some(state.original_code.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Inputs;
    use remorph_harness::TestRunner;
    use remorph_llm::{DynProvider, ProviderClient};
    use remorph_types::{RemorphError, TestCommand, TestReport, TestResult};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const ORIGINAL: &str = "def add(a, b):\n    return a + b";

    // Stub provider: fixed reply (or a provider error when `reply` is None),
    // with captured prompts and a call counter.
    struct Scripted {
        reply: Option<String>,
        calls: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderClient for Scripted {
        async fn generate(
            &self,
            prompt: &str,
            _system: Option<&str>,
        ) -> remorph_types::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(RemorphError::Provider {
                    provider: "scripted".into(),
                    status: 503,
                    message: "down".into(),
                }),
            }
        }
        async fn test_connection(&self) -> bool {
            true
        }
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn context_with(reply: Option<&str>) -> (RunContext, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let provider = DynProvider::new(Scripted {
            reply: reply.map(str::to_string),
            calls: calls.clone(),
            prompts: prompts.clone(),
        });
        (
            RunContext::new(provider, TestRunner::new()),
            calls,
            prompts,
        )
    }

    fn state_for(output_file: PathBuf) -> RunState {
        RunState::new(Inputs {
            original_code: ORIGINAL.into(),
            rules: "keep behavior".into(),
            test_cases: "add(2, 3) is 5".into(),
            max_retries: 3,
            output_file,
            work_dir: None,
            save_stages: false,
        })
    }

    // --- SynthesizeNode ---

    // 1. A good reply becomes the state's command list.
    #[tokio::test]
    async fn synthesize_stores_the_command_list() {
        let reply = r#"[{"command": "echo 5", "expected_result": "5"}]"#;
        let (ctx, calls, _) = context_with(Some(reply));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));

        SynthesizeNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(state.test_commands, vec![TestCommand::new("echo 5", "5")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // 2. A garbage reply still leaves a runnable command list behind.
    #[tokio::test]
    async fn synthesize_falls_back_on_garbage() {
        let (ctx, _, _) = context_with(Some("I'd rather chat about the weather."));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));

        SynthesizeNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(
            state.test_commands,
            vec![synthesize::default_command("new_mod")]
        );
    }

    // 3. Stage persistence writes test-commands.json when configured.
    #[tokio::test]
    async fn synthesize_persists_the_stage_file_when_asked() {
        let dir = TempDir::new().unwrap();
        let reply = r#"[{"command": "echo 5", "expected_result": "5"}]"#;
        let (ctx, _, _) = context_with(Some(reply));
        let mut state = state_for(dir.path().join("new_mod.py"));
        state.work_dir = Some(dir.path().to_path_buf());
        state.save_stages = true;

        SynthesizeNode.run(&ctx, &mut state).await.unwrap();
        let staged = dir.path().join(synthesize::STAGE_FILE);
        assert!(staged.exists());
        let parsed: Vec<TestCommand> =
            serde_json::from_str(&std::fs::read_to_string(staged).unwrap()).unwrap();
        assert_eq!(parsed, state.test_commands);
    }

    // 4. No stage file without the flag, even with a work dir configured.
    #[tokio::test]
    async fn synthesize_skips_the_stage_file_without_the_flag() {
        let dir = TempDir::new().unwrap();
        let (ctx, _, _) = context_with(Some("[]"));
        let mut state = state_for(dir.path().join("new_mod.py"));
        state.work_dir = Some(dir.path().to_path_buf());

        SynthesizeNode.run(&ctx, &mut state).await.unwrap();
        assert!(!dir.path().join(synthesize::STAGE_FILE).exists());
    }

    // --- TestPhaseNode ---

    // 5. The phase writes the artifact and stores the report.
    #[tokio::test]
    async fn test_phase_writes_the_artifact_and_reports() {
        let dir = TempDir::new().unwrap();
        let (ctx, _, _) = context_with(None);
        let mut state = state_for(dir.path().join("new_mod.py"));
        state.test_commands = vec![TestCommand::new("cat new_mod.py", ORIGINAL)];

        TestPhaseNode.run(&ctx, &mut state).await.unwrap();
        let report = state.test_report.as_ref().unwrap();
        assert!(report.all_passed, "report: {report:?}");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new_mod.py")).unwrap(),
            ORIGINAL
        );
    }

    // 6. The phase tests exactly the variant the target selects.
    #[tokio::test]
    async fn test_phase_honors_the_target() {
        let dir = TempDir::new().unwrap();
        let (ctx, _, _) = context_with(None);
        let mut state = state_for(dir.path().join("new_mod.py"));
        state.refactored_code = Some("print('candidate')".into());
        state.test_commands = vec![TestCommand::new("cat new_mod.py", ORIGINAL)];

        // Target still Original: the candidate must not be written.
        TestPhaseNode.run(&ctx, &mut state).await.unwrap();
        assert!(state.test_report.as_ref().unwrap().all_passed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new_mod.py")).unwrap(),
            ORIGINAL
        );

        state.test_target = TestTarget::Refactored;
        TestPhaseNode.run(&ctx, &mut state).await.unwrap();
        assert!(!state.test_report.as_ref().unwrap().all_passed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new_mod.py")).unwrap(),
            "print('candidate')"
        );
    }

    // --- CodegenNode ---

    // 7. First attempt: initial prompt, stored candidate, flipped target.
    #[tokio::test]
    async fn codegen_first_attempt_stores_the_candidate() {
        let reply =
            "Here you go.\n<REFACTORED_CODE>\ndef add(a, b):\n    return b + a\n</REFACTORED_CODE>";
        let (ctx, calls, prompts) = context_with(Some(reply));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(
            state.refactored_code.as_deref(),
            Some("def add(a, b):\n    return b + a")
        );
        assert_eq!(state.test_target, TestTarget::Refactored);
        assert_eq!(state.iteration, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let prompts = prompts.lock().unwrap();
        assert!(prompts[0].starts_with("You are a Python code refactoring assistant."));
        assert!(prompts[0].contains("KEEP THE ORIGINAL FUNCTION NAME: add"));
    }

    // 8. With a candidate and a report, the repair prompt is used.
    #[tokio::test]
    async fn codegen_repair_attempt_uses_the_repair_prompt() {
        let reply = "<REFACTORED_CODE>\ndef add(a, b):\n    return a + b\n</REFACTORED_CODE>";
        let (ctx, _, prompts) = context_with(Some(reply));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));
        state.refactored_code = Some("def add(a, b):\n    return a + b + 1".into());
        state.iteration = 1;
        state.test_report = Some(TestReport::from_results(vec![TestResult::evaluate(
            1, "echo 6", "5", "6", "", 0,
        )]));

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(state.iteration, 2);
        let prompts = prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Fix this Python code to pass the tests."));
        assert!(prompts[0].contains("Current Code:\ndef add(a, b):\n    return a + b + 1"));
        assert!(prompts[0].contains("all_passed: false"));
    }

    // 9. A renamed function comes back under the original name.
    #[tokio::test]
    async fn codegen_restores_a_renamed_signature() {
        let reply = "<REFACTORED_CODE>\ndef plus(a, b):\n    return a + b\n</REFACTORED_CODE>";
        let (ctx, _, _) = context_with(Some(reply));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        let candidate = state.refactored_code.as_deref().unwrap();
        assert!(candidate.contains("def add(a, b):"), "candidate: {candidate}");
        assert!(!candidate.contains("def plus("));
    }

    // 10. Provider failure on the first attempt seeds the original code.
    #[tokio::test]
    async fn codegen_provider_failure_seeds_the_original() {
        let (ctx, calls, _) = context_with(None);
        let mut state = state_for(PathBuf::from("out/new_mod.py"));

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(state.refactored_code.as_deref(), Some(ORIGINAL));
        assert_eq!(state.iteration, 1);
        assert_eq!(state.test_target, TestTarget::Refactored);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // 11. Provider failure later keeps the existing candidate untouched.
    #[tokio::test]
    async fn codegen_provider_failure_keeps_the_candidate() {
        let (ctx, _, _) = context_with(None);
        let mut state = state_for(PathBuf::from("out/new_mod.py"));
        state.refactored_code = Some("def add(a, b):\n    return b + a".into());
        state.iteration = 1;

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(
            state.refactored_code.as_deref(),
            Some("def add(a, b):\n    return b + a")
        );
        assert_eq!(state.iteration, 2);
    }

    // 12. A reply with no code in it is treated like a failed attempt.
    #[tokio::test]
    async fn codegen_codeless_reply_keeps_the_candidate() {
        // Pure prose trips the narrative filter on every line, so the
        // extractor hands back nothing.
        let (ctx, _, _) = context_with(Some("Let me explain my thinking here first."));
        let mut state = state_for(PathBuf::from("out/new_mod.py"));
        state.refactored_code = Some("def add(a, b):\n    return b + a".into());
        state.iteration = 1;

        CodegenNode.run(&ctx, &mut state).await.unwrap();
        assert_eq!(
            state.refactored_code.as_deref(),
            Some("def add(a, b):\n    return b + a")
        );
        assert_eq!(state.iteration, 2);
    }
}
