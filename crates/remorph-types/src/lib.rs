//! Shared types and errors for the Remorph refactoring engine.
//!
//! This crate provides the foundational types used across all other Remorph crates:
//! - `RemorphError` — unified error taxonomy
//! - `TestCommand` / `TestResult` / `TestReport` — the test-suite data model
//! - `ProviderConfig` — provider selection and credentials

use serde::{Deserialize, Serialize};

/// Unified error type for all Remorph subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RemorphError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    // === Run Control Errors ===
    #[error("Run deadline exceeded after {budget_ms}ms")]
    DeadlineExceeded { budget_ms: u64 },

    // === Phase Errors ===
    #[error("No function definition found in model reply: {0}")]
    Extraction(String),

    #[error("Malformed test-command reply: {0}")]
    Synthesis(String),

    #[error("Failed to launch test command: {0}")]
    Execution(String),

    #[error("Failed to write artifact {path}: {message}")]
    ArtifactWrite { path: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemorphError {
    /// Returns `true` if the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RemorphError::Config(_) | RemorphError::DeadlineExceeded { .. }
        )
    }

    /// Returns `true` if the workflow absorbs the error locally and keeps
    /// going: provider and extraction failures degrade into a candidate that
    /// fails its tests, synthesis failures fall back to the default command.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RemorphError::Provider { .. }
                | RemorphError::Auth { .. }
                | RemorphError::ProviderTimeout { .. }
                | RemorphError::Extraction(_)
                | RemorphError::Synthesis(_)
        )
    }
}

/// A convenience alias for `Result<T, RemorphError>`.
pub type Result<T> = std::result::Result<T, RemorphError>;

// ---------------------------------------------------------------------------
// TestCommand — one executable test
// ---------------------------------------------------------------------------

/// A shell command paired with the exact stdout it must produce.
///
/// This is also the wire shape the synthesizer asks the model for: a JSON
/// array of `{"command", "expected_result"}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    pub command: String,
    pub expected_result: String,
}

impl TestCommand {
    pub fn new(command: impl Into<String>, expected_result: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected_result: expected_result.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TestResult — outcome of one executed test command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_number: usize,
    pub command: String,
    pub expected: String,
    pub actual: String,
    pub error_output: String,
    pub return_code: i32,
    pub passed: bool,
}

impl TestResult {
    /// Build a result for a command that ran to completion.
    ///
    /// `passed` is derived here and nowhere else: the trimmed stdout must
    /// equal `expected` exactly AND the exit code must be zero. Both output
    /// streams are trimmed before storage.
    pub fn evaluate(
        test_number: usize,
        command: impl Into<String>,
        expected: impl Into<String>,
        stdout: &str,
        stderr: &str,
        return_code: i32,
    ) -> Self {
        let expected = expected.into();
        let actual = stdout.trim().to_string();
        let passed = actual == expected && return_code == 0;
        Self {
            test_number,
            command: command.into(),
            expected,
            actual,
            error_output: stderr.trim().to_string(),
            return_code,
            passed,
        }
    }

    /// Build a result for a command that produced no normal exit: it either
    /// failed to launch or was terminated by the per-command timeout. The
    /// conventional return code for this case is `-1`.
    pub fn failure(
        test_number: usize,
        command: impl Into<String>,
        expected: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            test_number,
            command: command.into(),
            expected: expected.into(),
            actual: String::new(),
            error_output: error.into(),
            return_code: -1,
            passed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// TestReport — aggregate outcome of one test phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub all_passed: bool,
    pub test_results: Vec<TestResult>,
    pub errors: Vec<String>,
}

impl TestReport {
    /// Aggregate per-command results. `all_passed` is the conjunction over
    /// every result (vacuously true for an empty suite).
    pub fn from_results(test_results: Vec<TestResult>) -> Self {
        let all_passed = test_results.iter().all(|r| r.passed);
        Self {
            all_passed,
            test_results,
            errors: Vec::new(),
        }
    }

    /// A report for a phase that never got to run any command, e.g. because
    /// the code artifact could not be written.
    pub fn batch_failure(error: impl Into<String>) -> Self {
        Self {
            all_passed: false,
            test_results: Vec::new(),
            errors: vec![error.into()],
        }
    }

    pub fn passed_count(&self) -> usize {
        self.test_results.iter().filter(|r| r.passed).count()
    }
}

// ---------------------------------------------------------------------------
// ProviderConfig — provider selection and credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    Ollama { host: String, model: String },
    OpenAi { api_key: String, model: String },
    Anthropic { api_key: String, model: String },
}

impl ProviderConfig {
    pub fn provider_name(&self) -> &'static str {
        match self {
            ProviderConfig::Ollama { .. } => "ollama",
            ProviderConfig::OpenAi { .. } => "openai",
            ProviderConfig::Anthropic { .. } => "anthropic",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::Ollama { model, .. }
            | ProviderConfig::OpenAi { model, .. }
            | ProviderConfig::Anthropic { model, .. } => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = RemorphError::Config("missing API key for openai".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: missing API key for openai"
        );
    }

    #[test]
    fn error_display_provider() {
        let err = RemorphError::Provider {
            provider: "ollama".into(),
            status: 500,
            message: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider ollama returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_auth() {
        let err = RemorphError::Auth {
            provider: "anthropic".into(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication failed for provider anthropic"
        );
    }

    #[test]
    fn error_display_provider_timeout() {
        let err = RemorphError::ProviderTimeout {
            provider: "openai".into(),
            timeout_ms: 120_000,
        };
        assert_eq!(
            err.to_string(),
            "Request to openai timed out after 120000ms"
        );
    }

    #[test]
    fn error_display_deadline() {
        let err = RemorphError::DeadlineExceeded { budget_ms: 900_000 };
        assert_eq!(err.to_string(), "Run deadline exceeded after 900000ms");
    }

    #[test]
    fn error_display_artifact_write() {
        let err = RemorphError::ArtifactWrite {
            path: "/out/new_mod.py".into(),
            message: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to write artifact /out/new_mod.py: permission denied"
        );
    }

    // --- is_fatal ---

    #[test]
    fn fatal_config() {
        assert!(RemorphError::Config("bad".into()).is_fatal());
    }

    #[test]
    fn fatal_deadline() {
        assert!(RemorphError::DeadlineExceeded { budget_ms: 1 }.is_fatal());
    }

    #[test]
    fn not_fatal_provider() {
        let err = RemorphError::Provider {
            provider: "x".into(),
            status: 503,
            message: "unavailable".into(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn not_fatal_artifact_write() {
        let err = RemorphError::ArtifactWrite {
            path: "p".into(),
            message: "m".into(),
        };
        assert!(!err.is_fatal());
    }

    // --- is_recoverable ---

    #[test]
    fn recoverable_provider() {
        let err = RemorphError::Provider {
            provider: "x".into(),
            status: 0,
            message: "connection refused".into(),
        };
        assert!(err.is_recoverable());
    }

    #[test]
    fn recoverable_auth() {
        assert!(RemorphError::Auth { provider: "x".into() }.is_recoverable());
    }

    #[test]
    fn recoverable_provider_timeout() {
        let err = RemorphError::ProviderTimeout {
            provider: "x".into(),
            timeout_ms: 1000,
        };
        assert!(err.is_recoverable());
    }

    #[test]
    fn recoverable_extraction_and_synthesis() {
        assert!(RemorphError::Extraction("no def".into()).is_recoverable());
        assert!(RemorphError::Synthesis("not json".into()).is_recoverable());
    }

    #[test]
    fn not_recoverable_config() {
        assert!(!RemorphError::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn not_recoverable_execution() {
        assert!(!RemorphError::Execution("spawn failed".into()).is_recoverable());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RemorphError = io_err.into();
        assert!(matches!(err, RemorphError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: RemorphError = json_err.into();
        assert!(matches!(err, RemorphError::Json(_)));
    }

    // --- Result alias ---

    #[test]
    fn result_alias_works() {
        fn example() -> Result<u32> {
            Ok(42)
        }
        assert_eq!(example().unwrap(), 42);
    }

    // --- TestCommand ---

    #[test]
    fn test_command_serde_field_names() {
        let cmd = TestCommand::new("echo 6", "6");
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\""));
        assert!(json.contains("\"expected_result\""));
    }

    #[test]
    fn test_command_deserializes_from_synthesizer_shape() {
        let raw = r#"[
            {"command": "python -c 'from new_mod import add; print(add(2, 3))'", "expected_result": "5"},
            {"command": "echo hi", "expected_result": "hi"}
        ]"#;
        let cmds: Vec<TestCommand> = serde_json::from_str(raw).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].command, "echo hi");
        assert_eq!(cmds[1].expected_result, "hi");
    }

    #[test]
    fn test_command_rejects_missing_field() {
        let raw = r#"[{"command": "echo hi"}]"#;
        assert!(serde_json::from_str::<Vec<TestCommand>>(raw).is_err());
    }

    // --- TestResult ---

    #[test]
    fn evaluate_trims_trailing_newline_and_passes() {
        let r = TestResult::evaluate(1, "echo 6", "6", "6\n", "", 0);
        assert!(r.passed);
        assert_eq!(r.actual, "6");
    }

    #[test]
    fn evaluate_fails_on_output_mismatch() {
        let r = TestResult::evaluate(1, "echo 7", "6", "7\n", "", 0);
        assert!(!r.passed);
        assert_eq!(r.actual, "7");
    }

    #[test]
    fn evaluate_fails_on_nonzero_exit_even_with_matching_output() {
        let r = TestResult::evaluate(1, "cmd", "6", "6\n", "boom", 1);
        assert!(!r.passed);
        assert_eq!(r.error_output, "boom");
        assert_eq!(r.return_code, 1);
    }

    #[test]
    fn failure_result_shape() {
        let r = TestResult::failure(3, "badcmd", "6", "no such shell");
        assert!(!r.passed);
        assert_eq!(r.test_number, 3);
        assert_eq!(r.return_code, -1);
        assert_eq!(r.actual, "");
        assert_eq!(r.error_output, "no such shell");
    }

    // --- TestReport ---

    #[test]
    fn report_all_passed_when_every_result_passed() {
        let report = TestReport::from_results(vec![
            TestResult::evaluate(1, "a", "1", "1", "", 0),
            TestResult::evaluate(2, "b", "2", "2", "", 0),
        ]);
        assert!(report.all_passed);
        assert_eq!(report.passed_count(), 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn report_not_all_passed_when_one_fails() {
        let report = TestReport::from_results(vec![
            TestResult::evaluate(1, "a", "1", "1", "", 0),
            TestResult::evaluate(2, "b", "2", "3", "", 0),
        ]);
        assert!(!report.all_passed);
        assert_eq!(report.passed_count(), 1);
    }

    #[test]
    fn report_vacuously_passes_with_no_results() {
        let report = TestReport::from_results(Vec::new());
        assert!(report.all_passed);
    }

    #[test]
    fn batch_failure_report_shape() {
        let report = TestReport::batch_failure("could not write artifact");
        assert!(!report.all_passed);
        assert!(report.test_results.is_empty());
        assert_eq!(report.errors, vec!["could not write artifact".to_string()]);
    }

    #[test]
    fn report_json_shape_matches_wire_format() {
        let report = TestReport::from_results(vec![TestResult::evaluate(
            1,
            "python -c '...'",
            "6",
            "7",
            "",
            0,
        )]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["all_passed"], serde_json::json!(false));
        let result = &value["test_results"][0];
        for key in [
            "test_number",
            "command",
            "expected",
            "actual",
            "error_output",
            "return_code",
            "passed",
        ] {
            assert!(result.get(key).is_some(), "missing key {key}");
        }
        assert!(value["errors"].as_array().unwrap().is_empty());
    }

    // --- ProviderConfig ---

    #[test]
    fn provider_config_names_and_models() {
        let ollama = ProviderConfig::Ollama {
            host: "http://localhost:11434".into(),
            model: "deepseek-r1:latest".into(),
        };
        assert_eq!(ollama.provider_name(), "ollama");
        assert_eq!(ollama.model(), "deepseek-r1:latest");

        let openai = ProviderConfig::OpenAi {
            api_key: "sk-test".into(),
            model: "gpt-4o-mini".into(),
        };
        assert_eq!(openai.provider_name(), "openai");
        assert_eq!(openai.model(), "gpt-4o-mini");

        let anthropic = ProviderConfig::Anthropic {
            api_key: "sk-ant".into(),
            model: "claude-3-haiku-20240307".into(),
        };
        assert_eq!(anthropic.provider_name(), "anthropic");
        assert_eq!(anthropic.model(), "claude-3-haiku-20240307");
    }

    #[test]
    fn provider_config_serializes_with_tag() {
        let config = ProviderConfig::Ollama {
            host: "http://localhost:11434".into(),
            model: "llama3".into(),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["provider"], serde_json::json!("ollama"));
        assert_eq!(value["host"], serde_json::json!("http://localhost:11434"));
    }
}
