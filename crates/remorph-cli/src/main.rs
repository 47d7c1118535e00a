//! CLI binary for the Remorph refactoring engine.
//!
//! Single-purpose: read the three input files, drive one refactoring run,
//! write the final artifact, and report. Exit status is 1 when the run
//! finished with a failing test report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use remorph_harness::TestRunner;
use remorph_llm::DynProvider;
use remorph_types::{ProviderConfig, TestReport};
use remorph_workflow::{Inputs, RunContext, RunResult, RunState, Workflow};

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "deepseek-r1:latest";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";

/// File the final test report is persisted to when staging is on.
const REPORT_STAGE_FILE: &str = "test-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Ollama,
    Openai,
    Anthropic,
}

#[derive(Debug, Parser)]
#[command(name = "remorph", version, about = "LLM-driven refactor-test-fix loop")]
struct Cli {
    /// Source file to refactor
    #[arg(long)]
    input: PathBuf,

    /// File describing the refactoring rules
    #[arg(long)]
    rules: PathBuf,

    /// File describing the test cases in natural language
    #[arg(long)]
    tests: PathBuf,

    /// Directory the output artifact is written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Output file prefix; the artifact is {output-dir}/{prefix}_{input file name}
    #[arg(long, default_value = "new")]
    output_prefix: String,

    /// Directory for staged artifacts (test-commands.json, test-report.json)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Persist staged artifacts to the work directory
    #[arg(long)]
    save_stages: bool,

    /// Repair attempts after the initial refactor
    #[arg(long, default_value_t = 3)]
    max_retries: usize,

    /// LLM backend to drive
    #[arg(long, value_enum, default_value_t = ProviderKind::Ollama)]
    provider: ProviderKind,

    /// Model name (each provider has its own default)
    #[arg(long)]
    model: Option<String>,

    /// Ollama host
    #[arg(long, default_value = DEFAULT_OLLAMA_HOST)]
    ollama_host: String,

    /// Request timeout for OpenAI/Anthropic calls, in seconds
    #[arg(long, default_value_t = 120)]
    provider_timeout_secs: u64,

    /// Timeout per test command, in seconds
    #[arg(long, default_value_t = 60)]
    command_timeout_secs: u64,

    /// Total run budget in seconds; 0 disables the deadline
    #[arg(long, default_value_t = 900)]
    run_timeout_secs: u64,

    /// Mirror log output to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Resolve the provider selection to a config. API keys come from the
    /// conventional environment variables; an absent key surfaces as the
    /// empty string, which provider construction rejects as fatal.
    fn provider_config(&self) -> ProviderConfig {
        match self.provider {
            ProviderKind::Ollama => ProviderConfig::Ollama {
                host: self.ollama_host.clone(),
                model: self.model_or(DEFAULT_OLLAMA_MODEL),
            },
            ProviderKind::Openai => ProviderConfig::OpenAi {
                api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
                model: self.model_or(DEFAULT_OPENAI_MODEL),
            },
            ProviderKind::Anthropic => ProviderConfig::Anthropic {
                api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                model: self.model_or(DEFAULT_ANTHROPIC_MODEL),
            },
        }
    }

    fn model_or(&self, default: &str) -> String {
        self.model.clone().unwrap_or_else(|| default.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let original_code = read_input("input", &cli.input)?;
    let rules = read_input("rules", &cli.rules)?;
    let test_cases = read_input("tests", &cli.tests)?;
    let output_file = output_path(&cli.output_dir, &cli.output_prefix, &cli.input)?;

    let provider = DynProvider::connect(
        &cli.provider_config(),
        Duration::from_secs(cli.provider_timeout_secs),
    )
    .await?;

    println!("Refactoring: {}", cli.input.display());
    println!("Provider: {} ({})", provider.name(), provider.model());
    println!("Output: {}", output_file.display());

    let runner =
        TestRunner::new().with_command_timeout(Duration::from_secs(cli.command_timeout_secs));
    let mut ctx = RunContext::new(provider, runner);
    if cli.run_timeout_secs > 0 {
        ctx = ctx.with_run_budget(Duration::from_secs(cli.run_timeout_secs));
    }

    let state = RunState::new(Inputs {
        original_code,
        rules,
        test_cases,
        max_retries: cli.max_retries,
        output_file: output_file.clone(),
        work_dir: cli.work_dir.clone(),
        save_stages: cli.save_stages,
    });
    let result = Workflow::refactoring().run(&ctx, state).await?;

    write_final_artifact(&output_file, &result.code)?;
    if cli.save_stages {
        if let Some(work_dir) = &cli.work_dir {
            write_report_stage(result.report.as_ref(), work_dir);
        }
    }

    print_summary(&result);

    if result.report.as_ref().is_some_and(|r| !r.all_passed) {
        std::process::exit(1);
    }
    Ok(())
}

/// Install the tracing subscriber: stderr-style console output always, an
/// ANSI-free file mirror when `--log-file` is given. `RUST_LOG` overrides
/// the verbosity flag.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::File::create(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn read_input(kind: &str, path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) => anyhow::bail!("could not read {kind} file {}: {e}", path.display()),
    }
}

/// Output artifact path: `{output_dir}/{prefix}_{input file name}`. The
/// synthesizer derives the module name from this file's stem, so the prefix
/// is part of the import commands the model is asked to write.
fn output_path(output_dir: &Path, prefix: &str, input: &Path) -> anyhow::Result<PathBuf> {
    let Some(name) = input.file_name() else {
        anyhow::bail!("input path {} has no file name", input.display());
    };
    Ok(output_dir.join(format!("{prefix}_{}", name.to_string_lossy())))
}

/// The test phases already wrote the artifact, but only when at least one
/// ran; writing the final code here makes the output unconditional.
fn write_final_artifact(path: &Path, code: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, code)?;
    Ok(())
}

/// Stage the final report as pretty-printed JSON. Like the command stage,
/// a failure here is logged and swallowed.
fn write_report_stage(report: Option<&TestReport>, work_dir: &Path) {
    let Some(report) = report else {
        return;
    };
    let path = work_dir.join(REPORT_STAGE_FILE);
    let json = match serde_json::to_vec_pretty(report) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "could not serialize the test report");
            return;
        }
    };
    match std::fs::write(&path, json) {
        Ok(()) => tracing::debug!(path = %path.display(), "saved test report"),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "could not save test report")
        }
    }
}

fn print_summary(result: &RunResult) {
    println!("\nRun finished after {} generation call(s)", result.iterations);
    match &result.report {
        Some(report) => {
            println!(
                "Tests: {}/{} passed",
                report.passed_count(),
                report.test_results.len()
            );
            for r in report.test_results.iter().filter(|r| !r.passed) {
                println!("  FAIL test {}: {}", r.test_number, r.command);
            }
            for error in &report.errors {
                println!("  batch error: {error}");
            }
        }
        None => println!("Tests: none were executed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
