use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use remorph_types::{RemorphError, TestCommand, TestReport, TestResult};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// TestRunner
// ---------------------------------------------------------------------------

/// Executes a synthesized test suite against one code artifact.
///
/// The runner writes the artifact, runs every command through the shell in
/// order, and aggregates a `TestReport`. It holds no state between calls:
/// the same code and commands produce the same report every time. This call
/// never returns an error; a batch-level failure (the artifact could not be
/// written) comes back as a report with `all_passed = false` and the
/// description in `errors`, and per-command problems become failed
/// `TestResult`s.
#[derive(Debug, Clone)]
pub struct TestRunner {
    shell: String,
    command_timeout: Duration,
}

impl TestRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Shell used to interpret commands. The default is fine everywhere;
    /// this exists so tests can exercise the launch-failure path.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub async fn run(
        &self,
        code: &str,
        commands: &[TestCommand],
        artifact_path: &Path,
    ) -> TestReport {
        if let Err(e) = write_artifact(artifact_path, code).await {
            tracing::error!(error = %e, "artifact write failed, skipping test batch");
            return TestReport::batch_failure(e.to_string());
        }
        tracing::debug!(
            path = %artifact_path.display(),
            bytes = code.len(),
            "artifact written"
        );

        let artifact_dir = artifact_dir(artifact_path);
        let module_path = extended_module_path(&artifact_dir);

        let mut results = Vec::with_capacity(commands.len());
        for (i, test) in commands.iter().enumerate() {
            let result = self.run_one(i + 1, test, &artifact_dir, &module_path).await;
            tracing::debug!(
                test = result.test_number,
                passed = result.passed,
                return_code = result.return_code,
                "test command finished"
            );
            results.push(result);
        }

        let report = TestReport::from_results(results);
        tracing::info!(
            passed = report.passed_count(),
            total = report.test_results.len(),
            all_passed = report.all_passed,
            "test batch complete"
        );
        report
    }

    async fn run_one(
        &self,
        test_number: usize,
        test: &TestCommand,
        cwd: &Path,
        module_path: &OsStr,
    ) -> TestResult {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.args(["-c", &test.command])
            .current_dir(cwd)
            .env("PYTHONPATH", module_path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        // New process group, so the timeout path can signal the whole tree
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = RemorphError::Execution(e.to_string());
                tracing::warn!(
                    test = test_number,
                    command = %test.command,
                    error = %err,
                    "failed to launch test command"
                );
                return TestResult::failure(
                    test_number,
                    &test.command,
                    &test.expected_result,
                    err.to_string(),
                );
            }
        };

        // Detach the pipe handles up front; the child is still needed for wait/kill
        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        tokio::select! {
            status = child.wait() => {
                let return_code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        let err = RemorphError::Execution(e.to_string());
                        return TestResult::failure(
                            test_number,
                            &test.command,
                            &test.expected_result,
                            err.to_string(),
                        );
                    }
                };

                let mut stdout_buf = Vec::new();
                let mut stderr_buf = Vec::new();
                use tokio::io::AsyncReadExt;
                let _ = stdout.read_to_end(&mut stdout_buf).await;
                let _ = stderr.read_to_end(&mut stderr_buf).await;

                TestResult::evaluate(
                    test_number,
                    &test.command,
                    &test.expected_result,
                    &String::from_utf8_lossy(&stdout_buf),
                    &String::from_utf8_lossy(&stderr_buf),
                    return_code,
                )
            }
            _ = tokio::time::sleep(self.command_timeout) => {
                // SIGTERM the group, two seconds of grace, then hard kill.
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        unsafe { libc::kill(-(pid as i32), libc::SIGTERM); }
                    }
                    tokio::select! {
                        _ = child.wait() => {}
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {
                            let _ = child.kill().await;
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.kill().await;
                }

                let timeout_ms = self.command_timeout.as_millis();
                tracing::warn!(
                    test = test_number,
                    command = %test.command,
                    timeout_ms,
                    "test command timed out"
                );
                TestResult::failure(
                    test_number,
                    &test.command,
                    &test.expected_result,
                    format!("Command timed out after {timeout_ms}ms"),
                )
            }
        }
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn write_artifact(path: &Path, code: &str) -> remorph_types::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemorphError::ArtifactWrite {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        }
    }
    tokio::fs::write(path, code)
        .await
        .map_err(|e| RemorphError::ArtifactWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Directory the commands run in. A bare file name has an empty parent,
/// which `current_dir` rejects.
fn artifact_dir(artifact_path: &Path) -> PathBuf {
    match artifact_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Module search path for the child: the artifact directory first, then
/// whatever the parent process already had. This is handed to each
/// subprocess's own environment; the parent environment is never mutated,
/// so concurrent runs cannot observe each other's paths.
fn extended_module_path(artifact_dir: &Path) -> OsString {
    let mut paths = vec![artifact_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| artifact_dir.as_os_str().to_os_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
