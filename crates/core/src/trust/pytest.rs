use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tac_config::Config;

use super::{AgentSpec, PromptTarget, TrustAgent};
use crate::protoblock::ProtoBlock;
use crate::result::TrustResult;

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "pytest",
        description: "creates and runs unit tests with pytest; best for verifying isolated \
                      functionality and small-scale functions empirically",
        protoblock_prompt: "Describe the test outline for this task. Aim for ONE focused test \
                            that empirically checks the new functionality. The test must be \
                            fulfillable given the planned file changes and must run headlessly \
                            (no UI that blocks). If a similar test file already exists, append \
                            to it instead of creating a new one. Describe concrete input data \
                            and the expected outcome. Leave empty if no test is needed.",
        prompt_target: PromptTarget::CodingAgent,
        mandatory: true,
    }
}

/// Per-outcome counters parsed from a verbose pytest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestStats {
    pub passed: u32,
    pub failed: u32,
    pub error: u32,
    pub skipped: u32,
}

impl TestStats {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.error + self.skipped
    }
}

/// Exit code pytest uses for "no tests collected"; not a regression.
const EXIT_NO_TESTS: i32 = 5;

pub struct PytestAgent {
    root: PathBuf,
    test_path: String,
    test_file_pattern: String,
    exclude_performance: bool,
    last_stats: TestStats,
    last_output: String,
}

impl PytestAgent {
    pub fn new(config: &Config) -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_root(config, root)
    }

    pub fn with_root(config: &Config, root: PathBuf) -> Self {
        Self {
            root,
            test_path: config.general.test_path.clone(),
            test_file_pattern: config.general.test_file_pattern.clone(),
            exclude_performance: config.general.trusty_agents.exclude_performance_tests,
            last_stats: TestStats::default(),
            last_output: String::new(),
        }
    }

    pub fn stats(&self) -> TestStats {
        self.last_stats
    }

    pub fn output(&self) -> &str {
        &self.last_output
    }

    /// Remove compiled-bytecode artifacts and pytest's own cache so the run
    /// is guaranteed to load the just-modified code.
    fn bust_caches(&self) {
        remove_cache_artifacts(&self.root);
    }

    fn test_files(&self) -> Vec<PathBuf> {
        let pattern = self
            .root
            .join(&self.test_path)
            .join(&self.test_file_pattern);
        glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.flatten().collect())
            .unwrap_or_default()
    }

    async fn run_pytest(&mut self) -> (bool, TestStats) {
        let test_dir = self.root.join(&self.test_path);
        if !test_dir.exists() {
            self.last_output = format!("Error: Test path not found: {}", self.test_path);
            return (false, TestStats::default());
        }

        self.bust_caches();

        let mut args = vec![
            "-m".to_string(),
            "pytest".to_string(),
            "-v".to_string(),
            "--disable-warnings".to_string(),
        ];
        if self.exclude_performance {
            args.push("-m".to_string());
            args.push("not performance and not transient".to_string());
        }
        args.push(self.test_path.clone());

        tracing::info!(args = ?args, "Running pytest");
        let output = tokio::process::Command::new("python")
            .args(&args)
            .current_dir(&self.root)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                self.last_output = format!("Error running tests: {e}");
                return (false, TestStats::default());
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let stats = parse_test_stats(&combined);
        self.last_output = format!("{combined}\n{}", summarize(&stats, exit_code));
        self.last_stats = stats;

        let execution_ok = exit_code == 0 || exit_code == EXIT_NO_TESTS;
        (execution_ok && stats.failed == 0 && stats.error == 0, stats)
    }
}

#[async_trait]
impl TrustAgent for PytestAgent {
    fn name(&self) -> &str {
        "pytest"
    }

    fn should_run_mandatory(&self, _protoblock: &ProtoBlock, _codebase: &str) -> (bool, String) {
        if self.test_files().is_empty() {
            (
                false,
                format!(
                    "no test files matching {}/{} exist",
                    self.test_path, self.test_file_pattern
                ),
            )
        } else {
            (true, String::new())
        }
    }

    async fn check(
        &mut self,
        _protoblock: &ProtoBlock,
        _codebase: &str,
        _code_diff: &str,
    ) -> TrustResult {
        let (success, stats) = self.run_pytest().await;

        if stats.failed > 0 {
            tracing::warn!("{} out of {} tests failed", stats.failed, stats.total());
        } else {
            tracing::info!("All {} tests passed", stats.total());
        }

        let summary = if success {
            format!("{} passed, {} skipped", stats.passed, stats.skipped)
        } else {
            format!(
                "{} failed, {} errored out of {} tests",
                stats.failed,
                stats.error,
                stats.total()
            )
        };

        TrustResult::new("pytest", success, summary)
            .with_metric("Total", json!(stats.total()), "tests")
            .with_metric("Passed", json!(stats.passed), "tests")
            .with_metric("Failed", json!(stats.failed), "tests")
            .with_metric("Error", json!(stats.error), "tests")
            .with_metric("Skipped", json!(stats.skipped), "tests")
            .with_report("Test output", self.last_output.clone())
    }
}

fn remove_cache_artifacts(root: &Path) {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if name == "__pycache__" || name == ".pytest_cache" {
                    if let Err(e) = std::fs::remove_dir_all(&path) {
                        tracing::debug!(path = %path.display(), error = %e, "Cache removal failed");
                    }
                } else if !name.starts_with('.') && name != "node_modules" && name != "target" {
                    stack.push(path);
                }
            } else if name.ends_with(".pyc") {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// Count per-test outcomes from `pytest -v` output. Node-id lines look
/// like `tests/test_x.py::test_a PASSED [ 50%]`.
pub fn parse_test_stats(output: &str) -> TestStats {
    let mut stats = TestStats::default();
    for line in output.lines() {
        if !line.contains("::") {
            continue;
        }
        if line.contains(" PASSED") {
            stats.passed += 1;
        } else if line.contains(" FAILED") {
            stats.failed += 1;
        } else if line.contains(" ERROR") {
            stats.error += 1;
        } else if line.contains(" SKIPPED") {
            stats.skipped += 1;
        }
    }
    stats
}

fn summarize(stats: &TestStats, exit_code: i32) -> String {
    let mut summary = String::from("\nTest Summary:\n");
    if exit_code == 0 {
        summary.push_str("All tests passed!\n");
    } else if exit_code == EXIT_NO_TESTS {
        summary.push_str("No tests were found.\n");
        summary.push_str("This is not a failure - it just means no tests exist yet.\n");
    } else {
        summary.push_str(&format!("Tests failed with exit code {exit_code}\n"));
    }
    summary.push_str(&format!("Passed: {}\n", stats.passed));
    if stats.failed > 0 {
        summary.push_str(&format!("Failed: {}\n", stats.failed));
    }
    if stats.error > 0 {
        summary.push_str(&format!("Errors: {}\n", stats.error));
    }
    if stats.skipped > 0 {
        summary.push_str(&format!("Skipped: {}\n", stats.skipped));
    }
    summary
}
