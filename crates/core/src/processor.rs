use std::path::PathBuf;

use anyhow::Result;
use tac_config::Config;

use crate::executor::Executor;
use crate::interact;
use crate::logs::{ExecutionLog, ExecutionRecord};
use crate::planner::Planner;
use crate::protoblock::ProtoBlock;
use crate::source_tree::SourceTree;
use crate::trust::TrustRegistry;

/// End-to-end workflow for one task: create a protoblock, execute it, and
/// retry with error-informed replanning until success or exhaustion. Owns
/// the source tree for the duration of the run.
pub struct Processor {
    config: Config,
    project_root: PathBuf,
    planner: Planner,
    executor: Executor,
    source_tree: Box<dyn SourceTree>,
}

impl Processor {
    pub fn from_config(
        config: &Config,
        project_root: PathBuf,
        source_tree: Box<dyn SourceTree>,
    ) -> Result<Self> {
        Ok(Self {
            planner: Planner::from_config(config)?,
            executor: Executor::from_config(config, project_root.clone())?,
            config: config.clone(),
            project_root,
            source_tree,
        })
    }

    /// Test seam: inject planner, executor, and tree directly.
    pub fn new(
        config: Config,
        project_root: PathBuf,
        planner: Planner,
        executor: Executor,
        source_tree: Box<dyn SourceTree>,
    ) -> Self {
        Self {
            config,
            project_root,
            planner,
            executor,
            source_tree,
        }
    }

    /// Orchestrator hook: pushes never happen mid-plan, only at the end if
    /// ever.
    pub fn set_auto_push(&mut self, enabled: bool) {
        self.config.git.auto_push_if_success = enabled;
    }

    pub fn auto_push_enabled(&self) -> bool {
        self.config.git.auto_push_if_success
    }

    pub fn source_tree_mut(&mut self) -> &mut dyn SourceTree {
        self.source_tree.as_mut()
    }

    /// Run the attempt loop. Either `input_protoblock` or task
    /// instructions must be provided.
    pub async fn run(
        &mut self,
        task_instructions: &str,
        codebase: &str,
        input_protoblock: Option<ProtoBlock>,
        registry: &TrustRegistry,
    ) -> Result<bool> {
        anyhow::ensure!(
            input_protoblock.is_some() || !task_instructions.trim().is_empty(),
            "Either a protoblock or task instructions must be provided"
        );

        let max_retries = self.config.general.max_retries_block_creation;
        tracing::info!(max_retries, "Starting execution loop");

        let mut error_analysis = String::new();
        let mut protoblock: Option<ProtoBlock> = None;
        let mut previous: Option<ProtoBlock> = None;
        let mut log: Option<ExecutionLog> = None;

        for idx_attempt in 0..max_retries {
            tracing::info!(
                attempt = idx_attempt + 1,
                max_retries,
                "Starting block creation and execution attempt"
            );

            if idx_attempt == 0 {
                let block = match input_protoblock.clone() {
                    Some(block) => {
                        tracing::info!("Using provided protoblock");
                        block
                    }
                    None => {
                        self.planner
                            .create_protoblock(
                                task_instructions,
                                codebase,
                                registry,
                                &self.project_root,
                            )
                            .await?
                    }
                };
                protoblock = Some(block);
            } else {
                if self.config.general.halt_after_fail {
                    match interact::prompt_fail_recovery() {
                        interact::FailRecovery::Revert => {
                            if self.config.git.enabled {
                                tracing::info!("Reverting changes as per user selection");
                                self.source_tree.revert_changes();
                            } else {
                                tracing::info!("Git is disabled; cannot revert changes");
                            }
                        }
                        interact::FailRecovery::Continue => {
                            tracing::info!("Continuing with current state");
                        }
                    }
                } else if self.config.git.enabled {
                    tracing::info!("Reverting changes while staying on the feature branch");
                    self.source_tree.revert_changes();
                }

                if let Some(block) = input_protoblock.clone() {
                    // An externally supplied protoblock is the plan; retries
                    // rerun it with a clean result map.
                    tracing::info!("Re-running provided protoblock");
                    protoblock = Some(block);
                } else {
                    let genesis_task = if error_analysis.is_empty() {
                        task_instructions.to_string()
                    } else {
                        format!(
                            "{task_instructions}\nYou have tried to implement this before and \
                             it failed. Dig into the analysis below, be explicit, and do your \
                             best to AVOID the previous failure. If files were missing from \
                             the plan, include them this time. Here is the full \
                             report:\n{error_analysis}"
                        )
                    };

                    match self
                        .planner
                        .create_protoblock(&genesis_task, codebase, registry, &self.project_root)
                        .await
                    {
                        Ok(mut block) => {
                            // Identity is pinned to the first attempt.
                            if let Some(prev) = &previous {
                                block.block_id = prev.block_id.clone();
                                block.branch_name = prev.branch_name.clone();
                                block.commit_message = prev.commit_message.clone();
                            }
                            protoblock = Some(block);
                        }
                        Err(e) => {
                            error_analysis = e.to_string();
                            tracing::error!(
                                attempt = idx_attempt + 1,
                                error = %error_analysis,
                                "Protoblock generation failed"
                            );
                            continue;
                        }
                    }
                }
            }

            let block = protoblock.as_mut().expect("protoblock set above");
            block.attempt_number = idx_attempt + 1;

            if self.config.general.save_protoblock {
                match block.save(&self.project_root) {
                    Ok(path) => tracing::info!(path = %path.display(), "Saved protoblock"),
                    Err(e) => tracing::warn!(error = %e, "Failed to save protoblock"),
                }
            } else {
                tracing::info!("Protoblock saving is disabled");
            }

            if log.is_none() {
                log = Some(ExecutionLog::new(
                    &self.project_root,
                    &block.block_id,
                    &self.config,
                ));
            }

            if idx_attempt == 0 && !self.setup_branch(block) {
                return Ok(false);
            }

            let last_attempt = idx_attempt + 1 == max_retries;
            let outcome = self
                .executor
                .execute_block(
                    block,
                    idx_attempt,
                    codebase,
                    self.source_tree.as_mut(),
                    registry,
                    &error_analysis,
                    last_attempt,
                )
                .await;

            let failure_label = outcome
                .failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default();
            if let Some(log) = &log {
                let record = ExecutionRecord {
                    protoblock: block.clone(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    attempt: idx_attempt + 1,
                    success: outcome.success,
                    git_diff: self.source_tree.complete_diff(),
                    test_results: block
                        .trusty_agent_results
                        .get("pytest")
                        .map(|r| r.render_console())
                        .unwrap_or_default(),
                    message: if outcome.success {
                        "success".to_string()
                    } else {
                        failure_label.clone()
                    },
                    failure_analysis: (!outcome.analysis.is_empty())
                        .then(|| outcome.analysis.clone()),
                };
                if let Err(e) = log.append(record) {
                    tracing::warn!(error = %e, "Failed to append execution log");
                }
            }

            if outcome.success {
                tracing::info!(attempt = idx_attempt + 1, "Execution successful");
                return Ok(self.finalize_success(block));
            }

            tracing::error!(
                attempt = idx_attempt + 1,
                failure = %failure_label,
                "Attempt failed"
            );
            error_analysis = if self.config.general.run_error_analysis {
                outcome.analysis
            } else {
                String::new()
            };
            // Surface suggested write files; the next planner call decides
            // whether to adopt them.
            let missing = crate::analyzer::extract_missing_write_files(&error_analysis);
            if !missing.is_empty() {
                tracing::warn!(files = ?missing, "Analysis suggests additional write files");
            }
            previous = protoblock.clone();
        }

        self.log_exhaustion();
        Ok(false)
    }

    fn setup_branch(&mut self, block: &ProtoBlock) -> bool {
        if !self.config.git.enabled {
            tracing::info!("Git operations disabled");
            return true;
        }
        if !self
            .source_tree
            .create_or_switch_to_namespaced_branch(&block.branch_name)
        {
            tracing::error!(branch = %block.branch_name, "Failed to set up feature branch");
            return false;
        }
        let (clean, _) = self.source_tree.check_status(true);
        clean
    }

    fn finalize_success(&mut self, block: &ProtoBlock) -> bool {
        if !self.config.git.enabled {
            tracing::debug!("Git operations disabled");
            return true;
        }

        let auto_commit = self.config.git.auto_commit_if_success;
        let auto_push = self.config.git.auto_push_if_success;

        if self.config.general.halt_after_verify {
            match interact::prompt_verify_decision() {
                interact::VerifyDecision::Commit => {}
                interact::VerifyDecision::Abort => {
                    tracing::info!("User chose to abort; reverting changes");
                    self.source_tree.revert_changes();
                    return true;
                }
            }
        }

        if !self
            .source_tree
            .post_execution_handle(auto_commit, auto_push, &block.commit_message)
        {
            tracing::error!("Failed to commit changes");
            return false;
        }
        true
    }

    fn log_exhaustion(&self) {
        tracing::error!("All execution attempts failed");
        // Without git the branch names below would be the shadow backend's
        // placeholders and the commands would point at the wrong repo.
        if !self.config.git.enabled {
            return;
        }
        let current = self
            .source_tree
            .current_branch()
            .unwrap_or_else(|| "current-branch".to_string());
        let base = self
            .source_tree
            .base_branch()
            .unwrap_or_else(|| "main".to_string());
        tracing::error!(
            "To switch back to your main branch and clean up:\n    \
             git switch {base} && git restore . && git clean -fd && git branch -D {current}"
        );
    }
}
