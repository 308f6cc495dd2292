use std::path::PathBuf;

use anyhow::Result;
use tac_config::Config;

use crate::analyzer::ErrorAnalyzer;
use crate::coding::{create_coding_agent, CodingAgent, CodingError};
use crate::error::FailureKind;
use crate::fsutil;
use crate::protoblock::ProtoBlock;
use crate::source_tree::SourceTree;
use crate::trust::{TrustAgent, TrustRegistry};

/// What one attempt produced: success, or a failure kind plus the analysis
/// text the next planner call will consume.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub failure: Option<FailureKind>,
    pub analysis: String,
}

impl ExecutionOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            failure: None,
            analysis: String::new(),
        }
    }

    fn failed(failure: FailureKind, analysis: String) -> Self {
        Self {
            success: false,
            failure: Some(failure),
            analysis,
        }
    }
}

/// Runs one protoblock: coding agent first, then every selected trust
/// agent in the protoblock's order. Pytest short-circuits the chain on
/// failure; comparative agents get their baseline captured before any
/// code changes.
pub struct Executor {
    config: Config,
    project_root: PathBuf,
    coding_agent: Box<dyn CodingAgent>,
    analyzer: ErrorAnalyzer,
}

impl Executor {
    pub fn from_config(config: &Config, project_root: PathBuf) -> Result<Self> {
        Ok(Self {
            coding_agent: create_coding_agent(config)?,
            analyzer: ErrorAnalyzer::from_config(config),
            config: config.clone(),
            project_root,
        })
    }

    /// Test seam: inject the coding agent and analyzer directly.
    pub fn new(
        config: Config,
        project_root: PathBuf,
        coding_agent: Box<dyn CodingAgent>,
        analyzer: ErrorAnalyzer,
    ) -> Self {
        Self {
            config,
            project_root,
            coding_agent,
            analyzer,
        }
    }

    pub async fn execute_block(
        &mut self,
        protoblock: &mut ProtoBlock,
        idx_attempt: u32,
        codebase: &str,
        source_tree: &mut dyn SourceTree,
        registry: &TrustRegistry,
        previous_analysis: &str,
        last_attempt: bool,
    ) -> ExecutionOutcome {
        tracing::info!(attempt = idx_attempt + 1, "Starting task execution");

        // Instantiate the attempt's agents up front so comparative ones can
        // capture a fair baseline before the code changes.
        let mut agents: Vec<(String, Box<dyn TrustAgent>)> = Vec::new();
        for name in &protoblock.trusty_agents {
            match registry.create(name, &self.config) {
                Ok(agent) => agents.push((name.clone(), agent)),
                Err(e) => {
                    return ExecutionOutcome::failed(
                        FailureKind::TrustAgent(name.clone()),
                        format!("Could not construct trusty agent '{name}': {e}"),
                    );
                }
            }
        }

        for (name, agent) in agents.iter_mut() {
            if agent.is_comparative() {
                agent.set_protoblock(protoblock);
                if let Err(e) = agent.capture_before_state(protoblock).await {
                    tracing::warn!(agent = %name, error = %e, "Before-state capture failed");
                }
            }
        }

        let previous = (!previous_analysis.trim().is_empty()).then_some(previous_analysis);
        if let Err(e) = self.coding_agent.run(protoblock, previous).await {
            let error_msg = format!("Error during task execution: {e}");
            tracing::error!("{error_msg}");
            let analysis = if last_attempt {
                String::new()
            } else {
                self.analyzer
                    .analyze_failure(protoblock, &error_msg, codebase)
                    .await
            };
            let failure = match e {
                CodingError::Timeout(msg) => FailureKind::CodingAgentTimeout(msg),
                CodingError::Failed(msg) => FailureKind::CodingAgent(msg),
            };
            return ExecutionOutcome::failed(failure, analysis);
        }
        tracing::info!(attempt = idx_attempt + 1, "Task execution completed");

        // Post-coding hygiene: un-nest tests/tests/ before anything judges
        // the tree.
        if let Err(e) =
            fsutil::flatten_nested_tests(&self.project_root, &self.config.general.test_path)
        {
            tracing::warn!(error = %e, "Nested test cleanup failed");
        }

        let code_diff = source_tree.complete_diff();

        for (name, agent) in agents.iter_mut() {
            let (should_run, reason) = agent.should_run_mandatory(protoblock, codebase);
            if !should_run {
                tracing::info!(agent = %name, reason = %reason, "Trusty agent opted out");
                continue;
            }

            tracing::info!(agent = %name, "Running trusty agent");
            let mut result = agent.check(protoblock, codebase, &code_diff).await;

            if !result.success && name.as_str() == "pytest" {
                let test_output = result.render_console();
                let analysis = if last_attempt {
                    String::new()
                } else {
                    self.analyzer
                        .analyze_failure(protoblock, &test_output, codebase)
                        .await
                };
                if !analysis.is_empty() {
                    result = result.with_report("Failure analysis", analysis.clone());
                }
                protoblock
                    .trusty_agent_results
                    .insert(name.clone(), result);
                tracing::info!("Returning early due to test failure, skipping remaining trusty agents");
                return ExecutionOutcome::failed(FailureKind::TestsFailed, analysis);
            }

            let success = result.success;
            let rendered = result.render_console();
            protoblock
                .trusty_agent_results
                .insert(name.clone(), result);

            if !success {
                let analysis = if last_attempt {
                    String::new()
                } else {
                    self.analyzer
                        .analyze_failure(protoblock, &rendered, codebase)
                        .await
                };
                return ExecutionOutcome::failed(FailureKind::TrustAgent(name.clone()), analysis);
            }
            tracing::info!(agent = %name, "Trusty agent passed");
        }

        tracing::info!("All trusty agents completed successfully");
        ExecutionOutcome::ok()
    }
}
