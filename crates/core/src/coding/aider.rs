use async_trait::async_trait;
use tac_config::Config;
use tokio::process::Command;

use super::subprocess::{run_streaming, StreamSettings};
use super::{CodingAgent, CodingError};
use crate::protoblock::ProtoBlock;

/// Drives the external `aider` tool to implement a protoblock. The tool
/// owns the actual editing; this wrapper owns file scoping, the prompt,
/// and the timeout envelope.
pub struct AiderAgent {
    program: String,
    model: Option<String>,
    total_timeout_secs: u64,
    test_path: String,
}

impl AiderAgent {
    pub fn new(config: &Config) -> Self {
        Self {
            program: "aider".to_string(),
            model: None,
            total_timeout_secs: config.general.agent_timeout,
            test_path: config.general.test_path.clone(),
        }
    }

    /// Test seam: substitute the executable driven by this agent.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn build_prompt(&self, protoblock: &ProtoBlock, previous_analysis: Option<&str>) -> String {
        let test_instructions = protoblock
            .trusty_agent_prompts
            .get("pytest")
            .map(String::as_str)
            .unwrap_or("");

        let mut prompt = format!(
            "Implement both the functionality AND its tests according to these specifications:\n\n\
             Task Description: {}\n\n\
             Test Requirements:\n{test_instructions}\n\n\
             Important Guidelines:\n\
             - Write both the implementation and corresponding tests\n\
             - Ensure tests are CONSISTENT with the code implemented\n\
             - All tests must be stored directly in the {}/ directory, e.g. {}/test_example.py. \
               DO NOT create any subfolders inside {}/\n\
             - Avoid timeouts in tests; long-running processes need clear exit conditions\n\
             - Tests must be deterministic and reliable",
            protoblock.task_description, self.test_path, self.test_path, self.test_path
        );

        if let Some(analysis) = previous_analysis.filter(|a| !a.trim().is_empty()) {
            prompt.push_str(&format!(
                "\n\nA previous attempt at this task failed. Here is the failure analysis; \
                 avoid repeating these mistakes:\n{analysis}"
            ));
        }

        prompt
    }

    fn build_command(&self, protoblock: &ProtoBlock, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--yes-always").arg("--no-git");
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("--input-history-file")
            .arg("/dev/null")
            .arg("--chat-history-file")
            .arg("/dev/null")
            .arg("--llm-history-file")
            .arg("/dev/null");

        for file in &protoblock.write_files {
            cmd.arg("--file").arg(file);
        }
        for file in &protoblock.context_files {
            cmd.arg("--read").arg(file);
        }
        cmd.arg("--message").arg(prompt);
        cmd
    }
}

#[async_trait]
impl CodingAgent for AiderAgent {
    fn name(&self) -> &str {
        "aider"
    }

    async fn run(
        &mut self,
        protoblock: &ProtoBlock,
        previous_analysis: Option<&str>,
    ) -> Result<(), CodingError> {
        let prompt = self.build_prompt(protoblock, previous_analysis);
        let command = self.build_command(protoblock, &prompt);

        tracing::info!(
            write_files = ?protoblock.write_files,
            context_files = ?protoblock.context_files,
            "Invoking coding agent"
        );

        let settings = StreamSettings::from_total_secs(self.total_timeout_secs);
        run_streaming(command, settings).await?;
        tracing::info!("Coding agent finished successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn block() -> ProtoBlock {
        let mut prompts = BTreeMap::new();
        prompts.insert(
            "pytest".to_string(),
            "assert foo_v2 returns 42".to_string(),
        );
        ProtoBlock::new(
            "abc123",
            "rename foo to foo_v2",
            vec!["lib/core/util.py".into(), "tests/test_util.py".into()],
            vec!["lib/core/mod.py".into()],
            vec![],
            prompts,
            "tac/feature/rename-foo",
            "tac: rename foo",
        )
    }

    #[test]
    fn prompt_includes_task_and_test_spec() {
        let agent = AiderAgent::new(&Config::default());
        let prompt = agent.build_prompt(&block(), None);
        assert!(prompt.contains("rename foo to foo_v2"));
        assert!(prompt.contains("assert foo_v2 returns 42"));
        assert!(prompt.contains("DO NOT create any subfolders inside tests/"));
        assert!(!prompt.contains("previous attempt"));
    }

    #[test]
    fn prompt_appends_previous_analysis() {
        let agent = AiderAgent::new(&Config::default());
        let prompt = agent.build_prompt(&block(), Some("the import was missing"));
        assert!(prompt.contains("previous attempt"));
        assert!(prompt.contains("the import was missing"));
    }

    #[test]
    fn blank_analysis_is_ignored() {
        let agent = AiderAgent::new(&Config::default());
        let prompt = agent.build_prompt(&block(), Some("   "));
        assert!(!prompt.contains("previous attempt"));
    }

    #[tokio::test]
    async fn run_reports_failure_from_stub_program() {
        let mut agent = AiderAgent::new(&Config::default()).with_program("false");
        let err = agent.run(&block(), None).await.unwrap_err();
        assert!(matches!(err, CodingError::Failed(_)));
    }

    #[tokio::test]
    async fn run_succeeds_with_stub_program() {
        let mut agent = AiderAgent::new(&Config::default()).with_program("true");
        agent.run(&block(), None).await.unwrap();
    }
}
