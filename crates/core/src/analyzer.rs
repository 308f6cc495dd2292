use tac_config::{Config, LlmRole};
use tac_provider::{LlmClient, Message};

use crate::protoblock::ProtoBlock;

/// LLM-assisted post-mortem of a failed attempt. Its output is prose fed
/// back into the next planner call verbatim; nothing here is parsed for
/// control flow.
pub struct ErrorAnalyzer {
    llm: Option<LlmClient>,
}

impl ErrorAnalyzer {
    pub fn from_config(config: &Config) -> Self {
        if !config.general.run_error_analysis {
            return Self { llm: None };
        }
        match LlmClient::new(LlmRole::Strong, config) {
            Ok(llm) => Self { llm: Some(llm) },
            Err(e) => {
                tracing::warn!(error = %e, "Error analysis unavailable, continuing without it");
                Self { llm: None }
            }
        }
    }

    pub fn new(llm: LlmClient) -> Self {
        Self { llm: Some(llm) }
    }

    pub fn disabled() -> Self {
        Self { llm: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// Analyze a failure. Returns an empty string when analysis is
    /// disabled or the LLM call fails, so callers can always treat the
    /// result as "text to append".
    pub async fn analyze_failure(
        &self,
        protoblock: &ProtoBlock,
        failure_output: &str,
        codebase: &str,
    ) -> String {
        let Some(llm) = &self.llm else {
            return String::new();
        };

        let test_spec = protoblock
            .trusty_agent_prompts
            .get("pytest")
            .map(String::as_str)
            .unwrap_or("No test specification provided");

        let prompt = format!(
            "<purpose>\nYou are a senior software engineer analyzing a failed implementation \
             attempt. Provide a clear analysis of what went wrong and how the next attempt \
             should differ.\n</purpose>\n\n\
             <codebase_state>\n{codebase}\n</codebase_state>\n\n\
             <protoblock>\n\
             Task Description: {}\n\
             Write Files: {:?}\n\
             Context Files: {:?}\n\
             Test Specification: {test_spec}\n\
             </protoblock>\n\n\
             <failure_output>\n{failure_output}\n</failure_output>\n\n\
             <analysis_rules>\n\
             1. Identify the failure type (syntax error, runtime error, test assertion, ...).\n\
             2. Decide whether an existing test must be updated because the task makes it stale; \
                if so, describe the update.\n\
             3. If a file is missing, list the files that must be created.\n\
             4. If an import is missing, list the imports that must be added.\n\
             </analysis_rules>\n\n\
             <output_format>\n\
             NEW STRATEGY FOR SOLVING THE TASK:\n\
             (how the next implementation attempt should look, given what this one taught us)\n\n\
             MISSING WRITE FILES:\n\
             (the attempt could modify {:?}; if more files need write access, list them as a \
             JSON array of paths, e.g. [\"tests/test_example.py\"], otherwise [])\n\
             </output_format>",
            protoblock.task_description,
            protoblock.write_files,
            protoblock.context_files,
            protoblock.write_files,
        );

        let messages = vec![
            Message::system(
                "You are a coding assistant specialized in analyzing test failures and \
                 implementation errors. Provide clear, actionable analysis.",
            ),
            Message::user(prompt),
        ];

        match llm.chat_completion(messages).await {
            Ok(response) if !response.trim().is_empty() => response,
            Ok(_) => {
                tracing::error!("Received empty analysis from LLM");
                String::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failure analysis errored");
                String::new()
            }
        }
    }
}

/// Pull the machine-readable path list out of the MISSING WRITE FILES
/// section. Surfaced to the user only; the planner re-derives write files
/// itself so the protoblock invariants stay locally provable.
pub fn extract_missing_write_files(analysis: &str) -> Vec<String> {
    let Some(idx) = analysis.find("MISSING WRITE FILES") else {
        return Vec::new();
    };
    let section = &analysis[idx..];

    // Preferred shape: a JSON array somewhere in the section.
    if let Some(start) = section.find('[') {
        if let Some(end) = section[start..].find(']') {
            let candidate = &section[start..start + end + 1];
            if let Ok(paths) = serde_json::from_str::<Vec<String>>(candidate) {
                return paths
                    .into_iter()
                    .filter(|p| !p.trim().is_empty())
                    .collect();
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_array() {
        let analysis = "NEW STRATEGY FOR SOLVING THE TASK:\nfix the import\n\n\
                        MISSING WRITE FILES:\n[\"tests/test_a.py\", \"lib/b.py\"]";
        assert_eq!(
            extract_missing_write_files(analysis),
            vec!["tests/test_a.py", "lib/b.py"]
        );
    }

    #[test]
    fn empty_array_yields_nothing() {
        let analysis = "MISSING WRITE FILES:\n[]";
        assert!(extract_missing_write_files(analysis).is_empty());
    }

    #[test]
    fn missing_section_yields_nothing() {
        assert!(extract_missing_write_files("no sections at all").is_empty());
    }

    #[test]
    fn malformed_list_yields_nothing() {
        let analysis = "MISSING WRITE FILES:\n[not, valid, json]";
        assert!(extract_missing_write_files(analysis).is_empty());
    }

    #[tokio::test]
    async fn disabled_analyzer_returns_empty() {
        let analyzer = ErrorAnalyzer::disabled();
        let block = ProtoBlock::new(
            "abc123",
            "task",
            vec!["a.py".into()],
            vec![],
            vec![],
            Default::default(),
            "tac/feature/x",
            "msg",
        );
        let analysis = analyzer.analyze_failure(&block, "boom", "codebase").await;
        assert!(analysis.is_empty());
        assert!(!analyzer.is_enabled());
    }
}
