use async_trait::async_trait;
use tac_config::{Config, LlmRole};
use tac_provider::{LlmClient, Message};

use super::{AgentSpec, PromptTarget, TrustAgent};
use crate::protoblock::ProtoBlock;
use crate::result::TrustResult;

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "plausibility",
        description: "reviews the final diff against the task specification and grades it A-F; \
                      good for catching changes that pass tests but miss the point",
        protoblock_prompt: "Describe what a reviewer should pay attention to when judging \
                            whether the diff plausibly implements the task: the behaviors that \
                            must change, the files that must be touched, and anything that must \
                            NOT change.",
        prompt_target: PromptTarget::TrustyAgent,
        mandatory: true,
    }
}

pub struct PlausibilityAgent {
    llm: LlmClient,
}

impl PlausibilityAgent {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            llm: LlmClient::new(LlmRole::Strong, config)?,
        })
    }

    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn build_prompt(protoblock: &ProtoBlock, codebase: &str, code_diff: &str) -> String {
        let reviewer_notes = protoblock
            .trusty_agent_prompts
            .get("plausibility")
            .map(String::as_str)
            .unwrap_or("No reviewer notes provided");
        format!(
            "<purpose>\nYou are a senior software engineer reviewing a code change made by a \
             junior engineer. Judge whether the diff plausibly implements the task. Grade the \
             change on a scale from A to F.\n</purpose>\n\n\
             <task_description>\n{}\n</task_description>\n\n\
             <reviewer_notes>\n{reviewer_notes}\n</reviewer_notes>\n\n\
             <codebase>\n{codebase}\n</codebase>\n\n\
             <code_diff>\n{code_diff}\n</code_diff>\n\n\
             <grading_rules>\n\
             - A: fully implements the task, clean and consistent with the codebase\n\
             - B: implements the task with minor cosmetic issues\n\
             - C: partially implements the task or introduces questionable changes\n\
             - D: barely related to the task\n\
             - F: does not implement the task or breaks unrelated behavior\n\
             </grading_rules>\n\n\
             <output_format>\n\
             First line: GRADE: <letter>\n\
             Then a detailed justification of the grade.\n\
             </output_format>",
            protoblock.task_description
        )
    }
}

/// First standalone A-F letter in the verdict, scanning top to bottom:
/// a `GRADE:` line or a lone letter on its own line, whichever comes
/// first. A verdict without a grade is an F.
pub fn extract_grade(response: &str) -> char {
    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("GRADE:") {
            if let Some(letter) = rest.trim().chars().next() {
                let upper = letter.to_ascii_uppercase();
                if ('A'..='F').contains(&upper) {
                    return upper;
                }
            }
        } else if line.len() == 1 {
            let letter = line.chars().next().unwrap().to_ascii_uppercase();
            if ('A'..='F').contains(&letter) {
                return letter;
            }
        }
    }
    'F'
}

#[async_trait]
impl TrustAgent for PlausibilityAgent {
    fn name(&self) -> &str {
        "plausibility"
    }

    async fn check(
        &mut self,
        protoblock: &ProtoBlock,
        codebase: &str,
        code_diff: &str,
    ) -> TrustResult {
        let prompt = Self::build_prompt(protoblock, codebase, code_diff);
        let messages = vec![
            Message::system(
                "You are a code review assistant. Follow the output format exactly.",
            ),
            Message::user(prompt),
        ];

        let response = match self.llm.chat_completion(messages).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Plausibility review failed");
                return TrustResult::failed("plausibility", "Review could not be completed")
                    .with_error("LlmError", e.to_string(), None);
            }
        };

        let grade = extract_grade(&response);
        let success = matches!(grade, 'A' | 'B');
        let summary = if success {
            format!("Change graded {grade}")
        } else {
            format!("Change graded {grade}, below the passing bar")
        };

        TrustResult::new("plausibility", success, summary)
            .with_grade(grade.to_string(), "A-F", "Plausibility of the diff against the task")
            .with_report("Review", response)
    }
}
