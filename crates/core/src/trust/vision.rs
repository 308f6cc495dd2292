use std::path::PathBuf;

use async_trait::async_trait;
use tac_config::{Config, LlmRole};
use tac_provider::{ImageData, LlmClient, Message};

use super::capture;
use super::{AgentSpec, PromptTarget, TrustAgent};
use crate::protoblock::ProtoBlock;
use crate::result::TrustResult;

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "vision",
        description: "launches the program, captures a screenshot, and asks a vision model for \
                      a YES/NO verdict; good for UI tasks with a definite expected appearance",
        protoblock_prompt: "Describe precisely what must be visible on screen for the task to \
                            count as done: layout, colors, text, shapes. The verdict is binary, \
                            so phrase it as a checkable condition.",
        prompt_target: PromptTarget::TrustyAgent,
        mandatory: false,
    }
}

pub struct VisionAgent {
    llm: LlmClient,
    root: PathBuf,
    screenshot_delay: u64,
    verdict_timeout: std::time::Duration,
}

impl VisionAgent {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self {
            llm: LlmClient::new(LlmRole::Vision, config)?,
            root,
            screenshot_delay: config.general.vision_screenshot_delay,
            verdict_timeout: std::time::Duration::from_secs(config.general.vision_timeout),
        })
    }

    pub fn new(llm: LlmClient, root: PathBuf, screenshot_delay: u64, timeout_secs: u64) -> Self {
        Self {
            llm,
            root,
            screenshot_delay,
            verdict_timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }

    async fn capture_program_screenshot(&self, protoblock: &ProtoBlock) -> anyhow::Result<PathBuf> {
        let screenshot_path = self
            .root
            .join(format!(".tac_vision_{}.png", protoblock.block_id));

        let program = capture::select_program_file(protoblock, &self.root);
        let mut child = program.as_deref().and_then(capture::launch_program);

        capture::wait_for_render(self.screenshot_delay).await;
        let result = capture::capture_screenshot(&screenshot_path).await;

        if let Some(child) = child.as_mut() {
            let _ = child.kill().await;
        }
        result
    }
}

/// A verdict passes only when the first word is YES.
pub fn parse_yes_no(response: &str) -> bool {
    response
        .split_whitespace()
        .next()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_alphabetic())
                .eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

#[async_trait]
impl TrustAgent for VisionAgent {
    fn name(&self) -> &str {
        "vision"
    }

    async fn check(
        &mut self,
        protoblock: &ProtoBlock,
        _codebase: &str,
        _code_diff: &str,
    ) -> TrustResult {
        let criteria = protoblock
            .trusty_agent_prompts
            .get("vision")
            .cloned()
            .unwrap_or_else(|| protoblock.task_description.clone());

        let screenshot = match self.capture_program_screenshot(protoblock).await {
            Ok(path) => path,
            Err(e) => {
                return TrustResult::failed("vision", "Screenshot capture failed").with_error(
                    "CaptureError",
                    e.to_string(),
                    None,
                );
            }
        };

        let encoded = match capture::encode_png_base64(&screenshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                return TrustResult::failed("vision", "Screenshot unreadable").with_error(
                    "CaptureError",
                    e.to_string(),
                    None,
                );
            }
        };

        let prompt = format!(
            "You are inspecting a screenshot of a running program.\n\n\
             Expected appearance:\n{criteria}\n\n\
             Answer with YES if the screenshot satisfies the expectation, otherwise NO, \
             followed by one sentence of justification. The first word of your answer \
             must be YES or NO."
        );
        let messages = vec![Message::user_with_image(prompt, ImageData::png(encoded))];

        let verdict = tokio::time::timeout(
            self.verdict_timeout,
            self.llm.chat_completion(messages),
        )
        .await;
        let response = match verdict {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return TrustResult::failed("vision", "Vision review failed").with_error(
                    "LlmError",
                    e.to_string(),
                    None,
                );
            }
            Err(_) => {
                return TrustResult::failed("vision", "Vision review timed out").with_error(
                    "Timeout",
                    format!("no verdict within {:?}", self.verdict_timeout),
                    None,
                );
            }
        };

        let success = parse_yes_no(&response);
        let summary = if success {
            "Screenshot matches the expected appearance"
        } else {
            "Screenshot does not match the expected appearance"
        };

        TrustResult::new("vision", success, summary)
            .with_screenshot(screenshot.to_string_lossy(), "Captured program state")
            .with_report("Verdict", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_parsing() {
        assert!(parse_yes_no("YES - the button is green"));
        assert!(parse_yes_no("yes, looks right"));
        assert!(!parse_yes_no("NO - missing header"));
        assert!(!parse_yes_no("Maybe YES"));
        assert!(!parse_yes_no(""));
    }
}
