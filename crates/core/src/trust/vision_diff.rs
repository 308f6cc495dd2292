use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tac_config::{Config, LlmRole};
use tac_provider::{ImageData, LlmClient, Message};

use super::capture;
use super::{AgentSpec, PromptTarget, TrustAgent};
use crate::protoblock::ProtoBlock;
use crate::result::TrustResult;

const PASSING_STARS: f64 = 4.0;

pub fn spec() -> AgentSpec {
    AgentSpec {
        name: "vision_diff",
        description: "captures the program before and after the change, stitches both \
                      screenshots side by side, and asks a vision model to rate the visual \
                      change 0-5 stars; good for tasks described as visual modifications",
        protoblock_prompt: "Describe the visual changes expected between the before and after \
                            state: what should appear, disappear, move, or change color. The \
                            rating is comparative, so describe the delta rather than the final \
                            absolute appearance.",
        prompt_target: PromptTarget::TrustyAgent,
        mandatory: false,
    }
}

pub struct VisionDiffAgent {
    llm: LlmClient,
    root: PathBuf,
    screenshot_delay: u64,
    verdict_timeout: std::time::Duration,
    protoblock: Option<ProtoBlock>,
    before_screenshot: Option<PathBuf>,
}

impl VisionDiffAgent {
    pub fn from_config(config: &Config) -> Result<Self> {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self {
            llm: LlmClient::new(LlmRole::Vision, config)?,
            root,
            screenshot_delay: config.general.vision_screenshot_delay,
            verdict_timeout: std::time::Duration::from_secs(config.general.vision_timeout),
            protoblock: None,
            before_screenshot: None,
        })
    }

    pub fn new(llm: LlmClient, root: PathBuf, screenshot_delay: u64, timeout_secs: u64) -> Self {
        Self {
            llm,
            root,
            screenshot_delay,
            verdict_timeout: std::time::Duration::from_secs(timeout_secs),
            protoblock: None,
            before_screenshot: None,
        }
    }

    async fn capture_state(&self, protoblock: &ProtoBlock, suffix: &str) -> Result<PathBuf> {
        let path = self
            .root
            .join(format!(".tac_vision_{}_{suffix}.png", protoblock.block_id));
        let program = capture::select_program_file(protoblock, &self.root);
        let mut child = program.as_deref().and_then(capture::launch_program);

        capture::wait_for_render(self.screenshot_delay).await;
        let result = capture::capture_screenshot(&path).await;

        if let Some(child) = child.as_mut() {
            let _ = child.kill().await;
        }
        result
    }
}

#[async_trait]
impl TrustAgent for VisionDiffAgent {
    fn name(&self) -> &str {
        "vision_diff"
    }

    fn is_comparative(&self) -> bool {
        true
    }

    fn set_protoblock(&mut self, protoblock: &ProtoBlock) {
        self.protoblock = Some(protoblock.clone());
    }

    async fn capture_before_state(&mut self, protoblock: &ProtoBlock) -> Result<()> {
        let path = self.capture_state(protoblock, "before").await?;
        tracing::info!(path = %path.display(), "Captured before-state screenshot");
        self.before_screenshot = Some(path);
        Ok(())
    }

    async fn check(
        &mut self,
        protoblock: &ProtoBlock,
        _codebase: &str,
        _code_diff: &str,
    ) -> TrustResult {
        let Some(before) = self.before_screenshot.clone() else {
            return TrustResult::failed("vision_diff", "No before-state captured").with_error(
                "MissingBaseline",
                "capture_before_state was never called for this attempt",
                None,
            );
        };

        let after = match self.capture_state(protoblock, "after").await {
            Ok(path) => path,
            Err(e) => {
                return TrustResult::failed("vision_diff", "After-state capture failed")
                    .with_error("CaptureError", e.to_string(), None);
            }
        };

        let stitched = self
            .root
            .join(format!(".tac_vision_{}_stitched.png", protoblock.block_id));
        if let Err(e) = capture::stitch_side_by_side(&before, &after, &stitched) {
            return TrustResult::failed("vision_diff", "Image stitching failed").with_error(
                "StitchError",
                e.to_string(),
                None,
            );
        }

        let encoded = match capture::encode_png_base64(&stitched) {
            Ok(encoded) => encoded,
            Err(e) => {
                return TrustResult::failed("vision_diff", "Stitched image unreadable")
                    .with_error("CaptureError", e.to_string(), None);
            }
        };

        let expected_changes = protoblock
            .trusty_agent_prompts
            .get("vision_diff")
            .cloned()
            .unwrap_or_else(|| protoblock.task_description.clone());

        let prompt = format!(
            "The image shows two screenshots of the same program side by side, separated by a \
             thin black bar: BEFORE the change on the left, AFTER the change on the right.\n\n\
             Expected changes:\n{expected_changes}\n\n\
             Rate how well the after-state implements the expected changes.\n\
             Rating guide:\n\
             5.0 stars: perfect implementation of the expected changes\n\
             4.0 stars: good match with minor visual discrepancies\n\
             3.0 stars: acceptable but with noticeable issues\n\
             2.0 stars: significant issues\n\
             0.0-1.0 stars: expected changes are absent\n\n\
             Reply in exactly this format:\n\
             STAR RATING: [0.0-5.0]\n\
             ANALYSIS: what changed and how it compares to the expectation\n\
             IMPROVEMENTS: specific suggestions if the rating is below 4.0"
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
                return TrustResult::failed("vision_diff", "Vision review failed").with_error(
                    "LlmError",
                    e.to_string(),
                    None,
                );
            }
            Err(_) => {
                return TrustResult::failed("vision_diff", "Vision review timed out")
                    .with_error(
                        "Timeout",
                        format!("no verdict within {:?}", self.verdict_timeout),
                        None,
                    );
            }
        };

        let Some(stars) = capture::parse_star_rating(&response) else {
            return TrustResult::failed("vision_diff", "Verdict carried no star rating")
                .with_report("Verdict", response);
        };

        let band = capture::rating_band(stars);
        let success = stars >= PASSING_STARS;

        TrustResult::new(
            "vision_diff",
            success,
            format!("{stars:.1} stars - {band}"),
        )
        .with_grade(format!("{stars:.1}"), "0.0-5.0", band)
        .with_comparison(
            before.to_string_lossy(),
            after.to_string_lossy(),
            "Before and after the change",
        )
        .with_report("Verdict", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tac_provider::{ChatRequest, ChatResponse, Provider};
    use tempfile::TempDir;

    struct CannedProvider {
        response: String,
    }

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
            // The stitched screenshot must actually be attached.
            assert!(request.messages.iter().any(|m| m.content.has_images()));
            Ok(ChatResponse {
                content: self.response.clone(),
                usage: None,
                finish_reason: None,
            })
        }
    }

    fn agent(dir: &TempDir, response: &str) -> VisionDiffAgent {
        VisionDiffAgent::new(
            LlmClient::from_provider(
                Box::new(CannedProvider {
                    response: response.to_string(),
                }),
                "vision-model",
            ),
            dir.path().to_path_buf(),
            0,
            30,
        )
    }

    fn block() -> ProtoBlock {
        ProtoBlock::new(
            "abc123",
            "make the header blue",
            vec!["index.html".into()],
            vec![],
            vec!["vision_diff".into()],
            BTreeMap::new(),
            "tac/feature/blue-header",
            "msg",
        )
    }

    #[tokio::test]
    async fn high_rating_passes_with_band() {
        let dir = TempDir::new().unwrap();
        let mut agent = agent(&dir, "STAR RATING: 4.5\nANALYSIS: header is blue now");
        let block = block();

        agent.capture_before_state(&block).await.unwrap();
        let result = agent.check(&block, "", "").await;

        assert!(result.success);
        assert_eq!(result.grade(), Some("4.5"));
        assert!(result.summary.contains("Good - Minor visual discrepancies"));
    }

    #[tokio::test]
    async fn low_rating_fails_with_band() {
        let dir = TempDir::new().unwrap();
        let mut agent = agent(&dir, "STAR RATING: 3.0\nANALYSIS: barely changed");
        let block = block();

        agent.capture_before_state(&block).await.unwrap();
        let result = agent.check(&block, "", "").await;

        assert!(!result.success);
        assert!(result.summary.contains("Acceptable - Noticeable issues"));
    }

    #[tokio::test]
    async fn missing_before_state_fails() {
        let dir = TempDir::new().unwrap();
        let mut agent = agent(&dir, "STAR RATING: 5.0");
        let result = agent.check(&block(), "", "").await;
        assert!(!result.success);
        assert!(result.summary.contains("No before-state"));
    }

    #[tokio::test]
    async fn unparseable_rating_fails() {
        let dir = TempDir::new().unwrap();
        let mut agent = agent(&dir, "Looks fine to me!");
        let block = block();

        agent.capture_before_state(&block).await.unwrap();
        let result = agent.check(&block, "", "").await;
        assert!(!result.success);
        assert!(result.summary.contains("no star rating"));
    }
}
