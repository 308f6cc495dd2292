pub mod capture;
pub mod plausibility;
pub mod pytest;
pub mod registry;
pub mod vision;
pub mod vision_diff;

pub use registry::TrustRegistry;

use anyhow::Result;
use async_trait::async_trait;

use crate::protoblock::ProtoBlock;
use crate::result::TrustResult;

/// Where an agent's protoblock prompt is addressed: instructions for the
/// coding agent to follow while implementing, or instructions the trust
/// agent itself consumes while verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTarget {
    CodingAgent,
    TrustyAgent,
}

/// Declarative metadata describing a registered trust agent; everything
/// the planner needs to offer the agent to the LLM.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub protoblock_prompt: &'static str,
    pub prompt_target: PromptTarget,
    pub mandatory: bool,
}

/// A verifier plugged into the executor. `check` is called once per
/// attempt after the coding agent has run; comparative agents additionally
/// receive `capture_before_state` before any code changes.
///
/// `check` never returns Err: verification problems are expressed as a
/// failed [`TrustResult`] carrying an error component, so one broken agent
/// cannot take down the attempt loop.
#[async_trait]
pub trait TrustAgent: Send {
    fn name(&self) -> &str;

    async fn check(
        &mut self,
        protoblock: &ProtoBlock,
        codebase: &str,
        code_diff: &str,
    ) -> TrustResult;

    /// Lets a mandatory agent opt out of a run (e.g. pytest when the
    /// project has no test files). Returns (should_run, reason).
    fn should_run_mandatory(&self, _protoblock: &ProtoBlock, _codebase: &str) -> (bool, String) {
        (true, String::new())
    }

    /// Called before the coding agent for comparative agents that need a
    /// fair baseline of the unmodified program.
    async fn capture_before_state(&mut self, _protoblock: &ProtoBlock) -> Result<()> {
        Ok(())
    }

    /// Dependency injection prior to state capture.
    fn set_protoblock(&mut self, _protoblock: &ProtoBlock) {}

    /// True for agents that implement `capture_before_state`.
    fn is_comparative(&self) -> bool {
        false
    }
}
