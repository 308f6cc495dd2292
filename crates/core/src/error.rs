use serde::{Deserialize, Serialize};

/// Why an execution attempt failed. These are values carried in results and
/// logs, not exceptions: the processor inspects them to decide between
/// retrying and giving up, and their display strings are stable because they
/// appear in persisted execution logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The planner LLM output failed schema validation after all internal retries.
    PlannerValidation(String),
    /// The coding agent subprocess exited non-zero or raised.
    CodingAgent(String),
    /// The coding agent hit its total or no-output timeout.
    CodingAgentTimeout(String),
    /// A trust agent returned an unsuccessful result; carries the agent name.
    TrustAgent(String),
    /// The pytest agent reported failing tests. Short-circuits later agents.
    TestsFailed,
    /// A version-control operation failed. Usually advisory.
    SourceTree(String),
    /// The user cancelled interactively.
    UserAbort,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::PlannerValidation(msg) => {
                write!(f, "Protoblock generation failed: {msg}")
            }
            FailureKind::CodingAgent(_) => write!(f, "Exception during agent execution"),
            FailureKind::CodingAgentTimeout(_) => write!(f, "Coding agent timed out"),
            FailureKind::TrustAgent(name) => write!(f, "Trusty agent '{name}' failed"),
            FailureKind::TestsFailed => write!(f, "Unit tests failed"),
            FailureKind::SourceTree(msg) => write!(f, "Source tree operation failed: {msg}"),
            FailureKind::UserAbort => write!(f, "Execution interrupted"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Failed to create a valid protoblock after {attempts} attempts. Last error: {last_error}")]
    PlannerExhausted { attempts: u32, last_error: String },

    #[error("No coding agent registered under '{0}'")]
    UnknownCodingAgent(String),

    #[error("Unknown trusty agent '{0}'")]
    UnknownTrustAgent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tests_failed_display_is_stable() {
        assert_eq!(FailureKind::TestsFailed.to_string(), "Unit tests failed");
    }

    #[test]
    fn coding_agent_display_hides_detail() {
        let kind = FailureKind::CodingAgent("traceback...".to_string());
        assert_eq!(kind.to_string(), "Exception during agent execution");
    }

    #[test]
    fn round_trips_through_json() {
        let kind = FailureKind::TrustAgent("vision".to_string());
        let json = serde_json::to_string(&kind).unwrap();
        let back: FailureKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
