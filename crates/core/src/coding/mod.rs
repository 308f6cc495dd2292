pub mod aider;
pub mod subprocess;

pub use aider::AiderAgent;

use anyhow::Result;
use async_trait::async_trait;
use tac_config::Config;

use crate::error::CoreError;
use crate::protoblock::ProtoBlock;

#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    #[error("Coding agent failed: {0}")]
    Failed(String),

    #[error("Coding agent timed out: {0}")]
    Timeout(String),
}

/// Applies a protoblock to the working tree. Implementations edit exactly
/// the files in `write_files` and may read anything in `context_files`;
/// on retries they receive the previous attempt's failure analysis.
#[async_trait]
pub trait CodingAgent: Send {
    fn name(&self) -> &str;

    async fn run(
        &mut self,
        protoblock: &ProtoBlock,
        previous_analysis: Option<&str>,
    ) -> Result<(), CodingError>;
}

pub fn create_coding_agent(config: &Config) -> Result<Box<dyn CodingAgent>> {
    match config.general.coding_agent.as_str() {
        "aider" => Ok(Box::new(AiderAgent::new(config))),
        other => Err(CoreError::UnknownCodingAgent(other.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_knows_aider() {
        let config = Config::default();
        let agent = create_coding_agent(&config).unwrap();
        assert_eq!(agent.name(), "aider");
    }

    #[test]
    fn selector_rejects_unknown() {
        let mut config = Config::default();
        config.general.coding_agent = "imaginary".to_string();
        let err = match create_coding_agent(&config) {
            Err(e) => e,
            Ok(_) => panic!("expected create_coding_agent to fail"),
        };
        assert!(err.to_string().contains("imaginary"));
    }
}
