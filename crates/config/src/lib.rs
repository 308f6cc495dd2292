use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_coding_agent() -> String {
    "aider".to_string()
}

fn default_trusty_agents() -> Vec<String> {
    vec!["pytest".to_string(), "plausibility".to_string()]
}

fn default_summarizer_timeout() -> u64 {
    30
}

fn default_max_retries_block_creation() -> u32 {
    3
}

fn default_max_retries_protoblock_creation() -> u32 {
    4
}

fn default_test_path() -> String {
    "tests".to_string()
}

fn default_test_file_pattern() -> String {
    "test_*.py".to_string()
}

fn default_vision_timeout() -> u64 {
    25
}

fn default_vision_screenshot_delay() -> u64 {
    5
}

fn default_agent_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustyAgentsConfig {
    #[serde(default = "default_true")]
    pub exclude_performance_tests: bool,
}

impl Default for TrustyAgentsConfig {
    fn default() -> Self {
        Self {
            exclude_performance_tests: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_coding_agent")]
    pub coding_agent: String,
    #[serde(default = "default_trusty_agents")]
    pub default_trusty_agents: Vec<String>,
    #[serde(default)]
    pub use_file_summaries: bool,
    #[serde(default = "default_summarizer_timeout")]
    pub summarizer_timeout: u64,
    #[serde(default = "default_max_retries_block_creation")]
    pub max_retries_block_creation: u32,
    #[serde(default = "default_max_retries_protoblock_creation")]
    pub max_retries_protoblock_creation: u32,
    #[serde(default)]
    pub halt_after_fail: bool,
    #[serde(default)]
    pub halt_after_verify: bool,
    #[serde(default)]
    pub confirm_multiblock_execution: bool,
    #[serde(default = "default_true")]
    pub run_error_analysis: bool,
    #[serde(default = "default_true")]
    pub save_protoblock: bool,
    #[serde(default = "default_test_path")]
    pub test_path: String,
    #[serde(default = "default_test_file_pattern")]
    pub test_file_pattern: String,
    #[serde(default)]
    pub trusty_agents: TrustyAgentsConfig,
    #[serde(default = "default_vision_timeout")]
    pub vision_timeout: u64,
    #[serde(default = "default_vision_screenshot_delay")]
    pub vision_screenshot_delay: u64,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            coding_agent: default_coding_agent(),
            default_trusty_agents: default_trusty_agents(),
            use_file_summaries: false,
            summarizer_timeout: default_summarizer_timeout(),
            max_retries_block_creation: default_max_retries_block_creation(),
            max_retries_protoblock_creation: default_max_retries_protoblock_creation(),
            halt_after_fail: false,
            halt_after_verify: false,
            confirm_multiblock_execution: false,
            run_error_analysis: true,
            save_protoblock: true,
            test_path: default_test_path(),
            test_file_pattern: default_test_file_pattern(),
            trusty_agents: TrustyAgentsConfig::default(),
            vision_timeout: default_vision_timeout(),
            vision_screenshot_delay: default_vision_screenshot_delay(),
            agent_timeout: default_agent_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_commit_if_success: bool,
    #[serde(default)]
    pub auto_push_if_success: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_commit_if_success: false,
            auto_push_if_success: false,
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            timeout: default_llm_timeout(),
            max_tokens: None,
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub settings: LlmSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            settings: LlmSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub llm_strong: LlmConfig,
    #[serde(default)]
    pub llm_weak: LlmConfig,
    #[serde(default)]
    pub llm_vision: LlmConfig,
}

impl Config {
    /// Load configuration, preferring a project-local `tac.toml` over the
    /// user-level config file. Missing files fall back to defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let project_path = project_root.join("tac.toml");
        if project_path.exists() {
            let content = std::fs::read_to_string(&project_path)
                .context("Failed to read project config file")?;
            return toml::from_str(&content).context("Failed to parse project config file");
        }

        let path = Self::config_path();
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tac")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("tac.toml")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        std::fs::create_dir_all(Self::config_dir())?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `section.key=value` overrides. Only used at startup, before the
    /// config snapshot is shared; unknown keys are reported as errors so a
    /// typo on the command line does not silently do nothing.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<()> {
        for (key, value) in overrides {
            self.apply_override(key, value)
                .with_context(|| format!("Invalid config override '{key}={value}'"))?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        let parse_bool = |v: &str| -> Result<bool> {
            v.parse::<bool>()
                .map_err(|_| anyhow::anyhow!("expected true/false, got '{v}'"))
        };
        let parse_u32 = |v: &str| -> Result<u32> {
            v.parse::<u32>()
                .map_err(|_| anyhow::anyhow!("expected an integer, got '{v}'"))
        };
        let parse_u64 = |v: &str| -> Result<u64> {
            v.parse::<u64>()
                .map_err(|_| anyhow::anyhow!("expected an integer, got '{v}'"))
        };

        match key {
            "general.coding_agent" => self.general.coding_agent = value.to_string(),
            "general.use_file_summaries" => self.general.use_file_summaries = parse_bool(value)?,
            "general.max_retries_block_creation" => {
                let n = parse_u32(value)?;
                anyhow::ensure!(n >= 1, "must be at least 1");
                self.general.max_retries_block_creation = n;
            }
            "general.max_retries_protoblock_creation" => {
                let n = parse_u32(value)?;
                anyhow::ensure!(n >= 1, "must be at least 1");
                self.general.max_retries_protoblock_creation = n;
            }
            "general.halt_after_fail" => self.general.halt_after_fail = parse_bool(value)?,
            "general.halt_after_verify" => self.general.halt_after_verify = parse_bool(value)?,
            "general.confirm_multiblock_execution" => {
                self.general.confirm_multiblock_execution = parse_bool(value)?
            }
            "general.run_error_analysis" => self.general.run_error_analysis = parse_bool(value)?,
            "general.save_protoblock" => self.general.save_protoblock = parse_bool(value)?,
            "general.test_path" => self.general.test_path = value.to_string(),
            "general.test_file_pattern" => self.general.test_file_pattern = value.to_string(),
            "general.trusty_agents.exclude_performance_tests" => {
                self.general.trusty_agents.exclude_performance_tests = parse_bool(value)?
            }
            "general.vision_timeout" => self.general.vision_timeout = parse_u64(value)?,
            "general.vision_screenshot_delay" => {
                self.general.vision_screenshot_delay = parse_u64(value)?
            }
            "general.agent_timeout" => self.general.agent_timeout = parse_u64(value)?,
            "git.enabled" => self.git.enabled = parse_bool(value)?,
            "git.auto_commit_if_success" => self.git.auto_commit_if_success = parse_bool(value)?,
            "git.auto_push_if_success" => self.git.auto_push_if_success = parse_bool(value)?,
            _ => anyhow::bail!("unknown config key"),
        }
        Ok(())
    }

    pub fn llm(&self, role: LlmRole) -> &LlmConfig {
        match role {
            LlmRole::Strong => &self.llm_strong,
            LlmRole::Weak => &self.llm_weak,
            LlmRole::Vision => &self.llm_vision,
        }
    }
}

/// Capability tier an LLM call is routed through. Planning and error
/// analysis use `Strong`, file summaries use `Weak`, screenshot review
/// uses `Vision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    Strong,
    Weak,
    Vision,
}

impl std::fmt::Display for LlmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmRole::Strong => write!(f, "strong"),
            LlmRole::Weak => write!(f, "weak"),
            LlmRole::Vision => write!(f, "vision"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.general.coding_agent, "aider");
        assert_eq!(
            config.general.default_trusty_agents,
            vec!["pytest", "plausibility"]
        );
        assert!(config.git.enabled);
        assert!(!config.git.auto_push_if_success);
        assert_eq!(config.general.test_path, "tests");
        assert_eq!(config.general.test_file_pattern, "test_*.py");
        assert_eq!(config.general.agent_timeout, 600);
        assert!(config.general.max_retries_block_creation >= 1);
        assert!(config.general.max_retries_protoblock_creation >= 1);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [general]
            max_retries_block_creation = 5

            [git]
            enabled = false

            [llm_strong]
            provider = "anthropic"
            model = "claude-sonnet-4-20250514"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.max_retries_block_creation, 5);
        assert!(!config.git.enabled);
        assert_eq!(config.llm_strong.provider, "anthropic");
        // Untouched sections keep defaults.
        assert!(config.general.run_error_analysis);
        assert_eq!(config.llm_weak.provider, "openai");
    }

    #[test]
    fn override_known_keys() {
        let mut config = Config::default();
        config
            .apply_overrides(&[
                ("git.enabled".to_string(), "false".to_string()),
                ("general.halt_after_fail".to_string(), "true".to_string()),
                (
                    "general.max_retries_block_creation".to_string(),
                    "7".to_string(),
                ),
                (
                    "general.trusty_agents.exclude_performance_tests".to_string(),
                    "false".to_string(),
                ),
            ])
            .unwrap();
        assert!(!config.git.enabled);
        assert!(config.general.halt_after_fail);
        assert_eq!(config.general.max_retries_block_creation, 7);
        assert!(!config.general.trusty_agents.exclude_performance_tests);
    }

    #[test]
    fn override_rejects_unknown_key() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(&[("general.no_such_key".to_string(), "1".to_string())])
            .unwrap_err();
        assert!(err.to_string().contains("no_such_key"));
    }

    #[test]
    fn override_rejects_zero_retries() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(&[(
                "general.max_retries_block_creation".to_string(),
                "0".to_string()
            )])
            .is_err());
    }

    #[test]
    fn llm_role_lookup() {
        let mut config = Config::default();
        config.llm_vision.model = "gpt-4o-vision".to_string();
        assert_eq!(config.llm(LlmRole::Vision).model, "gpt-4o-vision");
        assert_eq!(config.llm(LlmRole::Strong).model, config.llm_strong.model);
    }
}
