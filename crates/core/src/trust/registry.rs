use std::collections::BTreeMap;

use anyhow::Result;
use tac_config::Config;

use super::{AgentSpec, PromptTarget, TrustAgent};
use crate::error::CoreError;

type AgentConstructor = Box<dyn Fn(&Config) -> Result<Box<dyn TrustAgent>> + Send + Sync>;

struct RegistryEntry {
    spec: AgentSpec,
    constructor: AgentConstructor,
}

/// Process-wide catalogue of trust agents, built explicitly during startup
/// and read-only afterwards. Agents are referenced by string name in
/// protoblocks; the planner validates names against this registry so the
/// executor never meets an unknown agent.
#[derive(Default)]
pub struct TrustRegistry {
    entries: Vec<RegistryEntry>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in agents, in their canonical order.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(super::pytest::spec(), |config| {
            Ok(Box::new(super::pytest::PytestAgent::new(config)))
        });
        registry.register(super::plausibility::spec(), |config| {
            Ok(Box::new(super::plausibility::PlausibilityAgent::from_config(
                config,
            )?))
        });
        registry.register(super::vision::spec(), |config| {
            Ok(Box::new(super::vision::VisionAgent::from_config(config)?))
        });
        registry.register(super::vision_diff::spec(), |config| {
            Ok(Box::new(super::vision_diff::VisionDiffAgent::from_config(
                config,
            )?))
        });
        registry
    }

    /// Register an agent. A second registration under the same name is a
    /// logged no-op; the first entry stays active.
    pub fn register<F>(&mut self, spec: AgentSpec, constructor: F)
    where
        F: Fn(&Config) -> Result<Box<dyn TrustAgent>> + Send + Sync + 'static,
    {
        if self.contains(spec.name) {
            tracing::warn!(agent = spec.name, "Agent already registered, ignoring");
            return;
        }
        self.entries.push(RegistryEntry {
            spec,
            constructor: Box::new(constructor),
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.spec.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.spec.name).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&AgentSpec> {
        self.entries
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| &e.spec)
    }

    pub fn create(&self, name: &str, config: &Config) -> Result<Box<dyn TrustAgent>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.spec.name == name)
            .ok_or_else(|| CoreError::UnknownTrustAgent(name.to_string()))?;
        (entry.constructor)(config)
    }

    pub fn descriptions(&self) -> BTreeMap<&'static str, &'static str> {
        self.entries
            .iter()
            .map(|e| (e.spec.name, e.spec.description))
            .collect()
    }

    /// One paragraph per agent for the planner's "available trusty agents"
    /// prompt section.
    pub fn prompt_section(&self) -> String {
        let mut lines = vec![format!(
            "Available trusty agents: [{}]",
            self.names().join(", ")
        )];
        for entry in &self.entries {
            lines.push(format!("- {}: {}", entry.spec.name, entry.spec.description));
        }
        lines.join("\n")
    }

    /// Per-agent guidance for filling `trusty_agent_prompts` in the
    /// planner's output format.
    pub fn agent_prompts(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                let target = match e.spec.prompt_target {
                    PromptTarget::CodingAgent => "addressed to the coding agent",
                    PromptTarget::TrustyAgent => "addressed to the trusty agent",
                };
                format!(
                    "### {} ({target})\n{}",
                    e.spec.name, e.spec.protoblock_prompt
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Skeleton entries for the JSON output format shown to the planner
    /// LLM.
    pub fn output_format_sections(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("        \"{}\": \"...\"", e.spec.name))
            .collect::<Vec<_>>()
            .join(",\n")
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::protoblock::ProtoBlock;
    use crate::result::TrustResult;
    use crate::trust::TrustAgent;

    /// Scripted agent for executor/processor tests: records calls, returns
    /// a canned verdict.
    pub struct ScriptedAgent {
        pub name: String,
        pub succeed: bool,
        pub runs: Arc<Mutex<Vec<String>>>,
        pub skip: bool,
        pub comparative: bool,
        pub captured_before: Arc<Mutex<bool>>,
    }

    impl ScriptedAgent {
        pub fn new(name: &str, succeed: bool, runs: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                succeed,
                runs,
                skip: false,
                comparative: false,
                captured_before: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl TrustAgent for ScriptedAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(
            &mut self,
            _protoblock: &ProtoBlock,
            _codebase: &str,
            _code_diff: &str,
        ) -> TrustResult {
            self.runs.lock().unwrap().push(self.name.clone());
            TrustResult::new(self.name.clone(), self.succeed, "scripted")
        }

        fn should_run_mandatory(&self, _p: &ProtoBlock, _c: &str) -> (bool, String) {
            if self.skip {
                (false, "scripted skip".to_string())
            } else {
                (true, String::new())
            }
        }

        async fn capture_before_state(&mut self, _p: &ProtoBlock) -> anyhow::Result<()> {
            *self.captured_before.lock().unwrap() = true;
            self.runs.lock().unwrap().push(format!("{}:capture", self.name));
            Ok(())
        }

        fn is_comparative(&self) -> bool {
            self.comparative
        }
    }
}
