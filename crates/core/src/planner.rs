use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tac_config::{Config, GeneralConfig, LlmRole};
use tac_provider::{strip_code_fences, LlmClient, Message};

use crate::error::CoreError;
use crate::fsutil;
use crate::protoblock::{ensure_mandatory_agents, namespaced_branch_name, ProtoBlock};
use crate::trust::TrustRegistry;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Turns task instructions plus a codebase digest into a validated
/// ProtoBlock via the strong LLM. Validation failures are retried
/// internally up to `max_retries_protoblock_creation`.
pub struct Planner {
    llm: LlmClient,
    general: GeneralConfig,
}

impl Planner {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            llm: LlmClient::new(LlmRole::Strong, config)?,
            general: config.general.clone(),
        })
    }

    pub fn new(llm: LlmClient, general: GeneralConfig) -> Self {
        Self { llm, general }
    }

    pub fn genesis_prompt(
        &self,
        codebase: &str,
        task_instructions: &str,
        registry: &TrustRegistry,
    ) -> String {
        let agents_section = registry.prompt_section();
        let agent_prompts = registry.agent_prompts();
        let agent_output_sections = registry.output_format_sections();
        let test_path = &self.general.test_path;
        let test_pattern = &self.general.test_file_pattern;

        format!(
            "<purpose>\nYou are a senior software engineer updating a codebase. You precisely \
             formulate instructions for a junior engineer who implements the final code. You \
             have the <codebase> and the <task_instructions>. Follow <planning_rules> and \
             reply strictly in the JSON <output_format>.\n</purpose>\n\n\
             <codebase>\n{codebase}\n</codebase>\n\n\
             <task_instructions>\n{task_instructions}\n</task_instructions>\n\n\
             <planning_rules>\n\
             - Plan on the GOAL level; do not spell out exact implementation details.\n\
             - context_files: every file that must be read for context. Use relative paths as \
               given in the codebase. Provide enough context!\n\
             - write_files: every file that may need write access, including test files. Test \
               files live directly in {test_path}/ and match {test_pattern}; never nest them \
               deeper. If a similar test exists, write into that same file.\n\
             - Choose the trusty agents that verify the change; several is good.\n\
             {agents_section}\n\
             </planning_rules>\n\n\
             <output_format>\n\
             {{\n\
                 \"task\": \"...\",\n\
                 \"write_files\": [\"...\"],\n\
                 \"context_files\": [\"...\"],\n\
                 \"commit_message\": \"...\",\n\
                 \"branch_name\": \"tac/feature/...\",\n\
                 \"trusty_agents\": [\"...\"],\n\
                 \"trusty_agent_prompts\": {{\n{agent_output_sections}\n    }}\n\
             }}\n\
             </output_format>\n\n\
             How to fill trusty_agent_prompts, per agent:\n{agent_prompts}"
        )
    }

    /// Parse with two attempts: raw, then code-fence-stripped.
    fn parse_response(response: &str) -> Result<Value> {
        if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
            return Ok(value);
        }
        let stripped = strip_code_fences(response);
        serde_json::from_str::<Value>(stripped).map_err(|e| {
            let preview: String = response.chars().take(200).collect();
            anyhow::anyhow!("Failed to parse JSON: {e}\nResponse preview: {preview}")
        })
    }

    pub async fn create_protoblock(
        &self,
        task_instructions: &str,
        codebase: &str,
        registry: &TrustRegistry,
        project_root: &Path,
    ) -> Result<ProtoBlock> {
        let genesis_prompt = self.genesis_prompt(codebase, task_instructions, registry);
        let messages = vec![
            Message::system(
                "You are a coding assistant. Output must be a single valid JSON object with \
                 keys: 'task', 'write_files', 'context_files', 'commit_message', \
                 'branch_name', 'trusty_agents', 'trusty_agent_prompts'. No markdown, no \
                 code fences. Keep it short and strictly formatted.",
            ),
            Message::user(genesis_prompt),
        ];

        let max_retries = self.general.max_retries_protoblock_creation;
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            tracing::info!(attempt, max_retries, "Attempting protoblock creation");

            let outcome = async {
                let response = self.llm.chat_completion(messages.clone()).await?;
                anyhow::ensure!(!response.trim().is_empty(), "Received empty response from LLM");
                let data = Self::parse_response(&response)?;
                validate_plan(&data, registry, &self.general, project_root)
            }
            .await;

            match outcome {
                Ok(fields) => {
                    let block = fields.into_protoblock(ProtoBlock::generate_block_id());
                    tracing::info!(
                        block_id = %block.block_id,
                        write_files = ?block.write_files,
                        trusty_agents = ?block.trusty_agents,
                        "Protoblock created"
                    );
                    return Ok(block);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %last_error, "Protoblock creation failed");
                    if attempt < max_retries {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        Err(CoreError::PlannerExhausted {
            attempts: max_retries,
            last_error,
        }
        .into())
    }
}

/// Everything validate_plan produces; turned into a ProtoBlock once a
/// block id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFields {
    pub task_description: String,
    pub write_files: Vec<String>,
    pub context_files: Vec<String>,
    pub commit_message: String,
    pub branch_name: String,
    pub trusty_agents: Vec<String>,
    pub trusty_agent_prompts: BTreeMap<String, String>,
}

impl PlanFields {
    pub fn into_protoblock(self, block_id: String) -> ProtoBlock {
        ProtoBlock::new(
            block_id,
            self.task_description,
            self.write_files,
            self.context_files,
            self.trusty_agents,
            self.trusty_agent_prompts,
            self.branch_name,
            self.commit_message,
        )
    }
}

/// Schema validation for the planner LLM's JSON. Returns a descriptive
/// error on the first violation so the retry prompt carries a cause.
pub fn validate_plan(
    data: &Value,
    registry: &TrustRegistry,
    general: &GeneralConfig,
    project_root: &Path,
) -> Result<PlanFields> {
    let obj = data
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("JSON content must be an object"))?;

    // `task` is either a plain string or {"specification": "..."}.
    let task_description = match obj.get("task") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Object(task)) => task
            .get("specification")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("task.specification missing or empty"))?,
        _ => anyhow::bail!("Missing required key: task"),
    };

    let write_files = path_list(obj.get("write_files"), "write_files", project_root)?;
    anyhow::ensure!(!write_files.is_empty(), "write_files must not be empty");
    let empty_list = Value::Array(Vec::new());
    let context_files = path_list(
        Some(obj.get("context_files").unwrap_or(&empty_list)),
        "context_files",
        project_root,
    )?;

    for file in write_files.iter().chain(context_files.iter()) {
        check_test_layout(file, &general.test_path, &general.test_file_pattern)?;
    }

    let trusty_agents = match obj.get("trusty_agents") {
        Some(Value::Array(items)) => {
            let mut agents = Vec::new();
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("All items in trusty_agents must be strings"))?;
                anyhow::ensure!(
                    registry.contains(name),
                    "Unknown trusty agent '{name}'; available: {:?}",
                    registry.names()
                );
                agents.push(name.to_string());
            }
            agents
        }
        None => general.default_trusty_agents.clone(),
        Some(_) => anyhow::bail!("trusty_agents must be a list"),
    };
    let trusty_agents = ensure_mandatory_agents(trusty_agents);

    let trusty_agent_prompts = match obj.get("trusty_agent_prompts") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    };

    let commit_message = obj
        .get("commit_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Update");
    let commit_message = if commit_message.starts_with("tac:") {
        commit_message.to_string()
    } else {
        format!("tac: {commit_message}")
    };

    let branch_name = namespaced_branch_name(
        obj.get("branch_name").and_then(Value::as_str),
        &task_description,
    );

    Ok(PlanFields {
        task_description,
        write_files,
        context_files,
        commit_message,
        branch_name,
        trusty_agents,
        trusty_agent_prompts,
    })
}

fn path_list(value: Option<&Value>, key: &str, project_root: &Path) -> Result<Vec<String>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(_) => anyhow::bail!("{key} must be a list"),
        None => anyhow::bail!("Missing required key: {key}"),
    };
    let mut paths = Vec::new();
    for item in items {
        let raw = item
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("All items in {key} must be strings"))?;
        anyhow::ensure!(
            !raw.trim().is_empty(),
            "Empty or whitespace-only items not allowed in {key}"
        );
        paths.push(fsutil::relativize(raw, project_root)?);
    }
    Ok(paths)
}

/// Files under the test root must match the configured pattern and sit
/// directly under it, never nested deeper.
fn check_test_layout(file: &str, test_path: &str, test_file_pattern: &str) -> Result<()> {
    let Some(rest) = file.strip_prefix(&format!("{test_path}/")) else {
        return Ok(());
    };
    anyhow::ensure!(
        !rest.contains('/'),
        "Files in {test_path}/ must sit directly in {test_path}/ (no subfolders), found: {file}"
    );
    let pattern = glob::Pattern::new(test_file_pattern)
        .map_err(|e| anyhow::anyhow!("Invalid test_file_pattern '{test_file_pattern}': {e}"))?;
    anyhow::ensure!(
        pattern.matches(rest),
        "Files in {test_path}/ must match '{test_file_pattern}', found: {file}"
    );
    Ok(())
}
