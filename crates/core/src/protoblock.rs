use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::result::TrustResult;

/// Branch namespace reserved for automated changes.
pub const BRANCH_PREFIX: &str = "tac/";

/// Names that are present on every protoblock, whatever the planner chose.
pub const MANDATORY_AGENTS: &[&str] = &["pytest", "plausibility"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualMetadata {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub visual_description: Option<String>,
}

/// The contract between planning and execution: everything a coding agent
/// and the trust agents need to implement and judge one change attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoBlock {
    pub block_id: String,
    pub task_description: String,
    pub write_files: Vec<String>,
    pub context_files: Vec<String>,
    pub trusty_agents: Vec<String>,
    #[serde(default)]
    pub trusty_agent_prompts: BTreeMap<String, String>,
    pub branch_name: String,
    pub commit_message: String,
    #[serde(default)]
    pub attempt_number: u32,
    #[serde(default)]
    pub trusty_agent_results: BTreeMap<String, TrustResult>,
    #[serde(default)]
    pub visual_metadata: VisualMetadata,
}

impl ProtoBlock {
    /// Build a protoblock, enforcing the structural invariants:
    /// deduplicated `write_files`, `context_files` disjoint from them, and
    /// pytest + plausibility always present in `trusty_agents`.
    pub fn new(
        block_id: impl Into<String>,
        task_description: impl Into<String>,
        write_files: Vec<String>,
        context_files: Vec<String>,
        trusty_agents: Vec<String>,
        trusty_agent_prompts: BTreeMap<String, String>,
        branch_name: impl Into<String>,
        commit_message: impl Into<String>,
    ) -> Self {
        let write_files = dedup_preserving_order(write_files);
        let context_files = dedup_preserving_order(context_files)
            .into_iter()
            .filter(|f| !write_files.contains(f))
            .collect();

        Self {
            block_id: block_id.into(),
            task_description: task_description.into(),
            write_files,
            context_files,
            trusty_agents: ensure_mandatory_agents(trusty_agents),
            trusty_agent_prompts,
            branch_name: branch_name.into(),
            commit_message: commit_message.into(),
            attempt_number: 0,
            trusty_agent_results: BTreeMap::new(),
            visual_metadata: VisualMetadata::default(),
        }
    }

    pub fn generate_block_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
    }

    pub fn storage_filename(block_id: &str) -> String {
        format!(".tac_protoblock_{block_id}.json")
    }

    /// Append this protoblock as a new version to its on-disk file,
    /// creating the file if needed. Legacy single-version files are
    /// upgraded to the versioned layout in place.
    pub fn save(&self, project_root: &Path) -> Result<std::path::PathBuf> {
        let path = project_root.join(Self::storage_filename(&self.block_id));

        let mut file = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_block_file(&content, &self.block_id)?
        } else {
            BlockFile {
                block_id: self.block_id.clone(),
                versions: Vec::new(),
            }
        };

        file.versions.push(VersionRecord::from_block(self));
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Load the latest persisted version of a block.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let block_id = block_id_from_filename(path).unwrap_or_default();
        let file = parse_block_file(&content, &block_id)?;
        let latest = file
            .versions
            .last()
            .context("Protoblock file contains no versions")?;
        Ok(latest.to_block(&file.block_id))
    }

    pub fn version_count(path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let block_id = block_id_from_filename(path).unwrap_or_default();
        Ok(parse_block_file(&content, &block_id)?.versions.len())
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.trim().is_empty() && seen.insert(item.clone()))
        .collect()
}

pub fn ensure_mandatory_agents(mut agents: Vec<String>) -> Vec<String> {
    for mandatory in MANDATORY_AGENTS {
        if !agents.iter().any(|a| a == mandatory) {
            agents.push(mandatory.to_string());
        }
    }
    agents
}

/// Synthesize a namespaced branch name from task words when the planner
/// omitted one or ignored the prefix rule.
pub fn namespaced_branch_name(candidate: Option<&str>, task: &str) -> String {
    if let Some(name) = candidate {
        let name = name.trim();
        if name.starts_with(BRANCH_PREFIX) && name.len() > BRANCH_PREFIX.len() {
            return name.to_string();
        }
        if !name.is_empty() {
            return format!("{BRANCH_PREFIX}{}", slugify(name));
        }
    }
    let slug = slugify(task);
    if slug.is_empty() {
        format!("{BRANCH_PREFIX}feature/change")
    } else {
        format!("{BRANCH_PREFIX}feature/{slug}")
    }
}

fn slugify(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(6)
        .map(|w| w.to_lowercase())
        .collect();
    words.join("-")
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockFile {
    block_id: String,
    versions: Vec<VersionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    task_description: String,
    write_files: Vec<String>,
    context_files: Vec<String>,
    commit_message: String,
    branch_name: String,
    trusty_agents: Vec<String>,
    #[serde(default)]
    trusty_agent_prompts: BTreeMap<String, String>,
    #[serde(default)]
    attempt_number: u32,
    timestamp: String,
    #[serde(default)]
    visual_metadata: VisualMetadata,
}

impl VersionRecord {
    fn from_block(block: &ProtoBlock) -> Self {
        Self {
            task_description: block.task_description.clone(),
            write_files: block.write_files.clone(),
            context_files: block.context_files.clone(),
            commit_message: block.commit_message.clone(),
            branch_name: block.branch_name.clone(),
            trusty_agents: block.trusty_agents.clone(),
            trusty_agent_prompts: block.trusty_agent_prompts.clone(),
            attempt_number: block.attempt_number,
            timestamp: chrono::Utc::now().to_rfc3339(),
            visual_metadata: block.visual_metadata.clone(),
        }
    }

    fn to_block(&self, block_id: &str) -> ProtoBlock {
        let mut block = ProtoBlock::new(
            block_id,
            self.task_description.clone(),
            self.write_files.clone(),
            self.context_files.clone(),
            self.trusty_agents.clone(),
            self.trusty_agent_prompts.clone(),
            self.branch_name.clone(),
            self.commit_message.clone(),
        );
        block.attempt_number = self.attempt_number;
        block.visual_metadata = self.visual_metadata.clone();
        block
    }
}

fn parse_block_file(content: &str, fallback_block_id: &str) -> Result<BlockFile> {
    if let Ok(file) = serde_json::from_str::<BlockFile>(content) {
        if !file.versions.is_empty() {
            return Ok(file);
        }
    }
    // Legacy layout: the file is a single bare version.
    let version: VersionRecord =
        serde_json::from_str(content).context("Protoblock file is neither versioned nor legacy")?;
    Ok(BlockFile {
        block_id: fallback_block_id.to_string(),
        versions: vec![version],
    })
}

fn block_id_from_filename(path: &Path) -> Option<String> {
    path.file_name()?
        .to_str()?
        .strip_prefix(".tac_protoblock_")?
        .strip_suffix(".json")
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_block(id: &str) -> ProtoBlock {
        ProtoBlock::new(
            id,
            "rename foo to foo_v2",
            vec!["lib/core/util.py".into(), "tests/test_util.py".into()],
            vec!["lib/core/mod.py".into()],
            vec!["pytest".into(), "plausibility".into()],
            BTreeMap::new(),
            "tac/feature/rename-foo",
            "tac: rename foo",
        )
    }

    #[test]
    fn mandatory_agents_added_when_omitted() {
        let block = ProtoBlock::new(
            "abc123",
            "task",
            vec!["a.py".into()],
            vec![],
            vec!["vision".into()],
            BTreeMap::new(),
            "tac/feature/x",
            "msg",
        );
        assert!(block.trusty_agents.contains(&"pytest".to_string()));
        assert!(block.trusty_agents.contains(&"plausibility".to_string()));
        assert_eq!(block.trusty_agents[0], "vision");
    }

    #[test]
    fn context_files_disjoint_from_write_files() {
        let block = ProtoBlock::new(
            "abc123",
            "task",
            vec!["a.py".into(), "a.py".into(), "b.py".into()],
            vec!["a.py".into(), "c.py".into()],
            vec![],
            BTreeMap::new(),
            "tac/feature/x",
            "msg",
        );
        assert_eq!(block.write_files, vec!["a.py", "b.py"]);
        assert_eq!(block.context_files, vec!["c.py"]);
    }

    #[test]
    fn versioned_save_appends() {
        let dir = TempDir::new().unwrap();
        let block = sample_block("abc123");
        let path = block.save(dir.path()).unwrap();
        assert_eq!(ProtoBlock::version_count(&path).unwrap(), 1);

        let mut retry = block.clone();
        retry.attempt_number = 2;
        retry.task_description = "second try".to_string();
        retry.save(dir.path()).unwrap();

        assert_eq!(ProtoBlock::version_count(&path).unwrap(), 2);
        let loaded = ProtoBlock::load(&path).unwrap();
        assert_eq!(loaded.task_description, "second try");
        assert_eq!(loaded.block_id, "abc123");
        assert_eq!(loaded.branch_name, block.branch_name);
    }

    #[test]
    fn legacy_single_version_file_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".tac_protoblock_ffff00.json");
        let legacy = serde_json::json!({
            "task_description": "old task",
            "write_files": ["x.py"],
            "context_files": [],
            "commit_message": "tac: old",
            "branch_name": "tac/feature/old",
            "trusty_agents": ["pytest", "plausibility"],
            "timestamp": "2024-01-01T00:00:00Z"
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let loaded = ProtoBlock::load(&path).unwrap();
        assert_eq!(loaded.block_id, "ffff00");
        assert_eq!(loaded.task_description, "old task");

        // Saving after loading upgrades to the versioned layout.
        loaded.save(dir.path()).unwrap();
        assert_eq!(ProtoBlock::version_count(&path).unwrap(), 2);
    }

    #[test]
    fn branch_synthesis_prefixes_and_slugs() {
        assert_eq!(
            namespaced_branch_name(Some("tac/feature/login"), "x"),
            "tac/feature/login"
        );
        assert_eq!(
            namespaced_branch_name(Some("fix login"), "x"),
            "tac/fix-login"
        );
        let synthesized = namespaced_branch_name(None, "Add user authentication to the API");
        assert_eq!(synthesized, "tac/feature/add-user-authentication-to-the-api");
        assert!(namespaced_branch_name(None, "").starts_with(BRANCH_PREFIX));
    }

    #[test]
    fn block_id_generation_is_short_and_unique() {
        let a = ProtoBlock::generate_block_id();
        let b = ProtoBlock::generate_block_id();
        assert_eq!(a.len(), 6);
        assert_ne!(a, b);
    }
}
