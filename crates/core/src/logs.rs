use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protoblock::ProtoBlock;

/// One attempt's entry in the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub protoblock: ProtoBlock,
    pub timestamp: String,
    pub attempt: u32,
    pub success: bool,
    pub git_diff: String,
    pub test_results: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogFile {
    config: serde_json::Value,
    executions: Vec<ExecutionRecord>,
}

/// Append-only JSON log, one file per block id under the `.tac_*`
/// artifact namespace.
pub struct ExecutionLog {
    path: PathBuf,
    config_snapshot: serde_json::Value,
}

impl ExecutionLog {
    pub fn new(project_root: &Path, block_id: &str, config: &tac_config::Config) -> Self {
        Self {
            path: project_root.join(format!(".tac_log_{block_id}")),
            config_snapshot: serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: ExecutionRecord) -> Result<()> {
        let mut file = if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            serde_json::from_str::<LogFile>(&content).unwrap_or(LogFile {
                config: self.config_snapshot.clone(),
                executions: Vec::new(),
            })
        } else {
            LogFile {
                config: self.config_snapshot.clone(),
                executions: Vec::new(),
            }
        };

        file.executions.push(record);
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str::<LogFile>(&content).ok())
            .map(|file| file.executions.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block() -> ProtoBlock {
        ProtoBlock::new(
            "abc123",
            "task",
            vec!["a.py".into()],
            vec![],
            vec![],
            Default::default(),
            "tac/feature/x",
            "msg",
        )
    }

    fn record(attempt: u32, success: bool) -> ExecutionRecord {
        ExecutionRecord {
            protoblock: block(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            attempt,
            success,
            git_diff: "diff".to_string(),
            test_results: "1 passed".to_string(),
            message: "done".to_string(),
            failure_analysis: None,
        }
    }

    #[test]
    fn appends_under_artifact_namespace() {
        let dir = TempDir::new().unwrap();
        let config = tac_config::Config::default();
        let log = ExecutionLog::new(dir.path(), "abc123", &config);

        log.append(record(1, false)).unwrap();
        log.append(record(2, true)).unwrap();

        assert!(log
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".tac_log_"));
        assert_eq!(log.record_count(), 2);

        let content = std::fs::read_to_string(log.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert!(value.get("config").is_some());
        assert_eq!(value["executions"][1]["attempt"], 2);
        assert_eq!(value["executions"][1]["success"], true);
    }
}
