use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tac_provider::{LlmClient, Message};

use crate::fsutil;

const MAX_FILE_CHARS: usize = 20_000;
const SUMMARY_CACHE_FILE: &str = ".tac_summaries.json";

fn truncated_body(content: String) -> String {
    if content.len() <= MAX_FILE_CHARS {
        return content;
    }
    let mut end = MAX_FILE_CHARS;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &content[..end])
}

/// Produce the raw textual digest of the codebase: every code-relevant
/// file with a path header and its (possibly truncated) content.
pub fn gather_digest(root: &Path) -> Result<String> {
    let files = fsutil::collect_code_files(root)?;
    let mut sections = Vec::new();
    for rel in &files {
        let path = root.join(rel);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let line_count = content.lines().count();
        let body = truncated_body(content);
        sections.push(format!("File: {rel} ({line_count} lines)\n```\n{body}\n```"));
    }
    Ok(sections.join("\n\n"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryEntry {
    mtime: i64,
    summary: String,
}

/// Per-file summaries keyed by relative path, invalidated by mtime.
/// Persisted to `.tac_summaries.json` under the project root.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SummaryStore {
    #[serde(default)]
    entries: BTreeMap<String, SummaryEntry>,
}

impl SummaryStore {
    pub fn load(root: &Path) -> Self {
        let path = root.join(SUMMARY_CACHE_FILE);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(SUMMARY_CACHE_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).context("Failed to write summary cache")?;
        Ok(())
    }

    fn fresh_summary(&self, rel: &str, mtime: i64) -> Option<&str> {
        self.entries
            .get(rel)
            .filter(|e| e.mtime == mtime)
            .map(|e| e.summary.as_str())
    }

    fn insert(&mut self, rel: String, mtime: i64, summary: String) {
        self.entries.insert(rel, SummaryEntry { mtime, summary });
    }
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Weak-LLM file summarizer. Summary failures degrade to raw content so
/// planning never aborts because of a summarizer hiccup.
pub struct Summarizer {
    llm: LlmClient,
    timeout: std::time::Duration,
}

impl Summarizer {
    pub fn new(llm: LlmClient, timeout_secs: u64) -> Self {
        Self {
            llm,
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }

    async fn summarize_one(&self, rel: &str, content: &str) -> Result<String> {
        let prompt = format!(
            "Summarize this source file in a few sentences: its purpose, the main \
             functions/classes it defines, and anything another engineer must know \
             before editing it. Be concise, no markdown.\n\nFile: {rel}\n```\n{content}\n```"
        );
        let messages = vec![
            Message::system("You summarize source files for a coding planner."),
            Message::user(prompt),
        ];
        tokio::time::timeout(self.timeout, self.llm.chat_completion(messages))
            .await
            .map_err(|_| anyhow::anyhow!("summary timed out after {:?}", self.timeout))?
    }

    /// Refresh summaries for every file whose mtime changed since the last
    /// run. Returns the number of files re-summarized.
    pub async fn update(&self, root: &Path, store: &mut SummaryStore) -> Result<usize> {
        let files = fsutil::collect_code_files(root)?;
        let mut updated = 0;
        for rel in files {
            let path = root.join(&rel);
            let mtime = file_mtime(&path);
            if store.fresh_summary(&rel, mtime).is_some() {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match self.summarize_one(&rel, &content).await {
                Ok(summary) => {
                    store.insert(rel, mtime, summary);
                    updated += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %rel, error = %e, "File summary failed, keeping raw content");
                }
            }
        }
        Ok(updated)
    }
}

/// Digest built from cached summaries, falling back to raw content for
/// files without a fresh summary.
pub fn summary_digest(root: &Path, store: &SummaryStore) -> Result<String> {
    let files = fsutil::collect_code_files(root)?;
    let mut sections = Vec::new();
    for rel in &files {
        let path = root.join(rel);
        let mtime = file_mtime(&path);
        if let Some(summary) = store.fresh_summary(rel, mtime) {
            sections.push(format!("File: {rel}\nSummary: {summary}"));
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            sections.push(format!("File: {rel}\n```\n{}\n```", truncated_body(content)));
        }
    }
    Ok(sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn digest_includes_files_with_line_counts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\ny = 2\n").unwrap();

        let digest = gather_digest(dir.path()).unwrap();
        assert!(digest.contains("File: src/a.py (2 lines)"));
        assert!(digest.contains("x = 1"));
    }

    #[test]
    fn digest_truncates_large_files() {
        let dir = TempDir::new().unwrap();
        let big = "a = 0\n".repeat(10_000);
        std::fs::write(dir.path().join("big.py"), &big).unwrap();

        let digest = gather_digest(dir.path()).unwrap();
        assert!(digest.contains("(truncated)"));
        assert!(digest.len() < big.len());
    }

    #[test]
    fn summary_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = SummaryStore::default();
        store.insert("src/a.py".into(), 100, "does things".into());
        store.save(dir.path()).unwrap();

        let loaded = SummaryStore::load(dir.path());
        assert_eq!(loaded.fresh_summary("src/a.py", 100), Some("does things"));
        // A different mtime invalidates the entry.
        assert_eq!(loaded.fresh_summary("src/a.py", 101), None);
    }

    #[test]
    fn summary_digest_falls_back_to_raw() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let digest = summary_digest(dir.path(), &SummaryStore::default()).unwrap();
        assert!(digest.contains("x = 1"));
    }
}
