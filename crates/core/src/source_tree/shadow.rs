use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use tempfile::TempDir;

use super::{SourceTree, TreeKind};
use crate::fsutil;

pub const INITIAL_COMMIT: &str = "initial_commit";

/// Non-VCS source tree used when git is disabled or unavailable. Snapshots
/// of all code-relevant files live in an owned temp directory keyed by
/// label; the working directory itself is borrowed, never owned.
pub struct ShadowTree {
    root: PathBuf,
    store: TempDir,
    commits: BTreeMap<String, BTreeMap<String, String>>,
    last_label: Option<String>,
}

impl ShadowTree {
    pub fn new(root: &Path) -> Self {
        let store = TempDir::with_prefix("tac_shadow_").unwrap_or_else(|_| {
            TempDir::new().expect("failed to create shadow snapshot directory")
        });
        let mut tree = Self {
            root: root.to_path_buf(),
            store,
            commits: BTreeMap::new(),
            last_label: None,
        };
        tree.take_snapshot(INITIAL_COMMIT);
        tree
    }

    fn read_working_files(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        if let Ok(paths) = fsutil::collect_code_files(&self.root) {
            for rel in paths {
                if let Ok(content) = std::fs::read_to_string(self.root.join(&rel)) {
                    files.insert(rel, content);
                }
            }
        }
        files
    }

    fn take_snapshot(&mut self, label: &str) -> bool {
        let files = self.read_working_files();
        let commit_dir = self.store.path().join(label);
        for (rel, content) in &files {
            let path = commit_dir.join(rel);
            if let Some(parent) = path.parent() {
                if std::fs::create_dir_all(parent).is_err() {
                    return false;
                }
            }
            if std::fs::write(&path, content).is_err() {
                return false;
            }
        }
        tracing::info!(label, files = files.len(), "Created shadow snapshot");
        self.commits.insert(label.to_string(), files);
        self.last_label = Some(label.to_string());
        true
    }

    fn unified_diff(label: &str, snapshot: &BTreeMap<String, String>, live: &BTreeMap<String, String>) -> String {
        let mut out = String::new();
        let mut paths: Vec<&String> = snapshot.keys().chain(live.keys()).collect();
        paths.sort();
        paths.dedup();

        static EMPTY: String = String::new();
        for path in paths {
            let old = snapshot.get(path).unwrap_or(&EMPTY);
            let new = live.get(path).unwrap_or(&EMPTY);
            if old == new {
                continue;
            }
            let diff = TextDiff::from_lines(old.as_str(), new.as_str());
            out.push_str(
                &diff
                    .unified_diff()
                    .context_radius(3)
                    .header(&format!("{label}/{path}"), &format!("live/{path}"))
                    .to_string(),
            );
        }
        out
    }
}

impl SourceTree for ShadowTree {
    fn kind(&self) -> TreeKind {
        TreeKind::Shadow
    }

    fn current_branch(&self) -> Option<String> {
        Some("main".to_string())
    }

    fn base_branch(&self) -> Option<String> {
        Some("main".to_string())
    }

    fn check_status(&self, _ignore_untracked: bool) -> (bool, String) {
        (true, "main".to_string())
    }

    fn checkout_branch(&mut self, name: &str, _create: bool) -> bool {
        tracing::debug!(branch = name, "Shadow tree: branch operations are no-ops");
        true
    }

    fn complete_diff(&self) -> String {
        let label = self.last_label.as_deref().unwrap_or(INITIAL_COMMIT);
        let diff = self.diff_against(label);
        if diff.is_empty() {
            "No changes detected (working directory clean)".to_string()
        } else {
            diff
        }
    }

    fn commit(&mut self, message: &str) -> bool {
        self.take_snapshot(message)
    }

    fn revert_changes(&mut self) -> bool {
        let label = self
            .last_label
            .clone()
            .unwrap_or_else(|| INITIAL_COMMIT.to_string());
        self.restore(&label)
    }

    fn post_execution_handle(&mut self, auto_commit: bool, _auto_push: bool, message: &str) -> bool {
        if auto_commit {
            return self.take_snapshot(message);
        }
        true
    }

    fn snapshot(&mut self, label: &str) -> bool {
        self.take_snapshot(label)
    }

    fn restore(&mut self, label: &str) -> bool {
        let Some(files) = self.commits.get(label).cloned() else {
            tracing::error!(label, "Snapshot not found");
            return false;
        };

        for (rel, content) in &files {
            let path = self.root.join(rel);
            if let Some(parent) = path.parent() {
                if std::fs::create_dir_all(parent).is_err() {
                    return false;
                }
            }
            if std::fs::write(&path, content).is_err() {
                tracing::error!(file = %rel, "Failed to restore file");
                return false;
            }
        }

        // Files created after the snapshot do not survive restoration.
        let live = self.read_working_files();
        for rel in live.keys() {
            if !files.contains_key(rel) {
                if let Err(e) = std::fs::remove_file(self.root.join(rel)) {
                    tracing::error!(file = %rel, error = %e, "Failed to remove file");
                }
            }
        }

        tracing::info!(label, files = files.len(), "Restored shadow snapshot");
        self.last_label = Some(label.to_string());
        true
    }

    fn diff_against(&self, label: &str) -> String {
        let Some(snapshot) = self.commits.get(label) else {
            return format!("Snapshot '{label}' not found");
        };
        let live = self.read_working_files();
        Self::unified_diff(label, snapshot, &live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TempDir, ShadowTree) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/x.py"), "def f():\n    return 1\n").unwrap();
        let tree = ShadowTree::new(dir.path());
        (dir, tree)
    }

    #[test]
    fn seeds_initial_commit() {
        let (_dir, tree) = setup();
        assert!(tree.commits.contains_key(INITIAL_COMMIT));
        assert_eq!(tree.kind(), TreeKind::Shadow);
    }

    #[test]
    fn round_trip_restores_bytes_and_removes_new_files() {
        let (dir, mut tree) = setup();
        assert!(tree.snapshot("A"));

        std::fs::write(dir.path().join("src/x.py"), "def f():\n    return 2\n").unwrap();
        std::fs::write(dir.path().join("src/y.py"), "created later\n").unwrap();
        assert!(tree.snapshot("B"));

        assert!(tree.restore("A"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/x.py")).unwrap(),
            "def f():\n    return 1\n"
        );
        assert!(!dir.path().join("src/y.py").exists());
    }

    #[test]
    fn diff_is_empty_after_restore() {
        let (dir, mut tree) = setup();
        assert!(tree.snapshot("A"));
        std::fs::write(dir.path().join("src/x.py"), "changed\n").unwrap();
        assert!(!tree.diff_against("A").is_empty());

        assert!(tree.restore("A"));
        assert_eq!(tree.diff_against("A"), "");
    }

    #[test]
    fn diff_reports_modifications_and_new_files() {
        let (dir, mut tree) = setup();
        assert!(tree.snapshot("A"));
        std::fs::write(dir.path().join("src/x.py"), "def f():\n    return 99\n").unwrap();
        std::fs::write(dir.path().join("src/new.py"), "fresh = 1\n").unwrap();

        let diff = tree.diff_against("A");
        assert!(diff.contains("-    return 1"));
        assert!(diff.contains("+    return 99"));
        assert!(diff.contains("+fresh = 1"));
        assert!(diff.contains("A/src/x.py"));
    }

    #[test]
    fn branch_operations_succeed_as_noops() {
        let (_dir, mut tree) = setup();
        assert!(tree.checkout_branch("tac/feature/x", true));
        assert!(tree.create_or_switch_to_namespaced_branch("tac/feature/x"));
        assert_eq!(tree.current_branch().as_deref(), Some("main"));
    }

    #[test]
    fn complete_diff_tracks_last_snapshot() {
        let (dir, mut tree) = setup();
        std::fs::write(dir.path().join("src/x.py"), "edited\n").unwrap();
        let diff = tree.complete_diff();
        assert!(diff.contains("+edited"));

        tree.commit("after_edit");
        assert!(tree.complete_diff().contains("No changes detected"));
    }

    #[test]
    fn restore_unknown_label_fails() {
        let (_dir, mut tree) = setup();
        assert!(!tree.restore("nope"));
    }
}
