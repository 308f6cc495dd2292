use std::path::{Path, PathBuf};
use std::process::Command;

use super::{SourceTree, TreeKind};

const IGNORE_PATTERN: &str = ".tac_*";

pub struct GitTree {
    root: PathBuf,
    base_branch: Option<String>,
}

fn run_git(root: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| format!("Failed to run git: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

fn is_git_repo(root: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(root)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

impl GitTree {
    /// Open the repository at `root`. Returns None when there is nothing
    /// usable so the caller can downgrade to the shadow backend.
    pub fn open(root: &Path) -> Option<Self> {
        if !is_git_repo(root) {
            return None;
        }
        let mut tree = Self {
            root: root.to_path_buf(),
            base_branch: None,
        };
        tree.base_branch = tree.current_branch();
        tree.ensure_gitignore_covers_artifacts();
        Some(tree)
    }

    /// The artifact namespace must be ignored or every attempt would dirty
    /// the tree with planner output. Appends the pattern and commits the
    /// edit when missing.
    fn ensure_gitignore_covers_artifacts(&mut self) {
        let gitignore = self.root.join(".gitignore");
        let contents = std::fs::read_to_string(&gitignore).unwrap_or_default();
        if contents.lines().any(|l| l.trim() == IGNORE_PATTERN) {
            return;
        }
        let mut updated = contents;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(IGNORE_PATTERN);
        updated.push('\n');
        if let Err(e) = std::fs::write(&gitignore, updated) {
            tracing::error!(error = %e, "Failed to update .gitignore");
            return;
        }
        tracing::warn!("'.gitignore' was missing '{IGNORE_PATTERN}'; appended it");
        if let Err(e) = run_git(&self.root, &["add", ".gitignore"]).and_then(|_| {
            run_git(
                &self.root,
                &[
                    "commit",
                    "-m",
                    "Update .gitignore to include '.tac_*' exclusion",
                ],
            )
        }) {
            tracing::error!(error = %e, "Failed to commit .gitignore update");
        }
    }

    fn untracked_files(&self) -> Vec<String> {
        run_git(&self.root, &["ls-files", "--others", "--exclude-standard"])
            .map(|out| {
                out.lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn branch_exists(&self, name: &str) -> bool {
        run_git(
            &self.root,
            &["rev-parse", "--verify", &format!("refs/heads/{name}")],
        )
        .is_ok()
    }
}

impl SourceTree for GitTree {
    fn kind(&self) -> TreeKind {
        TreeKind::Git
    }

    fn current_branch(&self) -> Option<String> {
        run_git(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn base_branch(&self) -> Option<String> {
        self.base_branch.clone()
    }

    fn check_status(&self, ignore_untracked: bool) -> (bool, String) {
        let current = self.current_branch().unwrap_or_default();
        let args: &[&str] = if ignore_untracked {
            &["status", "--porcelain", "--untracked-files=no"]
        } else {
            &["status", "--porcelain"]
        };
        match run_git(&self.root, args) {
            Ok(out) => {
                let clean = out.trim().is_empty();
                if !clean {
                    tracing::error!(
                        "Git working tree is not clean. Commit or stash your changes first.\n{out}"
                    );
                }
                (clean, current)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error checking git status");
                (false, current)
            }
        }
    }

    fn checkout_branch(&mut self, name: &str, create: bool) -> bool {
        let result = if self.branch_exists(name) {
            run_git(&self.root, &["checkout", name])
        } else if create {
            run_git(&self.root, &["checkout", "-b", name])
        } else {
            tracing::error!(branch = name, "Branch does not exist and create=false");
            return false;
        };
        match result {
            Ok(_) => {
                tracing::info!(branch = name, "Switched branch");
                true
            }
            Err(e) => {
                tracing::error!(branch = name, error = %e, "Failed to checkout branch");
                false
            }
        }
    }

    fn complete_diff(&self) -> String {
        let mut sections = Vec::new();

        match run_git(&self.root, &["diff", "--staged", "--full-index"]) {
            Ok(diff) if !diff.trim().is_empty() => {
                sections.push(format!("=== Staged Changes ===\n{diff}"));
            }
            Ok(_) => {}
            Err(e) => sections.push(format!("Error getting staged changes: {e}")),
        }

        match run_git(&self.root, &["diff", "--full-index"]) {
            Ok(diff) if !diff.trim().is_empty() => {
                sections.push(format!("=== Unstaged Changes ===\n{diff}"));
            }
            Ok(_) => {}
            Err(e) => sections.push(format!("Error getting unstaged changes: {e}")),
        }

        let untracked = self.untracked_files();
        if !untracked.is_empty() {
            let mut block = String::from("=== Untracked Files ===\n");
            for file in untracked {
                block.push_str(&format!("+ {file}\n"));
                if let Ok(content) = std::fs::read_to_string(self.root.join(&file)) {
                    block.push_str(&format!("File contents:\n```\n{content}\n```\n"));
                }
            }
            sections.push(block);
        }

        if sections.is_empty() {
            "No changes detected (working directory clean)".to_string()
        } else {
            sections.join("\n")
        }
    }

    fn commit(&mut self, message: &str) -> bool {
        if let Err(e) = run_git(&self.root, &["add", "--all"]) {
            tracing::error!(error = %e, "Failed to stage changes");
            return false;
        }
        match run_git(&self.root, &["commit", "-m", message]) {
            Ok(_) => {
                tracing::info!(message, "Committed changes");
                true
            }
            Err(e) if e.contains("nothing to commit") => {
                tracing::info!("Nothing to commit - working tree clean");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to commit changes");
                false
            }
        }
    }

    fn revert_changes(&mut self) -> bool {
        let current = self.current_branch().unwrap_or_else(|| "HEAD".to_string());
        let base = self
            .base_branch
            .clone()
            .unwrap_or_else(|| "main".to_string());

        let stashed = run_git(&self.root, &["stash", "push", "--include-untracked"]);
        let cleaned = run_git(&self.root, &["clean", "-fd"]);
        match (&stashed, &cleaned) {
            (Ok(_), Ok(_)) => {
                tracing::info!("Stashed all changes and cleaned the working directory");
                tracing::info!(
                    "To clean up manually: git switch {base} && git restore . && git clean -fd && git branch -D {current}"
                );
                true
            }
            _ => {
                tracing::error!(
                    "Failed to revert automatically. Manual cleanup: git switch {base} && git restore . && git clean -fd && git branch -D {current}"
                );
                false
            }
        }
    }

    fn post_execution_handle(&mut self, auto_commit: bool, auto_push: bool, message: &str) -> bool {
        if !auto_commit {
            tracing::debug!("Auto-commit disabled, leaving changes in the working tree");
            return true;
        }
        if !self.commit(message) {
            return false;
        }
        let current = self.current_branch().unwrap_or_default();
        if auto_push {
            match run_git(&self.root, &["push", "origin", &current]) {
                Ok(_) => tracing::info!(branch = %current, "Pushed changes to origin"),
                // A failed push leaves the commit intact; report and move on.
                Err(e) => tracing::error!(error = %e, "Failed to push changes"),
            }
        }
        let base = self
            .base_branch
            .clone()
            .unwrap_or_else(|| "main".to_string());
        tracing::info!("Changes committed to branch '{current}'");
        tracing::info!("To merge from the terminal: git switch {base} && git merge {current}");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-b", "main"]).unwrap();
        run_git(dir, &["config", "user.email", "test@example.com"]).unwrap();
        run_git(dir, &["config", "user.name", "Test"]).unwrap();
        std::fs::write(dir.join("a.py"), "x = 1\n").unwrap();
        run_git(dir, &["add", "--all"]).unwrap();
        run_git(dir, &["commit", "-m", "init"]).unwrap();
    }

    #[test]
    fn open_missing_repo_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(GitTree::open(dir.path()).is_none());
    }

    #[test]
    fn gitignore_gains_artifact_pattern() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        let tree = GitTree::open(dir.path()).unwrap();
        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.lines().any(|l| l == IGNORE_PATTERN));
        // And the edit was committed, so the tree stayed clean.
        let (clean, branch) = tree.check_status(false);
        assert!(clean);
        assert_eq!(branch, "main");
    }

    #[test]
    fn namespaced_branch_setup_is_idempotent() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let mut tree = GitTree::open(dir.path()).unwrap();

        assert!(tree.create_or_switch_to_namespaced_branch("tac/feature/one"));
        assert_eq!(tree.current_branch().as_deref(), Some("tac/feature/one"));

        // Already namespaced: a different name must not switch.
        assert!(tree.create_or_switch_to_namespaced_branch("tac/feature/two"));
        assert_eq!(tree.current_branch().as_deref(), Some("tac/feature/one"));
    }

    #[test]
    fn complete_diff_reports_untracked_contents() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let tree = GitTree::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("new.py"), "fresh = True\n").unwrap();
        let diff = tree.complete_diff();
        assert!(diff.contains("=== Untracked Files ==="));
        assert!(diff.contains("+ new.py"));
        assert!(diff.contains("fresh = True"));
    }

    #[test]
    fn revert_discards_changes_and_untracked() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let mut tree = GitTree::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();
        std::fs::write(dir.path().join("junk.py"), "tmp\n").unwrap();
        assert!(tree.revert_changes());

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "x = 1\n"
        );
        assert!(!dir.path().join("junk.py").exists());
    }
}
