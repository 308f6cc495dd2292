mod git;
mod shadow;

pub use git::GitTree;
pub use shadow::ShadowTree;

use std::path::Path;

use tac_config::Config;

use crate::protoblock::BRANCH_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Git,
    Shadow,
}

/// Transactional view of the working directory. Two conforming backends:
/// a real git repository and a temp-dir shadow store. Every operation
/// reports success as a bool; a failed VCS operation is advisory, never a
/// panic.
pub trait SourceTree: Send {
    fn kind(&self) -> TreeKind;

    fn current_branch(&self) -> Option<String>;

    /// Branch the tree was on when the manager was constructed.
    fn base_branch(&self) -> Option<String>;

    /// (clean, current_branch). With `ignore_untracked` only tracked files
    /// count against cleanliness.
    fn check_status(&self, ignore_untracked: bool) -> (bool, String);

    fn checkout_branch(&mut self, name: &str, create: bool) -> bool;

    /// Idempotent branch setup: if the current branch already lives under
    /// the `tac/` namespace, stay on it; otherwise create or switch to
    /// `name`.
    fn create_or_switch_to_namespaced_branch(&mut self, name: &str) -> bool {
        if let Some(current) = self.current_branch() {
            if current.starts_with(BRANCH_PREFIX) {
                tracing::info!(branch = %current, "Already on a tac branch, keeping it");
                return true;
            }
        }
        self.checkout_branch(name, true)
    }

    /// Staged + unstaged + untracked changes, with untracked file contents
    /// inlined, as one displayable string.
    fn complete_diff(&self) -> String;

    fn commit(&mut self, message: &str) -> bool;

    /// Roll the working tree back to the last clean state, discarding
    /// untracked files created since.
    fn revert_changes(&mut self) -> bool;

    fn post_execution_handle(&mut self, auto_commit: bool, auto_push: bool, message: &str) -> bool;

    /// Labeled snapshot of all code-relevant files. Meaningful on the
    /// shadow backend; a no-op success on git, which has real commits.
    fn snapshot(&mut self, _label: &str) -> bool {
        true
    }

    /// Restore the working directory to bit-match a snapshot, deleting
    /// files absent from it.
    fn restore(&mut self, _label: &str) -> bool {
        true
    }

    /// Unified diff between a snapshot and the live tree.
    fn diff_against(&self, _label: &str) -> String {
        String::new()
    }
}

/// Select the backend: shadow when git is disabled, a real repository when
/// one exists, shadow again as the transparent fallback.
pub fn create_source_tree(config: &Config, root: &Path) -> Box<dyn SourceTree> {
    if !config.git.enabled {
        tracing::info!("Git disabled in config, using shadow source tree");
        return Box::new(ShadowTree::new(root));
    }
    match GitTree::open(root) {
        Some(tree) => Box::new(tree),
        None => {
            tracing::warn!("No usable git repository, falling back to shadow source tree");
            Box::new(ShadowTree::new(root))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn disabled_git_selects_shadow() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.git.enabled = false;
        let tree = create_source_tree(&config, dir.path());
        assert_eq!(tree.kind(), TreeKind::Shadow);
    }

    #[test]
    fn missing_repo_downgrades_to_shadow() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let tree = create_source_tree(&config, dir.path());
        assert_eq!(tree.kind(), TreeKind::Shadow);
    }
}
