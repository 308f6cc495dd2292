use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Extensions considered code-relevant when snapshotting or digesting a
/// working directory.
pub const CODE_FILE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "html", "css", "scss", "java", "c", "cpp", "h", "hpp", "cs",
    "go", "rs", "rb", "php", "swift", "kt", "sh", "bash", "json", "yml", "yaml", "md", "txt",
    "sql", "toml",
];

pub fn is_code_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            CODE_FILE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// True for path segments that should never be walked: VCS internals,
/// virtualenvs, caches, build output.
pub fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.')
        || matches!(
            name,
            "__pycache__" | "node_modules" | "target" | "venv" | "env" | "build" | "dist"
        )
}

/// Normalize a possibly-absolute path to be relative to `root`. Paths
/// outside the root are rejected rather than silently re-anchored.
pub fn relativize(path: &str, root: &Path) -> Result<String> {
    let p = Path::new(path);
    let rel = if p.is_absolute() {
        p.strip_prefix(root)
            .with_context(|| format!("Path '{path}' is outside the project root"))?
            .to_path_buf()
    } else {
        p.to_path_buf()
    };

    // Reject traversal upward; collapse `./` segments.
    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => anyhow::bail!("Path '{path}' escapes the project root"),
        }
    }
    anyhow::ensure!(!clean.as_os_str().is_empty(), "Empty path");
    Ok(clean.to_string_lossy().replace('\\', "/"))
}

/// Walk `root` and collect relative paths of all code-relevant files,
/// skipping ignored directories. Output is sorted for determinism.
pub fn collect_code_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !is_ignored_dir(&name) {
                    stack.push(path);
                }
            } else if is_code_file(&path) && !name.starts_with('.') {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Coding agents sometimes create `tests/tests/` when told to write into
/// the test directory. Move every file up one level (overwriting any
/// duplicate) and remove the nested directory. The only implicit mutation
/// the kernel performs on agent output.
pub fn flatten_nested_tests(project_root: &Path, test_path: &str) -> Result<()> {
    let test_dir = project_root.join(test_path);
    let nested = test_dir.join(
        Path::new(test_path)
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(test_path)),
    );
    if !nested.is_dir() {
        return Ok(());
    }

    tracing::warn!(nested = %nested.display(), "Flattening nested test directory");
    for entry in std::fs::read_dir(&nested)? {
        let entry = entry?;
        let source = entry.path();
        if source.is_file() {
            let target = test_dir.join(entry.file_name());
            std::fs::rename(&source, &target)
                .or_else(|_| std::fs::copy(&source, &target).map(|_| ()))
                .with_context(|| format!("Failed to move {} up", source.display()))?;
        }
    }
    std::fs::remove_dir_all(&nested).context("Failed to remove nested test directory")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn code_file_detection() {
        assert!(is_code_file(Path::new("src/main.py")));
        assert!(is_code_file(Path::new("A/B.RS")));
        assert!(!is_code_file(Path::new("image.png")));
        assert!(!is_code_file(Path::new("Makefile")));
    }

    #[test]
    fn relativize_absolute_inside_root() {
        let root = Path::new("/work/project");
        let rel = relativize("/work/project/src/x.py", root).unwrap();
        assert_eq!(rel, "src/x.py");
    }

    #[test]
    fn relativize_rejects_escape() {
        let root = Path::new("/work/project");
        assert!(relativize("../other/x.py", root).is_err());
        assert!(relativize("/elsewhere/x.py", root).is_err());
    }

    #[test]
    fn relativize_collapses_curdir() {
        let root = Path::new("/work/project");
        assert_eq!(relativize("./src/x.py", root).unwrap(), "src/x.py");
    }

    #[test]
    fn collect_skips_hidden_and_caches() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join(".git/config.py"), "no\n").unwrap();
        std::fs::write(dir.path().join("__pycache__/a.py"), "no\n").unwrap();
        std::fs::write(dir.path().join("data.bin"), [0u8, 1]).unwrap();
        // Harness artifacts share the .tac_* namespace and never count as code.
        std::fs::write(dir.path().join(".tac_protoblock_ab12.json"), "{}\n").unwrap();

        let files = collect_code_files(dir.path()).unwrap();
        assert_eq!(files, vec!["src/a.py"]);
    }

    #[test]
    fn flatten_moves_files_and_removes_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("tests/tests");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("test_x.py"), "def test_x(): pass\n").unwrap();

        flatten_nested_tests(dir.path(), "tests").unwrap();

        assert!(dir.path().join("tests/test_x.py").is_file());
        assert!(!dir.path().join("tests/tests").exists());
    }

    #[test]
    fn flatten_overwrites_duplicates() {
        let dir = TempDir::new().unwrap();
        let tests = dir.path().join("tests");
        let nested = tests.join("tests");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tests.join("test_x.py"), "old\n").unwrap();
        std::fs::write(nested.join("test_x.py"), "new\n").unwrap();

        flatten_nested_tests(dir.path(), "tests").unwrap();

        let content = std::fs::read_to_string(tests.join("test_x.py")).unwrap();
        assert_eq!(content, "new\n");
        assert!(!nested.exists());
    }

    #[test]
    fn flatten_noop_without_nesting() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        flatten_nested_tests(dir.path(), "tests").unwrap();
        assert!(dir.path().join("tests").is_dir());
    }
}
