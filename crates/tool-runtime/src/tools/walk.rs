//! Glob matching over a directory tree, shared by `glob` and `grep`.

use glob::{MatchOptions, Pattern, PatternError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target"];

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Paths under `root` whose root-relative form matches `pattern` and none of
/// `ignore`. Sorted, absolute.
pub(crate) fn glob_paths(
    root: &Path,
    pattern: &str,
    ignore: &[String],
    include_dirs: bool,
) -> Result<Vec<PathBuf>, PatternError> {
    let pattern = Pattern::new(pattern.trim_start_matches("./"))?;
    let ignore = ignore
        .iter()
        .map(|p| Pattern::new(p.trim_start_matches("./")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut matches = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
    });

    for entry in walker.flatten() {
        if entry.file_type().is_dir() && !include_dirs {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if pattern.matches_with(&relative, OPTIONS)
            && !ignore.iter().any(|p| p.matches_with(&relative, OPTIONS))
        {
            matches.push(entry.into_path());
        }
    }

    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("README.md"), "readme").unwrap();
        fs::write(dir.path().join("src/lib.rs"), "lib").unwrap();
        fs::write(dir.path().join("src/nested/mod.rs"), "mod").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.rs"), "skip").unwrap();
        dir
    }

    fn relative(root: &Path, paths: Vec<PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_recursive_pattern() {
        let dir = tree();
        let found = glob_paths(dir.path(), "**/*.rs", &[], false).unwrap();
        assert_eq!(relative(dir.path(), found), vec!["src/lib.rs", "src/nested/mod.rs"]);
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let dir = tree();
        let found = glob_paths(dir.path(), "*.md", &[], false).unwrap();
        assert_eq!(relative(dir.path(), found), vec!["README.md"]);
    }

    #[test]
    fn test_ignore_patterns() {
        let dir = tree();
        let found = glob_paths(dir.path(), "src/**/*.rs", &["src/nested/**".to_string()], false).unwrap();
        assert_eq!(relative(dir.path(), found), vec!["src/lib.rs"]);
    }

    #[test]
    fn test_include_dirs() {
        let dir = tree();
        let found = glob_paths(dir.path(), "src/*", &[], true).unwrap();
        assert_eq!(relative(dir.path(), found), vec!["src/lib.rs", "src/nested"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = tree();
        assert!(glob_paths(dir.path(), "[", &[], false).is_err());
    }
}
