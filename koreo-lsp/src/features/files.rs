//! Discovery of Koreo resource files on disk.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// Files with these suffixes are treated as Koreo resource streams.
pub const KOREO_EXTENSIONS: &[&str] = &[".k.yaml", ".k.yml", ".yaml", ".yml"];

pub fn is_koreo_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| KOREO_EXTENSIONS.iter().any(|ext| name.ends_with(ext)))
        .unwrap_or(false)
}

/// Expands files and directories into the Koreo files they contain.
///
/// Directories are walked honouring `.gitignore` and `.ignore` files.
/// Explicit file arguments are kept even when their extension does not match.
/// The result is sorted and free of duplicates.
pub fn collect_koreo_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            tracing::warn!(path = %path.display(), "skipping missing path");
            continue;
        }

        let mut walker = WalkBuilder::new(path);
        walker
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .add_custom_ignore_filename(".gitignore")
            .hidden(true)
            .follow_links(false)
            .require_git(false)
            .standard_filters(true);

        for result in walker.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(%err, "walk error");
                    continue;
                }
            };
            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if is_file && is_koreo_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn recognises_yaml_suffixes() {
        assert!(is_koreo_file(Path::new("functions/build.k.yaml")));
        assert!(is_koreo_file(Path::new("workflow.yml")));
        assert!(!is_koreo_file(Path::new("README.md")));
        assert!(!is_koreo_file(Path::new("yaml")));
    }

    #[test]
    fn walks_directories_and_honours_ignore_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::create_dir_all(dir.path().join("vendor")).unwrap();
        fs::write(dir.path().join("a.k.yaml"), "").unwrap();
        fs::write(dir.path().join("nested/b.yaml"), "").unwrap();
        fs::write(dir.path().join("vendor/c.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join(".ignore"), "vendor/\n").unwrap();

        let files = collect_koreo_files(&[dir.path().to_path_buf()]);
        let names: Vec<String> = files
            .iter()
            .map(|path| {
                path.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["a.k.yaml", "nested/b.yaml"]);
    }

    #[test]
    fn explicit_files_are_kept_once() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("resources.txt");
        fs::write(&file, "").unwrap();
        let files = collect_koreo_files(&[file.clone(), file.clone(), dir.path().join("missing")]);
        assert_eq!(files, vec![file]);
    }
}
