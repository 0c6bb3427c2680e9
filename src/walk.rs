use std::path::{Path, PathBuf};

/// Whether `path` ends in one of `extensions` (lowercase, compared case-insensitively).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Files under `dir` with one of `extensions`, recursively, in path order.
///
/// Symlinked directories are not descended into; symlinked files are kept.
pub fn find_files(dir: &Path, extensions: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if has_extension(&path, extensions) && (file_type.is_file() || path.is_file()) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_has_extension_ignores_case() {
        assert!(has_extension(Path::new("a/b/IMG_01.JPG"), &["jpg"]));
        assert!(!has_extension(Path::new("notes.txt"), &["jpg"]));
        assert!(!has_extension(Path::new("jpg"), &["jpg"]));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_files_skips_symlinked_directories() {
        let dir = TempDir::new().unwrap();
        let post = dir.path().join("post_a");
        std::fs::create_dir_all(&post).unwrap();
        std::fs::write(post.join("a.png"), "x").unwrap();
        std::os::unix::fs::symlink(&post, post.join("loop")).unwrap();
        std::os::unix::fs::symlink(post.join("a.png"), post.join("alias.png")).unwrap();

        let files = find_files(dir.path(), &["png"]).unwrap();
        assert_eq!(files, vec![post.join("a.png"), post.join("alias.png")]);
    }
}
