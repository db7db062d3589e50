use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn write_file_if_changed(output_path: impl AsRef<Path>, content: &str) -> io::Result<PathBuf> {
    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(existing) = fs::read_to_string(output_path) {
        if existing == content {
            return Ok(output_path.to_path_buf());
        }
    }
    fs::write(output_path, content)?;
    Ok(output_path.to_path_buf())
}

/// Leaves `dir` existing and empty: every child entry is removed, or the
/// directory is created. Irreversible on the given path.
pub fn ensure_empty_dir(dir: impl AsRef<Path>) -> io::Result<()> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exists and is not a directory", dir.display()),
        ));
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_if_changed_creates_parents_and_skips_identical_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("kernel.cu");
        write_file_if_changed(&path, "a").unwrap();
        let first = fs::metadata(&path).unwrap().modified().unwrap();
        write_file_if_changed(&path, "a").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), first);
        write_file_if_changed(&path, "b").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "b");
    }

    #[test]
    fn ensure_empty_dir_clears_files_and_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out");
        ensure_empty_dir(&target).unwrap();
        assert!(target.is_dir());

        fs::write(target.join("stale.cu"), "x").unwrap();
        fs::create_dir_all(target.join("build").join("lib")).unwrap();
        fs::write(target.join("build").join("lib").join("a.so"), "y").unwrap();
        ensure_empty_dir(&target).unwrap();
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn ensure_empty_dir_rejects_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, "x").unwrap();
        let err = ensure_empty_dir(&file).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
