//! File helpers shared by the pipeline stages

use anyhow::Context;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Create the parent directory of `path` if it does not exist yet
pub fn ensure_parent_dir(path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write `path` through a sibling temp file that is renamed into place once
/// `write` succeeds, so readers never observe a half-written artifact.
/// On failure the temp file is removed and `path` is left untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> crate::Result<()>
where
    F: FnOnce(&mut File) -> crate::Result<()>,
{
    ensure_parent_dir(path)?;
    let tmp = temp_sibling(path);

    let mut file =
        File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let written = write(&mut file).and_then(|_| {
        file.sync_all()
            .with_context(|| format!("flushing {}", tmp.display()))
    });
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("moving {} into place", path.display()))?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out/file.txt");

        write_atomic(&path, |f| {
            f.write_all(b"hello")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_write_atomic_keeps_old_file_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "old").unwrap();

        let result = write_atomic(&path, |f| {
            f.write_all(b"partial")?;
            anyhow::bail!("boom")
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(!temp_sibling(&path).exists());
    }
}
