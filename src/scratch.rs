use std::io;
use std::path::Path;
use tempfile::TempDir;

/// Per-request working directory handed to the processor.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub async fn create(root: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new().prefix("req-").tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory on the blocking pool without waiting for it.
    pub fn release(self) {
        let dir = self.dir;
        tokio::task::spawn_blocking(move || {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        });
    }
}

/// Empties `dir`, leaving the directory itself in place. Used at startup to
/// drop scratch space left behind by a previous process.
pub async fn clear_dir(dir: &Path) -> io::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let removed = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = removed {
            tracing::warn!(path = %path.display(), error = %e, "failed to clear scratch entry");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn scratch_is_removed_after_release() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Scratch::create(root.path()).await.unwrap();
        let path = scratch.path().to_path_buf();
        tokio::fs::write(path.join("tile.tif"), b"x").await.unwrap();

        scratch.release();
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn clear_dir_keeps_root() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(root.path().join("a/b")).await.unwrap();
        tokio::fs::write(root.path().join("f"), b"x").await.unwrap();

        clear_dir(root.path()).await.unwrap();
        assert!(root.path().exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        clear_dir(&root.path().join("missing")).await.unwrap();
    }
}
