use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::{Body, Storage};

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
    base_url: String,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path`, `None` if it would escape the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !safe {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Read a stored file.
    pub async fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        let full = self.resolve(path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes storage root")
        })?;
        tokio::fs::read(full).await
    }
}

#[async_trait]
impl Storage for LocalDisk {
    fn name(&self) -> &str {
        "local"
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Some(full) => tokio::fs::try_exists(full).await.unwrap_or(false),
            None => false,
        }
    }

    async fn put(&self, path: &str, body: Body) -> bool {
        let Some(full) = self.resolve(path) else {
            warn!("Refusing to store outside {:?}: {}", self.root, path);
            return false;
        };

        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Failed to create {:?}: {}", parent, e);
                return false;
            }
        }

        let result = match body {
            Body::Bytes(bytes) => tokio::fs::write(&full, bytes).await,
            Body::File(source) => tokio::fs::copy(&source, &full).await.map(|_| ()),
        };

        match result {
            Ok(()) => {
                debug!("Stored {} on local disk", path);
                true
            }
            Err(e) => {
                warn!("Failed to write {:?}: {}", full, e);
                false
            }
        }
    }

    async fn delete(&self, path: &str) -> bool {
        let Some(full) = self.resolve(path) else {
            return false;
        };
        match tokio::fs::remove_file(&full).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to delete {:?}: {}", full, e);
                false
            }
        }
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_exists_delete() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new(dir.path(), "http://localhost/storage/");

        assert!(!disk.exists("blocks/1/2/a.png").await);
        assert!(disk.put("blocks/1/2/a.png", Body::Bytes(vec![1, 2, 3])).await);
        assert!(disk.exists("blocks/1/2/a.png").await);
        assert_eq!(disk.read("blocks/1/2/a.png").await.unwrap(), vec![1, 2, 3]);

        assert!(disk.delete("blocks/1/2/a.png").await);
        // Deleting twice is tolerated
        assert!(!disk.delete("blocks/1/2/a.png").await);
    }

    #[tokio::test]
    async fn test_put_from_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.png");
        std::fs::write(&source, b"png").unwrap();

        let disk = LocalDisk::new(dir.path().join("public"), "http://localhost/storage");
        assert!(disk.put("favicons/1/x.png", Body::File(source.clone())).await);
        assert!(source.exists());
        assert_eq!(disk.read("favicons/1/x.png").await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new(dir.path(), "http://localhost/storage");
        assert!(!disk.put("../outside.png", Body::Bytes(vec![0])).await);
        assert!(!disk.put("/etc/passwd", Body::Bytes(vec![0])).await);
        assert!(!disk.exists("").await);
    }

    #[test]
    fn test_url() {
        let disk = LocalDisk::new("/tmp/x", "http://localhost/storage/");
        assert_eq!(disk.url("a/b.png"), "http://localhost/storage/a/b.png");
        assert_eq!(disk.url(""), "http://localhost/storage/");
    }
}
