//! File storage backends.
//!
//! Three roles: a local temp area uploads wait in, the primary durable store
//! (S3, optional) and a public fallback directory. Stored references are
//! relative paths; URLs are materialized when blocks are read.

mod local;
mod s3;

pub use local::LocalDisk;
pub use s3::S3Disk;

use async_trait::async_trait;
use podium_core::Props;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Prefix of block images on the primary store.
pub const PRIMARY_BLOCK_PREFIX: &str = "blocks/";
/// Prefix of block images on the fallback store.
pub const FALLBACK_BLOCK_PREFIX: &str = "block-images/";
/// Prefix of favicons (always on the fallback store).
pub const FAVICON_PREFIX: &str = "favicons/";

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "ico"];

/// Content handed to [`Storage::put`].
#[derive(Debug, Clone)]
pub enum Body {
    Bytes(Vec<u8>),
    /// A local file, streamed rather than loaded into memory.
    File(PathBuf),
}

/// Minimal storage contract.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn exists(&self, path: &str) -> bool;

    /// Store `body` at `path`. `false` when the backend did not accept it.
    async fn put(&self, path: &str, body: Body) -> bool;

    /// Remove `path`. `false` when nothing was there or removal failed.
    async fn delete(&self, path: &str) -> bool;

    /// Public URL of `path`.
    fn url(&self, path: &str) -> String;
}

/// The configured backends, by role.
#[derive(Clone)]
pub struct StorageSet {
    pub temp: Arc<LocalDisk>,
    pub primary: Option<Arc<dyn Storage>>,
    pub fallback: Arc<dyn Storage>,
}

impl StorageSet {
    pub fn new(
        temp: Arc<LocalDisk>,
        primary: Option<Arc<dyn Storage>>,
        fallback: Arc<dyn Storage>,
    ) -> Self {
        Self {
            temp,
            primary,
            fallback,
        }
    }

    /// The backend a stored path lives on.
    pub fn backend_for(&self, path: &str) -> &Arc<dyn Storage> {
        match &self.primary {
            Some(primary) if path.starts_with(PRIMARY_BLOCK_PREFIX) => primary,
            _ => &self.fallback,
        }
    }

    pub fn url(&self, path: &str) -> String {
        self.backend_for(path).url(path)
    }

    /// Replace stored image paths in top-level props with URLs.
    pub fn materialize_props(&self, props: &mut Props) {
        for value in props.values_mut() {
            if let Value::String(s) = value {
                if is_stored_image_path(s) {
                    *s = self.url(s);
                }
            }
        }
    }

    /// Turn URLs this server handed out back into stored paths.
    pub fn relativize_props(&self, props: &mut Props) {
        let bases: Vec<String> = [self.primary.as_ref(), Some(&self.fallback)]
            .into_iter()
            .flatten()
            .map(|backend| backend.url(""))
            .collect();

        for value in props.values_mut() {
            if let Value::String(s) = value {
                let relative = bases
                    .iter()
                    .filter(|base| !base.is_empty())
                    .find_map(|base| s.strip_prefix(base.as_str()))
                    .filter(|path| is_stored_image_path(path))
                    .map(str::to_string);
                if let Some(path) = relative {
                    *s = path;
                }
            }
        }
    }
}

/// MIME type of a stored image, by extension.
pub fn content_type_for(path: &str) -> Option<&'static str> {
    match podium_core::upload::extension_of(path)?.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

/// Whether `value` looks like a path written by the upload worker or the
/// favicon handler: `blocks/{website}/{block}/{file}.{img}` and friends.
pub fn is_stored_image_path(value: &str) -> bool {
    let rest = [PRIMARY_BLOCK_PREFIX, FALLBACK_BLOCK_PREFIX, FAVICON_PREFIX]
        .iter()
        .find_map(|prefix| value.strip_prefix(prefix));
    let Some(rest) = rest else {
        return false;
    };

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty() || *s == "..") {
        return false;
    }
    if !segments[0].bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    podium_core::upload::extension_of(value)
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn storage(dir: &TempDir, with_primary: bool) -> StorageSet {
        let temp = Arc::new(LocalDisk::new(dir.path().join("temp"), "http://x.test/temp"));
        let fallback: Arc<dyn Storage> = Arc::new(LocalDisk::new(
            dir.path().join("public"),
            "http://localhost:3040/storage",
        ));
        let primary: Option<Arc<dyn Storage>> = with_primary.then(|| {
            Arc::new(LocalDisk::new(dir.path().join("s3"), "https://cdn.test")) as Arc<dyn Storage>
        });
        StorageSet::new(temp, primary, fallback)
    }

    #[test]
    fn test_stored_image_paths() {
        assert!(is_stored_image_path("blocks/3/42/ab12cd34-1700000000.png"));
        assert!(is_stored_image_path("block-images/3/42/imageUrl-1700000000.JPG"));
        assert!(is_stored_image_path("favicons/3/1700000000-abcd.ico"));
        assert!(!is_stored_image_path("blocks/3/42/notes.txt"));
        assert!(!is_stored_image_path("blocks/x/42/a.png"));
        assert!(!is_stored_image_path("https://example.com/blocks/3/42/a.png"));
        assert!(!is_stored_image_path("blocks/3/../../etc/a.png"));
    }

    #[test]
    fn test_url_routing_by_prefix() {
        let dir = TempDir::new().unwrap();
        let with_primary = storage(&dir, true);
        assert_eq!(
            with_primary.url("blocks/3/42/a.png"),
            "https://cdn.test/blocks/3/42/a.png"
        );
        assert_eq!(
            with_primary.url("block-images/3/42/imageUrl-1.png"),
            "http://localhost:3040/storage/block-images/3/42/imageUrl-1.png"
        );

        let without = storage(&dir, false);
        assert_eq!(
            without.url("blocks/3/42/a.png"),
            "http://localhost:3040/storage/blocks/3/42/a.png"
        );
    }

    #[test]
    fn test_materialize_then_relativize() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, true);
        let mut props: Props = serde_json::from_value(json!({
            "imageUrl": "blocks/3/42/a.png",
            "logo": "block-images/3/42/logo-1.png",
            "headingText": "blocks/3/42/a.png is my favourite file"
        }))
        .unwrap();
        let original = props.clone();

        storage.materialize_props(&mut props);
        assert_eq!(props["imageUrl"], json!("https://cdn.test/blocks/3/42/a.png"));
        assert_eq!(
            props["logo"],
            json!("http://localhost:3040/storage/block-images/3/42/logo-1.png")
        );

        storage.relativize_props(&mut props);
        assert_eq!(props, original);
    }
}
