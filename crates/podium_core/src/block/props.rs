//! The props bag carried by every block, and the reserved key conventions
//! used to transport file uploads through it.
//!
//! Three spellings may refer to the same logical prop `k`:
//!
//! - `k`: the concrete value (for files: a storage path)
//! - `_pendingFile_k`: a file is attached to this save request for `k`
//! - `_k_uploadingToS3`: the file was accepted and is being moved to durable storage
//!
//! Markers are transport artifacts. A persisted props map holds at most one of
//! the three for any `k`. `_k_uploadFailed` records a permanently failed upload.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{PodiumError, Result};

/// Open mapping from prop names to heterogeneous values, in insertion order.
pub type Props = IndexMap<String, Value>;

/// Prefix of a key that references a file attached to the save request.
pub const PENDING_FILE_PREFIX: &str = "_pendingFile_";

const UPLOADING_SUFFIX: &str = "_uploadingToS3";
const FAILED_SUFFIX: &str = "_uploadFailed";

/// `imageUrl` -> `_pendingFile_imageUrl`
pub fn pending_file_key(prop: &str) -> String {
    format!("{}{}", PENDING_FILE_PREFIX, prop)
}

/// `_pendingFile_imageUrl` -> `Some("imageUrl")`
pub fn pending_target(key: &str) -> Option<&str> {
    key.strip_prefix(PENDING_FILE_PREFIX)
        .filter(|target| !target.is_empty())
}

/// `imageUrl` -> `_imageUrl_uploadingToS3`
pub fn uploading_flag_key(prop: &str) -> String {
    format!("_{}{}", prop, UPLOADING_SUFFIX)
}

/// `_imageUrl_uploadingToS3` -> `Some("imageUrl")`
pub fn uploading_target(key: &str) -> Option<&str> {
    key.strip_prefix('_')?
        .strip_suffix(UPLOADING_SUFFIX)
        .filter(|target| !target.is_empty())
}

/// `imageUrl` -> `_imageUrl_uploadFailed`
pub fn failed_flag_key(prop: &str) -> String {
    format!("_{}{}", prop, FAILED_SUFFIX)
}

/// `_imageUrl_uploadFailed` -> `Some("imageUrl")`
pub fn failed_target(key: &str) -> Option<&str> {
    key.strip_prefix('_')?
        .strip_suffix(FAILED_SUFFIX)
        .filter(|target| !target.is_empty())
}

/// Whether a key is one of the reserved transport spellings.
pub fn is_transport_key(key: &str) -> bool {
    pending_target(key).is_some() || uploading_target(key).is_some() || failed_target(key).is_some()
}

/// Convert top-level `"true"` / `"false"` strings to booleans.
///
/// Multipart bodies carry every scalar as text.
pub fn normalize_string_booleans(props: &mut Props) {
    for value in props.values_mut() {
        let replacement = match value {
            Value::String(s) if s.as_str() == "true" => Some(Value::Bool(true)),
            Value::String(s) if s.as_str() == "false" => Some(Value::Bool(false)),
            _ => None,
        };
        if let Some(replacement) = replacement {
            *value = replacement;
        }
    }
}

/// Remove `blob:` preview URLs, which only exist inside the editing browser.
pub fn strip_blob_previews(props: &mut Props) -> usize {
    let before = props.len();
    props.retain(|_, value| !matches!(value, Value::String(s) if s.starts_with("blob:")));
    before - props.len()
}

/// Set a concrete value for `prop`, clearing its upload markers.
pub fn set_resolved(props: &mut Props, prop: &str, value: Value) {
    props.shift_remove(&pending_file_key(prop));
    props.shift_remove(&uploading_flag_key(prop));
    props.shift_remove(&failed_flag_key(prop));
    props.insert(prop.to_string(), value);
}

/// Flag `prop` as uploading, clearing its concrete value and pending marker.
pub fn set_uploading(props: &mut Props, prop: &str) {
    props.shift_remove(prop);
    props.shift_remove(&pending_file_key(prop));
    props.shift_remove(&failed_flag_key(prop));
    props.insert(uploading_flag_key(prop), Value::Bool(true));
}

/// Flag `prop` as permanently failed, clearing its uploading flag.
pub fn set_failed(props: &mut Props, prop: &str) {
    props.shift_remove(&uploading_flag_key(prop));
    props.insert(failed_flag_key(prop), Value::Bool(true));
}

/// Verify that no prop carries more than one of: a concrete value, a pending
/// file marker, an uploading flag.
pub fn check_exclusive(props: &Props) -> Result<()> {
    for key in props.keys() {
        let target = pending_target(key).or_else(|| uploading_target(key));
        let Some(target) = target else {
            continue;
        };
        let spellings = [
            props.contains_key(target),
            props.contains_key(&pending_file_key(target)),
            props.contains_key(&uploading_flag_key(target)),
        ];
        if spellings.iter().filter(|present| **present).count() > 1 {
            return Err(PodiumError::Validation(format!(
                "prop '{}' carries more than one of value, pending file, uploading flag",
                target
            )));
        }
    }
    Ok(())
}

/// Reconcile upload flags sent back by a client against the persisted props
/// of the same block.
///
/// Clients echo the canonical props they last received, so an incoming
/// uploading flag may be stale: the upload finished (or failed) after the
/// client's last reload. A flag is kept only while the persisted record still
/// carries it; otherwise the persisted outcome for that prop wins.
/// `fresh` names props that this very request is uploading.
pub fn settle_upload_flags(incoming: &mut Props, persisted: Option<&Props>, fresh: &[String]) {
    let flagged: Vec<String> = incoming
        .keys()
        .filter_map(|key| uploading_target(key).map(str::to_string))
        .filter(|target| !fresh.contains(target))
        .collect();

    for target in flagged {
        let flag = uploading_flag_key(&target);
        let still_uploading = persisted.is_some_and(|p| p.contains_key(&flag));
        if still_uploading {
            incoming.shift_remove(&target);
            continue;
        }

        incoming.shift_remove(&flag);
        if let Some(persisted) = persisted {
            if let Some(value) = persisted.get(&target) {
                incoming
                    .entry(target.clone())
                    .or_insert_with(|| value.clone());
            }
            let failed = failed_flag_key(&target);
            if let Some(value) = persisted.get(&failed) {
                if !incoming.contains_key(&target) {
                    incoming.insert(failed, value.clone());
                }
            }
        }
    }

    // A concrete value supersedes an earlier failure
    let stale_failures: Vec<String> = incoming
        .keys()
        .filter(|key| failed_target(key).is_some_and(|target| incoming.contains_key(target)))
        .cloned()
        .collect();
    for key in stale_failures {
        incoming.shift_remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Props {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_marker_key_round_trip() {
        assert_eq!(pending_file_key("imageUrl"), "_pendingFile_imageUrl");
        assert_eq!(pending_target("_pendingFile_imageUrl"), Some("imageUrl"));
        assert_eq!(pending_target("_pendingFile_"), None);
        assert_eq!(uploading_flag_key("imageUrl"), "_imageUrl_uploadingToS3");
        assert_eq!(uploading_target("_imageUrl_uploadingToS3"), Some("imageUrl"));
        assert_eq!(uploading_target("imageUrl"), None);
        assert!(is_transport_key("_logo_uploadFailed"));
        assert!(!is_transport_key("headingText"));
    }

    #[test]
    fn test_normalize_string_booleans_only_top_level() {
        let mut p = props(json!({
            "overlayEnabled": "true",
            "showDays": "false",
            "title": "truthy",
            "nested": {"flag": "true"}
        }));
        normalize_string_booleans(&mut p);
        assert_eq!(p["overlayEnabled"], json!(true));
        assert_eq!(p["showDays"], json!(false));
        assert_eq!(p["title"], json!("truthy"));
        assert_eq!(p["nested"], json!({"flag": "true"}));
    }

    #[test]
    fn test_strip_blob_previews() {
        let mut p = props(json!({
            "imageUrl": "blob:http://localhost/abc",
            "altText": "Stage"
        }));
        assert_eq!(strip_blob_previews(&mut p), 1);
        assert!(!p.contains_key("imageUrl"));
    }

    #[test]
    fn test_check_exclusive() {
        let ok = props(json!({"imageUrl": "blocks/1/2/a.png", "altText": "x"}));
        assert!(check_exclusive(&ok).is_ok());

        let flagged = props(json!({"_imageUrl_uploadingToS3": true}));
        assert!(check_exclusive(&flagged).is_ok());

        let both = props(json!({"imageUrl": "a.png", "_imageUrl_uploadingToS3": true}));
        assert!(check_exclusive(&both).is_err());
    }

    #[test]
    fn test_set_resolved_clears_markers() {
        let mut p = props(json!({"_imageUrl_uploadingToS3": true, "altText": "x"}));
        set_resolved(&mut p, "imageUrl", json!("blocks/1/2/a.png"));
        assert_eq!(p["imageUrl"], json!("blocks/1/2/a.png"));
        assert!(!p.contains_key("_imageUrl_uploadingToS3"));
        assert!(check_exclusive(&p).is_ok());
    }

    #[test]
    fn test_settle_keeps_flag_while_upload_in_flight() {
        let persisted = props(json!({"_imageUrl_uploadingToS3": true}));
        let mut incoming = props(json!({"_imageUrl_uploadingToS3": true, "altText": "new"}));
        settle_upload_flags(&mut incoming, Some(&persisted), &[]);
        assert_eq!(incoming["_imageUrl_uploadingToS3"], json!(true));
        assert_eq!(incoming["altText"], json!("new"));
    }

    #[test]
    fn test_settle_adopts_committed_value() {
        let persisted = props(json!({"imageUrl": "blocks/3/42/ab-1.png"}));
        let mut incoming = props(json!({"_imageUrl_uploadingToS3": true}));
        settle_upload_flags(&mut incoming, Some(&persisted), &[]);
        assert!(!incoming.contains_key("_imageUrl_uploadingToS3"));
        assert_eq!(incoming["imageUrl"], json!("blocks/3/42/ab-1.png"));
    }

    #[test]
    fn test_settle_drops_flags_on_new_blocks() {
        let mut incoming = props(json!({"_imageUrl_uploadingToS3": true}));
        settle_upload_flags(&mut incoming, None, &[]);
        assert!(incoming.is_empty());
    }

    #[test]
    fn test_settle_leaves_fresh_uploads_alone() {
        let mut incoming = props(json!({"_imageUrl_uploadingToS3": true}));
        settle_upload_flags(&mut incoming, None, &["imageUrl".to_string()]);
        assert_eq!(incoming["_imageUrl_uploadingToS3"], json!(true));
    }
}
