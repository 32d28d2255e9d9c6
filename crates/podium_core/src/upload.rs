//! Pending-file extraction and the upload task model.
//!
//! A save request may attach files to block props. For each
//! `_pendingFile_{prop}` key whose file is present in the request, the key is
//! replaced by an uploading flag and a [`PendingUpload`] is emitted. Once the
//! owning block has a durable id, each pending upload becomes an
//! [`UploadTask`] that a worker moves to durable storage.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::block::props::{
    normalize_string_booleans, pending_file_key, pending_target, set_uploading,
};
use crate::block::{Block, BlockContent, Props};
use crate::error::{PodiumError, Result};
use crate::reconcile::PreparedBlock;

/// Image extensions accepted for block uploads.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Default cap on a single uploaded file (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// A file attached to a save request.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Form field the file arrived under.
    pub field: String,
    /// Client-side file name, used for the extension only.
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Lowercased extension of the client file name.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

/// Form field name carrying the file for `prop` of the block at `index`.
pub fn attachment_field(index: usize, prop: &str) -> String {
    format!("blocks.{}.props.{}", index, pending_file_key(prop))
}

/// Files of one request, addressed by form field.
#[derive(Debug, Default, Clone)]
pub struct AttachmentSet {
    files: HashMap<String, Attachment>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attachment: Attachment) {
        self.files.insert(attachment.field.clone(), attachment);
    }

    /// Remove and return the file sent under `field`.
    pub fn take(&mut self, field: &str) -> Option<Attachment> {
        self.files.remove(field)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.files.values()
    }
}

impl FromIterator<Attachment> for AttachmentSet {
    fn from_iter<I: IntoIterator<Item = Attachment>>(iter: I) -> Self {
        let mut set = AttachmentSet::new();
        for attachment in iter {
            set.insert(attachment);
        }
        set
    }
}

/// A file extracted from a block's props, waiting for the block's durable id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    /// Position of the owning block in the incoming list.
    pub block_index: usize,
    pub prop_name: String,
    pub attachment: Attachment,
}

/// Replace pending-file markers in `props` by uploading flags.
///
/// A marker whose file is missing from the request is dropped without a
/// flag or task.
pub fn extract_pending_uploads(
    block_index: usize,
    props: &mut Props,
    attachments: &mut AttachmentSet,
) -> Vec<PendingUpload> {
    let targets: Vec<String> = props
        .keys()
        .filter_map(|key| pending_target(key).map(str::to_string))
        .collect();

    let mut uploads = Vec::new();
    for prop_name in targets {
        match attachments.take(&attachment_field(block_index, &prop_name)) {
            Some(attachment) => {
                set_uploading(props, &prop_name);
                uploads.push(PendingUpload {
                    block_index,
                    prop_name,
                    attachment,
                });
            }
            None => {
                log::debug!(
                    "dropping pending file marker for '{}' on block {}: no file attached",
                    prop_name,
                    block_index
                );
                props.shift_remove(&pending_file_key(&prop_name));
            }
        }
    }
    uploads
}

/// Reject files that are not png/jpg/jpeg images or exceed `max_bytes`.
pub fn validate_attachment(attachment: &Attachment, max_bytes: usize) -> Result<()> {
    let extension = attachment.extension().unwrap_or_default();
    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PodiumError::Validation(format!(
            "{} must be an image of type: {}",
            attachment.field,
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    if attachment.bytes.is_empty() {
        return Err(PodiumError::Validation(format!(
            "{} is empty",
            attachment.field
        )));
    }
    if attachment.bytes.len() > max_bytes {
        return Err(PodiumError::Validation(format!(
            "{} may not be greater than {} kilobytes",
            attachment.field,
            max_bytes / 1024
        )));
    }
    Ok(())
}

/// Turn an incoming block into a [`PreparedBlock`] plus the uploads it carries.
///
/// Normalizes text booleans, extracts pending files, validates them and
/// checks the remaining props against the block type's schema.
pub fn prepare_block(
    block_index: usize,
    block: Block,
    attachments: &mut AttachmentSet,
    max_bytes: usize,
) -> Result<(PreparedBlock, Vec<PendingUpload>)> {
    let mut prepared = PreparedBlock::from_block(block);
    normalize_string_booleans(&mut prepared.props);

    let uploads = extract_pending_uploads(block_index, &mut prepared.props, attachments);
    for upload in &uploads {
        validate_attachment(&upload.attachment, max_bytes)?;
    }
    BlockContent::parse(&prepared.block_type, &prepared.props)?;
    prepared.uploads = uploads.iter().map(|u| u.prop_name.clone()).collect();
    Ok((prepared, uploads))
}

/// A unit of work moving one file to durable storage and patching one prop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub website_id: i64,
    pub block_id: i64,
    /// Location in the temporary storage.
    pub temp_path: String,
    /// Desired location in the primary durable storage.
    pub destination_path: String,
    pub prop_name: String,
}

impl UploadTask {
    pub fn extension(&self) -> String {
        extension_of(&self.temp_path).unwrap_or_else(|| "bin".to_string())
    }
}

/// Lifecycle of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Queued,
    Uploading,
    Committed,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Committed | UploadState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// A retried attempt goes from `Uploading` back to `Uploading`.
    pub fn can_become(self, next: UploadState) -> bool {
        matches!(
            (self, next),
            (UploadState::Queued, UploadState::Uploading)
                | (UploadState::Uploading, UploadState::Uploading)
                | (UploadState::Uploading, UploadState::Committed)
                | (UploadState::Uploading, UploadState::Failed)
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Queued => "queued",
            UploadState::Uploading => "uploading",
            UploadState::Committed => "committed",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a committed upload landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// The prop now holds `reference`.
    Applied { reference: String },
    /// The block was deleted while the file was in flight; nothing written.
    BlockMissing,
}

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Committed(Commit),
    Failed(String),
    Retryable { attempt: u32, reason: String },
}

impl UploadOutcome {
    pub fn state(&self) -> UploadState {
        match self {
            UploadOutcome::Committed(_) => UploadState::Committed,
            UploadOutcome::Failed(_) => UploadState::Failed,
            UploadOutcome::Retryable { .. } => UploadState::Uploading,
        }
    }
}

/// Retry, backoff and timeout settings for upload tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget of a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Classify a failed attempt.
    pub fn on_failure(&self, attempt: u32, reason: impl Into<String>) -> UploadOutcome {
        let reason = reason.into();
        if attempt >= self.max_attempts {
            UploadOutcome::Failed(reason)
        } else {
            UploadOutcome::Retryable { attempt, reason }
        }
    }
}

/// Lowercased extension of a file name or path.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Eight random hex characters for unique file names.
pub fn random_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `block-{block}-{prop}-{token}.{ext}`
pub fn temp_file_name(block_id: i64, prop_name: &str, token: &str, extension: &str) -> String {
    format!("block-{}-{}-{}.{}", block_id, prop_name, token, extension)
}

/// `blocks/{website}/{block}/{token}-{unix}.{ext}`
pub fn primary_destination(
    website_id: i64,
    block_id: i64,
    token: &str,
    unix: i64,
    extension: &str,
) -> String {
    format!(
        "blocks/{}/{}/{}-{}.{}",
        website_id, block_id, token, unix, extension
    )
}

/// `block-images/{website}/{block}/{prop}-{unix}.{ext}`
pub fn fallback_destination(
    website_id: i64,
    block_id: i64,
    prop_name: &str,
    unix: i64,
    extension: &str,
) -> String {
    format!(
        "block-images/{}/{}/{}-{}.{}",
        website_id, block_id, prop_name, unix, extension
    )
}
