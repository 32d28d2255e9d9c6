//! Builder session state: the editable block list of one open builder,
//! its undo history and the save state machine.
//!
//! The session does no I/O by itself. A save is split into
//! [`BuilderSession::begin_save`], which produces the request, and
//! [`BuilderSession::finish_save`], which folds the server's answer back in.
//! Edits made while a save is in flight are kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use ts_rs::TS;

use super::api::{BuilderApi, SaveRequest, SaveResponse};
use super::history::{DEFAULT_HISTORY_CAP, History};
use crate::block::props::{
    failed_flag_key, is_transport_key, pending_file_key, pending_target, set_resolved,
    set_uploading, strip_blob_previews, uploading_flag_key,
};
use crate::block::{Block, BlockId, BlockType, Props};
use crate::error::{PodiumError, Result, SerializableError};
use crate::notify::ChangeNotification;
use crate::upload::{Attachment, attachment_field};

/// Save lifecycle: `Idle -> Saving -> (Saved -> Idle | Error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SaveState {
    Idle,
    Saving,
    Saved,
    Error,
}

/// Timing knobs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub auto_save_interval: Duration,
    /// How long `Saved` is shown before returning to `Idle`.
    pub saved_display_delay: Duration,
    pub history_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_save_interval: Duration::from_secs(60),
            saved_display_delay: Duration::from_millis(1200),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

/// Props of the block currently open in the editor panel.
#[derive(Debug, Clone, PartialEq)]
pub struct EditBuffer {
    pub block_id: BlockId,
    pub props: Props,
}

/// What the UI needs to render the toolbar.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionStatus {
    pub state: SaveState,
    pub dirty: bool,
    pub can_undo: bool,
    pub can_redo: bool,
    pub is_published: bool,
    pub last_error: Option<SerializableError>,
    #[ts(type = "string | null")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PendingFile {
    block_id: BlockId,
    prop_name: String,
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
    seq: u64,
}

#[derive(Debug, Clone)]
struct InFlight {
    revision: u64,
    sent_ids: Vec<BlockId>,
    /// (block id at send time, prop, file sequence number)
    sent_files: Vec<(BlockId, String, u64)>,
}

/// One open builder.
#[derive(Debug)]
pub struct BuilderSession {
    website_id: i64,
    blocks: Vec<Block>,
    history: History<Vec<Block>>,
    state: SaveState,
    dirty: bool,
    revision: u64,
    in_flight: Option<InFlight>,
    pending_files: Vec<PendingFile>,
    next_file_seq: u64,
    /// Notifications received while a save is in flight, replayed over
    /// the server's answer.
    held_notifications: Vec<ChangeNotification>,
    editing: Option<EditBuffer>,
    saved_at: Option<Instant>,
    next_auto_save: Instant,
    last_error: Option<SerializableError>,
    last_updated: Option<DateTime<Utc>>,
    is_published: bool,
    config: SessionConfig,
}

impl BuilderSession {
    /// Open a session on the blocks loaded from the server.
    pub fn new(website_id: i64, blocks: Vec<Block>, config: SessionConfig, now: Instant) -> Self {
        Self {
            website_id,
            blocks,
            history: History::with_cap(config.history_cap),
            state: SaveState::Idle,
            dirty: false,
            revision: 0,
            in_flight: None,
            pending_files: Vec::new(),
            next_file_seq: 0,
            held_notifications: Vec::new(),
            editing: None,
            saved_at: None,
            next_auto_save: now + config.auto_save_interval,
            last_error: None,
            last_updated: None,
            is_published: false,
            config,
        }
    }

    /// Replace the whole state with freshly loaded server data.
    pub fn initialize(
        &mut self,
        blocks: Vec<Block>,
        is_published: bool,
        last_updated: Option<DateTime<Utc>>,
    ) {
        self.blocks = blocks;
        self.history.clear();
        self.pending_files.clear();
        self.held_notifications.clear();
        self.editing = None;
        self.dirty = false;
        self.state = SaveState::Idle;
        self.last_error = None;
        self.is_published = is_published;
        self.last_updated = last_updated;
        self.revision += 1;
    }

    pub fn website_id(&self) -> i64 {
        self.website_id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_saving(&self) -> bool {
        self.state == SaveState::Saving
    }

    pub fn is_published(&self) -> bool {
        self.is_published
    }

    pub fn last_error(&self) -> Option<&SerializableError> {
        self.last_error.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn editing(&self) -> Option<&EditBuffer> {
        self.editing.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            dirty: self.dirty,
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            is_published: self.is_published,
            last_error: self.last_error.clone(),
            last_updated: self.last_updated,
        }
    }

    fn index_of(&self, id: &BlockId) -> Result<usize> {
        self.blocks
            .iter()
            .position(|b| &b.id == id)
            .ok_or_else(|| PodiumError::NotFound(format!("Block {}", id)))
    }

    /// Snapshot the current list before a mutation.
    fn record(&mut self) {
        self.history.push(self.blocks.clone());
        self.touch();
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    fn fresh_transient_id(&self, block_type: &BlockType) -> BlockId {
        let base = BlockId::transient_for(block_type.as_str());
        if self.block(&base).is_none() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = BlockId::Transient(format!("{}-{}", base, n));
            if self.block(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add a block with default props at `index` (appended when `None`).
    pub fn add_block(&mut self, block_type: BlockType, index: Option<usize>) -> BlockId {
        let mut block = Block::with_defaults(block_type);
        block.id = self.fresh_transient_id(&block.block_type);
        let id = block.id.clone();

        self.record();
        let index = index.unwrap_or(self.blocks.len()).min(self.blocks.len());
        self.blocks.insert(index, block);
        id
    }

    /// Shallow-merge `patch` into a block's props.
    ///
    /// Setting a concrete value for a prop discards a pending file or upload
    /// flag for that prop.
    pub fn update_block(&mut self, id: &BlockId, patch: Props) -> Result<()> {
        let index = self.index_of(id)?;
        self.record();

        let props = &mut self.blocks[index].props;
        for (key, value) in patch {
            if !is_transport_key(&key) {
                props.shift_remove(&pending_file_key(&key));
                props.shift_remove(&uploading_flag_key(&key));
                props.shift_remove(&failed_flag_key(&key));
            }
            props.insert(key, value);
        }
        Ok(())
    }

    pub fn delete_block(&mut self, id: &BlockId) -> Result<Block> {
        let index = self.index_of(id)?;
        self.record();
        if self.editing.as_ref().is_some_and(|e| &e.block_id == id) {
            self.editing = None;
        }
        // Files stay until a save shows nothing refers to them; undo may
        // bring the block back.
        Ok(self.blocks.remove(index))
    }

    pub fn move_block(&mut self, id: &BlockId, to: usize) -> Result<()> {
        let from = self.index_of(id)?;
        let to = to.min(self.blocks.len() - 1);
        if from == to {
            return Ok(());
        }
        self.record();
        let block = self.blocks.remove(from);
        self.blocks.insert(to, block);
        Ok(())
    }

    /// Attach a file to `prop_name`; it is sent with the next save.
    pub fn attach_file(
        &mut self,
        id: &BlockId,
        prop_name: &str,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let index = self.index_of(id)?;
        self.record();

        let props = &mut self.blocks[index].props;
        props.shift_remove(prop_name);
        props.shift_remove(&uploading_flag_key(prop_name));
        props.shift_remove(&failed_flag_key(prop_name));
        props.insert(
            pending_file_key(prop_name),
            Value::String(filename.to_string()),
        );

        self.pending_files
            .retain(|f| !(&f.block_id == id && f.prop_name == prop_name));
        self.next_file_seq += 1;
        self.pending_files.push(PendingFile {
            block_id: id.clone(),
            prop_name: prop_name.to_string(),
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            bytes,
            seq: self.next_file_seq,
        });
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        if !self.history.can_undo() {
            return false;
        }
        if let Some(previous) = self.history.undo(self.blocks.clone()) {
            self.blocks = previous;
            self.after_history_step();
        }
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.history.can_redo() {
            return false;
        }
        if let Some(next) = self.history.redo(self.blocks.clone()) {
            self.blocks = next;
            self.after_history_step();
        }
        true
    }

    fn after_history_step(&mut self) {
        self.touch();
        if let Some(editing) = &self.editing {
            if self.block(&editing.block_id).is_none() {
                self.editing = None;
            }
        }
    }

    // ========================================================================
    // Edit buffer
    // ========================================================================

    pub fn begin_editing(&mut self, id: &BlockId) -> Result<()> {
        let index = self.index_of(id)?;
        self.editing = Some(EditBuffer {
            block_id: id.clone(),
            props: self.blocks[index].props.clone(),
        });
        Ok(())
    }

    /// Merge `patch` into the edit buffer without touching the block list.
    pub fn update_editing(&mut self, patch: Props) -> Result<()> {
        let editing = self
            .editing
            .as_mut()
            .ok_or_else(|| PodiumError::Validation("no block is being edited".to_string()))?;
        editing.props.extend(patch);
        Ok(())
    }

    /// Apply the edit buffer to its block as one undoable update.
    pub fn commit_editing(&mut self) -> Result<()> {
        let editing = self
            .editing
            .take()
            .ok_or_else(|| PodiumError::Validation("no block is being edited".to_string()))?;
        let current = self
            .block(&editing.block_id)
            .map(|b| b.props.clone())
            .ok_or_else(|| PodiumError::NotFound(format!("Block {}", editing.block_id)))?;

        let patch: Props = editing
            .props
            .into_iter()
            .filter(|(key, value)| current.get(key) != Some(value))
            .collect();
        if patch.is_empty() {
            return Ok(());
        }
        self.update_block(&editing.block_id, patch)
    }

    pub fn discard_editing(&mut self) {
        self.editing = None;
    }

    // ========================================================================
    // Out-of-band updates
    // ========================================================================

    /// Apply a processed-upload notification.
    ///
    /// Only the named prop changes; history and the dirty flag are untouched.
    /// While a save is in flight the event is also held and replayed once the
    /// server's answer is folded in, since the block may still carry its
    /// transient id or the answer may predate the upload. Returns `false`
    /// when the block is unknown and no save is in flight.
    pub fn apply_notification(&mut self, event: &ChangeNotification) -> bool {
        let applied = self.resolve_prop(event);
        if self.state == SaveState::Saving {
            self.held_notifications.push(event.clone());
            return true;
        }
        applied
    }

    fn resolve_prop(&mut self, event: &ChangeNotification) -> bool {
        let id = BlockId::parse(&event.block_id);
        let value = Value::String(event.image_url.clone());

        if let Some(editing) = self.editing.as_mut().filter(|e| e.block_id == id) {
            set_resolved(&mut editing.props, &event.prop_name, value.clone());
        }
        match self.blocks.iter_mut().find(|b| b.id == id) {
            Some(block) => {
                set_resolved(&mut block.props, &event.prop_name, value);
                true
            }
            None => false,
        }
    }

    fn replay_held_notifications(&mut self) {
        for event in std::mem::take(&mut self.held_notifications) {
            if !self.resolve_prop(&event) {
                log::debug!(
                    "dropping notification for unknown block {} of website {}",
                    event.block_id,
                    self.website_id
                );
            }
        }
    }

    /// Forget attached files no block in the list or history refers to.
    fn prune_pending_files(&mut self) {
        let referenced: HashSet<(BlockId, String)> = std::iter::once(&self.blocks)
            .chain(self.history.iter())
            .flatten()
            .flat_map(|block| {
                block
                    .props
                    .keys()
                    .filter_map(|k| pending_target(k))
                    .map(move |prop| (block.id.clone(), prop.to_string()))
            })
            .collect();
        self.pending_files
            .retain(|f| referenced.contains(&(f.block_id.clone(), f.prop_name.clone())));
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Start a save. Returns `None` while another save is in flight.
    pub fn begin_save(&mut self) -> Option<SaveRequest> {
        if self.state == SaveState::Saving {
            log::debug!("save suppressed: another save is in flight");
            return None;
        }

        let mut blocks = self.blocks.clone();
        let mut attachments = Vec::new();
        let mut sent_files = Vec::new();
        for (index, block) in blocks.iter_mut().enumerate() {
            strip_blob_previews(&mut block.props);
            let targets: Vec<String> = block
                .props
                .keys()
                .filter_map(|k| pending_target(k).map(str::to_string))
                .collect();
            for prop_name in targets {
                let file = self
                    .pending_files
                    .iter()
                    .find(|f| f.block_id == block.id && f.prop_name == prop_name);
                if let Some(file) = file {
                    attachments.push(Attachment {
                        field: attachment_field(index, &prop_name),
                        filename: file.filename.clone(),
                        content_type: file.content_type.clone(),
                        bytes: file.bytes.clone(),
                    });
                    sent_files.push((block.id.clone(), prop_name, file.seq));
                }
            }
        }

        self.in_flight = Some(InFlight {
            revision: self.revision,
            sent_ids: blocks.iter().map(|b| b.id.clone()).collect(),
            sent_files,
        });
        self.state = SaveState::Saving;

        Some(SaveRequest {
            blocks,
            attachments,
            theme: None,
            styling: None,
        })
    }

    /// Fold the outcome of a save back into the session.
    ///
    /// On success the server's canonical list replaces the local one, unless
    /// the user kept editing meanwhile: then only the newly assigned durable
    /// ids are adopted and the session stays dirty. On failure local edits
    /// are kept and the error is returned to the caller.
    pub fn finish_save(&mut self, result: Result<SaveResponse>, now: Instant) -> Result<()> {
        let in_flight = self.in_flight.take();
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                log::warn!("save of website {} failed: {}", self.website_id, e);
                self.held_notifications.clear();
                self.state = SaveState::Error;
                self.last_error = Some(e.to_serializable());
                return Err(e);
            }
        };

        let Some(in_flight) = in_flight else {
            // Not started through begin_save; trust the server.
            self.blocks = response.blocks;
            self.dirty = false;
            self.mark_saved(response.updated_at, now);
            self.replay_held_notifications();
            self.prune_pending_files();
            return Ok(());
        };

        let id_map: HashMap<BlockId, BlockId> =
            if in_flight.sent_ids.len() == response.blocks.len() {
                in_flight
                    .sent_ids
                    .iter()
                    .zip(response.blocks.iter())
                    .filter(|(sent, canonical)| *sent != &canonical.id)
                    .map(|(sent, canonical)| (sent.clone(), canonical.id.clone()))
                    .collect()
            } else {
                HashMap::new()
            };

        // Files that went out with this request are now owned by the server
        for (block_id, prop_name, seq) in &in_flight.sent_files {
            let before = self.pending_files.len();
            self.pending_files.retain(|f| {
                !(&f.block_id == block_id && &f.prop_name == prop_name && f.seq == *seq)
            });
            let sent_still_current = self.pending_files.len() < before;
            if sent_still_current && self.revision != in_flight.revision {
                let id = id_map.get(block_id).unwrap_or(block_id).clone();
                let marker = pending_file_key(prop_name);
                if let Some(block) = self
                    .blocks
                    .iter_mut()
                    .find(|b| b.id == *block_id && b.props.contains_key(&marker))
                {
                    set_uploading(&mut block.props, prop_name);
                    block.id = id;
                }
            }
        }

        if self.revision == in_flight.revision {
            self.blocks = response.blocks;
            self.dirty = false;
        } else {
            remap_ids(&mut self.blocks, &id_map);
        }
        self.history.for_each_mut(|snapshot| remap_ids(snapshot, &id_map));
        for file in &mut self.pending_files {
            if let Some(id) = id_map.get(&file.block_id) {
                file.block_id = id.clone();
            }
        }
        if let Some(editing) = self.editing.as_mut() {
            if let Some(id) = id_map.get(&editing.block_id) {
                editing.block_id = id.clone();
            }
        }

        self.mark_saved(response.updated_at, now);
        self.replay_held_notifications();
        self.prune_pending_files();
        Ok(())
    }

    fn mark_saved(&mut self, updated_at: DateTime<Utc>, now: Instant) {
        self.state = SaveState::Saved;
        self.saved_at = Some(now);
        self.last_error = None;
        self.last_updated = Some(updated_at);
    }

    /// Advance timers. Returns a save request when auto-save fires.
    pub fn poll(&mut self, now: Instant) -> Option<SaveRequest> {
        if self.state == SaveState::Saved {
            let shown_since = self.saved_at.unwrap_or(now);
            if now.saturating_duration_since(shown_since) >= self.config.saved_display_delay {
                self.state = SaveState::Idle;
                self.saved_at = None;
            }
        }

        if now < self.next_auto_save {
            return None;
        }
        self.next_auto_save = now + self.config.auto_save_interval;
        if self.dirty && self.state != SaveState::Saving {
            log::debug!("auto-saving website {}", self.website_id);
            return self.begin_save();
        }
        None
    }

    /// Run a full save cycle against `api`. Returns `Ok(false)` if suppressed.
    pub async fn save<A: BuilderApi + ?Sized>(&mut self, api: &A, now: Instant) -> Result<bool> {
        let Some(request) = self.begin_save() else {
            return Ok(false);
        };
        let result = api.save(self.website_id, &request).await;
        self.finish_save(result, now).map(|_| true)
    }

    pub async fn publish<A: BuilderApi + ?Sized>(&mut self, api: &A) -> Result<()> {
        self.set_published(api, true).await
    }

    pub async fn unpublish<A: BuilderApi + ?Sized>(&mut self, api: &A) -> Result<()> {
        self.set_published(api, false).await
    }

    async fn set_published<A: BuilderApi + ?Sized>(&mut self, api: &A, published: bool) -> Result<()> {
        match api.set_published(self.website_id, published).await {
            Ok(response) => {
                self.is_published = response.is_published;
                self.last_updated = Some(response.timestamp);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_serializable());
                Err(e)
            }
        }
    }
}

fn remap_ids(blocks: &mut [Block], id_map: &HashMap<BlockId, BlockId>) {
    if id_map.is_empty() {
        return;
    }
    for block in blocks {
        if let Some(id) = id_map.get(&block.id) {
            block.id = id.clone();
        }
    }
}
