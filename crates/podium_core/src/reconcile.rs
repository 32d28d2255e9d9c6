//! Block reconciliation: turning an incoming ordered block list into the new
//! persisted block set of a website.
//!
//! The diff rules:
//!
//! - persisted blocks whose durable id is absent from the incoming list are deleted
//!   (all of them when the incoming list carries no durable id at all)
//! - incoming blocks with a persisted durable id are updated in place
//! - every other incoming block is inserted and receives a new durable id
//! - `order` is the position in the incoming list
//!
//! Storage is abstracted behind [`BlockStore`]. Callers run [`reconcile`]
//! inside whatever transactional boundary the store provides; all validation
//! happens before the first mutation.

use std::collections::{HashMap, HashSet};

use crate::block::props::{check_exclusive, settle_upload_flags};
use crate::block::{Block, BlockId, BlockType, Props};
use crate::error::{PodiumError, Result};

/// Persistence operations the reconciler needs, scoped to one website.
pub trait BlockStore {
    /// Durable ids of all persisted blocks.
    fn durable_ids(&mut self) -> Result<Vec<i64>>;

    /// Persisted props of one block, `None` if it does not exist.
    fn load_props(&mut self, id: i64) -> Result<Option<Props>>;

    fn delete_all(&mut self) -> Result<usize>;

    /// Delete every block whose id is not in `keep`.
    fn delete_except(&mut self, keep: &[i64]) -> Result<usize>;

    /// Replace type, order and props of an existing block together.
    fn update(&mut self, id: i64, block_type: &BlockType, order: usize, props: &Props)
    -> Result<()>;

    /// Insert a new block and return its allocated durable id.
    fn insert(&mut self, block_type: &BlockType, order: usize, props: &Props) -> Result<i64>;

    /// All persisted blocks, sorted by order.
    fn blocks(&mut self) -> Result<Vec<Block>>;
}

/// One step of a reconciliation, in incoming-list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Update { id: i64, order: usize },
    Insert { order: usize },
}

/// What a reconciliation will do, computed without touching storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// The incoming list carries no durable id: wipe before re-creating.
    pub delete_all: bool,
    /// Persisted ids that survive.
    pub keep: Vec<i64>,
    pub steps: Vec<ReconcileStep>,
}

impl ReconcilePlan {
    /// Build a plan from the persisted ids and the incoming ids in order.
    ///
    /// A durable-looking id that is not persisted (deleted elsewhere, or
    /// belonging to another website) is treated as new.
    pub fn build(persisted: &[i64], incoming: &[BlockId]) -> Self {
        let persisted: HashSet<i64> = persisted.iter().copied().collect();
        let delete_all = !incoming.iter().any(BlockId::is_durable);

        let mut keep = Vec::new();
        let steps = incoming
            .iter()
            .enumerate()
            .map(|(order, id)| match id.durable() {
                Some(id) if persisted.contains(&id) => {
                    keep.push(id);
                    ReconcileStep::Update { id, order }
                }
                _ => ReconcileStep::Insert { order },
            })
            .collect();

        Self {
            delete_all,
            keep,
            steps,
        }
    }
}

/// An incoming block after pending-upload extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBlock {
    /// Id as sent by the client.
    pub client_id: BlockId,
    pub block_type: BlockType,
    pub props: Props,
    /// Props this request is uploading files for.
    pub uploads: Vec<String>,
}

impl PreparedBlock {
    pub fn from_block(block: Block) -> Self {
        Self {
            client_id: block.id,
            block_type: block.block_type,
            props: block.props,
            uploads: Vec::new(),
        }
    }
}

/// Result of reconciling one incoming block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBlock {
    pub client_id: BlockId,
    /// Durable id after the save.
    pub id: i64,
    pub order: usize,
    pub inserted: bool,
}

/// Reject descriptors that cannot be reconciled: blank types, blank ids and
/// ids appearing twice.
pub fn validate_descriptors<'a, I>(ids_and_types: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a BlockId, &'a BlockType)>,
{
    let mut seen = HashSet::new();
    for (position, (id, block_type)) in ids_and_types.into_iter().enumerate() {
        if block_type.is_missing() {
            return Err(PodiumError::Validation(format!(
                "block at position {} is missing a type",
                position
            )));
        }
        if id.is_empty() {
            return Err(PodiumError::Validation(format!(
                "block at position {} is missing an id",
                position
            )));
        }
        if !seen.insert(id) {
            return Err(PodiumError::Validation(format!(
                "block id '{}' appears more than once",
                id
            )));
        }
    }
    Ok(())
}

/// Apply an incoming block list to the store.
///
/// Returns one [`AppliedBlock`] per incoming block, in incoming order.
pub fn reconcile<S: BlockStore + ?Sized>(
    store: &mut S,
    blocks: Vec<PreparedBlock>,
) -> Result<Vec<AppliedBlock>> {
    validate_descriptors(blocks.iter().map(|b| (&b.client_id, &b.block_type)))?;

    let persisted = store.durable_ids()?;
    let incoming: Vec<BlockId> = blocks.iter().map(|b| b.client_id.clone()).collect();
    let plan = ReconcilePlan::build(&persisted, &incoming);

    // Settle props against persisted state first so nothing is written
    // unless every block is valid.
    let mut persisted_props: HashMap<i64, Props> = HashMap::new();
    for id in &plan.keep {
        if let Some(props) = store.load_props(*id)? {
            persisted_props.insert(*id, props);
        }
    }

    let mut prepared = Vec::with_capacity(blocks.len());
    for (block, step) in blocks.into_iter().zip(plan.steps.iter()) {
        let mut props = block.props;
        let persisted = match step {
            ReconcileStep::Update { id, .. } => persisted_props.get(id),
            ReconcileStep::Insert { .. } => None,
        };
        settle_upload_flags(&mut props, persisted, &block.uploads);
        check_exclusive(&props).map_err(|e| match e {
            PodiumError::Validation(msg) => {
                PodiumError::Validation(format!("block '{}': {}", block.client_id, msg))
            }
            other => other,
        })?;
        prepared.push((block.client_id, block.block_type, props));
    }

    let deleted = if plan.delete_all {
        store.delete_all()?
    } else {
        store.delete_except(&plan.keep)?
    };

    let mut applied = Vec::with_capacity(prepared.len());
    for ((client_id, block_type, props), step) in prepared.into_iter().zip(plan.steps) {
        let (id, order, inserted) = match step {
            ReconcileStep::Update { id, order } => {
                store.update(id, &block_type, order, &props)?;
                (id, order, false)
            }
            ReconcileStep::Insert { order } => {
                let id = store.insert(&block_type, order, &props)?;
                (id, order, true)
            }
        };
        applied.push(AppliedBlock {
            client_id,
            id,
            order,
            inserted,
        });
    }

    log::debug!(
        "reconciled {} blocks ({} inserted, {} deleted)",
        applied.len(),
        applied.iter().filter(|a| a.inserted).count(),
        deleted
    );

    Ok(applied)
}

/// In-memory [`BlockStore`], for tests and offline previews.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockStore {
    rows: Vec<(i64, BlockType, usize, Props)>,
    next_id: i64,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }

    /// Merge a single prop into a persisted block, `false` if the block is gone.
    pub fn merge_prop(&mut self, id: i64, apply: impl FnOnce(&mut Props)) -> bool {
        match self.rows.iter_mut().find(|row| row.0 == id) {
            Some(row) => {
                apply(&mut row.3);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn durable_ids(&mut self) -> Result<Vec<i64>> {
        Ok(self.rows.iter().map(|row| row.0).collect())
    }

    fn load_props(&mut self, id: i64) -> Result<Option<Props>> {
        Ok(self
            .rows
            .iter()
            .find(|row| row.0 == id)
            .map(|row| row.3.clone()))
    }

    fn delete_all(&mut self) -> Result<usize> {
        let count = self.rows.len();
        self.rows.clear();
        Ok(count)
    }

    fn delete_except(&mut self, keep: &[i64]) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|row| keep.contains(&row.0));
        Ok(before - self.rows.len())
    }

    fn update(
        &mut self,
        id: i64,
        block_type: &BlockType,
        order: usize,
        props: &Props,
    ) -> Result<()> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.0 == id)
            .ok_or_else(|| PodiumError::NotFound(format!("Block {}", id)))?;
        row.1 = block_type.clone();
        row.2 = order;
        row.3 = props.clone();
        Ok(())
    }

    fn insert(&mut self, block_type: &BlockType, order: usize, props: &Props) -> Result<i64> {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.rows.push((id, block_type.clone(), order, props.clone()));
        Ok(id)
    }

    fn blocks(&mut self) -> Result<Vec<Block>> {
        let mut rows: Vec<_> = self.rows.iter().collect();
        rows.sort_by_key(|row| (row.2, row.0));
        Ok(rows
            .into_iter()
            .map(|(id, block_type, _, props)| Block::new(*id, block_type.clone(), props.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(id: &str, block_type: &str, props: serde_json::Value) -> PreparedBlock {
        PreparedBlock::from_block(Block::new(
            id,
            BlockType::parse(block_type),
            serde_json::from_value(props).unwrap(),
        ))
    }

    fn save(store: &mut MemoryBlockStore, blocks: Vec<PreparedBlock>) -> Vec<Block> {
        reconcile(store, blocks).unwrap();
        store.blocks().unwrap()
    }

    fn as_prepared(blocks: &[Block]) -> Vec<PreparedBlock> {
        blocks.iter().cloned().map(PreparedBlock::from_block).collect()
    }

    #[test]
    fn test_transient_block_gets_durable_id_then_updates_in_place() {
        let mut store = MemoryBlockStore::new();
        let first = save(
            &mut store,
            vec![block("Hero-171000", "Hero", json!({"headingText": "Welcome"}))],
        );
        assert_eq!(first.len(), 1);
        let id = first[0].id.durable().unwrap();

        let second = save(
            &mut store,
            vec![block(&id.to_string(), "Hero", json!({"headingText": "Welcome!"}))],
        );
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, BlockId::Durable(id));
        assert_eq!(second[0].props["headingText"], json!("Welcome!"));
    }

    #[test]
    fn test_result_ids_are_kept_plus_allocated() {
        let mut store = MemoryBlockStore::new();
        let canonical = save(
            &mut store,
            vec![
                block("Hero-1", "Hero", json!({})),
                block("Stats-2", "Stats", json!({})),
                block("Canvas-3", "Canvas", json!({})),
            ],
        );
        let kept = canonical[1].id.clone();

        let applied = reconcile(
            &mut store,
            vec![
                block("Countdown-4", "Countdown", json!({})),
                PreparedBlock::from_block(canonical[1].clone()),
            ],
        )
        .unwrap();

        let ids: HashSet<i64> = store.durable_ids().unwrap().into_iter().collect();
        let expected: HashSet<i64> = applied.iter().map(|a| a.id).collect();
        assert_eq!(ids, expected);
        assert!(ids.contains(&kept.durable().unwrap()));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_order_matches_incoming_index() {
        let mut store = MemoryBlockStore::new();
        let canonical = save(
            &mut store,
            vec![
                block("Hero-1", "Hero", json!({})),
                block("Stats-2", "Stats", json!({})),
            ],
        );
        let mut reversed = as_prepared(&canonical);
        reversed.reverse();
        reversed.insert(1, block("Canvas-3", "Canvas", json!({})));

        let applied = reconcile(&mut store, reversed).unwrap();
        for (index, a) in applied.iter().enumerate() {
            assert_eq!(a.order, index);
        }
        let after = store.blocks().unwrap();
        assert_eq!(after[0].block_type, BlockType::Stats);
        assert_eq!(after[1].block_type, BlockType::Canvas);
        assert_eq!(after[2].block_type, BlockType::Hero);
    }

    #[test]
    fn test_resaving_canonical_list_is_idempotent() {
        let mut store = MemoryBlockStore::new();
        let canonical = save(
            &mut store,
            vec![
                block("Hero-1", "Hero", json!({"headingText": "Hi"})),
                block("Stats-2", "Stats", json!({"stats": []})),
            ],
        );
        let applied = reconcile(&mut store, as_prepared(&canonical)).unwrap();
        assert!(applied.iter().all(|a| !a.inserted));
        assert_eq!(store.blocks().unwrap(), canonical);
    }

    #[test]
    fn test_empty_list_deletes_everything() {
        let mut store = MemoryBlockStore::new();
        save(&mut store, vec![block("Hero-1", "Hero", json!({}))]);
        assert_eq!(save(&mut store, Vec::new()).len(), 0);
    }

    #[test]
    fn test_all_transient_list_replaces_persisted_set() {
        let mut store = MemoryBlockStore::new();
        save(&mut store, vec![block("Hero-1", "Hero", json!({}))]);
        let after = save(&mut store, vec![block("Hero-2", "Hero", json!({}))]);
        assert_eq!(after.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_durable_id_is_inserted() {
        let mut store = MemoryBlockStore::new();
        let applied = reconcile(&mut store, vec![block("999", "Hero", json!({}))]).unwrap();
        assert!(applied[0].inserted);
        assert_ne!(applied[0].id, 999);
    }

    #[test]
    fn test_invalid_descriptor_rejected_before_mutation() {
        let mut store = MemoryBlockStore::new();
        save(&mut store, vec![block("Hero-1", "Hero", json!({}))]);

        let err = reconcile(
            &mut store,
            vec![block("Stats-2", "Stats", json!({})), block("Hero-3", "", json!({}))],
        )
        .unwrap_err();
        assert!(matches!(err, PodiumError::Validation(_)));
        assert_eq!(store.len(), 1);

        let err = reconcile(
            &mut store,
            vec![block("Hero-3", "Hero", json!({})), block("Hero-3", "Hero", json!({}))],
        )
        .unwrap_err();
        assert!(matches!(err, PodiumError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stale_uploading_flag_adopts_committed_value() {
        let mut store = MemoryBlockStore::new();
        let flagged: Props = serde_json::from_value(json!({"_imageUrl_uploadingToS3": true})).unwrap();
        let id = store.insert(&BlockType::Hero, 0, &flagged).unwrap();
        let canonical = store.blocks().unwrap();

        // Upload commits while the client still holds the flagged props
        store.merge_prop(id, |props| {
            crate::block::props::set_resolved(props, "imageUrl", json!("blocks/1/1/ab-1.png"))
        });

        let after = save(&mut store, as_prepared(&canonical));
        assert_eq!(after[0].props["imageUrl"], json!("blocks/1/1/ab-1.png"));
        assert!(!after[0].props.contains_key("_imageUrl_uploadingToS3"));
    }

    #[test]
    fn test_plan_without_durable_ids_deletes_all() {
        let plan = ReconcilePlan::build(&[1, 2], &[BlockId::parse("Hero-1")]);
        assert!(plan.delete_all);
        assert_eq!(plan.steps, vec![ReconcileStep::Insert { order: 0 }]);

        let plan = ReconcilePlan::build(&[1, 2], &[BlockId::Durable(2), BlockId::parse("x-1")]);
        assert!(!plan.delete_all);
        assert_eq!(plan.keep, vec![2]);
        assert_eq!(
            plan.steps,
            vec![
                ReconcileStep::Update { id: 2, order: 0 },
                ReconcileStep::Insert { order: 1 }
            ]
        );
    }
}
