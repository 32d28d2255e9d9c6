//! [`BlockStore`] over the `blocks` table.

use podium_core::reconcile::BlockStore;
use podium_core::{Block, BlockId, BlockType, PodiumError, Props, Result};
use rusqlite::{Connection, OptionalExtension, params};

pub(crate) fn storage_error(e: rusqlite::Error) -> PodiumError {
    PodiumError::Storage(e.to_string())
}

pub(crate) fn decode_props(raw: &str) -> Result<Props> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn encode_props(props: &Props) -> Result<String> {
    Ok(serde_json::to_string(props)?)
}

/// Blocks of one website, read and written through a borrowed connection.
///
/// Callers pass a [`rusqlite::Transaction`] (which derefs to a connection)
/// so a whole reconciliation commits or rolls back together.
pub struct SqliteBlockStore<'c> {
    conn: &'c Connection,
    website_id: i64,
    now: i64,
}

impl<'c> SqliteBlockStore<'c> {
    pub fn new(conn: &'c Connection, website_id: i64, now: i64) -> Self {
        Self {
            conn,
            website_id,
            now,
        }
    }
}

impl BlockStore for SqliteBlockStore<'_> {
    fn durable_ids(&mut self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(r#"SELECT id FROM blocks WHERE website_id = ? ORDER BY "order", id"#)
            .map_err(storage_error)?;
        let ids = stmt
            .query_map([self.website_id], |row| row.get(0))
            .map_err(storage_error)?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(storage_error)?;
        Ok(ids)
    }

    fn load_props(&mut self, id: i64) -> Result<Option<Props>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT props FROM blocks WHERE id = ? AND website_id = ?",
                params![id, self.website_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error)?;
        raw.as_deref().map(decode_props).transpose()
    }

    fn delete_all(&mut self) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM blocks WHERE website_id = ?",
                [self.website_id],
            )
            .map_err(storage_error)
    }

    fn delete_except(&mut self, keep: &[i64]) -> Result<usize> {
        let mut deleted = 0;
        for id in self.durable_ids()? {
            if keep.contains(&id) {
                continue;
            }
            deleted += self
                .conn
                .execute(
                    "DELETE FROM blocks WHERE id = ? AND website_id = ?",
                    params![id, self.website_id],
                )
                .map_err(storage_error)?;
        }
        Ok(deleted)
    }

    fn update(
        &mut self,
        id: i64,
        block_type: &BlockType,
        order: usize,
        props: &Props,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                r#"UPDATE blocks SET type = ?, "order" = ?, props = ?, updated_at = ?
                   WHERE id = ? AND website_id = ?"#,
                params![
                    block_type.as_str(),
                    order as i64,
                    encode_props(props)?,
                    self.now,
                    id,
                    self.website_id
                ],
            )
            .map_err(storage_error)?;
        if changed == 0 {
            return Err(PodiumError::NotFound(format!("block {}", id)));
        }
        Ok(())
    }

    fn insert(&mut self, block_type: &BlockType, order: usize, props: &Props) -> Result<i64> {
        self.conn
            .execute(
                r#"INSERT INTO blocks (website_id, type, props, "order", created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
                params![
                    self.website_id,
                    block_type.as_str(),
                    encode_props(props)?,
                    order as i64,
                    self.now,
                    self.now
                ],
            )
            .map_err(storage_error)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn blocks(&mut self) -> Result<Vec<Block>> {
        load_blocks(self.conn, self.website_id)
    }
}

/// All blocks of a website, sorted by order.
pub(crate) fn load_blocks(conn: &Connection, website_id: i64) -> Result<Vec<Block>> {
    let mut stmt = conn
        .prepare(r#"SELECT id, type, props FROM blocks WHERE website_id = ? ORDER BY "order", id"#)
        .map_err(storage_error)?;
    let rows = stmt
        .query_map([website_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(storage_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(storage_error)?;

    rows.into_iter()
        .map(|(id, block_type, props)| {
            Ok(Block::new(
                BlockId::Durable(id),
                BlockType::parse(&block_type),
                decode_props(&props)?,
            ))
        })
        .collect()
}
