//! Block identifiers.
//!
//! A block is addressed either by a durable, server-assigned numeric id or by
//! a transient id generated by the builder before the block was ever saved
//! (e.g. `"Hero-1749033341694"`). On the wire both forms travel as strings;
//! a string made only of ASCII digits is durable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identifier of a block within a website.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    /// Assigned by the server on first persist. Never changes afterwards.
    Durable(i64),
    /// Client placeholder for a block that has not been persisted yet.
    Transient(String),
}

impl BlockId {
    /// Parse a wire id.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse::<i64>() {
                return BlockId::Durable(id);
            }
        }
        BlockId::Transient(raw.to_string())
    }

    /// Generate a transient id for a new block of the given type.
    ///
    /// Follows the builder convention `{Type}-{unix_millis}`.
    pub fn transient_for(block_type: &str) -> Self {
        BlockId::Transient(format!(
            "{}-{}",
            block_type,
            chrono::Utc::now().timestamp_millis()
        ))
    }

    /// Returns the durable id, if any.
    pub fn durable(&self) -> Option<i64> {
        match self {
            BlockId::Durable(id) => Some(*id),
            BlockId::Transient(_) => None,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, BlockId::Durable(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BlockId::Transient(s) if s.trim().is_empty())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Durable(id) => write!(f, "{}", id),
            BlockId::Transient(s) => f.write_str(s),
        }
    }
}

impl From<i64> for BlockId {
    fn from(id: i64) -> Self {
        BlockId::Durable(id)
    }
}

impl From<&str> for BlockId {
    fn from(raw: &str) -> Self {
        BlockId::parse(raw)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(BlockId::parse(&s)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(BlockId::Durable)
                .ok_or_else(|| D::Error::custom(format!("invalid block id {}", n))),
            other => Err(D::Error::custom(format!(
                "expected string or integer block id, got {}",
                other
            ))),
        }
    }
}
