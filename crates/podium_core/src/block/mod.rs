//! Blocks: the ordered, typed content units of a website page.

mod id;
pub mod props;
mod types;

pub use id::BlockId;
pub use props::Props;
pub use types::{
    AttendeesFormProps, BlockContent, BlockType, CanvasProps, CountdownProps, DescriptionProps,
    DeviceType, ExhibitorShowcaseProps, FormField, HeroProps, Stat, StatsProps,
};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A block as it travels between builder and server.
///
/// Used both for descriptors sent by the builder (id may be transient) and
/// for the canonical blocks returned after a save (id is always durable).
/// A block's order is its index in the list that carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Block {
    #[ts(type = "string")]
    pub id: BlockId,
    #[serde(rename = "type", default)]
    #[ts(type = "string")]
    pub block_type: BlockType,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub props: Props,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, block_type: BlockType, props: Props) -> Self {
        Self {
            id: id.into(),
            block_type,
            props,
        }
    }

    /// A fresh, unsaved block with the default props of its type.
    pub fn with_defaults(block_type: BlockType) -> Self {
        let props = block_type.default_props();
        Self {
            id: BlockId::transient_for(block_type.as_str()),
            block_type,
            props,
        }
    }

    /// Typed view of this block's props.
    pub fn content(&self) -> crate::Result<BlockContent> {
        BlockContent::parse(&self.block_type, &self.props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_wire_shape() {
        let block: Block = serde_json::from_value(json!({
            "id": "Hero-171000",
            "type": "Hero",
            "props": {"headingText": "Hi"}
        }))
        .unwrap();
        assert_eq!(block.block_type, BlockType::Hero);
        assert!(!block.id.is_durable());

        let out = serde_json::to_value(&block).unwrap();
        assert_eq!(out["type"], json!("Hero"));
        assert_eq!(out["props"]["headingText"], json!("Hi"));
    }

    #[test]
    fn test_missing_type_and_props_default() {
        let block: Block = serde_json::from_value(json!({"id": 5})).unwrap();
        assert!(block.block_type.is_missing());
        assert!(block.props.is_empty());
    }
}
