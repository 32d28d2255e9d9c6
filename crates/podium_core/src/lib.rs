//! Podium core: the block model of event websites, block reconciliation,
//! pending-upload extraction and the client-side builder session.

/// Blocks, block ids and the props bag
pub mod block;

/// Error (common error types)
pub mod error;

/// Change notifications for connected builders
pub mod notify;

/// Reconciling an incoming block list against persisted blocks
pub mod reconcile;

/// Website settings document
pub mod settings;

/// Builder session (undo/redo, save state machine, auto-save)
pub mod session;

/// Pending-file extraction and upload tasks
pub mod upload;

/// HTTP and realtime client for native builders
#[cfg(feature = "native-client")]
pub mod client;

pub use block::{Block, BlockContent, BlockId, BlockType, Props};
pub use error::{ErrorKind, PodiumError, Result, SerializableError};
