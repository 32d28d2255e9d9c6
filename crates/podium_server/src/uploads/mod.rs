//! Background uploads of files attached to block saves.
//!
//! A save stages each attached file in temp storage and enqueues an
//! [`UploadTask`](podium_core::upload::UploadTask); a pool of
//! [`UploadWorker`]s moves the file to durable storage, merges the final
//! reference into the block and notifies connected builders.

mod queue;
mod staging;
mod worker;

pub use queue::{UploadQueue, UploadReceiver, upload_queue};
pub use staging::stage_uploads;
pub use worker::{UploadWorker, spawn_workers};
