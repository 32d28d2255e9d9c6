//! The server calls a builder session depends on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use ts_rs::TS;

use crate::block::Block;
use crate::error::Result;
use crate::settings::WebsiteSettings;
use crate::upload::Attachment;

/// A boxed future for object-safe async methods.
///
/// On native targets, futures are `Send` for compatibility with multi-threaded runtimes.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// On WASM there is no `Send` requirement since JavaScript is single-threaded.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Body of a save call.
///
/// When `attachments` is non-empty the request travels as multipart, with
/// the JSON document in a `payload` part and one part per attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub blocks: Vec<Block>,
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styling: Option<Value>,
}

impl SaveRequest {
    pub fn is_multipart(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Canonical block list returned by a successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SaveResponse {
    pub message: String,
    pub blocks: Vec<Block>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Result of a publish or unpublish call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PublishResponse {
    pub is_published: bool,
    #[ts(type = "string")]
    pub timestamp: DateTime<Utc>,
}

/// Everything a builder needs to open a website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BuilderData {
    pub website_id: i64,
    pub event_id: i64,
    pub slug: String,
    pub blocks: Vec<Block>,
    pub settings: WebsiteSettings,
    pub is_published: bool,
    #[ts(type = "string")]
    pub last_updated_at: DateTime<Utc>,
    pub favicon_url: Option<String>,
}

/// Remote operations of the builder.
pub trait BuilderApi: Send + Sync {
    fn save<'a>(&'a self, website_id: i64, request: &'a SaveRequest)
    -> BoxFuture<'a, Result<SaveResponse>>;

    fn set_published<'a>(
        &'a self,
        website_id: i64,
        published: bool,
    ) -> BoxFuture<'a, Result<PublishResponse>>;
}
