//! Builder endpoints: load, save, publish, settings, favicon and delete.

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{StatusCode, header},
    response::Json,
    routing::{delete, get, patch, post},
};
use chrono::Utc;
use podium_core::session::{BuilderData, PublishResponse, SaveRequest, SaveResponse};
use podium_core::settings::WebsiteSettings;
use podium_core::upload::{
    Attachment, AttachmentSet, PendingUpload, extension_of, prepare_block, random_token,
};
use podium_core::{Block, PodiumError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::member_website;
use crate::auth::RequireAuth;
use crate::db::{SiteRepo, WebsiteRecord};
use crate::error::{ApiError, ApiResult};
use crate::locks::WebsiteLocks;
use crate::storage::{Body, FAVICON_PREFIX, Storage, StorageSet};
use crate::uploads::{UploadQueue, stage_uploads};

/// Largest accepted favicon (2 MiB).
pub const MAX_FAVICON_BYTES: usize = 2 * 1024 * 1024;
const FAVICON_EXTENSIONS: [&str; 4] = ["png", "ico", "jpg", "jpeg"];

/// Shared state for website handlers
#[derive(Clone)]
pub struct WebsiteState {
    pub repo: Arc<SiteRepo>,
    pub storage: StorageSet,
    pub uploads: UploadQueue,
    pub locks: Arc<WebsiteLocks>,
    pub max_upload_bytes: usize,
}

/// Meta update request
#[derive(Debug, Deserialize)]
pub struct MetaRequest {
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

/// Favicon update response
#[derive(Debug, Serialize)]
pub struct FaviconResponse {
    pub favicon_url: String,
}

/// Create website routes
pub fn website_routes(state: WebsiteState) -> Router {
    // Several images may travel in one save
    let save_limit = state.max_upload_bytes.saturating_mul(8).max(MAX_FAVICON_BYTES * 2);

    Router::new()
        .route("/{website_id}", delete(delete_website))
        .route("/{website_id}/builder", get(load_builder))
        .route(
            "/{website_id}/save",
            post(save_website).layer(DefaultBodyLimit::max(save_limit)),
        )
        .route("/{website_id}/publish", post(publish))
        .route("/{website_id}/unpublish", post(unpublish))
        .route("/{website_id}/meta", patch(update_meta))
        .route(
            "/{website_id}/favicon",
            post(update_favicon).layer(DefaultBodyLimit::max(MAX_FAVICON_BYTES * 2)),
        )
        .with_state(state)
}

/// Builder payload of a website, with stored paths turned into URLs.
pub fn builder_data(
    website: &WebsiteRecord,
    blocks: Vec<Block>,
    storage: &StorageSet,
) -> BuilderData {
    BuilderData {
        website_id: website.id,
        event_id: website.event_id,
        slug: website.slug.clone(),
        blocks: materialize(blocks, storage),
        settings: website.settings.clone(),
        is_published: website.is_published,
        last_updated_at: website.updated_at,
        favicon_url: website.favicon_path.as_deref().map(|p| storage.url(p)),
    }
}

pub(crate) fn materialize(mut blocks: Vec<Block>, storage: &StorageSet) -> Vec<Block> {
    for block in &mut blocks {
        storage.materialize_props(&mut block.props);
    }
    blocks
}

/// GET /api/websites/{website_id}/builder - Blocks and settings for the builder
async fn load_builder(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
) -> ApiResult<Json<BuilderData>> {
    let website = member_website(&state.repo, website_id, &auth)?;
    let blocks = state.repo.list_blocks(website.id)?;
    Ok(Json(builder_data(&website, blocks, &state.storage)))
}

/// POST /api/websites/{website_id}/save - Reconcile the block list
///
/// Accepts JSON, or multipart with the JSON document in a `payload` part and
/// one part per attached file.
async fn save_website(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
    request: Request,
) -> ApiResult<Json<SaveResponse>> {
    let website = member_website(&state.repo, website_id, &auth)?;
    let (payload, attachments) = read_save_request(request).await?;

    // Everything is validated before the first write
    let mut attachments: AttachmentSet = attachments.into_iter().collect();
    let mut prepared = Vec::with_capacity(payload.blocks.len());
    let mut uploads: Vec<PendingUpload> = Vec::new();
    for (index, mut block) in payload.blocks.into_iter().enumerate() {
        state.storage.relativize_props(&mut block.props);
        let (block, pending) =
            prepare_block(index, block, &mut attachments, state.max_upload_bytes)?;
        prepared.push(block);
        uploads.extend(pending);
    }
    if !attachments.is_empty() {
        debug!(
            "Ignoring {} attached files without a matching pending marker",
            attachments.len()
        );
    }

    let guard = state.locks.acquire(website.id).await;
    let saved = state.repo.save_website(
        website.id,
        prepared,
        payload.theme.as_ref(),
        payload.styling.as_ref(),
    )?;

    let upload_count = uploads.len();
    let queued = stage_uploads(
        &state.repo,
        &state.storage,
        &state.uploads,
        website.id,
        &saved.applied,
        uploads,
    )
    .await;

    // Staging may have flagged failures; return what is persisted now
    let blocks = if queued < upload_count {
        state.repo.list_blocks(website.id)?
    } else {
        saved.blocks
    };
    drop(guard);
    state.locks.prune();

    info!(
        "Saved website {}: {} blocks, {} uploads queued",
        website.id,
        blocks.len(),
        queued
    );

    Ok(Json(SaveResponse {
        message: "Website saved successfully".to_string(),
        blocks: materialize(blocks, &state.storage),
        updated_at: saved.updated_at,
    }))
}

async fn read_save_request(request: Request) -> ApiResult<(SaveRequest, Vec<Attachment>)> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let Json(payload) = Json::<SaveRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok((payload, Vec::new()));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut payload = None;
    let mut attachments = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        if name == "payload" && filename.is_none() {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            payload = Some(serde_json::from_str::<SaveRequest>(&text).map_err(PodiumError::from)?);
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        attachments.push(Attachment {
            field: name,
            filename: filename.unwrap_or_default(),
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let payload =
        payload.ok_or_else(|| ApiError::validation("multipart save is missing its payload part"))?;
    Ok((payload, attachments))
}

/// POST /api/websites/{website_id}/publish
async fn publish(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
) -> ApiResult<Json<PublishResponse>> {
    set_published(&state, &auth, website_id, true).await
}

/// POST /api/websites/{website_id}/unpublish
async fn unpublish(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
) -> ApiResult<Json<PublishResponse>> {
    set_published(&state, &auth, website_id, false).await
}

async fn set_published(
    state: &WebsiteState,
    auth: &crate::auth::AuthUser,
    website_id: i64,
    published: bool,
) -> ApiResult<Json<PublishResponse>> {
    let website = member_website(&state.repo, website_id, auth)?;
    let timestamp = state
        .repo
        .set_published(website.id, published)?
        .ok_or_else(|| ApiError::not_found(format!("website {}", website_id)))?;

    info!(
        "Website {} {}",
        website.id,
        if published { "published" } else { "unpublished" }
    );
    Ok(Json(PublishResponse {
        is_published: published,
        timestamp,
    }))
}

/// PATCH /api/websites/{website_id}/meta - Update SEO title and description
async fn update_meta(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
    Json(request): Json<MetaRequest>,
) -> ApiResult<Json<WebsiteSettings>> {
    let website = member_website(&state.repo, website_id, &auth)?;
    let mut settings = website.settings;
    let changed = settings.set_meta(
        request.meta_title.as_deref(),
        request.meta_description.as_deref(),
    )?;
    if changed {
        state.repo.update_settings(website.id, &settings)?;
    }
    Ok(Json(settings))
}

/// POST /api/websites/{website_id}/favicon - Replace the favicon
async fn update_favicon(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<Json<FaviconResponse>> {
    let website = member_website(&state.repo, website_id, &auth)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("favicon") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        upload = Some((filename, bytes));
    }
    let (filename, bytes) = upload.ok_or_else(|| ApiError::validation("favicon is required"))?;

    let extension = validate_favicon(&filename, bytes.len())?;

    // Old favicon goes first, like the replacement it is
    if let Some(old) = &website.favicon_path {
        if !state.storage.fallback.delete(old).await {
            warn!(
                "Old favicon path found ({}) but file doesn't exist in storage",
                old
            );
        }
    }

    let path = format!(
        "{}{}/{}-{}.{}",
        FAVICON_PREFIX,
        website.id,
        Utc::now().timestamp(),
        random_token(),
        extension
    );
    if !state.storage.fallback.put(&path, Body::Bytes(bytes.to_vec())).await {
        return Err(PodiumError::Storage("server failed to store the favicon".to_string()).into());
    }
    state.repo.set_favicon(website.id, Some(&path))?;

    Ok(Json(FaviconResponse {
        favicon_url: state.storage.url(&path),
    }))
}

fn validate_favicon(filename: &str, len: usize) -> ApiResult<String> {
    let extension = extension_of(filename).unwrap_or_default();
    if !FAVICON_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::validation(format!(
            "favicon must be a file of type: {}",
            FAVICON_EXTENSIONS.join(", ")
        )));
    }
    if len == 0 || len > MAX_FAVICON_BYTES {
        return Err(ApiError::validation(format!(
            "favicon may not be greater than {} kilobytes",
            MAX_FAVICON_BYTES / 1024
        )));
    }
    Ok(extension)
}

/// DELETE /api/websites/{website_id} - Delete a website and its blocks
async fn delete_website(
    State(state): State<WebsiteState>,
    RequireAuth(auth): RequireAuth,
    Path(website_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let website = member_website(&state.repo, website_id, &auth)?;

    let _guard = state.locks.acquire(website.id).await;
    if !state.repo.delete_website(website.id)? {
        return Err(ApiError::not_found(format!("website {}", website_id)));
    }
    if let Some(favicon) = &website.favicon_path {
        state.storage.fallback.delete(favicon).await;
    }

    info!("Deleted website {}", website.id);
    Ok(StatusCode::NO_CONTENT)
}
