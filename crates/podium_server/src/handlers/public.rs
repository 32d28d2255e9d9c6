use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::get,
};
use chrono::{DateTime, Utc};
use podium_core::Block;
use podium_core::settings::WebsiteSettings;
use serde::Serialize;
use std::sync::Arc;

use super::websites::materialize;
use crate::db::SiteRepo;
use crate::error::{ApiError, ApiResult};
use crate::storage::StorageSet;

/// Shared state for the public site
#[derive(Clone)]
pub struct PublicState {
    pub repo: Arc<SiteRepo>,
    pub storage: StorageSet,
}

/// A published website as visitors see it
#[derive(Debug, Serialize)]
pub struct PublicWebsite {
    pub slug: String,
    pub settings: WebsiteSettings,
    pub blocks: Vec<Block>,
    pub favicon_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Create public routes
pub fn public_routes(state: PublicState) -> Router {
    Router::new()
        .route("/{slug}", get(show_website))
        .with_state(state)
}

/// GET /site/{slug} - Published website with its ordered blocks
async fn show_website(
    State(state): State<PublicState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<PublicWebsite>> {
    let website = state
        .repo
        .get_website_by_slug(&slug)?
        .filter(|w| w.is_published)
        .ok_or_else(|| ApiError::not_found(format!("website '{}'", slug)))?;

    let blocks = state.repo.list_blocks(website.id)?;
    Ok(Json(PublicWebsite {
        favicon_url: website.favicon_path.as_deref().map(|p| state.storage.url(p)),
        slug: website.slug,
        settings: website.settings,
        blocks: materialize(blocks, &state.storage),
        updated_at: website.updated_at,
    }))
}
