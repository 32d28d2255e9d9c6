use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
};
use podium_core::session::BuilderData;
use podium_core::settings::WebsiteSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::websites::builder_data;
use crate::auth::RequireAuth;
use crate::db::{EventInfo, SiteRepo};
use crate::error::{ApiError, ApiResult};
use crate::storage::StorageSet;

/// Shared state for event handlers
#[derive(Clone)]
pub struct EventState {
    pub repo: Arc<SiteRepo>,
    pub storage: StorageSet,
}

/// Create event request
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Defaults to the caller's first team
    pub team_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
}

/// Event response
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl From<EventInfo> for EventResponse {
    fn from(event: EventInfo) -> Self {
        Self {
            id: event.id,
            team_id: event.team_id,
            name: event.name,
            description: event.description,
        }
    }
}

/// Create event routes
pub fn event_routes(state: EventState) -> Router {
    Router::new()
        .route("/", post(create_event))
        .route("/{event_id}/website", post(create_website))
        .with_state(state)
}

/// POST /api/events - Create an event for one of the caller's teams
async fn create_event(
    State(state): State<EventState>,
    RequireAuth(auth): RequireAuth,
    Json(request): Json<CreateEventRequest>,
) -> ApiResult<(StatusCode, Json<EventResponse>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("event name is required"));
    }

    let team_id = match request.team_id {
        Some(team_id) => team_id,
        None => state
            .repo
            .first_team_of(&auth.user.id)?
            .ok_or_else(|| ApiError::Forbidden("not a member of any team".to_string()))?,
    };
    if !state.repo.is_member(team_id, &auth.user.id)? {
        return Err(ApiError::Forbidden(format!("not a member of team {}", team_id)));
    }

    let event_id = state
        .repo
        .create_event(team_id, name, request.description.as_deref())?;
    let event = state
        .repo
        .get_event(event_id)?
        .ok_or_else(|| ApiError::not_found(format!("event {}", event_id)))?;

    Ok((StatusCode::CREATED, Json(event.into())))
}

/// POST /api/events/{event_id}/website - Create the website of an event
async fn create_website(
    State(state): State<EventState>,
    RequireAuth(auth): RequireAuth,
    Path(event_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<BuilderData>)> {
    let event = state
        .repo
        .get_event(event_id)?
        .ok_or_else(|| ApiError::not_found(format!("event {}", event_id)))?;
    if !state.repo.is_member(event.team_id, &auth.user.id)? {
        return Err(ApiError::Forbidden(format!(
            "not a member of the team owning event {}",
            event_id
        )));
    }

    let settings = WebsiteSettings::for_event(&event.name, event.description.as_deref());
    let website = state
        .repo
        .create_website(&event, &settings)?
        .ok_or_else(|| ApiError::conflict(format!("event {} already has a website", event_id)))?;

    info!("Created website {} ({}) for event {}", website.id, website.slug, event.id);
    Ok((
        StatusCode::CREATED,
        Json(builder_data(&website, Vec::new(), &state.storage)),
    ))
}
