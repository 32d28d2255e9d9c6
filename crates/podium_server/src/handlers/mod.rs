pub mod api;
pub mod events;
pub mod public;
pub mod storage;
pub mod websites;
pub mod ws;

pub use api::api_routes;
pub use events::event_routes;
pub use public::public_routes;
pub use storage::storage_routes;
pub use websites::website_routes;
pub use ws::ws_handler;

use crate::auth::AuthUser;
use crate::db::{SiteRepo, WebsiteRecord};
use crate::error::{ApiError, ApiResult};

/// Load a website the authenticated user's team owns.
///
/// Missing websites are 404, websites of other teams 403.
pub(crate) fn member_website(
    repo: &SiteRepo,
    website_id: i64,
    auth: &AuthUser,
) -> ApiResult<WebsiteRecord> {
    let website = repo
        .get_website(website_id)?
        .ok_or_else(|| ApiError::not_found(format!("website {}", website_id)))?;
    if !repo.is_member(website.team_id, &auth.user.id)? {
        return Err(ApiError::Forbidden(format!(
            "not a member of the team owning website {}",
            website_id
        )));
    }
    Ok(website)
}
