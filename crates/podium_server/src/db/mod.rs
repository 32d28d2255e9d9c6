mod blocks;
mod repo;
mod schema;

pub use blocks::SqliteBlockStore;
pub use repo::{
    EventInfo, SavedWebsite, SessionInfo, SiteRepo, UserInfo, WebsiteRecord, slugify,
};
pub use schema::init_database;
