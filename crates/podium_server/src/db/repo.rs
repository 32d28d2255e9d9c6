use chrono::{DateTime, Utc};
use podium_core::reconcile::{AppliedBlock, PreparedBlock, reconcile};
use podium_core::settings::WebsiteSettings;
use podium_core::{Block, PodiumError, Props};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::blocks::{SqliteBlockStore, decode_props, encode_props, load_blocks, storage_error};

/// User information
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Session information
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Event information
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// A website row with its owning team.
#[derive(Debug, Clone)]
pub struct WebsiteRecord {
    pub id: i64,
    pub event_id: i64,
    pub team_id: i64,
    pub slug: String,
    pub settings: WebsiteSettings,
    pub is_published: bool,
    pub favicon_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a block save.
#[derive(Debug, Clone)]
pub struct SavedWebsite {
    pub applied: Vec<AppliedBlock>,
    /// Canonical blocks after the save, sorted by order.
    pub blocks: Vec<Block>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for teams, sessions, events, websites and blocks
#[derive(Clone)]
pub struct SiteRepo {
    conn: Arc<Mutex<Connection>>,
}

const WEBSITE_COLUMNS: &str = "w.id, w.event_id, e.team_id, w.slug, w.settings, w.is_published, \
     w.favicon_path, w.created_at, w.updated_at";

impl SiteRepo {
    /// Create a new SiteRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    // ===== Team and user operations =====

    /// Create a team (returns team ID)
    pub fn create_team(&self, name: &str) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO teams (name, created_at) VALUES (?, ?)",
            params![name, Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a user by ID
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, email, created_at FROM users WHERE id = ?",
            [user_id],
            |row| {
                Ok(UserInfo {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: timestamp_to_datetime(row.get(2)?),
                })
            },
        )
        .optional()
    }

    /// Create or get a user by email (returns user ID)
    pub fn get_or_create_user(&self, email: &str) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        if let Some(user_id) = conn
            .query_row("SELECT id FROM users WHERE email = ?", [email], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
        {
            return Ok(user_id);
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)",
            params![&user_id, email, Utc::now().timestamp()],
        )?;
        Ok(user_id)
    }

    /// Add a user to a team (no-op if already a member)
    pub fn add_member(&self, team_id: i64, user_id: &str, role: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO team_members (team_id, user_id, role) VALUES (?, ?, ?)",
            params![team_id, user_id, role],
        )?;
        Ok(())
    }

    /// Whether a user belongs to a team
    pub fn is_member(&self, team_id: i64, user_id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM team_members WHERE team_id = ? AND user_id = ?",
            params![team_id, user_id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }

    /// First team a user belongs to
    pub fn first_team_of(&self, user_id: &str) -> Result<Option<i64>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT team_id FROM team_members WHERE user_id = ? ORDER BY team_id LIMIT 1",
            [user_id],
            |row| row.get(0),
        )
        .optional()
    }

    // ===== Session operations =====

    /// Create a new session (returns the session token)
    pub fn create_session(
        &self,
        user_id: &str,
        expires_in_days: i64,
    ) -> Result<String, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let token = generate_secure_token();
        let now = Utc::now().timestamp();
        let expires_at = now + expires_in_days * 24 * 60 * 60;

        conn.execute(
            "INSERT INTO auth_sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
            params![&token, user_id, expires_at, now],
        )?;
        Ok(token)
    }

    /// Validate a session token and return session info
    pub fn validate_session(&self, token: &str) -> Result<Option<SessionInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        conn.query_row(
            "SELECT token, user_id, expires_at, created_at FROM auth_sessions
             WHERE token = ? AND expires_at > ?",
            params![token, now],
            |row| {
                Ok(SessionInfo {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: timestamp_to_datetime(row.get(2)?),
                    created_at: timestamp_to_datetime(row.get(3)?),
                })
            },
        )
        .optional()
    }

    /// Clean up expired sessions
    pub fn cleanup_expired_sessions(&self) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        conn.execute("DELETE FROM auth_sessions WHERE expires_at <= ?", [now])
    }

    // ===== Event operations =====

    /// Create an event for a team (returns event ID)
    pub fn create_event(
        &self,
        team_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (team_id, name, description, created_at) VALUES (?, ?, ?, ?)",
            params![team_id, name, description, Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_event(&self, event_id: i64) -> Result<Option<EventInfo>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, team_id, name, description FROM events WHERE id = ?",
            [event_id],
            |row| {
                Ok(EventInfo {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            },
        )
        .optional()
    }

    // ===== Website operations =====

    /// Create the website of an event.
    ///
    /// Returns `None` when the event already has one. The slug is derived
    /// from the event name and suffixed until unique.
    pub fn create_website(
        &self,
        event: &EventInfo,
        settings: &WebsiteSettings,
    ) -> Result<Option<WebsiteRecord>, rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM websites WHERE event_id = ?",
                [event.id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Ok(None);
        }

        let base = match slugify(&event.name) {
            s if s.is_empty() => format!("event-{}", event.id),
            s => s,
        };
        let mut slug = base.clone();
        let mut suffix = 1;
        while tx
            .query_row("SELECT 1 FROM websites WHERE slug = ?", [&slug], |_| Ok(()))
            .optional()?
            .is_some()
        {
            suffix += 1;
            slug = format!("{}-{}", base, suffix);
        }

        let now = Utc::now().timestamp();
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        tx.execute(
            "INSERT INTO websites (event_id, slug, settings, is_published, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)",
            params![event.id, &slug, settings_json, now, now],
        )?;
        let website_id = tx.last_insert_rowid();
        let website = query_website(&tx, "w.id = ?", website_id)?;
        tx.commit()?;
        Ok(website)
    }

    pub fn get_website(&self, website_id: i64) -> Result<Option<WebsiteRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        query_website(&conn, "w.id = ?", website_id)
    }

    pub fn get_website_by_slug(&self, slug: &str) -> Result<Option<WebsiteRecord>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        query_website(&conn, "w.slug = ?", slug)
    }

    /// Set the published flag (returns the update time, `None` if missing)
    pub fn set_published(
        &self,
        website_id: i64,
        published: bool,
    ) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let changed = conn.execute(
            "UPDATE websites SET is_published = ?, updated_at = ? WHERE id = ?",
            params![published, now.timestamp(), website_id],
        )?;
        Ok((changed > 0).then_some(now))
    }

    /// Replace the settings document
    pub fn update_settings(
        &self,
        website_id: i64,
        settings: &WebsiteSettings,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let changed = conn.execute(
            "UPDATE websites SET settings = ?, updated_at = ? WHERE id = ?",
            params![settings_json, Utc::now().timestamp(), website_id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_favicon(
        &self,
        website_id: i64,
        path: Option<&str>,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE websites SET favicon_path = ?, updated_at = ? WHERE id = ?",
            params![path, Utc::now().timestamp(), website_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a website and, by cascade, its blocks
    pub fn delete_website(&self, website_id: i64) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM websites WHERE id = ?", [website_id])?;
        Ok(deleted > 0)
    }

    // ===== Block operations =====

    /// All blocks of a website, sorted by order.
    pub fn list_blocks(&self, website_id: i64) -> podium_core::Result<Vec<Block>> {
        let conn = self.conn.lock().unwrap();
        load_blocks(&conn, website_id)
    }

    /// Reconcile the incoming blocks and merge optional theme/styling
    /// documents, all in one transaction.
    pub fn save_website(
        &self,
        website_id: i64,
        blocks: Vec<PreparedBlock>,
        theme: Option<&Value>,
        styling: Option<&Value>,
    ) -> podium_core::Result<SavedWebsite> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(storage_error)?;
        let now = Utc::now();

        let raw_settings: Option<String> = tx
            .query_row(
                "SELECT settings FROM websites WHERE id = ?",
                [website_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error)?;
        let Some(raw_settings) = raw_settings else {
            return Err(PodiumError::NotFound(format!("website {}", website_id)));
        };

        let applied = {
            let mut store = SqliteBlockStore::new(&tx, website_id, now.timestamp());
            reconcile(&mut store, blocks)?
        };

        if theme.is_some() || styling.is_some() {
            let mut settings: WebsiteSettings = serde_json::from_str(&raw_settings)?;
            if settings.merge_documents(theme, styling)? {
                tx.execute(
                    "UPDATE websites SET settings = ? WHERE id = ?",
                    params![serde_json::to_string(&settings)?, website_id],
                )
                .map_err(storage_error)?;
            }
        }

        tx.execute(
            "UPDATE websites SET updated_at = ? WHERE id = ?",
            params![now.timestamp(), website_id],
        )
        .map_err(storage_error)?;

        let blocks = load_blocks(&tx, website_id)?;
        tx.commit().map_err(storage_error)?;

        Ok(SavedWebsite {
            applied,
            blocks,
            updated_at: timestamp_to_datetime(now.timestamp()),
        })
    }

    /// Re-read one block's props and apply `merge` to them.
    ///
    /// Returns `false` when the block no longer exists; nothing is written then.
    pub fn merge_block_props(
        &self,
        website_id: i64,
        block_id: i64,
        merge: impl FnOnce(&mut Props),
    ) -> podium_core::Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(storage_error)?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT props FROM blocks WHERE id = ? AND website_id = ?",
                params![block_id, website_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error)?;
        let Some(raw) = raw else {
            return Ok(false);
        };

        let mut props = decode_props(&raw)?;
        merge(&mut props);
        tx.execute(
            "UPDATE blocks SET props = ?, updated_at = ? WHERE id = ?",
            params![encode_props(&props)?, Utc::now().timestamp(), block_id],
        )
        .map_err(storage_error)?;
        tx.commit().map_err(storage_error)?;
        Ok(true)
    }

    /// Whether a block still exists.
    pub fn block_exists(&self, website_id: i64, block_id: i64) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM blocks WHERE id = ? AND website_id = ?",
            params![block_id, website_id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }
}

fn query_website<P: rusqlite::ToSql>(
    conn: &Connection,
    filter: &str,
    value: P,
) -> Result<Option<WebsiteRecord>, rusqlite::Error> {
    let sql = format!(
        "SELECT {} FROM websites w JOIN events e ON e.id = w.event_id WHERE {}",
        WEBSITE_COLUMNS, filter
    );
    conn.query_row(&sql, [value], |row| {
        let raw_settings: String = row.get(4)?;
        let settings = serde_json::from_str(&raw_settings).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(WebsiteRecord {
            id: row.get(0)?,
            event_id: row.get(1)?,
            team_id: row.get(2)?,
            slug: row.get(3)?,
            settings,
            is_published: row.get(5)?,
            favicon_path: row.get(6)?,
            created_at: timestamp_to_datetime(row.get(7)?),
            updated_at: timestamp_to_datetime(row.get(8)?),
        })
    })
    .optional()
}

/// Lowercase ASCII words joined by dashes
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Generate a cryptographically secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Convert Unix timestamp to DateTime
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use podium_core::block::props::{set_resolved, set_uploading, uploading_flag_key};
    use podium_core::{BlockId, BlockType};
    use serde_json::json;

    fn setup_repo() -> SiteRepo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        SiteRepo::new(conn)
    }

    fn website(repo: &SiteRepo, name: &str) -> WebsiteRecord {
        let team_id = repo.create_team("Team").unwrap();
        let event_id = repo.create_event(team_id, name, Some("An expo")).unwrap();
        let event = repo.get_event(event_id).unwrap().unwrap();
        repo.create_website(&event, &WebsiteSettings::for_event(&event.name, None))
            .unwrap()
            .unwrap()
    }

    fn hero(id: &str, heading: &str) -> PreparedBlock {
        PreparedBlock::from_block(Block::new(
            BlockId::parse(id),
            BlockType::Hero,
            serde_json::from_value(json!({"headingText": heading})).unwrap(),
        ))
    }

    #[test]
    fn test_sessions_and_membership() {
        let repo = setup_repo();
        let team_id = repo.create_team("Team").unwrap();
        let user_id = repo.get_or_create_user("a@example.com").unwrap();
        assert_eq!(repo.get_or_create_user("a@example.com").unwrap(), user_id);

        assert!(!repo.is_member(team_id, &user_id).unwrap());
        repo.add_member(team_id, &user_id, "owner").unwrap();
        repo.add_member(team_id, &user_id, "owner").unwrap();
        assert!(repo.is_member(team_id, &user_id).unwrap());
        assert_eq!(repo.first_team_of(&user_id).unwrap(), Some(team_id));

        let token = repo.create_session(&user_id, 30).unwrap();
        let session = repo.validate_session(&token).unwrap().unwrap();
        assert_eq!(session.user_id, user_id);
        assert!(repo.validate_session("nope").unwrap().is_none());

        let expired = repo.create_session(&user_id, -1).unwrap();
        assert!(repo.validate_session(&expired).unwrap().is_none());
        assert_eq!(repo.cleanup_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn test_one_website_per_event_with_unique_slug() {
        let repo = setup_repo();
        let first = website(&repo, "Tech Expo 2025");
        assert_eq!(first.slug, "tech-expo-2025");
        assert_eq!(first.settings.metadata.title, "Tech Expo 2025");
        assert!(!first.is_published);

        let event = repo.get_event(first.event_id).unwrap().unwrap();
        assert!(
            repo.create_website(&event, &WebsiteSettings::default())
                .unwrap()
                .is_none()
        );

        let second = website(&repo, "Tech  Expo 2025!");
        assert_eq!(second.slug, "tech-expo-2025-2");
        assert_eq!(
            repo.get_website_by_slug("tech-expo-2025-2").unwrap().unwrap().id,
            second.id
        );
    }

    #[test]
    fn test_save_website_round_trip() {
        let repo = setup_repo();
        let site = website(&repo, "Expo");

        let saved = repo
            .save_website(site.id, vec![hero("Hero-171000", "Welcome")], None, None)
            .unwrap();
        assert_eq!(saved.blocks.len(), 1);
        let id = saved.applied[0].id;
        assert_eq!(saved.blocks[0].id, BlockId::Durable(id));

        let saved = repo
            .save_website(
                site.id,
                vec![hero(&id.to_string(), "Welcome!")],
                Some(&json!({"primary": "#000000", "unknown": 1})),
                None,
            )
            .unwrap();
        assert!(!saved.applied[0].inserted);
        assert_eq!(saved.blocks[0].props["headingText"], json!("Welcome!"));

        let settings = repo.get_website(site.id).unwrap().unwrap().settings;
        assert_eq!(settings.theme.primary, "#000000");

        // Empty list deletes everything
        let saved = repo.save_website(site.id, Vec::new(), None, None).unwrap();
        assert!(saved.blocks.is_empty());
        assert!(repo.list_blocks(site.id).unwrap().is_empty());
    }

    #[test]
    fn test_save_missing_website() {
        let repo = setup_repo();
        let err = repo.save_website(99, Vec::new(), None, None).unwrap_err();
        assert!(matches!(err, PodiumError::NotFound(_)));
    }

    #[test]
    fn test_merges_do_not_lose_updates() {
        let repo = setup_repo();
        let site = website(&repo, "Expo");
        let mut block = hero("Hero-1", "Welcome");
        set_uploading(&mut block.props, "imageUrl");
        set_uploading(&mut block.props, "backgroundImage");
        block.uploads = vec!["imageUrl".into(), "backgroundImage".into()];
        let saved = repo.save_website(site.id, vec![block], None, None).unwrap();
        let id = saved.applied[0].id;

        assert!(
            repo.merge_block_props(site.id, id, |p| {
                set_resolved(p, "imageUrl", json!("blocks/1/1/a.png"))
            })
            .unwrap()
        );
        assert!(
            repo.merge_block_props(site.id, id, |p| {
                set_resolved(p, "backgroundImage", json!("blocks/1/1/b.png"))
            })
            .unwrap()
        );

        let props = &repo.list_blocks(site.id).unwrap()[0].props;
        assert_eq!(props["imageUrl"], json!("blocks/1/1/a.png"));
        assert_eq!(props["backgroundImage"], json!("blocks/1/1/b.png"));
        assert_eq!(props["headingText"], json!("Welcome"));
        assert!(!props.contains_key(&uploading_flag_key("imageUrl")));
    }

    #[test]
    fn test_merge_on_deleted_block_is_noop() {
        let repo = setup_repo();
        let site = website(&repo, "Expo");
        let saved = repo
            .save_website(site.id, vec![hero("Hero-1", "Hi")], None, None)
            .unwrap();
        let id = saved.applied[0].id;
        repo.save_website(site.id, Vec::new(), None, None).unwrap();

        let merged = repo
            .merge_block_props(site.id, id, |p| {
                set_resolved(p, "imageUrl", json!("blocks/1/1/a.png"))
            })
            .unwrap();
        assert!(!merged);
        assert!(repo.list_blocks(site.id).unwrap().is_empty());
        assert!(!repo.block_exists(site.id, id).unwrap());
    }

    #[test]
    fn test_delete_website_cascades() {
        let repo = setup_repo();
        let site = website(&repo, "Expo");
        repo.save_website(site.id, vec![hero("Hero-1", "Hi")], None, None)
            .unwrap();

        assert!(repo.delete_website(site.id).unwrap());
        assert!(repo.get_website(site.id).unwrap().is_none());
        assert!(repo.list_blocks(site.id).unwrap().is_empty());
        assert!(!repo.delete_website(site.id).unwrap());
    }

    #[test]
    fn test_publish_and_favicon() {
        let repo = setup_repo();
        let site = website(&repo, "Expo");
        assert!(repo.set_published(site.id, true).unwrap().is_some());
        assert!(repo.set_published(site.id, true).unwrap().is_some());
        assert!(repo.get_website(site.id).unwrap().unwrap().is_published);
        assert!(repo.set_published(404, true).unwrap().is_none());

        repo.set_favicon(site.id, Some("favicons/1/1-a.png")).unwrap();
        assert_eq!(
            repo.get_website(site.id).unwrap().unwrap().favicon_path.as_deref(),
            Some("favicons/1/1-a.png")
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Tech Expo 2025"), "tech-expo-2025");
        assert_eq!(slugify("  --Hello, World!-- "), "hello-world");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert_eq!(slugify("!!!"), "");
    }
}
