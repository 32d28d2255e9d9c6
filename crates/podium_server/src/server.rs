//! Wiring of the database, storage backends, upload workers and routes.

use axum::{
    Router,
    extract::Extension,
    http::{HeaderValue, Method, header},
    routing::get,
};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::AuthExtractor;
use crate::config::Config;
use crate::db::{SiteRepo, init_database};
use crate::handlers::{
    api::ApiState, api_routes, event_routes, events::EventState, public::PublicState,
    public_routes, storage::StorageState, storage_routes, website_routes,
    websites::WebsiteState, ws::WsState, ws_handler,
};
use crate::locks::WebsiteLocks;
use crate::realtime::ChannelHub;
use crate::storage::{LocalDisk, S3Disk, Storage, StorageSet};
use crate::uploads::{UploadQueue, UploadWorker, spawn_workers, upload_queue};

/// Errors raised while bringing the server up
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to open database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
}

/// Everything the handlers share.
#[derive(Clone)]
pub struct Services {
    pub repo: Arc<SiteRepo>,
    pub storage: StorageSet,
    pub public_disk: Arc<LocalDisk>,
    pub uploads: UploadQueue,
    pub hub: Arc<ChannelHub>,
    pub locks: Arc<WebsiteLocks>,
}

/// A started application: shared services, the router and the upload
/// worker tasks.
pub struct App {
    pub services: Services,
    pub router: Router,
    pub workers: Vec<JoinHandle<()>>,
}

fn prepare_dir(path: &std::path::Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(path).map_err(|source| StartupError::Directory {
        path: path.display().to_string(),
        source,
    })
}

impl App {
    /// Open the database, connect the storage backends and spawn the upload
    /// workers. Must run inside a tokio runtime.
    pub async fn start(config: &Config) -> Result<Self, StartupError> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                prepare_dir(parent)?;
            }
        }
        prepare_dir(&config.temp_upload_dir)?;
        prepare_dir(&config.public_storage_dir)?;

        let conn = Connection::open(&config.database_path)?;
        init_database(&conn)?;
        let repo = Arc::new(SiteRepo::new(conn));

        let temp = Arc::new(LocalDisk::new(
            &config.temp_upload_dir,
            format!("file://{}", config.temp_upload_dir.display()),
        ));
        let public_disk = Arc::new(LocalDisk::new(
            &config.public_storage_dir,
            config.public_base_url.clone(),
        ));
        let primary: Option<Arc<dyn Storage>> = match &config.s3 {
            Some(s3) => Some(Arc::new(S3Disk::connect(s3.clone()).await)),
            None => {
                info!("No S3 bucket configured, block images go to the public directory");
                None
            }
        };
        let fallback: Arc<dyn Storage> = public_disk.clone();
        let storage = StorageSet::new(temp, primary, fallback);

        let hub = Arc::new(ChannelHub::new());
        let (uploads, receiver) = upload_queue();
        let worker = UploadWorker::new(
            repo.clone(),
            storage.clone(),
            hub.clone(),
            config.uploads.retry_policy(),
        );
        let workers = spawn_workers(worker, receiver, config.uploads.workers);
        info!("Started {} upload workers", workers.len());

        let services = Services {
            repo,
            storage,
            public_disk,
            uploads,
            hub,
            locks: Arc::new(WebsiteLocks::new()),
        };
        let router = build_router(&services, config);

        Ok(Self {
            services,
            router,
            workers,
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Build the router over shared services.
pub fn build_router(services: &Services, config: &Config) -> Router {
    let website_state = WebsiteState {
        repo: services.repo.clone(),
        storage: services.storage.clone(),
        uploads: services.uploads.clone(),
        locks: services.locks.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };

    let event_state = EventState {
        repo: services.repo.clone(),
        storage: services.storage.clone(),
    };

    let public_state = PublicState {
        repo: services.repo.clone(),
        storage: services.storage.clone(),
    };

    let api_state = ApiState {
        hub: services.hub.clone(),
        uploads: services.uploads.clone(),
    };

    let ws_state = WsState {
        repo: services.repo.clone(),
        hub: services.hub.clone(),
    };

    let storage_state = StorageState {
        disk: services.public_disk.clone(),
    };

    Router::new()
        // Health check
        .route("/", get(|| async { "Podium Server" }))
        .route("/health", get(|| async { "OK" }))
        // Realtime channel
        .route(
            "/ws/websites/{website_id}",
            get(ws_handler).with_state(ws_state),
        )
        // API routes
        .nest("/api", api_routes(api_state))
        .nest("/api/events", event_routes(event_state))
        .nest("/api/websites", website_routes(website_state))
        // Published sites and stored files
        .nest("/site", public_routes(public_state))
        .nest("/storage", storage_routes(storage_state))
        .layer(Extension(AuthExtractor::new(services.repo.clone())))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}
