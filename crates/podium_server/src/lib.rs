//! Podium Server
//!
//! Backend of the Podium event website builder.
//!
//! ## Features
//!
//! - **Block saves**: reconcile a builder's block list against the database in one transaction
//! - **Async image uploads**: attached files are staged and uploaded by a worker pool, with retries
//! - **Realtime updates**: per-website WebSocket channels announce processed images
//! - **Public sites**: published websites are served by slug
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3040)
//! - `DATABASE_PATH`: Path to SQLite database (default: ./podium.db)
//! - `TEMP_UPLOAD_DIR`: Staging directory for uploads (default: ./storage/temp-uploads)
//! - `PUBLIC_STORAGE_DIR`: Public fallback storage (default: ./storage/public)
//! - `PUBLIC_BASE_URL`: URL the public storage is served under (default: http://localhost:{PORT}/storage)
//! - `S3_BUCKET`: Primary storage bucket; S3 is disabled when unset
//! - `S3_REGION`: Bucket region (default: us-east-1)
//! - `S3_ENDPOINT`: Custom endpoint for S3-compatible stores
//! - `S3_PUBLIC_URL`: Public base URL of the bucket
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`: Explicit S3 credentials
//! - `UPLOAD_WORKERS`: Upload worker count (default: 2)
//! - `UPLOAD_MAX_ATTEMPTS`: Attempts per upload (default: 3)
//! - `UPLOAD_TIMEOUT_SECS`: Budget of one attempt (default: 300)
//! - `UPLOAD_BACKOFF_MS`: Base retry backoff (default: 1000)
//! - `MAX_UPLOAD_BYTES`: Largest accepted block image (default: 10 MiB)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins
//! - `BOOTSTRAP_EMAIL`: Create a team, user and session for this address at startup

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod realtime;
pub mod server;
pub mod storage;
pub mod uploads;

pub use config::Config;
pub use server::{App, Services};
