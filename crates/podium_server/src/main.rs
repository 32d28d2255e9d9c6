use podium_server::{App, Config, db::SiteRepo};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podium_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Podium Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("Public storage: {:?} at {}", config.public_storage_dir, config.public_base_url);
    info!("CORS origins: {:?}", config.cors_origins);

    let app = match App::start(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Ok(email) = std::env::var("BOOTSTRAP_EMAIL") {
        bootstrap(&app.services.repo, &email);
    }

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Start cleanup task
    let cleanup_repo = app.services.repo.clone();
    let cleanup_locks = app.services.locks.clone();
    let cleanup_hub = app.services.hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let _ = cleanup_repo.cleanup_expired_sessions();
            cleanup_locks.prune();
            let closed = cleanup_hub.prune_idle();
            info!(
                "Cleaned up expired sessions, idle website locks and {} idle channels",
                closed
            );
        }
    });

    // Run server with graceful shutdown
    if let Err(e) = axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    info!("Server shut down gracefully");
}

/// Give a fresh install a team, a user and a session to log in with.
fn bootstrap(repo: &Arc<SiteRepo>, email: &str) {
    let result = (|| {
        let user_id = repo.get_or_create_user(email)?;
        let team_id = match repo.first_team_of(&user_id)? {
            Some(team_id) => team_id,
            None => {
                let team_id = repo.create_team("Default team")?;
                repo.add_member(team_id, &user_id, "owner")?;
                team_id
            }
        };
        let token = repo.create_session(&user_id, 30)?;
        Ok::<_, rusqlite::Error>((team_id, token))
    })();

    match result {
        Ok((team_id, token)) => info!(
            "Bootstrap session for {} (team {}): {}",
            email, team_id, token
        ),
        Err(e) => warn!("Bootstrap failed: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
