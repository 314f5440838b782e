/// Admission Server
///
/// Main server entry point. Handles:
/// - Command-line / environment configuration
/// - Database initialization and admin bootstrap
/// - Background housekeeping
/// - HTTP server startup
use actix_web::web;
use admission_server::config::Config;
use admission_server::db::{self, SqliteStorage};
use admission_server::server;
use admission_server::state::{AppState, Collaborators};
use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Periodically drop stale verification codes and expired sessions.
fn spawn_housekeeping(state: web::Data<AppState>) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            match state.identity.purge_stale(Utc::now()).await {
                Ok((0, 0)) => {}
                Ok((codes, sessions)) => log::info!(
                    "Housekeeping removed {} verification codes and {} sessions",
                    codes,
                    sessions
                ),
                Err(e) => log::error!("Housekeeping failed: {}", e),
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();
    let settings = config.settings();

    log::info!("Starting Admission Server");
    log::info!("Database: {:?}", config.database);
    log::info!("Uploads: {:?}", settings.upload_dir);
    log::info!("Port: {}", config.port);

    // Write PID file if specified
    if let Some(pidfile) = &config.pidfile {
        let pid = process::id().to_string();
        fs::write(pidfile, pid).with_context(|| format!("Failed to write PID file {:?}", pidfile))?;
        log::info!("PID file written to: {:?}", pidfile);
    }

    let db_path = config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = db::create_pool(db_path).context("Failed to create database pool")?;
    log::info!("Database initialized");

    fs::create_dir_all(&settings.upload_dir)
        .with_context(|| format!("Failed to create upload dir {:?}", settings.upload_dir))?;

    let collaborators = Collaborators::from_settings(&settings)?;
    let state = web::Data::new(AppState::new(
        Arc::new(SqliteStorage::new(pool)),
        settings,
        collaborators,
    ));

    if let Some((email, password)) = config.seed_admin() {
        state.identity.ensure_admin(email, password).await?;
    }

    spawn_housekeeping(state.clone());

    let bind_addr = config.bind_addr();
    log::info!("Starting HTTP server on {}", bind_addr);

    let http_server = server::create_http_server(state, &bind_addr)?;
    http_server.await?;
    Ok(())
}
