use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use volunteer_board::api::{create_app_router, AppState};
use volunteer_board::auth::{AdminCredentials, SessionManager};
use volunteer_board::clock::{Clock, SystemClock};
use volunteer_board::config::{
    load_config_or_default, AppConfig, Secrets, StorageSecrets, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH,
};
use volunteer_board::credentials::{
    run_token_cleanup, CredentialStorage, InMemoryCredentialStorage, KvCredentialStorage,
    SqliteCredentialStorage,
};
use volunteer_board::kv::KvClient;
use volunteer_board::oauth::{KvStateStore, MemoryStateStore, OAuthClient, Revoker, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "volunteer_board=info,tower_http=info".into()),
        )
        .init();

    info!("Volunteer board starting...");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config_or_default(&config_path)?;
    info!(
        path = %config_path,
        backend = ?config.storage.backend,
        "Configuration loaded"
    );

    let secrets = match Secrets::from_env(config.storage.backend) {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %e, "Refusing to start without required secrets");
            return Err(e);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http_client = Client::builder()
        .timeout(Duration::from_secs(config.linear.http_timeout_seconds))
        .build()
        .context("Failed to build HTTP client")?;

    let (credentials, states) = build_storage(&config, &secrets, &http_client, &clock)?;
    info!("Credential storage initialized");

    let oauth = OAuthClient::new(
        config.linear.provider_config(),
        Some(secrets.client.clone()),
        http_client.clone(),
        Arc::clone(&clock),
    );
    let revoker = Revoker::new(
        config.linear.revoke_url.clone(),
        http_client.clone(),
        Arc::clone(&credentials),
    );

    // Background sweep of expired credentials
    tokio::spawn(run_token_cleanup(
        Arc::clone(&credentials),
        config.storage.cleanup_interval_seconds,
    ));

    let state = AppState {
        oauth,
        states,
        credentials: Arc::clone(&credentials),
        revoker,
        sessions: SessionManager::new(
            &secrets.session_secret,
            config.server.secure_cookies,
            Arc::clone(&clock),
        ),
        admin: AdminCredentials::new(&secrets.admin_username, &secrets.admin_password),
        clock,
        callback_url: config.server.callback_url(),
        http_client,
        linear_api_url: config.linear.api_url.clone(),
    };
    let app = create_app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(
        address = %config.server.bind_address,
        callback = %config.server.callback_url(),
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    credentials.close().await?;
    info!("Volunteer board stopped");
    Ok(())
}

/// Selects credential and state backends from configuration.
///
/// The KV backend keeps OAuth state in KV as well so that any instance can
/// complete a handshake. SQLite is single-instance and keeps state in memory.
fn build_storage(
    config: &AppConfig,
    secrets: &Secrets,
    http_client: &Client,
    clock: &Arc<dyn Clock>,
) -> Result<(Arc<dyn CredentialStorage>, Arc<dyn StateStore>)> {
    let state_ttl = config.oauth.state_ttl_seconds;

    match &secrets.storage {
        StorageSecrets::Memory => {
            let credentials: Arc<dyn CredentialStorage> =
                Arc::new(InMemoryCredentialStorage::new(Arc::clone(clock)));
            let states: Arc<dyn StateStore> =
                Arc::new(MemoryStateStore::new(state_ttl, Arc::clone(clock)));
            Ok((credentials, states))
        }
        StorageSecrets::Kv { url, token } => {
            let kv = KvClient::new(http_client.clone(), url.as_str(), token.as_str());
            let credentials: Arc<dyn CredentialStorage> =
                Arc::new(KvCredentialStorage::new(kv.clone(), Arc::clone(clock)));
            let states: Arc<dyn StateStore> =
                Arc::new(KvStateStore::new(kv, state_ttl, Arc::clone(clock)));
            Ok((credentials, states))
        }
        StorageSecrets::Sqlite { encryption_key } => {
            let credentials: Arc<dyn CredentialStorage> = Arc::new(SqliteCredentialStorage::new(
                &config.storage.sqlite_path,
                encryption_key,
                Arc::clone(clock),
            )?);
            let states: Arc<dyn StateStore> =
                Arc::new(MemoryStateStore::new(state_ttl, Arc::clone(clock)));
            Ok((credentials, states))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
