use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use ckd_core::AccountService;
use ckd_core::accounts::NewUser;
use ckd_core::config::{config_from_env_value, read_config_file};
use ckd_core::notify::TracingNotifier;
use ckd_core::store::InMemoryStore;
use ckd_core::token::{SignedTokenService, TokenService};

/// Main entry point for the CKD calculator service
///
/// Resolves configuration once, wires the core services to the in-memory stores and serves the
/// REST API.
///
/// # Environment Variables
/// - `CKD_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CKD_PUBLIC_BASE_URL`: base of the guest registration link (default: "http://localhost:3000")
/// - `CKD_TOKEN_KEY_PEM`: path to a PKCS#8 PEM P-256 key for session tokens
/// - `CKD_SEED_USERS`: path to a JSON array of users to import at startup
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - configuration is invalid or a named file cannot be read,
/// - seeding users fails, or
/// - the server address cannot be bound or the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ckd_run=info".parse()?)
                .add_directive("ckd_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CKD_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let cfg = Arc::new(config_from_env_value(
        std::env::var("CKD_PUBLIC_BASE_URL").ok(),
    )?);
    let tokens = token_service(std::env::var("CKD_TOKEN_KEY_PEM").ok())?;

    let store = Arc::new(InMemoryStore::new());
    let state = AppState::new(
        cfg,
        store.clone(),
        store,
        tokens,
        Arc::new(TracingNotifier::new()),
    );

    if let Some(path) = std::env::var("CKD_SEED_USERS")
        .ok()
        .filter(|p| !p.trim().is_empty())
    {
        seed_users(&state.accounts, Path::new(&path))?;
    }

    tracing::info!("++ Starting CKD REST on {}", rest_addr);

    let app = api_rest::router(state);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn token_service(key_path: Option<String>) -> anyhow::Result<Arc<dyn TokenService>> {
    match key_path.filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let pem = read_config_file(Path::new(&path))?;
            let service = SignedTokenService::from_pkcs8_pem(&pem)
                .with_context(|| format!("invalid signing key in {path}"))?;
            Ok(Arc::new(service))
        }
        None => {
            tracing::warn!(
                "CKD_TOKEN_KEY_PEM not set; using an ephemeral signing key, sessions end on restart"
            );
            Ok(Arc::new(SignedTokenService::ephemeral()))
        }
    }
}

fn seed_users(accounts: &AccountService, path: &Path) -> anyhow::Result<()> {
    let raw = read_config_file(path)?;
    let users: Vec<NewUser> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse seed users in {}", path.display()))?;
    let created = accounts.import_users(users)?;
    tracing::info!("++ Seeded {} users from {}", created.len(), path.display());
    Ok(())
}
