//! Application state wiring all adapters together.
//!
//! AppState pins the core's generic ports to the concrete infra
//! implementations and owns the process-wide session registry and
//! shutdown token. There are no hidden globals: every live connection is
//! reachable through the registry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pumplink_core::session::SessionHandle;
use pumplink_infra::config::{load_config, resolve_data_dir};
use pumplink_infra::relay::HttpInferenceRelay;
use pumplink_infra::sqlite::conversation::SqliteConversationRepository;
use pumplink_infra::sqlite::pool::DatabasePool;
use pumplink_infra::sqlite::token::SqliteTokenVerifier;
use pumplink_types::config::GatewayConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared application state for the gateway.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<SqliteConversationRepository>,
    pub verifier: Arc<SqliteTokenVerifier>,
    pub relay: Arc<HttpInferenceRelay>,
    /// Registry of live sessions, keyed by session id. Entries are
    /// inserted on upgrade and removed on close, so repeated
    /// authenticate-and-bind cycles never leak.
    pub sessions: Arc<DashMap<Uuid, SessionHandle>>,
    /// Cancelled on SIGTERM/Ctrl+C; every connection closes with the
    /// normal close code when this fires.
    pub shutdown: CancellationToken,
    pub config: Arc<GatewayConfig>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: connect to the DB, load config,
    /// wire the adapters.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::open(&data_dir).await?;

        let config = load_config(&data_dir).await;

        let relay = HttpInferenceRelay::new(
            config.inference.url.clone(),
            Duration::from_secs(config.inference.timeout_secs),
        )?;

        Ok(Self {
            repo: Arc::new(SqliteConversationRepository::new(db_pool.clone())),
            verifier: Arc::new(SqliteTokenVerifier::new(db_pool.clone())),
            relay: Arc::new(relay),
            sessions: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
            db_pool,
        })
    }
}
