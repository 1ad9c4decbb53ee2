use async_mutex::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::crypto::Sealer;
use crate::http::{RetryPolicy, SurfTransport, Transport};
use crate::notify::{self, Notifier};
use crate::oauth::CatalogToken;
use crate::store::{MemStore, PgStore, Store};
use crate::{Result, LOG};

/// Everything a request handler needs, cheap to clone
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub http: Arc<dyn Transport>,
    pub notifier: Arc<dyn Notifier>,
    pub sealer: Arc<Sealer>,
    // client-credentials token shared by all catalog reads
    pub(crate) catalog_token: Arc<Mutex<Option<CatalogToken>>>,
}

impl Context {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        http: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let sealer = Sealer::new(&config.enc_key)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            http,
            notifier,
            sealer: Arc::new(sealer),
            catalog_token: Arc::new(Mutex::new(None)),
        })
    }

    /// Build the production context: postgres (or the in-memory store
    /// when `DATABASE_URL=memory`), surf, and the configured notifier.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = if config.uses_memory_store() {
            slog::warn!(LOG, "using in-memory store, nothing will be persisted");
            Arc::new(MemStore::new())
        } else {
            let pg = PgStore::connect(&config.db_url).await?;
            pg.migrate().await?;
            Arc::new(pg)
        };
        let http: Arc<dyn Transport> = Arc::new(SurfTransport::new(Duration::from_secs(
            config.upstream_timeout_seconds,
        )));
        let notifier = notify::from_config(&config, http.clone());
        Self::new(config, store, http, notifier)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.upstream_max_attempts,
            backoff: Duration::from_millis(self.config.upstream_backoff_millis),
        }
    }
}
