//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub db: SqlitePool,
}

impl AppState {
    /// Create a new application state around an initialized pool
    pub fn new(config: Config, db: SqlitePool) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, db }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Drain and close the connection pool
    ///
    /// Waits for checked-out connections to be returned. Call after the
    /// HTTP server has stopped accepting requests.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        self.inner.db.close().await;
    }
}
