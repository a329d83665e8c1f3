//! combatd - tabletop RPG combat server daemon
//!
//! Runs encounters: dice, conditions, concentration, initiative, attack and
//! check resolution, and escalation of stalled turns.

pub mod api;
pub mod combat;
pub mod config;
pub mod db;
pub mod encounter;
pub mod error;
pub mod escalation;
pub mod ids;
pub mod sweep;

pub use config::Config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use api::AppState;
use db::Database;
use encounter::EncounterRegistry;
use sweep::Sweeper;

/// The combatd server instance
pub struct Server {
    config: Config,
    db: Arc<Database>,
    registry: Arc<EncounterRegistry>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance and reload persisted encounters
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(config.db_path.as_deref()).await?;
        let registry =
            EncounterRegistry::new(Some(db.pool().clone()), config.event_log_capacity).shared();
        let loaded = registry.load_from_db().await?;
        if loaded > 0 {
            info!(loaded, "restored encounters");
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            db: Arc::new(db),
            registry,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Get the encounter registry
    pub fn registry(&self) -> Arc<EncounterRegistry> {
        self.registry.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(AppState::new(
            self.db.clone(),
            self.registry.clone(),
            self.config.escalation,
        ))
    }

    /// Run the server and the escalation sweeper until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("combatd listening on {}", local_addr);

        let sweeper = Sweeper::new(
            self.registry.clone(),
            Duration::from_secs(self.config.sweep_interval_secs),
            self.config.escalation,
        )
        .spawn(self.shutdown_rx.clone());

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        // The sweeper watches the same channel; make sure it has been told
        self.shutdown();
        sweeper.await?;

        info!("combatd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
