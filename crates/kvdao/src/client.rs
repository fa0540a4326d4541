//! The store client: the public surface of the data-access layer

use std::sync::Arc;

use kvdao_core::{Engine, UpgradeTransaction};

use crate::config::DaoConfig;
use crate::error::{DaoError, Result};
use crate::redirect::{LogRedirector, Redirector};
use crate::session::SessionManager;
use crate::tracing::prefix;

/// Data-access client over one database of an [`Engine`].
///
/// The client owns the database connection: it is opened by the first
/// operation and reused by every later one. Each operation runs in its own
/// read-write transaction; there is no atomicity across operations.
pub struct StoreClient<E: Engine> {
    engine: Arc<E>,
    config: Arc<DaoConfig>,
    pub(crate) sessions: SessionManager<E>,
}

impl<E: Engine> StoreClient<E> {
    /// Create a client whose recovery redirect is only logged.
    pub fn new(engine: E, config: DaoConfig) -> Self {
        Self::with_redirector(engine, config, LogRedirector)
    }

    pub fn with_redirector(engine: E, config: DaoConfig, redirector: impl Redirector) -> Self {
        let engine = Arc::new(engine);
        let config = Arc::new(config);
        let sessions = SessionManager::new(engine.clone(), config.clone(), Arc::new(redirector));
        Self {
            engine,
            config,
            sessions,
        }
    }

    pub fn config(&self) -> &DaoConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.sessions.is_open()
    }

    /// Close the session and delete the entire database.
    pub async fn remove_db(&self) -> Result<()> {
        self.sessions.reset();
        self.engine
            .delete_database(&self.config.db_name)
            .await
            .map_err(DaoError::Connection)?;
        tracing::info!("{} removed database {}", prefix::CLOSE, self.config.db_name);
        Ok(())
    }

    /// Session for an ordinary operation.
    ///
    /// A version change handed to an ordinary operation is committed as-is,
    /// since the engine accepts no other transaction while it runs.
    pub(crate) async fn session(&self) -> Result<E::Session> {
        let acquired = self.sessions.ensure().await?;
        if let Some(upgrade) = acquired.upgrade {
            tracing::debug!(
                "{} committing version {} without a schema plan",
                prefix::DB,
                upgrade.new_version()
            );
            upgrade.commit().map_err(DaoError::Schema)?;
        }
        Ok(acquired.session)
    }
}
