//! Session manager
//!
//! Owns the single connection of a [`StoreClient`](crate::StoreClient). The
//! first caller opens it; concurrent callers wait on the same open. The open
//! either yields a usable session, hands a pending version change to exactly
//! one caller, or, when the sentinel store is missing from an already
//! versioned database, wipes local data and schedules the recovery redirect.

use std::sync::Arc;

use kvdao_core::{Engine, Session};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::config::DaoConfig;
use crate::error::{DaoError, Result};
use crate::handshake::{Handshake, Opened};
use crate::redirect::{self, Redirector};
use crate::tracing::prefix;

/// Shown to the user when local data had to be wiped.
pub const CORRUPTION_MESSAGE: &str =
    "Local data is corrupted and has been cleared. Redirecting to the login page, please sign in again.";

struct Live<S: Session> {
    session: S,
    // Taken by the first caller after the open; never handed out twice.
    upgrade: Mutex<Option<S::Upgrade>>,
}

type Slot<S> = Arc<OnceCell<Arc<Live<S>>>>;

/// A session handed to one caller.
pub struct Acquired<S: Session> {
    pub session: S,
    /// The version change in progress, if this caller is the one to run it.
    pub upgrade: Option<S::Upgrade>,
}

pub struct SessionManager<E: Engine> {
    engine: Arc<E>,
    config: Arc<DaoConfig>,
    handshake: Handshake,
    redirector: Arc<dyn Redirector>,
    slot: Mutex<Slot<E::Session>>,
}

impl<E: Engine> SessionManager<E> {
    pub fn new(engine: Arc<E>, config: Arc<DaoConfig>, redirector: Arc<dyn Redirector>) -> Self {
        let handshake = Handshake::from(engine.protocol());
        Self {
            engine,
            config,
            handshake,
            redirector,
            slot: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Get the live session, opening it on first use.
    pub async fn ensure(&self) -> Result<Acquired<E::Session>> {
        let cell = self.slot.lock().clone();
        let live = cell.get_or_try_init(|| self.open()).await?.clone();
        let upgrade = live.upgrade.lock().take();
        Ok(Acquired {
            session: live.session.clone(),
            upgrade,
        })
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().initialized()
    }

    /// Close and forget the live session. The next `ensure` opens a new one.
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Arc::new(OnceCell::new()));
        if let Some(live) = previous.get() {
            live.session.close();
            tracing::debug!("{} session to {} closed", prefix::CLOSE, live.session.name());
        }
    }

    async fn open(&self) -> Result<Arc<Live<E::Session>>> {
        let Opened { session, upgrade } = self
            .handshake
            .open(&*self.engine, &self.config.db_name, self.config.version)
            .await?;

        if upgrade.is_none() && !session.contains_store(&self.config.sentinel_store) {
            return Err(self.tear_down_corrupted(session).await);
        }

        Ok(Arc::new(Live {
            session,
            upgrade: Mutex::new(upgrade),
        }))
    }

    async fn tear_down_corrupted(&self, session: E::Session) -> DaoError {
        tracing::warn!(
            "{} sentinel store '{}' missing from {}; deleting local data",
            prefix::CLOSE,
            self.config.sentinel_store,
            self.config.db_name
        );
        session.close();
        if let Err(e) = self.engine.delete_database(&self.config.db_name).await {
            tracing::error!("{} failed to delete {}: {}", prefix::DB, self.config.db_name, e);
        }
        redirect::schedule(
            self.redirector.clone(),
            self.config.recovery_url.clone(),
            self.config.redirect_delay_duration(),
        );
        DaoError::SchemaCorrupted(CORRUPTION_MESSAGE.to_string())
    }
}
