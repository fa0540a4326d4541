//! Open handshakes, one per engine open protocol
//!
//! The handshake is chosen once from [`Engine::protocol`]. Both variants
//! produce the same [`Opened`] value, so nothing downstream needs to know
//! which protocol the engine speaks.

use kvdao_core::{Engine, EngineError, OpenEvent, OpenProtocol, Session};

use crate::error::{DaoError, Result};
use crate::tracing::prefix;

/// A freshly opened connection, with the version change transaction if one
/// is in progress.
pub(crate) struct Opened<S: Session> {
    pub(crate) session: S,
    pub(crate) upgrade: Option<S::Upgrade>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handshake {
    /// Engine emits `UpgradeNeeded` and later `Success` for the same open.
    UpgradeEvent,
    /// Engine always succeeds; versions are raised with `set_version`.
    SetVersion,
}

impl From<OpenProtocol> for Handshake {
    fn from(protocol: OpenProtocol) -> Self {
        match protocol {
            OpenProtocol::UpgradeEvent => Handshake::UpgradeEvent,
            OpenProtocol::SetVersion => Handshake::SetVersion,
        }
    }
}

impl Handshake {
    pub(crate) async fn open<E: Engine>(
        self,
        engine: &E,
        name: &str,
        version: u32,
    ) -> Result<Opened<E::Session>> {
        let mut request = engine.open(name, version).map_err(DaoError::Connection)?;
        let first = request.next_event().await.ok_or_else(|| {
            DaoError::Connection(EngineError::Backend(
                "open request ended without a result".into(),
            ))
        })?;

        // Only the first event is delivered. Dropping the request discards the
        // success an upgrade-event engine reports after the upgrade finishes.
        drop(request);

        match first {
            OpenEvent::UpgradeNeeded {
                session,
                old_version,
                upgrade,
            } => {
                tracing::info!(
                    "{} opened {} with version change {} -> {}",
                    prefix::OPEN,
                    name,
                    old_version,
                    version
                );
                Ok(Opened {
                    session,
                    upgrade: Some(upgrade),
                })
            }
            OpenEvent::Success(session) => self.settle_version(session, version).await,
            OpenEvent::Error(e) => {
                tracing::warn!("{} failed to open {}: {}", prefix::DB, name, e);
                Err(DaoError::Connection(e))
            }
        }
    }

    async fn settle_version<S: Session>(self, session: S, version: u32) -> Result<Opened<S>> {
        let current = session.version();
        if self == Handshake::SetVersion && current != version {
            let upgrade = session
                .set_version(version)
                .await
                .map_err(DaoError::Connection)?;
            tracing::info!(
                "{} opened {} and set version {} -> {}",
                prefix::OPEN,
                session.name(),
                current,
                version
            );
            return Ok(Opened {
                session,
                upgrade: Some(upgrade),
            });
        }

        tracing::info!(
            "{} opened {} at version {}",
            prefix::OPEN,
            session.name(),
            current
        );
        Ok(Opened {
            session,
            upgrade: None,
        })
    }
}
