//! Recovery navigation after unrecoverable local data corruption

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::tracing::prefix;

/// Sends the user to a recovery location. Provided by the host application.
pub trait Redirector: Send + Sync + 'static {
    fn redirect(&self, location: &str);
}

impl<F> Redirector for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn redirect(&self, location: &str) {
        self(location)
    }
}

/// Redirector that only logs. Used when the host doesn't provide one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRedirector;

impl Redirector for LogRedirector {
    fn redirect(&self, location: &str) {
        tracing::warn!("{} redirect to recovery location {}", prefix::CLOSE, location);
    }
}

/// Call `redirector` with `location` once `delay` has elapsed.
///
/// Outside a tokio runtime the redirect happens immediately.
pub(crate) fn schedule(
    redirector: Arc<dyn Redirector>,
    location: String,
    delay: Duration,
) -> Option<JoinHandle<()>> {
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            redirector.redirect(&location);
        })),
        Err(_) => {
            tracing::warn!("no async runtime; redirecting without delay");
            redirector.redirect(&location);
            None
        }
    }
}
