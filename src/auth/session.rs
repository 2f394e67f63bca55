// Session teardown and redirect bookkeeping

use std::sync::Arc;

use crate::config::ClientConfig;

use super::store::{CredentialStore, KeyValueStore};

/// Navigation as seen by the client core. The embedding application
/// supplies the real implementation (browser location, router, ...).
pub trait Navigator: Send + Sync {
    /// Path the user is currently looking at
    fn current_path(&self) -> String;

    /// Send the user to the given application path
    fn redirect(&self, path: &str);
}

/// Ends the session after an unrecoverable authentication failure:
/// drops the credential, bookmarks the current location for after login,
/// and routes the user to the login entry point.
pub struct SessionGuard {
    credentials: CredentialStore,
    kv: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    config: Arc<ClientConfig>,
}

impl SessionGuard {
    pub fn new(
        credentials: CredentialStore,
        kv: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            credentials,
            kv,
            navigator,
            config,
        }
    }

    /// Tear down the session. The return-path bookmark is skipped when the
    /// user is already on an auth entry point, so a later login cannot
    /// bounce back into the login form itself. Storage failures are logged
    /// and never propagated; teardown always completes.
    pub fn teardown(&self) {
        if let Err(e) = self.credentials.clear() {
            tracing::warn!("Failed to clear credential during session teardown: {e:#}");
        }

        let here = self.navigator.current_path();
        if !self.is_auth_entry(&here) {
            if let Err(e) = self.kv.set(&self.config.return_path_key, &here) {
                tracing::warn!("Failed to save return path: {e:#}");
            }
        }

        tracing::info!(path = %self.config.login_path, "Session ended, redirecting to login");
        self.navigator.redirect(&self.config.login_path);
    }

    fn is_auth_entry(&self, path: &str) -> bool {
        path.starts_with(&self.config.login_path) || path.starts_with(&self.config.register_path)
    }
}
