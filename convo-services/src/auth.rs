//! Authentication collaborators of the conversation monitor.
//!
//! The monitor never refreshes credentials itself. When the realtime server
//! rejects the upgrade with 401 it hands an [`AuthenticationError`] and a
//! one-shot [`AuthenticationCallback`] to the application's
//! [`AuthenticationDelegate`]. Calling [`AuthenticationCallback::update_token`]
//! stores the new JWT and restarts the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Credentials rejected by the realtime server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationError {
    /// HTTP status of the upgrade response.
    pub status: u16,
    /// Status message reported alongside it.
    pub data: String,
}

impl std::fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication error (status {}): {}", self.status, self.data)
    }
}

/// Read/write access to the user's auth tokens.
pub trait TokenStore: Send + Sync {
    fn jwt(&self) -> Option<String>;
    fn save_jwt(&self, jwt: &str);
    fn session_token(&self) -> Option<String>;
}

/// In-memory [`TokenStore`].
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    jwt: RwLock<Option<String>>,
    session_token: RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new(jwt: Option<String>, session_token: Option<String>) -> Self {
        Self {
            jwt: RwLock::new(non_empty(jwt)),
            session_token: RwLock::new(non_empty(session_token)),
        }
    }

    pub fn set_session_token(&self, token: Option<String>) {
        let mut guard = self.session_token.write().unwrap_or_else(|e| e.into_inner());
        *guard = non_empty(token);
    }
}

impl TokenStore for MemoryTokenStore {
    fn jwt(&self) -> Option<String> {
        self.jwt.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save_jwt(&self, jwt: &str) {
        let mut guard = self.jwt.write().unwrap_or_else(|e| e.into_inner());
        *guard = non_empty(Some(jwt.to_string()));
    }

    fn session_token(&self) -> Option<String> {
        self.session_token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Application hook invoked when the server rejects our credentials.
///
/// Called from the monitor's task, so implementations should hand the work
/// off (for example to a channel) rather than block.
pub trait AuthenticationDelegate: Send + Sync {
    fn on_invalid_auth(&self, error: AuthenticationError, callback: AuthenticationCallback);
}

/// Sent from a callback to the monitor task.
#[derive(Debug)]
pub(crate) enum AuthCommand {
    TokenUpdated { epoch: u64 },
}

/// One-shot handle for supplying a fresh JWT after an authentication failure.
///
/// The callback is tied to the session that failed. If the monitor has been
/// paused or closed since, the token is still stored but the connection is
/// not restarted.
pub struct AuthenticationCallback {
    epoch: u64,
    session_epoch: Arc<AtomicU64>,
    tokens: Arc<dyn TokenStore>,
    commands: mpsc::UnboundedSender<AuthCommand>,
}

impl AuthenticationCallback {
    pub(crate) fn new(
        session_epoch: Arc<AtomicU64>,
        tokens: Arc<dyn TokenStore>,
        commands: mpsc::UnboundedSender<AuthCommand>,
    ) -> Self {
        Self {
            epoch: session_epoch.load(Ordering::SeqCst),
            session_epoch,
            tokens,
            commands,
        }
    }

    /// Whether the session this callback belongs to is still current.
    pub fn is_current(&self) -> bool {
        self.session_epoch.load(Ordering::SeqCst) == self.epoch
    }

    /// Save `jwt` and reconnect with it.
    pub fn update_token(self, jwt: &str) {
        self.tokens.save_jwt(jwt);
        if !self.is_current() {
            info!("session ended before token refresh, not reconnecting");
            return;
        }
        if self
            .commands
            .send(AuthCommand::TokenUpdated { epoch: self.epoch })
            .is_err()
        {
            debug!("monitor closed, token saved without reconnecting");
        }
    }
}

impl std::fmt::Debug for AuthenticationCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationCallback")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
