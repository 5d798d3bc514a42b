pub mod callback;
pub mod oauth;
pub mod rendezvous;
pub mod session;

pub use oauth::OAuthClient;
pub use session::{AuthPrompt, AuthSession, SessionManager, SessionState};

use crate::api::spotify::SpotifyProvider;
use crate::client::PlaylistClient;
use crate::config::Config;
use crate::store::{CredentialStore, StoredToken};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Every way establishing an authenticated session can fail. All of them
/// are fatal for the current invocation.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("cannot load or create auth secrets: {0:#}")]
    Secrets(anyhow::Error),
    #[error("client_id and client_secret must be configured for authorization")]
    MissingClientCredentials,
    #[error("token refresh failed: {0:#}")]
    Refresh(anyhow::Error),
    #[error("authorization code exchange failed: {0:#}")]
    Exchange(anyhow::Error),
    #[error("auth callback state did not match; possible CSRF attempt")]
    CsrfMismatch,
    #[error("authorization denied by provider: {0}")]
    Denied(String),
    #[error("auth callback carried no authorization code")]
    MissingCode,
    #[error("no auth callback received within {0:?}")]
    Timeout(Duration),
    #[error("cannot bind callback listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("callback listener did not shut down cleanly: {0}")]
    Shutdown(String),
    #[error("callback listener stopped before authorization completed")]
    Abandoned,
    #[error("cannot build authorization request: {0:#}")]
    Setup(anyhow::Error),
}

/// Turns a usable token into the client handle the rest of the program uses.
pub trait Connector: Send + Sync {
    fn connect(&self, token: StoredToken) -> PlaylistClient;
}

/// Builds Spotify-backed clients that refresh and persist their own token.
pub struct SpotifyConnector {
    api_base: String,
    oauth: Arc<OAuthClient>,
    store: CredentialStore,
    batch_size: usize,
}

impl SpotifyConnector {
    pub fn new(api_base: impl Into<String>, oauth: Arc<OAuthClient>, store: CredentialStore, batch_size: usize) -> Self {
        Self {
            api_base: api_base.into(),
            oauth,
            store,
            batch_size,
        }
    }

    pub fn from_config(cfg: &Config, oauth: Arc<OAuthClient>) -> Self {
        Self::new(cfg.api_base.clone(), oauth, CredentialStore::from_config(cfg), cfg.max_batch_size)
    }
}

impl Connector for SpotifyConnector {
    fn connect(&self, token: StoredToken) -> PlaylistClient {
        let provider = SpotifyProvider::new(self.api_base.clone(), self.oauth.clone(), self.store.clone(), token);
        PlaylistClient::with_batch_size(Arc::new(provider), self.batch_size)
    }
}
