//! Establishes exactly one authenticated session per run: a cached token,
//! a refreshed one, or a fresh interactive authorization.

use super::callback::{self, CallbackState, CsrfGuard};
use super::rendezvous::{self, WaitError};
use super::{AuthError, Connector, OAuthClient, SpotifyConnector};
use crate::client::PlaylistClient;
use crate::config::Config;
use crate::store::{AuthSecrets, CredentialStore};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    SecretsReady,
    AwaitingInteractiveAuth,
    Authenticated,
    Failed,
}

/// The outcome of authentication for this run. Written once.
#[derive(Debug)]
pub struct AuthSession {
    state: SessionState,
    client: Option<PlaylistClient>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Start,
            client: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&PlaylistClient> {
        self.client.as_ref()
    }

    fn set_state(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "auth session transition");
        self.state = next;
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Shown to the user when interactive authorization is needed.
#[derive(Debug, Clone)]
pub struct AuthPrompt {
    pub authorization_url: String,
    /// Where the listener actually accepts the redirect.
    pub callback_url: String,
}

type PromptHook = Arc<dyn Fn(&AuthPrompt) + Send + Sync>;

fn print_prompt(prompt: &AuthPrompt) {
    println!("Open this URL in your browser to authorize access:\n\n  {}\n", prompt.authorization_url);
    println!("Waiting for the redirect on {} ...", prompt.callback_url);
}

pub struct SessionManager {
    store: CredentialStore,
    oauth: Arc<OAuthClient>,
    connector: Arc<dyn Connector>,
    listen_addr: SocketAddr,
    callback_path: String,
    auth_timeout: Duration,
    shutdown_grace: Duration,
    open_browser: bool,
    prompt: PromptHook,
}

impl SessionManager {
    pub fn new(store: CredentialStore, oauth: Arc<OAuthClient>, connector: Arc<dyn Connector>) -> Self {
        Self {
            store,
            oauth,
            connector,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            callback_path: "/api/auth".into(),
            auth_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(10),
            open_browser: false,
            prompt: Arc::new(print_prompt),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let oauth = Arc::new(OAuthClient::from_config(cfg));
        let connector = Arc::new(SpotifyConnector::from_config(cfg, oauth.clone()));
        Ok(Self::new(CredentialStore::from_config(cfg), oauth, connector)
            .with_listener(cfg.listen_socket_addr()?, cfg.callback_path()?)
            .with_timeouts(cfg.auth_timeout(), cfg.shutdown_grace())
            .with_open_browser(cfg.open_browser))
    }

    pub fn with_listener(mut self, addr: SocketAddr, callback_path: impl Into<String>) -> Self {
        self.listen_addr = addr;
        self.callback_path = callback_path.into();
        self
    }

    pub fn with_timeouts(mut self, auth_timeout: Duration, shutdown_grace: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn with_open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// Replace the default stdout prompt.
    pub fn on_prompt<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AuthPrompt) + Send + Sync + 'static,
    {
        self.prompt = Arc::new(hook);
        self
    }

    /// Drive `session` to `Authenticated`. No-op when it already is.
    pub async fn authenticate(&self, session: &mut AuthSession) -> Result<(), AuthError> {
        if session.is_authenticated() {
            debug!("session already authenticated");
            return Ok(());
        }
        match self.establish(session).await {
            Ok(client) => {
                info!(provider = client.provider_name(), "authenticated");
                session.client = Some(client);
                session.set_state(SessionState::Authenticated);
                Ok(())
            }
            Err(e) => {
                session.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn establish(&self, session: &mut AuthSession) -> Result<PlaylistClient, AuthError> {
        let secrets = self.store.ensure_secrets().map_err(AuthError::Secrets)?;
        session.set_state(SessionState::SecretsReady);

        match self.store.load_token() {
            Some(token) if !token.is_expired() => {
                info!("using stored token");
                Ok(self.connector.connect(token))
            }
            Some(token) => {
                self.require_credentials()?;
                info!("stored token expired; refreshing");
                let fresh = self.oauth.refresh(&token).await.map_err(AuthError::Refresh)?;
                self.store.save_token(&fresh).map_err(AuthError::Refresh)?;
                Ok(self.connector.connect(fresh))
            }
            None => {
                self.require_credentials()?;
                session.set_state(SessionState::AwaitingInteractiveAuth);
                self.interactive(&secrets).await
            }
        }
    }

    fn require_credentials(&self) -> Result<(), AuthError> {
        if self.oauth.has_credentials() {
            Ok(())
        } else {
            Err(AuthError::MissingClientCredentials)
        }
    }

    async fn interactive(&self, secrets: &AuthSecrets) -> Result<PlaylistClient, AuthError> {
        let authorization_url = self
            .oauth
            .authorization_url(&secrets.csrf_state)
            .map_err(AuthError::Setup)?;
        let guard = CsrfGuard::new(secrets).map_err(AuthError::Secrets)?;

        let (rv, waiter) = rendezvous::channel();
        let state = Arc::new(CallbackState::new(
            self.oauth.clone(),
            self.store.clone(),
            self.connector.clone(),
            guard,
            rv,
        ));
        let server = callback::start(self.listen_addr, &self.callback_path, state).await?;

        let prompt = AuthPrompt {
            authorization_url,
            callback_url: format!("http://{}{}", server.local_addr(), self.callback_path),
        };
        (self.prompt)(&prompt);
        if self.open_browser {
            if let Err(e) = webbrowser::open(&prompt.authorization_url) {
                warn!(error = %e, "could not open a browser; open the URL manually");
            }
        }

        let outcome = waiter.wait(self.auth_timeout).await;
        server.shutdown(self.shutdown_grace).await?;
        match outcome {
            Ok(result) => result,
            Err(WaitError::TimedOut) => Err(AuthError::Timeout(self.auth_timeout)),
            Err(WaitError::Abandoned) => Err(AuthError::Abandoned),
        }
    }
}
