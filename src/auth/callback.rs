//! One-shot HTTP listener that receives the OAuth redirect.

use super::rendezvous::Rendezvous;
use super::{AuthError, Connector, OAuthClient};
use crate::client::PlaylistClient;
use crate::store::{AuthSecrets, CredentialStore};
use anyhow::{anyhow, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// What the callback hands to the waiting session.
pub type CallbackOutcome = Result<PlaylistClient, AuthError>;

/// Checks the `state` echoed by the provider against the expected one.
/// The expected state is kept only as an HMAC tag under the cookie key and
/// compared in constant time.
pub struct CsrfGuard {
    key: Vec<u8>,
    tag: Vec<u8>,
}

impl CsrfGuard {
    pub fn new(secrets: &AuthSecrets) -> Result<Self> {
        let key = secrets.cookie_key_bytes()?;
        let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| anyhow!("invalid cookie key: {}", e))?;
        mac.update(secrets.csrf_state.as_bytes());
        let tag = mac.finalize().into_bytes().to_vec();
        Ok(Self { key, tag })
    }

    pub fn verify(&self, state: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(state.as_bytes());
        mac.verify_slice(&self.tag).is_ok()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Shared by the route handler for the lifetime of one listener.
pub struct CallbackState {
    oauth: Arc<OAuthClient>,
    store: CredentialStore,
    connector: Arc<dyn Connector>,
    guard: CsrfGuard,
    claimed: AtomicBool,
    rendezvous: Rendezvous<CallbackOutcome>,
}

impl CallbackState {
    pub fn new(
        oauth: Arc<OAuthClient>,
        store: CredentialStore,
        connector: Arc<dyn Connector>,
        guard: CsrfGuard,
        rendezvous: Rendezvous<CallbackOutcome>,
    ) -> Self {
        Self {
            oauth,
            store,
            connector,
            guard,
            claimed: AtomicBool::new(false),
            rendezvous,
        }
    }

    fn finish(&self, outcome: CallbackOutcome) {
        if self.rendezvous.complete(outcome).is_err() {
            warn!("auth rendezvous was already completed; dropping outcome");
        }
    }
}

async fn handle_callback(
    State(st): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    if st.claimed.swap(true, Ordering::SeqCst) || st.rendezvous.is_completed() {
        warn!("auth callback received after the flow was already completed");
        return (StatusCode::CONFLICT, "Authorization already completed.\n");
    }

    // nothing in the request is trusted until the state verifies, `error` included
    if !st.guard.verify(params.state.as_deref().unwrap_or_default()) {
        error!("auth callback state mismatch");
        st.finish(Err(AuthError::CsrfMismatch));
        return (StatusCode::BAD_REQUEST, "State mismatch. Authorization aborted.\n");
    }

    if let Some(reason) = params.error {
        warn!(%reason, "provider denied authorization");
        st.finish(Err(AuthError::Denied(reason)));
        return (StatusCode::BAD_REQUEST, "Authorization was denied.\n");
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        st.finish(Err(AuthError::MissingCode));
        return (StatusCode::BAD_REQUEST, "Missing authorization code.\n");
    };

    let token = match st.oauth.exchange_code(&code).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %format!("{:#}", e), "authorization code exchange failed");
            st.finish(Err(AuthError::Exchange(e)));
            return (StatusCode::BAD_GATEWAY, "Could not exchange the authorization code.\n");
        }
    };
    if let Err(e) = st.store.save_token(&token) {
        error!(error = %format!("{:#}", e), "could not persist token");
        st.finish(Err(AuthError::Exchange(e.context("persisting token"))));
        return (StatusCode::INTERNAL_SERVER_ERROR, "Could not save the token.\n");
    }

    info!("authorization code exchanged");
    let client = st.connector.connect(token);
    st.finish(Ok(client));
    (StatusCode::OK, "Authentication successful. You can close this window.\n")
}

/// A running callback listener.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// Bind `addr` and serve `GET path` until `shutdown` is called.
pub async fn start(addr: SocketAddr, path: &str, state: Arc<CallbackState>) -> Result<CallbackServer, AuthError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AuthError::Bind { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| AuthError::Bind { addr, source })?;

    let app = Router::new().route(path, get(handle_callback)).with_state(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });
    info!(%local_addr, path, "callback listener started");
    Ok(CallbackServer {
        local_addr,
        shutdown_tx,
        handle,
    })
}

impl CallbackServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait up to `grace` for in-flight ones.
    pub async fn shutdown(self, grace: Duration) -> Result<(), AuthError> {
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(Ok(()))) => {
                info!("callback listener stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(AuthError::Shutdown(format!("listener failed: {}", e))),
            Ok(Err(e)) => Err(AuthError::Shutdown(format!("listener task failed: {}", e))),
            Err(_) => Err(AuthError::Shutdown(format!("listener still running after {:?}", grace))),
        }
    }
}
