use chrono::{Duration as ChronoDuration, Utc};
use mockito::{Matcher, Server};
use playlist_link_sync as lib;
use lib::api::mock::MockProvider;
use lib::auth::{AuthError, AuthSession, Connector, OAuthClient, SessionManager, SessionState};
use lib::client::PlaylistClient;
use lib::store::{AuthSecrets, CredentialStore, StoredToken};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records every token it is handed and returns a mock-backed client.
#[derive(Default)]
struct RecordingConnector {
    tokens: Mutex<Vec<StoredToken>>,
}

impl Connector for RecordingConnector {
    fn connect(&self, token: StoredToken) -> PlaylistClient {
        self.tokens.lock().unwrap().push(token);
        PlaylistClient::new(Arc::new(MockProvider::new()))
    }
}

fn store_in(dir: &Path) -> CredentialStore {
    CredentialStore::new(dir.join("auth").join("auth.json"), dir.join("auth").join("token.json"))
}

fn token(access: &str, expires_in_secs: i64, refresh: Option<&str>) -> StoredToken {
    StoredToken {
        access_token: access.into(),
        refresh_token: refresh.map(String::from),
        token_type: "Bearer".into(),
        expiry: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        scope: None,
    }
}

fn manager(auth_base: &str, store: CredentialStore, connector: Arc<RecordingConnector>) -> SessionManager {
    let oauth = Arc::new(OAuthClient::new(
        "cid",
        "secret",
        "http://127.0.0.1:8888/callback",
        vec!["playlist-read-private".into()],
        auth_base,
    ));
    SessionManager::new(store, oauth, connector)
        .with_listener("127.0.0.1:0".parse().unwrap(), "/callback")
        .with_timeouts(Duration::from_secs(10), Duration::from_secs(10))
}

/// Prompt hook that forwards the callback URL to the test.
fn prompt_channel(m: SessionManager) -> (SessionManager, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let m = m.on_prompt(move |p| {
        let _ = tx.send(p.callback_url.clone());
    });
    (m, rx)
}

#[tokio::test(flavor = "multi_thread")]
async fn valid_stored_token_is_used_without_token_call() {
    let mut server = Server::new_async().await;
    let token_endpoint = server.mock("POST", "/api/token").expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save_token(&token("cached", 3600, Some("r"))).unwrap();
    let connector = Arc::new(RecordingConnector::default());
    let m = manager(&server.url(), store.clone(), connector.clone());

    let mut session = AuthSession::new();
    m.authenticate(&mut session).await.unwrap();
    assert!(session.is_authenticated());
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(connector.tokens.lock().unwrap()[0].access_token, "cached");
    // secrets were generated on first use
    assert!(store.load_secrets().unwrap().unwrap().is_complete());

    // a second call on an authenticated session does nothing
    m.authenticate(&mut session).await.unwrap();
    assert_eq!(connector.tokens.lock().unwrap().len(), 1);
    token_endpoint.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_triggers_exactly_one_refresh() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", "/api/token")
        .match_body(Matcher::UrlEncoded("refresh_token".into(), "r-old".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"renewed","token_type":"Bearer","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save_token(&token("stale", -60, Some("r-old"))).unwrap();
    let connector = Arc::new(RecordingConnector::default());
    let m = manager(&server.url(), store.clone(), connector.clone());

    let mut session = AuthSession::new();
    m.authenticate(&mut session).await.unwrap();
    assert!(session.is_authenticated());
    refresh.assert_async().await;

    let saved = store.load_token().unwrap();
    assert_eq!(saved.access_token, "renewed");
    assert_eq!(saved.refresh_token.as_deref(), Some("r-old"));
    assert!(!saved.is_expired());
    assert_eq!(connector.tokens.lock().unwrap()[0].access_token, "renewed");
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_failure_is_fatal() {
    let mut server = Server::new_async().await;
    let _refresh = server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    store.save_token(&token("stale", -60, Some("r-old"))).unwrap();
    let connector = Arc::new(RecordingConnector::default());
    let m = manager(&server.url(), store.clone(), connector.clone());

    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::Refresh(_)), "got {:?}", err);
    assert!(err.to_string().contains("invalid_grant"));
    assert!(!session.is_authenticated());
    assert_eq!(session.state(), SessionState::Failed);
    // the stale token is left untouched
    assert_eq!(store.load_token().unwrap().access_token, "stale");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_client_credentials_block_refresh_and_interactive_auth() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let oauth = Arc::new(OAuthClient::new("", "", "http://127.0.0.1:8888/callback", vec![], "http://127.0.0.1:1"));
    let m = SessionManager::new(store, oauth, Arc::new(RecordingConnector::default()));
    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingClientCredentials));
}

#[tokio::test(flavor = "multi_thread")]
async fn interactive_flow_exchanges_code_and_persists_token() {
    let mut server = Server::new_async().await;
    let exchange = server
        .mock("POST", "/api/token")
        .match_header("authorization", "Basic Y2lkOnNlY3JldA==")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "the-code".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600,"refresh_token":"r1"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let secrets = AuthSecrets::generate();
    store.save_secrets(&secrets).unwrap();
    let connector = Arc::new(RecordingConnector::default());
    let (m, mut rx) = prompt_channel(manager(&server.url(), store.clone(), connector.clone()));

    let state = secrets.csrf_state.clone();
    let browser = tokio::spawn(async move {
        let url = rx.recv().await.unwrap();
        let resp = reqwest::get(format!("{}?code=the-code&state={}", url, state)).await.unwrap();
        (resp.status().as_u16(), resp.text().await.unwrap())
    });

    let mut session = AuthSession::new();
    m.authenticate(&mut session).await.unwrap();
    assert!(session.is_authenticated());

    let (status, body) = browser.await.unwrap();
    assert_eq!(status, 200);
    assert!(body.contains("Authentication successful"));
    exchange.assert_async().await;

    let saved = store.load_token().unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token.as_deref(), Some("r1"));
    assert_eq!(connector.tokens.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn csrf_mismatch_never_authenticates() {
    let mut server = Server::new_async().await;
    let exchange = server.mock("POST", "/api/token").expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let connector = Arc::new(RecordingConnector::default());
    let (m, mut rx) = prompt_channel(manager(&server.url(), store.clone(), connector.clone()));

    let browser = tokio::spawn(async move {
        let url = rx.recv().await.unwrap();
        reqwest::get(format!("{}?code=the-code&state=forged", url))
            .await
            .unwrap()
            .status()
            .as_u16()
    });

    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::CsrfMismatch), "got {:?}", err);
    assert!(!session.is_authenticated());
    assert_eq!(browser.await.unwrap(), 400);
    assert!(store.load_token().is_none());
    assert!(connector.tokens.lock().unwrap().is_empty());
    exchange.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_denial_is_reported() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let secrets = AuthSecrets::generate();
    store.save_secrets(&secrets).unwrap();
    let (m, mut rx) = prompt_channel(manager(&server.url(), store, Arc::new(RecordingConnector::default())));

    let state = secrets.csrf_state.clone();
    let browser = tokio::spawn(async move {
        let url = rx.recv().await.unwrap();
        reqwest::get(format!("{}?error=access_denied&state={}", url, state))
            .await
            .unwrap()
            .status()
            .as_u16()
    });

    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(&err, AuthError::Denied(reason) if reason == "access_denied"), "got {:?}", err);
    assert_eq!(browser.await.unwrap(), 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_exchange_is_reported_as_bad_gateway() {
    let mut server = Server::new_async().await;
    let _exchange = server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let secrets = AuthSecrets::generate();
    store.save_secrets(&secrets).unwrap();
    let (m, mut rx) = prompt_channel(manager(&server.url(), store.clone(), Arc::new(RecordingConnector::default())));

    let state = secrets.csrf_state.clone();
    let browser = tokio::spawn(async move {
        let url = rx.recv().await.unwrap();
        reqwest::get(format!("{}?code=bad&state={}", url, state))
            .await
            .unwrap()
            .status()
            .as_u16()
    });

    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::Exchange(_)), "got {:?}", err);
    assert_eq!(browser.await.unwrap(), 502);
    assert!(store.load_token().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn no_callback_times_out() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let m = manager(&server.url(), store, Arc::new(RecordingConnector::default()))
        .with_timeouts(Duration::from_millis(200), Duration::from_secs(10))
        .on_prompt(|_| {});

    let mut session = AuthSession::new();
    let err = m.authenticate(&mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::Timeout(d) if d == Duration::from_millis(200)), "got {:?}", err);
    assert_eq!(session.state(), SessionState::Failed);
}
