use crate::config::Config;
use crate::store::StoredToken;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// The provider's OAuth endpoints for the authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    auth_base: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
        auth_base: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.redirect_uri.clone(),
            cfg.scopes.clone(),
            cfg.auth_base.clone(),
        )
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    /// URL the user opens to grant access. `state` is echoed back to the callback.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<StoredToken> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let tr = self.token_request(&params, "token exchange").await?;
        let refresh_token = tr.refresh_token.clone();
        into_stored(tr, refresh_token)
    }

    /// Exchange the refresh token for a new access token. The previous
    /// refresh token is kept when the response does not rotate it.
    pub async fn refresh(&self, token: &StoredToken) -> Result<StoredToken> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow!("no refresh token"))?;
        debug!("refreshing access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let tr = self.token_request(&params, "token refresh").await?;
        let rotated = tr.refresh_token.clone().or(Some(refresh_token));
        let mut fresh = into_stored(tr, rotated)?;
        if fresh.scope.is_none() {
            fresh.scope = token.scope.clone();
        }
        Ok(fresh)
    }

    async fn token_request(&self, params: &[(&str, &str)], what: &str) -> Result<TokenResponse> {
        let auth_header = format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        );
        let url = format!("{}/api/token", self.auth_base);
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth_header)
            .form(params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed: {} - {}", what, status, body));
        }
        Ok(resp.json().await?)
    }
}

fn into_stored(tr: TokenResponse, refresh_token: Option<String>) -> Result<StoredToken> {
    let expires_in = tr.expires_in.unwrap_or(3600);
    let expiry = Duration::try_seconds(expires_in)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| anyhow!("token response has out-of-range expires_in: {}", expires_in))?;
    Ok(StoredToken {
        access_token: tr.access_token,
        refresh_token,
        token_type: tr.token_type.unwrap_or_else(|| "Bearer".into()),
        expiry,
        scope: tr.scope,
    })
}
