use super::{ApiError, Page, Provider};
use crate::auth::oauth::OAuthClient;
use crate::models::{PlaylistSummary, Track, TrackId, UnavailableReason, User};
use crate::store::{CredentialStore, StoredToken};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

const ITEMS_PAGE_LIMIT: u32 = 100;
const PLAYLISTS_PAGE_LIMIT: u32 = 50;
const ITEM_FIELDS: &str = "items(track(id,name,type,is_local,artists(name))),next";

#[derive(Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<ItemEntry>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct ItemEntry {
    track: Option<ItemTrack>,
}

#[derive(Deserialize)]
struct ItemTrack {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    is_local: bool,
    #[serde(default)]
    artists: Vec<ArtistRef>,
}

#[derive(Deserialize)]
struct ArtistRef {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct PlaylistsPage {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    id: String,
    #[serde(default)]
    name: String,
    tracks: Option<TracksRef>,
}

#[derive(Deserialize)]
struct TracksRef {
    total: Option<u32>,
}

fn to_track(entry: ItemEntry) -> Track {
    let Some(t) = entry.track else {
        return Track::Unavailable { reason: UnavailableReason::Removed };
    };
    if t.kind.as_deref() == Some("episode") {
        return Track::Unavailable { reason: UnavailableReason::Episode };
    }
    if t.is_local {
        return Track::Unavailable { reason: UnavailableReason::LocalFile };
    }
    match t.id {
        Some(id) if !id.is_empty() => Track::Available {
            id: TrackId(id),
            name: t.name,
            artists: t.artists.into_iter().map(|a| a.name).collect(),
        },
        _ => Track::Unavailable { reason: UnavailableReason::Removed },
    }
}

fn track_uri(id: &TrackId) -> String {
    format!("spotify:track:{}", id)
}

/// Spotify provider backed by the Spotify Web API.
/// Holds the session's token, refreshes it when it is about to expire (or
/// once after a 401) and persists every refreshed token.
pub struct SpotifyProvider {
    client: Client,
    api_base: String,
    oauth: Arc<OAuthClient>,
    store: CredentialStore,
    token: tokio::sync::Mutex<StoredToken>,
}

impl SpotifyProvider {
    pub fn new(api_base: impl Into<String>, oauth: Arc<OAuthClient>, store: CredentialStore, token: StoredToken) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            oauth,
            store,
            token: tokio::sync::Mutex::new(token),
        }
    }

    async fn get_bearer(&self) -> Result<String> {
        let mut lock = self.token.lock().await;
        if lock.is_expired() {
            debug!("Spotify token is near expiry, refreshing");
            let fresh = self.oauth.refresh(&lock).await?;
            self.store.save_token(&fresh)?;
            *lock = fresh;
        }
        Ok(lock.bearer())
    }

    async fn force_refresh(&self) -> Result<()> {
        let mut lock = self.token.lock().await;
        let fresh = self.oauth.refresh(&lock).await?;
        self.store.save_token(&fresh)?;
        *lock = fresh;
        Ok(())
    }

    /// Send a request built by `build` with a bearer token. A 401 refreshes
    /// the token and retries once; 429 and other failures become `ApiError`.
    async fn send<F>(&self, op: &'static str, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let bearer = self.get_bearer().await?;
        let mut resp = build(&bearer).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Got 401 during {}; attempting token refresh", op);
            self.force_refresh().await?;
            let bearer2 = self.get_bearer().await?;
            resp = build(&bearer2).send().await?;
        }
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ApiError::RateLimited { op, retry_after }.into());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { op, status: status.as_u16(), body }.into());
        }
        Ok(resp)
    }

    fn first_items_url(&self, playlist_id: &str) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{}/playlists/{}/tracks",
            self.api_base,
            urlencoding::encode(playlist_id)
        ))?;
        url.query_pairs_mut()
            .append_pair("offset", "0")
            .append_pair("limit", &ITEMS_PAGE_LIMIT.to_string())
            .append_pair("fields", ITEM_FIELDS);
        Ok(url.to_string())
    }

    fn tracks_url(&self, playlist_id: &str) -> String {
        format!("{}/playlists/{}/tracks", self.api_base, urlencoding::encode(playlist_id))
    }
}

#[async_trait]
impl Provider for SpotifyProvider {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn current_user(&self) -> Result<User> {
        let url = format!("{}/me", self.api_base);
        let resp = self.send("fetch /me", |b| self.client.get(&url).header(AUTHORIZATION, b)).await?;
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"].as_str().ok_or_else(|| anyhow!("no id"))?.to_string();
        Ok(User {
            id,
            display_name: j["display_name"].as_str().map(|s| s.to_string()),
        })
    }

    async fn user_playlists(&self, user_id: &str) -> Result<Vec<PlaylistSummary>> {
        let mut playlists = Vec::new();
        let mut next_url = Some(format!(
            "{}/users/{}/playlists?offset=0&limit={}",
            self.api_base,
            urlencoding::encode(user_id),
            PLAYLISTS_PAGE_LIMIT
        ));
        while let Some(url) = next_url {
            let resp = self.send("list playlists", |b| self.client.get(&url).header(AUTHORIZATION, b)).await?;
            let page: PlaylistsPage = resp.json().await?;
            playlists.extend(page.items.into_iter().map(|p| PlaylistSummary {
                id: p.id,
                name: p.name,
                track_count: p.tracks.and_then(|t| t.total),
            }));
            next_url = page.next;
        }
        Ok(playlists)
    }

    async fn playlist_items_page(&self, playlist_id: &str, cursor: Option<&str>) -> Result<Page<Track>> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => self.first_items_url(playlist_id)?,
        };
        let resp = self
            .send("list playlist tracks", |b| self.client.get(&url).header(AUTHORIZATION, b))
            .await?;
        let page: ItemsPage = resp.json().await?;
        Ok(Page {
            items: page.items.into_iter().map(to_track).collect(),
            next: page.next,
        })
    }

    async fn add_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()> {
        let url = self.tracks_url(playlist_id);
        let uris: Vec<String> = ids.iter().map(track_uri).collect();
        let body = json!({ "uris": uris });
        self.send("add tracks", |b| self.client.post(&url).header(AUTHORIZATION, b).json(&body))
            .await?;
        Ok(())
    }

    async fn remove_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()> {
        let url = self.tracks_url(playlist_id);
        let tracks: Vec<serde_json::Value> = ids.iter().map(|id| json!({ "uri": track_uri(id) })).collect();
        let body = json!({ "tracks": tracks });
        self.send("remove tracks", |b| self.client.delete(&url).header(AUTHORIZATION, b).json(&body))
            .await?;
        Ok(())
    }
}
