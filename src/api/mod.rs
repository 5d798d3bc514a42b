pub mod mock;
pub mod spotify;

use crate::models::{PlaylistSummary, Track, TrackId, User};
use anyhow::Result;

/// One page of a paginated listing. `next` is an opaque cursor for the
/// following page; `None` means this was the last page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Errors a provider reports with enough structure for callers to react.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{op} failed: {status} => {body}")]
    Status { op: &'static str, status: u16, body: String },
    #[error("{op} rate_limited: retry_after={retry_after:?}")]
    RateLimited { op: &'static str, retry_after: Option<u64> },
}

/// Provider trait: the raw operations the playlist client builds on.
/// Every method is a single request (except playlist listing, which the
/// provider resolves internally). Batching and pagination live in
/// `crate::client::PlaylistClient`.
/// Implementations: spotify::SpotifyProvider, mock::MockProvider.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// The authenticated user.
    async fn current_user(&self) -> Result<User>;

    /// Every playlist the user owns or follows.
    async fn user_playlists(&self, user_id: &str) -> Result<Vec<PlaylistSummary>>;

    /// One page of playlist entries; `cursor` is `None` for the first page.
    async fn playlist_items_page(&self, playlist_id: &str, cursor: Option<&str>) -> Result<Page<Track>>;

    /// Add tracks to the end of a playlist. Callers pass at most `MAX_BATCH` ids.
    async fn add_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()>;

    /// Remove every occurrence of the given tracks. Callers pass at most `MAX_BATCH` ids.
    async fn remove_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()>;

    /// Return the provider's name (for logging, UI, etc)
    fn name(&self) -> &str;
}
