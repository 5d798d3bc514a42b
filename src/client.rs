//! Paginating, batching wrapper around a `Provider`.

use crate::api::Provider;
use crate::models::{PlaylistSummary, Track, TrackId, User};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The provider accepts at most this many track ids per mutation call.
pub const MAX_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Add,
    Remove,
}

impl fmt::Display for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchOp::Add => "add",
            BatchOp::Remove => "remove",
        })
    }
}

/// A batched mutation stopped part-way. Chunks before `failed_chunk` were
/// applied and are not rolled back; the failed chunk and later ones were not.
#[derive(Debug, thiserror::Error)]
#[error(
    "{op} on playlist {playlist_id} failed at chunk {failed_chunk}/{chunk_count}: \
     {applied} of {total} tracks applied, {attempted} in the failed chunk: {source}"
)]
pub struct BatchError {
    pub op: BatchOp,
    pub playlist_id: String,
    /// Tracks in chunks that succeeded.
    pub applied: usize,
    /// Size of the chunk that failed.
    pub attempted: usize,
    pub total: usize,
    /// 1-based index of the failed chunk.
    pub failed_chunk: usize,
    pub chunk_count: usize,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl BatchError {
    /// Ids that were not applied, in order, for a manual retry.
    pub fn unapplied<'a>(&self, ids: &'a [TrackId]) -> &'a [TrackId] {
        ids.get(self.applied..).unwrap_or_default()
    }
}

/// Authenticated client handle consumed by the reconciliation engine.
#[derive(Clone)]
pub struct PlaylistClient {
    provider: Arc<dyn Provider>,
    batch_size: usize,
}

impl fmt::Debug for PlaylistClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistClient")
            .field("provider", &self.provider.name())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl PlaylistClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_batch_size(provider, MAX_BATCH)
    }

    /// `batch_size` is clamped to `1..=MAX_BATCH`.
    pub fn with_batch_size(provider: Arc<dyn Provider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.clamp(1, MAX_BATCH),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn current_user(&self) -> Result<User> {
        self.provider.current_user().await
    }

    /// Playlists of the authenticated user.
    pub async fn list_playlists_for_user(&self) -> Result<Vec<PlaylistSummary>> {
        let user = self.provider.current_user().await?;
        self.provider.user_playlists(&user.id).await
    }

    /// Every entry of a playlist in provider order, unavailable ones included.
    pub async fn list_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self.provider.playlist_items_page(playlist_id, cursor.as_deref()).await?;
            pages += 1;
            tracks.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(playlist_id, pages, tracks = tracks.len(), "playlist listed");
        Ok(tracks)
    }

    /// Ids of the available entries of a playlist, in provider order.
    pub async fn list_track_ids(&self, playlist_id: &str) -> Result<Vec<TrackId>> {
        let tracks = self.list_tracks(playlist_id).await?;
        Ok(available_ids(playlist_id, &tracks))
    }

    /// Add tracks in chunks of at most `batch_size`, stopping at the first failure.
    pub async fn add_tracks(&self, ids: &[TrackId], playlist_id: &str) -> Result<(), BatchError> {
        self.apply_in_batches(BatchOp::Add, ids, playlist_id).await
    }

    /// Remove tracks in chunks of at most `batch_size`, stopping at the first failure.
    pub async fn remove_tracks(&self, ids: &[TrackId], playlist_id: &str) -> Result<(), BatchError> {
        self.apply_in_batches(BatchOp::Remove, ids, playlist_id).await
    }

    async fn apply_in_batches(&self, op: BatchOp, ids: &[TrackId], playlist_id: &str) -> Result<(), BatchError> {
        let chunk_count = ids.len().div_ceil(self.batch_size);
        let mut applied = 0usize;
        for (i, chunk) in ids.chunks(self.batch_size).enumerate() {
            let res = match op {
                BatchOp::Add => self.provider.add_items(playlist_id, chunk).await,
                BatchOp::Remove => self.provider.remove_items(playlist_id, chunk).await,
            };
            if let Err(e) = res {
                warn!(
                    %op, playlist_id, applied, failed_chunk = i + 1, chunk_count,
                    "batch failed; earlier chunks stay applied"
                );
                return Err(BatchError {
                    op,
                    playlist_id: playlist_id.to_string(),
                    applied,
                    attempted: chunk.len(),
                    total: ids.len(),
                    failed_chunk: i + 1,
                    chunk_count,
                    source: e.into(),
                });
            }
            applied += chunk.len();
            info!("Applied {} {} tracks to {}", op, chunk.len(), playlist_id);
        }
        Ok(())
    }
}

/// Drop unavailable entries, warning about each one.
pub fn available_ids(playlist_id: &str, tracks: &[Track]) -> Vec<TrackId> {
    tracks
        .iter()
        .filter_map(|t| match t {
            Track::Available { id, .. } => Some(id.clone()),
            Track::Unavailable { reason } => {
                warn!(playlist_id, %reason, "skipping unavailable playlist entry");
                None
            }
        })
        .collect()
}
