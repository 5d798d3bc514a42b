use super::{Page, Provider};
use crate::models::{PlaylistSummary, Track, TrackId, User};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// A recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Add { playlist_id: String, ids: Vec<TrackId> },
    Remove { playlist_id: String, ids: Vec<TrackId> },
}

#[derive(Default)]
struct MockState {
    playlists: Vec<(PlaylistSummary, Vec<Track>)>,
    calls: Vec<MockCall>,
    page_requests: usize,
    fail_mutation_at: Option<usize>,
    mutations: usize,
}

/// In-memory provider used in tests. Pages playlist entries by
/// `page_size`, records every mutation, and can fail the n-th mutation.
pub struct MockProvider {
    page_size: usize,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create or replace a playlist whose entries are plain available tracks.
    pub fn insert_playlist(&self, id: &str, name: &str, track_ids: &[&str]) {
        let tracks = track_ids
            .iter()
            .map(|t| Track::Available {
                id: TrackId::new(*t),
                name: t.to_string(),
                artists: Vec::new(),
            })
            .collect();
        self.insert_tracks(id, name, tracks);
    }

    pub fn insert_tracks(&self, id: &str, name: &str, tracks: Vec<Track>) {
        let mut st = self.lock();
        let summary = PlaylistSummary {
            id: id.to_string(),
            name: name.to_string(),
            track_count: Some(tracks.len() as u32),
        };
        if let Some(slot) = st.playlists.iter_mut().find(|(p, _)| p.id == id) {
            *slot = (summary, tracks);
        } else {
            st.playlists.push((summary, tracks));
        }
    }

    /// Current available track ids of a playlist, in order.
    pub fn track_ids(&self, id: &str) -> Vec<TrackId> {
        self.lock()
            .playlists
            .iter()
            .find(|(p, _)| p.id == id)
            .map(|(_, tracks)| tracks.iter().filter_map(|t| t.id().cloned()).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn page_requests(&self) -> usize {
        self.lock().page_requests
    }

    /// Make the n-th (1-based) add/remove call fail.
    pub fn fail_mutation_at(&self, n: usize) {
        self.lock().fail_mutation_at = Some(n);
    }

    fn begin_mutation(st: &mut MockState) -> Result<()> {
        st.mutations += 1;
        if st.fail_mutation_at == Some(st.mutations) {
            return Err(anyhow!("mock failure on mutation #{}", st.mutations));
        }
        Ok(())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn current_user(&self) -> Result<User> {
        Ok(User {
            id: "mock-user".into(),
            display_name: Some("Mock User".into()),
        })
    }

    async fn user_playlists(&self, _user_id: &str) -> Result<Vec<PlaylistSummary>> {
        Ok(self.lock().playlists.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn playlist_items_page(&self, playlist_id: &str, cursor: Option<&str>) -> Result<Page<Track>> {
        let mut st = self.lock();
        st.page_requests += 1;
        let (_, tracks) = st
            .playlists
            .iter()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| anyhow!("list playlist tracks failed: 404 => unknown playlist {}", playlist_id))?;
        let offset: usize = match cursor {
            Some(c) => c.parse().map_err(|_| anyhow!("bad cursor {}", c))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(tracks.len());
        let items = tracks.get(offset..end).map(|s| s.to_vec()).unwrap_or_default();
        let next = (end < tracks.len()).then(|| end.to_string());
        Ok(Page { items, next })
    }

    async fn add_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()> {
        info!("MockProvider: add_items {} -> {} tracks", playlist_id, ids.len());
        let mut st = self.lock();
        st.calls.push(MockCall::Add { playlist_id: playlist_id.to_string(), ids: ids.to_vec() });
        Self::begin_mutation(&mut st)?;
        let (_, tracks) = st
            .playlists
            .iter_mut()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| anyhow!("add tracks failed: 404 => unknown playlist {}", playlist_id))?;
        tracks.extend(ids.iter().map(|id| Track::Available {
            id: id.clone(),
            name: id.to_string(),
            artists: Vec::new(),
        }));
        Ok(())
    }

    async fn remove_items(&self, playlist_id: &str, ids: &[TrackId]) -> Result<()> {
        info!("MockProvider: remove_items {} -> {} tracks", playlist_id, ids.len());
        let mut st = self.lock();
        st.calls.push(MockCall::Remove { playlist_id: playlist_id.to_string(), ids: ids.to_vec() });
        Self::begin_mutation(&mut st)?;
        let (_, tracks) = st
            .playlists
            .iter_mut()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| anyhow!("remove tracks failed: 404 => unknown playlist {}", playlist_id))?;
        let doomed: std::collections::HashSet<&TrackId> = ids.iter().collect();
        tracks.retain(|t| t.id().map_or(true, |id| !doomed.contains(id)));
        Ok(())
    }
}
