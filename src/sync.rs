//! Reconciliation of linked playlists: every destination is made to hold
//! exactly the union of its link's origins.

use crate::client::{available_ids, BatchError, PlaylistClient};
use crate::models::{LinkedPlaylist, PlaylistRef, SyncMode, Track, TrackId};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// What a single destination needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub to_add: Vec<TrackId>,
    pub to_remove: Vec<TrackId>,
}

/// Diff the concatenated origin sequence against a destination.
///
/// `to_add` keeps the order and duplicates of `origin`; `to_remove` keeps
/// the order and duplicates of `destination`. Membership is hashed.
pub fn plan(origin: &[TrackId], destination: &[TrackId]) -> SyncOutcome {
    let in_origin: HashSet<&TrackId> = origin.iter().collect();
    let in_dest: HashSet<&TrackId> = destination.iter().collect();
    SyncOutcome {
        to_add: origin.iter().filter(|t| !in_dest.contains(t)).cloned().collect(),
        to_remove: destination.iter().filter(|t| !in_origin.contains(t)).cloned().collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Compute and report without mutating anything.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Both,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationReport {
    pub playlist: PlaylistRef,
    /// Labels of the tracks added (or that would be, on a dry run).
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub link_id: String,
    pub link_name: String,
    pub skipped: bool,
    pub destinations: Vec<DestinationReport>,
}

impl LinkReport {
    pub fn added(&self) -> usize {
        self.destinations.iter().map(|d| d.added.len()).sum()
    }

    pub fn removed(&self) -> usize {
        self.destinations.iter().map(|d| d.removed.len()).sum()
    }
}

/// Applies `plan` to links through a `PlaylistClient`.
pub struct Reconciler<'a> {
    client: &'a PlaylistClient,
    options: SyncOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(client: &'a PlaylistClient, options: SyncOptions) -> Self {
        Self { client, options }
    }

    /// Links run in order; the first failure aborts the rest.
    pub async fn sync_links(&self, links: &[LinkedPlaylist]) -> Result<Vec<LinkReport>> {
        let mut reports = Vec::with_capacity(links.len());
        for link in links {
            reports.push(self.sync_link(link).await?);
        }
        Ok(reports)
    }

    pub async fn sync_link(&self, link: &LinkedPlaylist) -> Result<LinkReport> {
        let mut report = LinkReport {
            link_id: link.id.clone(),
            link_name: link.name.clone(),
            skipped: false,
            destinations: Vec::new(),
        };
        if !link.is_complete() {
            warn!(link = %link.id, "link has no origin or no destination; skipping");
            report.skipped = true;
            return Ok(report);
        }

        let mut labels = HashMap::new();
        let mut origin = Vec::new();
        for src in &link.origin {
            let tracks = self
                .client
                .list_tracks(&src.id)
                .await
                .with_context(|| format!("listing origin playlist {} ({})", src.name, src.id))?;
            remember_labels(&mut labels, &tracks);
            origin.extend(available_ids(&src.id, &tracks));
        }

        for dest in &link.destination {
            let tracks = self
                .client
                .list_tracks(&dest.id)
                .await
                .with_context(|| format!("listing destination playlist {} ({})", dest.name, dest.id))?;
            remember_labels(&mut labels, &tracks);
            let current = available_ids(&dest.id, &tracks);
            let outcome = plan(&origin, &current);
            report.destinations.push(self.apply(dest, outcome, &labels).await?);
        }

        info!(
            link = %link.id,
            added = report.added(),
            removed = report.removed(),
            dry_run = self.options.dry_run,
            "link synced"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        dest: &PlaylistRef,
        outcome: SyncOutcome,
        labels: &HashMap<TrackId, String>,
    ) -> Result<DestinationReport, BatchError> {
        let mode = self.options.mode;
        let mut report = DestinationReport {
            playlist: dest.clone(),
            added: Vec::new(),
            removed: Vec::new(),
        };

        if mode.adds() && !outcome.to_add.is_empty() {
            if !self.options.dry_run {
                self.client.add_tracks(&outcome.to_add, &dest.id).await?;
            }
            report.added = label_all(&outcome.to_add, labels);
        }
        if mode.removes() && !outcome.to_remove.is_empty() {
            if !self.options.dry_run {
                self.client.remove_tracks(&outcome.to_remove, &dest.id).await?;
            }
            report.removed = label_all(&outcome.to_remove, labels);
        }
        Ok(report)
    }
}

fn remember_labels(labels: &mut HashMap<TrackId, String>, tracks: &[Track]) {
    for t in tracks {
        if let Some(id) = t.id() {
            labels.entry(id.clone()).or_insert_with(|| t.label());
        }
    }
}

fn label_all(ids: &[TrackId], labels: &HashMap<TrackId, String>) -> Vec<String> {
    ids.iter()
        .map(|id| labels.get(id).cloned().unwrap_or_else(|| id.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<TrackId> {
        v.iter().map(|s| TrackId::new(*s)).collect()
    }

    #[test]
    fn plan_splits_additions_and_removals() {
        let out = plan(&ids(&["t1", "t2", "t3"]), &ids(&["t2", "t4"]));
        assert_eq!(out.to_add, ids(&["t1", "t3"]));
        assert_eq!(out.to_remove, ids(&["t4"]));
    }

    #[test]
    fn plan_keeps_duplicates_and_order() {
        let out = plan(&ids(&["a", "b", "a", "c"]), &ids(&["x", "c", "x"]));
        assert_eq!(out.to_add, ids(&["a", "b", "a"]));
        assert_eq!(out.to_remove, ids(&["x", "x"]));
    }

    #[test]
    fn plan_results_are_disjoint_and_cover_symmetric_difference() {
        let origin = ids(&["a", "b", "c", "d"]);
        let dest = ids(&["c", "d", "e", "f"]);
        let out = plan(&origin, &dest);
        let add: HashSet<_> = out.to_add.iter().collect();
        let remove: HashSet<_> = out.to_remove.iter().collect();
        assert!(add.is_disjoint(&remove));
        assert!(add.iter().all(|t| origin.contains(t) && !dest.contains(t)));
        assert!(remove.iter().all(|t| dest.contains(t) && !origin.contains(t)));
        assert_eq!(add.len() + remove.len(), 4);
    }

    #[test]
    fn plan_with_equal_sides_is_empty() {
        let same = ids(&["a", "b"]);
        assert_eq!(plan(&same, &same), SyncOutcome::default());
        assert_eq!(plan(&[], &[]), SyncOutcome::default());
    }
}
