use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider identifier of a single track. Only equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    /// Podcast episodes live in playlists but are not tracks.
    Episode,
    /// Local files have no provider id.
    LocalFile,
    /// The item was removed from the catalogue (or is region locked).
    Removed,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnavailableReason::Episode => "podcast episode",
            UnavailableReason::LocalFile => "local file",
            UnavailableReason::Removed => "not available on the provider",
        };
        f.write_str(s)
    }
}

/// One entry of a playlist as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Track {
    Available {
        id: TrackId,
        name: String,
        artists: Vec<String>,
    },
    Unavailable {
        reason: UnavailableReason,
    },
}

impl Track {
    pub fn id(&self) -> Option<&TrackId> {
        match self {
            Track::Available { id, .. } => Some(id),
            Track::Unavailable { .. } => None,
        }
    }

    /// "Name by Artist, Artist" for available tracks.
    pub fn label(&self) -> String {
        match self {
            Track::Available { name, artists, .. } if artists.is_empty() => name.clone(),
            Track::Available { name, artists, .. } => format!("{} by {}", name, artists.join(", ")),
            Track::Unavailable { reason } => format!("<unavailable: {}>", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: Option<u32>,
}

/// Reference to a provider playlist inside a link definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(alias = "Name")]
    pub name: String,
}

impl From<&PlaylistSummary> for PlaylistRef {
    fn from(p: &PlaylistSummary) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
        }
    }
}

/// A user-defined mapping from origin playlists to destination playlists.
/// Capitalised keys are accepted so records written by older releases load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPlaylist {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Origin", default)]
    pub origin: Vec<PlaylistRef>,
    #[serde(alias = "Destination", default)]
    pub destination: Vec<PlaylistRef>,
}

impl LinkedPlaylist {
    /// A link only means something with at least one origin and one destination.
    pub fn is_complete(&self) -> bool {
        !self.origin.is_empty() && !self.destination.is_empty()
    }
}

/// Which half of the reconciliation to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    AddOnly,
    RemoveOnly,
    Both,
}

impl SyncMode {
    pub fn adds(self) -> bool {
        matches!(self, SyncMode::AddOnly | SyncMode::Both)
    }

    pub fn removes(self) -> bool {
        matches!(self, SyncMode::RemoveOnly | SyncMode::Both)
    }
}

impl std::str::FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" | "add-only" | "add_only" => Ok(SyncMode::AddOnly),
            "remove" | "remove-only" | "remove_only" => Ok(SyncMode::RemoveOnly),
            "both" | "all" => Ok(SyncMode::Both),
            other => Err(anyhow::anyhow!("unknown sync mode '{}' (expected add, remove or both)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_link_record_with_capitalised_keys_parses() {
        let raw = r#"{"ID":"abc","Name":"Mix","Origin":[{"ID":"o1","Name":"One"}],"Destination":[{"ID":"d1","Name":"Dest"}]}"#;
        let lp: LinkedPlaylist = serde_json::from_str(raw).unwrap();
        assert_eq!(lp.id, "abc");
        assert_eq!(lp.origin[0].id, "o1");
        assert_eq!(lp.destination[0].name, "Dest");
        assert!(lp.is_complete());
    }

    #[test]
    fn playlist_ref_from_summary_drops_track_count() {
        let summary = PlaylistSummary {
            id: "p1".into(),
            name: "Road Trip".into(),
            track_count: Some(12),
        };
        assert_eq!(
            PlaylistRef::from(&summary),
            PlaylistRef {
                id: "p1".into(),
                name: "Road Trip".into(),
            }
        );
    }

    #[test]
    fn sync_mode_parsing() {
        assert_eq!("add".parse::<SyncMode>().unwrap(), SyncMode::AddOnly);
        assert_eq!("Remove".parse::<SyncMode>().unwrap(), SyncMode::RemoveOnly);
        assert_eq!("both".parse::<SyncMode>().unwrap(), SyncMode::Both);
        assert!("sideways".parse::<SyncMode>().is_err());
        assert!(SyncMode::Both.adds() && SyncMode::Both.removes());
        assert!(!SyncMode::AddOnly.removes());
    }

    #[test]
    fn track_label() {
        let t = Track::Available {
            id: "t1".into(),
            name: "Song".into(),
            artists: vec!["A".into(), "B".into()],
        };
        assert_eq!(t.label(), "Song by A, B");
        assert_eq!(t.id(), Some(&TrackId::new("t1")));
        let u = Track::Unavailable { reason: UnavailableReason::Episode };
        assert!(u.id().is_none());
    }
}
