//! On-disk repository of link definitions, one JSON file per link.

use crate::models::{LinkedPlaylist, PlaylistRef};
use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LINK_ID_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("a link needs a name")]
    EmptyName,
    #[error("a link needs at least one origin playlist")]
    NoOrigin,
    #[error("a link needs at least one destination playlist")]
    NoDestination,
    #[error("playlist {0} is both an origin and a destination")]
    SelfLink(String),
    #[error("no link with id {0}")]
    NotFound(String),
    #[error("invalid link id {0:?}: ids are ASCII letters and digits")]
    InvalidId(String),
}

pub struct LinkRepository {
    dir: PathBuf,
}

impl LinkRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, LinkError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LinkError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// All links, ordered by file name. A missing directory means no links.
    pub fn list(&self) -> Result<Vec<LinkedPlaylist>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.dir.display())),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut links = Vec::with_capacity(paths.len());
        for path in paths {
            let data = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let link: LinkedPlaylist =
                serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
            if !link.is_complete() {
                warn!(path = %path.display(), "link has no origin or no destination");
            }
            links.push(link);
        }
        debug!(count = links.len(), dir = %self.dir.display(), "links loaded");
        Ok(links)
    }

    pub fn get(&self, id: &str) -> Result<LinkedPlaylist> {
        let path = self.path_for(id)?;
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(LinkError::NotFound(id.to_string()).into()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Validate and persist a new link under a fresh random id.
    pub fn create(&self, name: &str, origin: Vec<PlaylistRef>, destination: Vec<PlaylistRef>) -> Result<LinkedPlaylist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LinkError::EmptyName.into());
        }
        if origin.is_empty() {
            return Err(LinkError::NoOrigin.into());
        }
        if destination.is_empty() {
            return Err(LinkError::NoDestination.into());
        }
        if let Some(d) = destination.iter().find(|d| origin.iter().any(|o| o.id == d.id)) {
            return Err(LinkError::SelfLink(d.id.clone()).into());
        }

        let mut id = random_id();
        while self.path_for(&id)?.exists() {
            id = random_id();
        }
        let link = LinkedPlaylist {
            id,
            name: name.to_string(),
            origin,
            destination,
        };
        self.save(&link)?;
        info!(id = %link.id, name = %link.name, "link created");
        Ok(link)
    }

    pub fn save(&self, link: &LinkedPlaylist) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(&link.id)?;
        let data = serde_json::to_vec_pretty(link)?;
        std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(id, "link removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LinkError::NotFound(id.to_string()).into()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LINK_ID_LEN)
        .map(char::from)
        .collect()
}
