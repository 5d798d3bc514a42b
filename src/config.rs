use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "playlist-sync.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root for auth records and link definitions.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Address the one-shot callback listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub open_browser: bool,

    /// Defaults to `logs/` under the effective `data_dir`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("playlist-link-sync"))
        .unwrap_or_else(|| PathBuf::from("data"))
}
fn default_redirect_uri() -> String { "http://127.0.0.1:8888/api/auth".into() }
fn default_listen_addr() -> String { "127.0.0.1:8888".into() }
fn default_scopes() -> Vec<String> {
    vec![
        "user-read-private",
        "playlist-read-private",
        "playlist-read-collaborative",
        "playlist-modify-private",
        "playlist-modify-public",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_max_batch() -> usize { 100 }
fn default_auth_timeout() -> u64 { 300 }
fn default_shutdown_grace() -> u64 { 10 }
fn default_log_level() -> String { "warn".into() }

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            listen_addr: default_listen_addr(),
            scopes: default_scopes(),
            auth_base: default_auth_base(),
            api_base: default_api_base(),
            max_batch_size: default_max_batch(),
            auth_timeout_secs: default_auth_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            open_browser: false,
            log_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Resolve the effective config: explicit path, else `DEFAULT_CONFIG_FILE`
    /// when present, else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(p) => Self::from_path(p).with_context(|| format!("loading config from {}", p.display()))?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_path(local).with_context(|| format!("loading config from {}", local.display()))?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("SPOTIFY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("SPOTIFY_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = get("SPOTIFY_AUTH_BASE") {
            self.auth_base = v;
        }
        if let Some(v) = get("SPOTIFY_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = get("PLAYLIST_SYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Sanity checks that do not require network access.
    pub fn validate(&self) -> Result<()> {
        self.listen_socket_addr()?;
        self.callback_path()?;
        if self.max_batch_size == 0 {
            return Err(anyhow!("max_batch_size must be at least 1"));
        }
        Ok(())
    }

    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| anyhow!("invalid listen_addr '{}': {}", self.listen_addr, e))
    }

    /// Path component of the redirect URI; the callback route is mounted there.
    pub fn callback_path(&self) -> Result<String> {
        let url = url::Url::parse(&self.redirect_uri)
            .map_err(|e| anyhow!("invalid redirect_uri '{}': {}", self.redirect_uri, e))?;
        Ok(url.path().to_string())
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.data_dir.join("auth")
    }
    pub fn secrets_path(&self) -> PathBuf {
        self.auth_dir().join("auth.json")
    }
    pub fn token_path(&self) -> PathBuf {
        self.auth_dir().join("token.json")
    }
    pub fn links_dir(&self) -> PathBuf {
        self.data_dir.join("playlists")
    }
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.data_dir.join("logs"))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
