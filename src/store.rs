//! Durable storage for the two small auth records: the secrets used to
//! protect the callback and the OAuth token.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tokens this close to expiry are treated as expired.
pub const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSecrets {
    /// Base64 encoded key used to sign the expected CSRF state.
    #[serde(default)]
    pub cookie_key: String,
    #[serde(default)]
    pub csrf_state: String,
}

impl AuthSecrets {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let csrf_state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self {
            cookie_key: general_purpose::STANDARD.encode(key),
            csrf_state,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.cookie_key.is_empty() && !self.csrf_state.is_empty()
    }

    pub fn cookie_key_bytes(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.cookie_key)
            .map_err(|e| anyhow!("cookie key is not valid base64: {}", e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl StoredToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// File-backed key/value persistence for `AuthSecrets` and `StoredToken`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    secrets_path: PathBuf,
    token_path: PathBuf,
}

impl CredentialStore {
    pub fn new(secrets_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            secrets_path: secrets_path.into(),
            token_path: token_path.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self::new(cfg.secrets_path(), cfg.token_path())
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// `Ok(None)` when the file does not exist. Any other read or parse error is returned.
    pub fn load_secrets(&self) -> Result<Option<AuthSecrets>> {
        match std::fs::read_to_string(&self.secrets_path) {
            Ok(s) => {
                let secrets: AuthSecrets = serde_json::from_str(&s)
                    .with_context(|| format!("parsing {}", self.secrets_path.display()))?;
                Ok(Some(secrets))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.secrets_path.display())),
        }
    }

    pub fn save_secrets(&self, secrets: &AuthSecrets) -> Result<()> {
        write_private_json(&self.secrets_path, secrets)
    }

    /// Load the secrets, generating and persisting a fresh pair when the record
    /// is missing or has an empty field.
    pub fn ensure_secrets(&self) -> Result<AuthSecrets> {
        match self.load_secrets()? {
            Some(s) if s.is_complete() => {
                info!(path = %self.secrets_path.display(), "auth secrets loaded");
                Ok(s)
            }
            existing => {
                if existing.is_none() {
                    warn!(path = %self.secrets_path.display(), "auth secrets missing; generating new ones");
                } else {
                    warn!(path = %self.secrets_path.display(), "auth secrets incomplete; regenerating");
                }
                let s = AuthSecrets::generate();
                self.save_secrets(&s)?;
                info!(path = %self.secrets_path.display(), "auth secrets generated and saved");
                Ok(s)
            }
        }
    }

    /// Missing, unreadable or corrupt token files all mean "no token".
    pub fn load_token(&self) -> Option<StoredToken> {
        match read_json::<StoredToken>(&self.token_path) {
            Ok(Some(t)) => {
                info!(path = %self.token_path.display(), "token loaded");
                Some(t)
            }
            Ok(None) => {
                warn!(path = %self.token_path.display(), "no stored token; interactive authorization required");
                None
            }
            Err(e) => {
                warn!(path = %self.token_path.display(), error = %format!("{:#}", e), "stored token unusable; ignoring it");
                None
            }
        }
    }

    pub fn save_token(&self, token: &StoredToken) -> Result<()> {
        write_private_json(&self.token_path, token)?;
        info!(path = %self.token_path.display(), "token saved");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(serde_json::from_str(&s)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `value` as pretty JSON, creating parent dirs; owner-only on unix.
fn write_private_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(value)?;

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).with_context(|| format!("opening {}", path.display()))?;
    // `mode` above only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }
    file.write_all(&data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
