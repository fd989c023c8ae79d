//! Persisted per-installation identity.
//!
//! The identity lives in `<state dir>/state.json`:
//!
//! ```json
//! {"secret": "<base64url, no padding>", "extID": "<uuid>"}
//! ```
//!
//! It is created once and never rewritten. A state file that cannot be read
//! is fatal: generating a new secret would silently desynchronize from a
//! helper that registered the old one.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, B64, B64_LENIENT, SECRET_LEN};
use crate::error::{Error, Result};

pub const STATE_FILE: &str = "state.json";

/// Client identifier plus the secret shared with the helper.
#[derive(Clone)]
pub struct Identity {
    client_id: String,
    secret: Zeroizing<[u8; SECRET_LEN]>,
}

impl Identity {
    pub fn new(client_id: impl Into<String>, secret: [u8; SECRET_LEN]) -> Self {
        Self {
            client_id: client_id.into(),
            secret: Zeroizing::new(secret),
        }
    }

    /// Fresh random identity.
    pub fn generate() -> Result<Self> {
        let secret = crypto::random_bytes::<SECRET_LEN>()?;
        Ok(Self::new(uuid::Uuid::new_v4().to_string(), secret))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn secret(&self) -> &[u8] {
        self.secret.as_slice()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && *self.secret == *other.secret
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    secret: String,
    #[serde(rename = "extID")]
    ext_id: String,
}

/// Load the identity from `dir`, creating it on first use.
pub fn load_or_create(dir: &Path) -> Result<Identity> {
    let path = state_file_path(dir);
    match fs::read(&path) {
        Ok(bytes) => parse_state(&path, &bytes),
        Err(err) if err.kind() == io::ErrorKind::NotFound => create_state(dir, &path),
        Err(source) => Err(Error::StateIo { path, source }),
    }
}

fn parse_state(path: &Path, bytes: &[u8]) -> Result<Identity> {
    let corrupt = |reason: String| Error::StateCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let state: StateFile = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
    let decoded = Zeroizing::new(
        B64_LENIENT
            .decode(state.secret.as_bytes())
            .map_err(|e| corrupt(format!("secret: {e}")))?,
    );
    let secret: [u8; SECRET_LEN] = decoded.as_slice().try_into().map_err(|_| {
        corrupt(format!(
            "secret is {} bytes, expected {SECRET_LEN}",
            decoded.len()
        ))
    })?;
    if state.ext_id.is_empty() {
        return Err(corrupt("extID is empty".to_string()));
    }

    debug!("Loaded identity {} from {}", state.ext_id, path.display());
    Ok(Identity::new(state.ext_id, secret))
}

fn create_state(dir: &Path, path: &Path) -> Result<Identity> {
    create_private_dir(dir).map_err(|source| Error::StateIo {
        path: dir.to_path_buf(),
        source,
    })?;

    let identity = Identity::generate()?;
    let state = StateFile {
        secret: B64.encode(identity.secret()),
        ext_id: identity.client_id().to_string(),
    };
    let body = Zeroizing::new(
        serde_json::to_vec(&state).map_err(|e| Error::StateCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?,
    );

    match write_private_file(dir, path, &body) {
        Ok(()) => {
            info!("Created new identity {} in {}", identity.client_id(), path.display());
            Ok(identity)
        }
        // Another process won the race; its file is complete once visible.
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            debug!("State file {} appeared concurrently", path.display());
            let bytes = fs::read(path).map_err(|source| Error::StateIo {
                path: path.to_path_buf(),
                source,
            })?;
            parse_state(path, &bytes)
        }
        Err(source) => Err(Error::StateIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Write `body` to a private temp file in `dir`, then link it into place
/// without replacing an existing file.
fn write_private_file(dir: &Path, path: &Path, body: &[u8]) -> io::Result<()> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".state").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o600));
    }
    let mut file = builder.tempfile_in(dir)?;
    file.write_all(body)?;
    file.as_file().sync_all()?;
    file.persist_noclobber(path).map_err(|err| err.error)?;
    Ok(())
}

/// Path of the state file inside `dir`.
pub fn state_file_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}
