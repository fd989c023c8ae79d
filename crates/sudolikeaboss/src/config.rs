//! Configuration loading.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! then `SUDOLIKEABOSS_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::native;

pub const APP_NAME: &str = "sudolikeaboss";
pub const ENV_PREFIX: &str = "SUDOLIKEABOSS";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HOST: &str = "sudolikeaboss://local";
pub const DEFAULT_STATE_DIRECTORY: &str = "~/.sudolikeaboss";
pub const DEFAULT_LOG_LEVEL: &str = "error";
pub const DEFAULT_WEBSOCKET_URI: &str = "ws://127.0.0.1:6263/4";
pub const DEFAULT_WEBSOCKET_ORIGIN: &str = "resource://onepassword-at-agilebits-dot-com";

/// Which backend carries the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overall deadline for one fetch.
    pub timeout_secs: u64,
    /// URL passed to `showPopup`.
    pub default_host: String,
    pub state_directory: String,
    pub log_level: String,
    pub transport: TransportKind,
    /// Empty selects the native transport regardless of `transport`.
    pub websocket_uri: String,
    pub websocket_origin: String,
    /// Native messaging host manifest. Unset means the browser's default location.
    pub native_manifest: Option<String>,
    /// Register automatically when the helper does not know this client.
    pub auto_register: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_host: DEFAULT_HOST.to_string(),
            state_directory: DEFAULT_STATE_DIRECTORY.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            transport: TransportKind::default(),
            websocket_uri: DEFAULT_WEBSOCKET_URI.to_string(),
            websocket_origin: DEFAULT_WEBSOCKET_ORIGIN.to_string(),
            native_manifest: None,
            auto_register: false,
        }
    }
}

impl Config {
    /// Load configuration from `file` (or the default location) and the process environment.
    ///
    /// An explicit `file` must exist; the default location is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::load_with(file, env)
    }

    /// Same as [`Config::load`] with a caller-supplied environment source.
    pub fn load_with(file: Option<&Path>, env: Environment) -> Result<Self> {
        let file_source = match file {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => {
                let path = default_config_file();
                debug!("Looking for config at {}", path.display());
                File::from(path).format(FileFormat::Toml).required(false)
            }
        };

        let config: Config = config::Config::builder()
            .add_source(file_source)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.default_host.trim().is_empty() {
            return Err(Error::InvalidConfig("default_host must not be empty".to_string()));
        }
        if !self.websocket_uri.is_empty()
            && !(self.websocket_uri.starts_with("ws://") || self.websocket_uri.starts_with("wss://"))
        {
            return Err(Error::InvalidConfig(format!(
                "websocket_uri must start with ws:// or wss://, got {}",
                self.websocket_uri
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn transport_kind(&self) -> TransportKind {
        if self.websocket_uri.is_empty() {
            TransportKind::Native
        } else {
            self.transport
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        expand_path(&self.state_directory)
    }

    pub fn native_manifest_path(&self) -> Result<PathBuf> {
        match self.native_manifest.as_deref() {
            Some(path) if !path.is_empty() => expand_path(path),
            _ => native::default_manifest_path().ok_or_else(|| {
                Error::InvalidConfig(
                    "unable to determine the native messaging manifest location".to_string(),
                )
            }),
        }
    }
}

fn expand_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text)
        .map_err(|e| Error::InvalidConfig(format!("expanding path {text:?}: {e}")))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// `$XDG_CONFIG_HOME/sudolikeaboss/config.toml`, falling back to the platform config dir.
pub fn default_config_file() -> PathBuf {
    default_config_dir().join("config.toml")
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir).join(APP_NAME);
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join(APP_NAME);
    }
    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
}
