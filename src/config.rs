use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::Credentials;

/// Client configuration, loaded from TOML.
///
/// ```toml
/// host = "10.0.0.1"
/// username = "admin"
/// password = "..."
/// verify_tls = false
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller address, with or without scheme. `https://` is assumed.
    pub host: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Verify the controller's TLS certificate.
    pub verify_tls: bool,
    /// Seconds between token refreshes.
    pub auth_refresh_secs: u64,
    /// Seconds between subscription refreshes.
    pub subscription_refresh_secs: u64,
    /// Polls for the event stream to report open before giving up.
    pub stream_open_attempts: u32,
    /// Delay between those polls, in milliseconds.
    pub stream_open_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            verify_tls: true,
            auth_refresh_secs: 360,
            subscription_refresh_secs: 30,
            stream_open_attempts: 5,
            stream_open_backoff_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        // Warn if the config file is world-readable (it holds a password).
        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path. The password is never written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Check that the fields needed to log in are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = |field: &'static str| Err(ConfigError::Missing(field));
        if self.host.trim().is_empty() {
            return missing("host");
        }
        if self.username.trim().is_empty() {
            return missing("username");
        }
        if self.password.is_empty() {
            return missing("password");
        }
        if self.stream_open_attempts == 0 {
            return Err(ConfigError::Invalid(
                "stream_open_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// REST base URL: the host with `https://` prepended when no scheme is
    /// given.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    pub fn auth_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auth_refresh_secs)
    }

    pub fn subscription_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.subscription_refresh_secs)
    }

    pub fn stream_open_backoff(&self) -> Duration {
        Duration::from_millis(self.stream_open_backoff_ms)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("auth_refresh_secs", &self.auth_refresh_secs)
            .field("subscription_refresh_secs", &self.subscription_refresh_secs)
            .field("stream_open_attempts", &self.stream_open_attempts)
            .field("stream_open_backoff_ms", &self.stream_open_backoff_ms)
            .finish()
    }
}

/// Default config location: `$XDG_CONFIG_HOME/apic/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("apic").join("config.toml"))
}

/// Errors that can occur when loading or saving config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, std::io::Error),
    #[error("Failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("Failed to write config {}: {}", .0.display(), .1)]
    WriteFailed(PathBuf, std::io::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Check file permissions on a config file and warn if world-readable.
///
/// On Unix, checks `st_mode & 0o004` (world-readable bit). If set, logs a
/// warning because the config file may contain the controller password.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain a password -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

/// Returns true if the given file mode has the world-readable bit set.
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
