use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::SoraError;

const DEFAULT_SIGNALING_URL: &str = "wss://sora.example.com/signaling";
const DEFAULT_CHANNEL_ID: &str = "sora";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_FILTER: &str = "sora_core=debug";

/// Media direction requested from the signaling server.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sendonly,
    Recvonly,
    #[default]
    Sendrecv,
}

/// Persisted connection settings, the equivalent of the sample apps'
/// `Environment` file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_signaling_urls")]
    pub signaling_urls: Vec<String>,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub multistream_enabled: bool,
    /// Sent verbatim as `metadata` in the signaling `connect` message.
    #[serde(default)]
    pub signaling_connect_metadata: Option<serde_json::Value>,
    /// PEM file name without extension.
    #[serde(default)]
    pub ca_cert_filename: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_signaling_urls() -> Vec<String> {
    vec![DEFAULT_SIGNALING_URL.to_string()]
}

fn default_channel_id() -> String {
    DEFAULT_CHANNEL_ID.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_disconnect_timeout_secs() -> u64 {
    DEFAULT_DISCONNECT_TIMEOUT_SECS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            signaling_urls: default_signaling_urls(),
            channel_id: default_channel_id(),
            role: Role::default(),
            multistream_enabled: true,
            signaling_connect_metadata: None,
            ca_cert_filename: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            disconnect_timeout_secs: DEFAULT_DISCONNECT_TIMEOUT_SECS,
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    /// Validate the settings and build the configuration for one
    /// connection attempt. A new publisher stream id is generated each call.
    pub fn to_configuration(&self) -> Result<Configuration, SoraError> {
        if self.signaling_urls.is_empty() {
            return Err(SoraError::Config("no signaling URL configured".into()));
        }

        let mut signaling_urls = Vec::with_capacity(self.signaling_urls.len());
        for raw in &self.signaling_urls {
            let url = Url::parse(raw)
                .map_err(|e| SoraError::Config(format!("invalid signaling URL {raw:?}: {e}")))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(SoraError::Config(format!(
                    "signaling URL {raw:?} must use ws or wss"
                )));
            }
            signaling_urls.push(url);
        }

        if self.channel_id.trim().is_empty() {
            return Err(SoraError::Config("channel id is empty".into()));
        }
        if self.connect_timeout_secs == 0 || self.disconnect_timeout_secs == 0 {
            return Err(SoraError::Config("timeouts must be non-zero".into()));
        }

        Ok(Configuration {
            signaling_urls,
            channel_id: self.channel_id.clone(),
            role: self.role,
            multistream_enabled: self.multistream_enabled,
            signaling_connect_metadata: self.signaling_connect_metadata.clone(),
            ca_cert_filename: self.ca_cert_filename.clone(),
            publisher_stream_id: uuid::Uuid::new_v4().to_string(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            disconnect_timeout: Duration::from_secs(self.disconnect_timeout_secs),
        })
    }
}

/// Validated configuration handed to the signaling client.
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Candidates tried by the signaling client; the first to answer wins.
    pub signaling_urls: Vec<Url>,
    pub channel_id: String,
    pub role: Role,
    pub multistream_enabled: bool,
    pub signaling_connect_metadata: Option<serde_json::Value>,
    pub ca_cert_filename: Option<String>,
    /// Id of the stream this client publishes. Streams announced with this
    /// id are our own and never rendered in the receiver slot.
    pub publisher_stream_id: String,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
}

impl Configuration {
    /// Configuration for a single URL with default timeouts.
    pub fn new(url: Url, channel_id: impl Into<String>, role: Role) -> Self {
        Self {
            signaling_urls: vec![url],
            channel_id: channel_id.into(),
            role,
            multistream_enabled: true,
            signaling_connect_metadata: None,
            ca_cert_filename: None,
            publisher_stream_id: uuid::Uuid::new_v4().to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            disconnect_timeout: Duration::from_secs(DEFAULT_DISCONNECT_TIMEOUT_SECS),
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Replace every field at once.
    pub fn set(&self, settings: Settings) {
        *self.lock() = settings;
        self.save();
    }

    pub fn set_signaling_urls(&self, urls: Vec<String>) {
        self.lock().signaling_urls = urls;
        self.save();
    }

    pub fn set_channel_id(&self, channel_id: String) {
        self.lock().channel_id = channel_id;
        self.save();
    }

    pub fn set_role(&self, role: Role) {
        self.lock().role = role;
        self.save();
    }

    pub fn set_signaling_connect_metadata(&self, metadata: Option<serde_json::Value>) {
        self.lock().signaling_connect_metadata = metadata;
        self.save();
    }

    pub fn set_timeouts(&self, connect_secs: u64, disconnect_secs: u64) {
        {
            let mut settings = self.lock();
            settings.connect_timeout_secs = connect_secs;
            settings.disconnect_timeout_secs = disconnect_secs;
        }
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create settings dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt {}: {e}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.signaling_urls, vec![DEFAULT_SIGNALING_URL.to_string()]);
        assert_eq!(s.channel_id, "sora");
        assert_eq!(s.role, Role::Sendrecv);
        assert!(s.multistream_enabled);
        assert_eq!(s.connect_timeout_secs, 15);
        assert_eq!(s.disconnect_timeout_secs, 10);
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_set_channel_and_role_persist() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.set_channel_id("room-42".to_string());
            store.set_role(Role::Recvonly);
        }
        let store = SettingsStore::new(dir.path());
        let s = store.get();
        assert_eq!(s.channel_id, "room-42");
        assert_eq!(s.role, Role::Recvonly);
    }

    #[test]
    fn test_metadata_and_timeouts_persist() {
        let dir = temp_dir();
        {
            let store = SettingsStore::new(dir.path());
            store.set_signaling_connect_metadata(Some(serde_json::json!({"access_token": "x"})));
            store.set_timeouts(5, 3);
        }
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(
            s.signaling_connect_metadata,
            Some(serde_json::json!({"access_token": "x"}))
        );
        assert_eq!(s.connect_timeout_secs, 5);
        assert_eq!(s.disconnect_timeout_secs, 3);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), Settings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"channel_id":"lobby","role":"sendonly"}"#,
        )
        .unwrap();
        let s = SettingsStore::new(dir.path()).get();
        assert_eq!(s.channel_id, "lobby");
        assert_eq!(s.role, Role::Sendonly);
        assert!(s.multistream_enabled);
        assert_eq!(s.connect_timeout_secs, 15);
    }

    #[test]
    fn test_to_configuration_builds_urls_and_timeouts() {
        let mut s = Settings::default();
        s.signaling_urls = vec![
            "wss://a.example.com/signaling".into(),
            "ws://b.example.com/signaling".into(),
        ];
        s.connect_timeout_secs = 7;
        let config = s.to_configuration().unwrap();
        assert_eq!(config.signaling_urls.len(), 2);
        assert_eq!(config.signaling_urls[1].host_str(), Some("b.example.com"));
        assert_eq!(config.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(10));
        assert!(!config.publisher_stream_id.is_empty());
    }

    #[test]
    fn test_each_configuration_gets_fresh_publisher_stream_id() {
        let s = Settings::default();
        let a = s.to_configuration().unwrap();
        let b = s.to_configuration().unwrap();
        assert_ne!(a.publisher_stream_id, b.publisher_stream_id);
    }

    #[test]
    fn test_to_configuration_rejects_bad_input() {
        let mut s = Settings::default();
        s.signaling_urls.clear();
        assert!(matches!(s.to_configuration(), Err(SoraError::Config(_))));

        let mut s = Settings::default();
        s.signaling_urls = vec!["https://sora.example.com/signaling".into()];
        assert!(matches!(s.to_configuration(), Err(SoraError::Config(_))));

        let mut s = Settings::default();
        s.signaling_urls = vec!["not a url".into()];
        assert!(matches!(s.to_configuration(), Err(SoraError::Config(_))));

        let mut s = Settings::default();
        s.channel_id = "  ".into();
        assert!(matches!(s.to_configuration(), Err(SoraError::Config(_))));

        let mut s = Settings::default();
        s.disconnect_timeout_secs = 0;
        assert!(matches!(s.to_configuration(), Err(SoraError::Config(_))));
    }
}
