use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use task_convo::DEFAULT_DISPLAY_NAME;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [backend]
//                    base_url = "http://tasks.internal:3000"
//
//   env var:         TASKCHAT_BACKEND__BASE_URL=http://tasks.internal:3000
//
//   (single underscore stays within field names: TASKCHAT_CHANNEL__MIRROR_SENDS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub user: UserFileConfig,
}

/// Request/response backend (lives under `[backend]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout; 0 disables it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Duplex push channel (lives under `[channel]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit WebSocket URL. Derived from `backend.base_url` when unset.
    #[serde(default)]
    pub url: Option<String>,
    /// Also emit outgoing drafts on the channel. Every draft is still sent
    /// with `POST /{id}/newChat`, so a backend that runs channel `message`
    /// events as commands sees each one twice; turn this off for such
    /// backends.
    #[serde(default = "default_true")]
    pub mirror_sends: bool,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            mirror_sends: true,
        }
    }
}

/// Local user identity (lives under `[user]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserFileConfig {
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for UserFileConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

/// `<config_dir>/taskchat/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskchat").join("config.toml"))
}

/// An explicit `--config` path wins over the platform default.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(default_config_path)
}

/// Build a figment that layers: defaults → config.toml → TASKCHAT_* env vars.
///
/// A missing config file is not an error; its layer is simply empty.
///
/// Env vars use double-underscore for nesting into sections:
///   `TASKCHAT_BACKEND__BASE_URL=...`  →  `backend.base_url = ...`
///   `TASKCHAT_CHANNEL__ENABLED=false`  →  `channel.enabled = false`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("TASKCHAT_").split("__"))
}

/// Command-line overrides applied on top of the loaded file config.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOverrides {
    pub base_url: Option<String>,
    pub channel_url: Option<String>,
    pub disable_channel: bool,
}

impl FileConfig {
    pub fn with_overrides(mut self, overrides: &RuntimeOverrides) -> Self {
        if let Some(base_url) = &overrides.base_url {
            self.backend.base_url = base_url.clone();
        }
        if let Some(url) = &overrides.channel_url {
            self.channel.url = Some(url.clone());
        }
        if overrides.disable_channel {
            self.channel.enabled = false;
        }
        self
    }
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Duplex channel configuration (runtime view).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub url: String,
    pub mirror_sends: bool,
}

impl ChannelConfig {
    pub fn from_file(fc: &ChannelFileConfig, base_url: &str) -> Self {
        Self {
            enabled: fc.enabled,
            url: fc
                .url
                .clone()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| channel_url_for(base_url)),
            mirror_sends: fc.mirror_sends,
        }
    }
}

/// Everything the client needs at runtime.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL for request/response calls, without a trailing slash
    pub base_url: String,
    /// Per-request timeout (None = disabled)
    pub request_timeout: Option<Duration>,
    pub channel: ChannelConfig,
    /// Sender label that marks the local user's messages
    pub display_name: String,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let base_url = fc.backend.base_url.trim().trim_end_matches('/').to_string();
        let channel = ChannelConfig::from_file(&fc.channel, &base_url);
        Self {
            request_timeout: if fc.backend.request_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.backend.request_timeout_secs))
            },
            channel,
            display_name: fc.user.display_name.clone(),
            base_url,
        }
    }
}

/// WebSocket URL for a backend: `http` → `ws`, `https` → `wss`, plus `/ws`.
pub fn channel_url_for(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{swapped}/ws")
}
