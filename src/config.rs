//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::{
    dao::http::BackendEndpoints,
    transport::{TransportKind, TransportSettings},
};

/// Default location on disk where the node looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ROULETTE_SYNC_CONFIG_PATH";

/// Role a display node plays in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authoritative display running the round.
    #[default]
    Master,
    /// Mirror of the master.
    Client,
}

impl Role {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Whether this node runs the round or mirrors it.
    pub role: Role,
    pub listen_port: u16,
    /// Name of the broadcast channel shared by every display.
    pub channel_name: String,
    /// Key written by the storage fallback.
    pub storage_key: String,
    /// Directory for file-backed fallback storage; in-memory when absent.
    pub storage_dir: Option<PathBuf>,
    /// Preferred transport; native falls back to storage on its own.
    pub transport: TransportKind,
    pub sync: SyncConfig,
    pub round: RoundConfig,
    pub forced_number: ForcedNumberConfig,
    pub backend: BackendConfig,
    pub visibility: VisibilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            listen_port: 8080,
            channel_name: "roulette-sync-channel".into(),
            storage_key: "roulette-game-state".into(),
            storage_dir: None,
            transport: TransportKind::Native,
            sync: SyncConfig::default(),
            round: RoundConfig::default(),
            forced_number: ForcedNumberConfig::default(),
            backend: BackendConfig::default(),
            visibility: VisibilityConfig::default(),
        }
    }
}

/// Broadcast cadence and reconciliation policy.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the full-state reconciliation broadcast.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "state_update_interval_ms")]
    pub state_update_interval: Duration,
    /// Period of client heartbeats and master eviction checks.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,
    /// How often the storage fallback checks for new messages.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "storage_poll_interval_ms")]
    pub storage_poll_interval: Duration,
    /// Silence after which a client asks for the full state.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "state_request_timeout_ms")]
    pub state_request_timeout: Duration,
    /// Heartbeat periods a client may miss before the master forgets it.
    pub client_eviction_missed_heartbeats: u32,
    /// Apply targeted messages as they arrive, without ordering checks.
    pub apply_targeted_unconditionally: bool,
    /// Seconds left at which the timer turns to its warning style.
    pub timer_warning_threshold_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_update_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(5000),
            storage_poll_interval: Duration::from_millis(1000),
            state_request_timeout: Duration::from_millis(3000),
            client_eviction_missed_heartbeats: 3,
            apply_targeted_unconditionally: true,
            timer_warning_threshold_secs: 10,
        }
    }
}

impl SyncConfig {
    /// Time without heartbeat after which a client is evicted.
    pub fn client_ttl(&self) -> Duration {
        self.heartbeat_interval * self.client_eviction_missed_heartbeats.max(1)
    }
}

/// Timings of the local round engine.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "round_duration_ms")]
    pub round_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "wheel_animation_duration_ms")]
    pub wheel_animation_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "result_display_duration_ms")]
    pub result_display_duration: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_millis(120_000),
            wheel_animation_duration: Duration::from_millis(5_000),
            result_display_duration: Duration::from_millis(5_000),
        }
    }
}

/// Forced-number polling.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForcedNumberConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    pub primary_url: Option<String>,
    pub fallback_url: Option<String>,
}

impl Default for ForcedNumberConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            primary_url: None,
            fallback_url: None,
        }
    }
}

impl ForcedNumberConfig {
    /// Polling only makes sense with at least one endpoint.
    pub fn is_enabled(&self) -> bool {
        self.primary_url.is_some() || self.fallback_url.is_some()
    }
}

/// Round persistence and analytics endpoints.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub save_round_url: Option<String>,
    pub analytics_url: Option<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// Upper bound for the save performed on shutdown.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "unload_flush_timeout_ms")]
    pub unload_flush_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            save_round_url: None,
            analytics_url: None,
            request_timeout: Duration::from_millis(5000),
            unload_flush_timeout: Duration::from_millis(1500),
        }
    }
}

/// Tab visibility coordination.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
    /// Hidden longer than this means a catch-up on resume.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "catch_up_threshold_ms")]
    pub catch_up_threshold: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "catch_up_delay_ms")]
    pub catch_up_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "inter_handler_pause_ms")]
    pub inter_handler_pause: Duration,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            catch_up_threshold: Duration::from_millis(300_000),
            catch_up_delay: Duration::from_millis(2000),
            inter_handler_pause: Duration::from_millis(100),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        role = config.role.as_str(),
                        transport = config.transport.as_str(),
                        "loaded config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse configuration text; absent keys keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }

    /// Transport settings derived from the configuration.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            preferred: self.transport,
            channel_name: self.channel_name.clone(),
            storage_key: self.storage_key.clone(),
            poll_interval: self.sync.storage_poll_interval,
        }
    }

    /// Backend endpoints derived from the configuration.
    pub fn backend_endpoints(&self) -> BackendEndpoints {
        BackendEndpoints {
            primary_override_url: self.forced_number.primary_url.clone(),
            fallback_override_url: self.forced_number.fallback_url.clone(),
            save_round_url: self.backend.save_round_url.clone(),
            analytics_url: self.backend.analytics_url.clone(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.role, Role::Master);
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.sync.state_update_interval, Duration::from_secs(1));
        assert_eq!(config.sync.client_ttl(), Duration::from_secs(15));
        assert_eq!(config.visibility.catch_up_threshold, Duration::from_secs(300));
        assert!(!config.forced_number.is_enabled());
    }

    #[test]
    fn partial_sections_override_only_given_keys() {
        let config = AppConfig::from_json(
            r#"{
                "role": "client",
                "transport": "storage",
                "sync": {"heartbeat_interval_ms": 2000},
                "forced_number": {"primary_url": "http://backend/auto_winning_number"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Client);
        assert_eq!(config.transport, TransportKind::Storage);
        assert_eq!(config.sync.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.sync.storage_poll_interval, Duration::from_secs(1));
        assert!(config.forced_number.is_enabled());
        assert_eq!(
            config.backend_endpoints().primary_override_url.as_deref(),
            Some("http://backend/auto_winning_number")
        );
    }

    #[test]
    fn unknown_role_is_a_parse_error() {
        assert!(AppConfig::from_json(r#"{"role": "spectator"}"#).is_err());
    }
}
