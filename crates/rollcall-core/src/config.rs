//! Configuration resolution for Rollcall.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/rollcall/settings.json)
//! 3. Project config (.rollcall/settings.json)
//! 4. Environment variables (`ROLLCALL_*`)
//! 5. CLI arguments (applied by the binary, highest priority)
//!
//! Each file may specify any subset of fields; missing fields keep the value
//! resolved so far.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete Rollcall configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
}

/// Session host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Re-broadcast interval for the session advertisement.
    pub advertisement_interval_ms: u64,
    /// Lifetime of an issued nonce; also the per-connection packet timeout.
    pub nonce_ttl_ms: u64,
    /// Ledger database location. `None` keeps the ledger in memory only.
    pub database_path: Option<PathBuf>,
    /// Capacity of each session actor's command queue.
    pub command_queue_depth: usize,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            advertisement_interval_ms: 1_000,
            nonce_ttl_ms: 10_000,
            database_path: None,
            command_queue_depth: 256,
            log_level: "info".to_string(),
        }
    }
}

impl HostConfig {
    pub const fn advertisement_interval(&self) -> Duration {
        Duration::from_millis(self.advertisement_interval_ms)
    }

    pub const fn nonce_ttl(&self) -> Duration {
        Duration::from_millis(self.nonce_ttl_ms)
    }
}

/// Default per-session acceptance policy.
///
/// Physical room geometry varies, so the host may override these for each
/// session it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum accepted liveness/match score in `[0, 1]`.
    pub liveness_threshold: f64,
    /// Weakest accepted signal strength at capture time, in dBm.
    pub rssi_floor_dbm: i32,
    /// Maximum number of verified attendees; `None` for unbounded.
    pub capacity: Option<usize>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: 0.85,
            rssi_floor_dbm: -70,
            capacity: None,
        }
    }
}

/// Discovery client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub scan_window_ms: u64,
    pub connect_timeout_ms: u64,
    pub submission_timeout_ms: u64,
    /// Minimum match score the client requires before it signs a packet.
    pub match_threshold: f64,
    /// Fresh capture cycles allowed per session join.
    pub max_biometric_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: 3_000,
            connect_timeout_ms: 5_000,
            submission_timeout_ms: 5_000,
            match_threshold: 0.85,
            max_biometric_attempts: 3,
        }
    }
}

impl ClientConfig {
    pub const fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }
}

/// Biometric enrollment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub min_samples: usize,
    /// Largest Euclidean distance (on unit vectors) a sample may sit from the
    /// centroid before the enrollment is considered to mix two faces.
    pub max_centroid_distance: f32,
    pub embedding_dim: usize,
    /// Eye openness at or below this counts as closed.
    pub blink_closed_below: f32,
    /// Eye openness at or above this counts as open.
    pub blink_open_above: f32,
    /// Minimum yaw range (degrees) that counts as a head turn.
    pub head_turn_min_deg: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            max_centroid_distance: 0.35,
            embedding_dim: 128,
            blink_closed_below: 0.2,
            blink_open_above: 0.6,
            head_turn_min_deg: 15.0,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut value = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_values(&mut value, load_config_value(&global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".rollcall").join("settings.json");
        if project_path.exists() {
            merge_values(&mut value, load_config_value(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(value)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Load a single config file on top of the defaults (used by `--config`).
pub fn load_config_file(path: &Path) -> Result<Config> {
    let mut value = serde_json::to_value(Config::default())?;
    merge_values(&mut value, load_config_value(path)?);
    let config: Config = serde_json::from_value(value)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {e}", path.display())))?;
    validate(&config)?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rollcall").join("settings.json"))
}

/// Default ledger database path for a host.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("rollcall").join("ledger.db"))
}

fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`; objects merge key by key, everything else
/// replaces.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("ROLLCALL_NONCE_TTL_MS")
        && let Ok(n) = val.parse()
    {
        config.host.nonce_ttl_ms = n;
    }
    if let Ok(val) = std::env::var("ROLLCALL_ADVERTISEMENT_INTERVAL_MS")
        && let Ok(n) = val.parse()
    {
        config.host.advertisement_interval_ms = n;
    }
    if let Ok(val) = std::env::var("ROLLCALL_LIVENESS_THRESHOLD")
        && let Ok(n) = val.parse()
    {
        config.policy.liveness_threshold = n;
    }
    if let Ok(val) = std::env::var("ROLLCALL_RSSI_FLOOR_DBM")
        && let Ok(n) = val.parse()
    {
        config.policy.rssi_floor_dbm = n;
    }
    if let Ok(val) = std::env::var("ROLLCALL_MATCH_THRESHOLD")
        && let Ok(n) = val.parse()
    {
        config.client.match_threshold = n;
    }
    if let Ok(val) = std::env::var("ROLLCALL_DB_PATH") {
        config.host.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("ROLLCALL_LOG_LEVEL") {
        config.host.log_level = val;
    }
}

/// Reject configurations that would make every attempt fail or succeed.
pub fn validate(config: &Config) -> Result<()> {
    for (name, value) in [
        ("policy.liveness_threshold", config.policy.liveness_threshold),
        ("client.match_threshold", config.client.match_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Config(format!("{name} must be within [0, 1], got {value}")));
        }
    }
    if config.host.nonce_ttl_ms == 0 {
        return Err(Error::Config("host.nonce_ttl_ms must be positive".into()));
    }
    if config.host.advertisement_interval_ms == 0 {
        return Err(Error::Config(
            "host.advertisement_interval_ms must be positive".into(),
        ));
    }
    if config.enrollment.min_samples == 0 {
        return Err(Error::Config("enrollment.min_samples must be positive".into()));
    }
    if config.enrollment.blink_closed_below >= config.enrollment.blink_open_above {
        return Err(Error::Config(
            "enrollment.blink_closed_below must be below blink_open_above".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = Config::default();
        assert_eq!(config.policy.liveness_threshold, 0.85);
        assert_eq!(config.policy.rssi_floor_dbm, -70);
        assert_eq!(config.host.nonce_ttl(), Duration::from_secs(10));
        assert_eq!(config.enrollment.min_samples, 5);
        assert_eq!(config.client.max_biometric_attempts, 3);
        validate(&config).unwrap();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"policy":{"rssi_floor_dbm":-60},"host":{"nonce_ttl_ms":2500}}"#)
            .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.policy.rssi_floor_dbm, -60);
        assert_eq!(config.policy.liveness_threshold, 0.85);
        assert_eq!(config.host.nonce_ttl_ms, 2500);
        assert_eq!(config.host.advertisement_interval_ms, 1_000);
    }

    #[test]
    fn project_file_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join(".rollcall");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("settings.json"),
            r#"{"client":{"max_biometric_attempts":7}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.client.max_biometric_attempts, 7);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"policy":{"liveness_threshold":1.5}}"#).unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("liveness_threshold")));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn merge_replaces_scalars_and_recurses_into_objects() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge_values(&mut base, serde_json::json!({"a": {"c": 5}, "d": null}));
        assert_eq!(base, serde_json::json!({"a": {"b": 1, "c": 5}, "d": null}));
    }
}
