//! Configuration file – reads/writes `~/.wayfinder/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use wayfinder_executor::ExecutorConfig;
use wayfinder_planner::PlannerConfig;

/// Where the shared channel lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process store with a simulated rover attached.
    #[default]
    Memory,
    /// Realtime-database style HTTP store; the executor runs on the robot.
    Rest,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Rest => write!(f, "rest"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "sim" => Ok(Backend::Memory),
            "rest" | "http" => Ok(Backend::Rest),
            other => Err(format!("unknown backend '{other}' (expected memory or rest)")),
        }
    }
}

/// Starting pose of the simulated rover (memory backend only).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub start_lat: f64,
    pub start_lng: f64,
    pub start_heading_deg: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_lat: 0.0,
            start_lng: 0.0,
            start_heading_deg: 0.0,
        }
    }
}

/// Persisted operator configuration stored in `~/.wayfinder/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,

    /// Base URL of the REST store, e.g. `https://robot-1.example.firebaseio.com`.
    #[serde(default = "default_channel_url")]
    pub channel_url: String,

    /// Access token appended as `?auth=`.  Stored as plain text, the file is
    /// created owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_auth: String,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("channel_url", &self.channel_url)
            .field(
                "channel_auth",
                if self.channel_auth.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("simulation", &self.simulation)
            .field("planner", &self.planner)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Config {
    /// Auth token, if one is configured.
    pub fn auth(&self) -> Option<String> {
        (!self.channel_auth.is_empty()).then(|| self.channel_auth.clone())
    }
}

fn default_channel_url() -> String {
    "http://localhost:9000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            channel_url: default_channel_url(),
            channel_auth: String::new(),
            simulation: SimulationConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Return the path to `~/.wayfinder/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".wayfinder").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `WAYFINDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYFINDER_BACKEND` | `backend` |
/// | `WAYFINDER_CHANNEL_URL` | `channel_url` |
/// | `WAYFINDER_CHANNEL_AUTH` | `channel_auth` |
/// | `WAYFINDER_TICK_MS` | `planner.tick_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYFINDER_BACKEND")
        && let Ok(backend) = v.parse::<Backend>()
    {
        cfg.backend = backend;
    }
    if let Ok(v) = std::env::var("WAYFINDER_CHANNEL_URL") {
        cfg.channel_url = v;
    }
    if let Ok(v) = std::env::var("WAYFINDER_CHANNEL_AUTH") {
        cfg.channel_auth = v;
    }
    if let Ok(v) = std::env::var("WAYFINDER_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.planner.tick_ms = ms;
    }
}

/// Save the config to disk, creating `~/.wayfinder/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_auth_token() {
        let cfg = Config {
            channel_auth: "db-secret-123".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("db-secret-123"), "auth token must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_token() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
        assert_eq!(Config::default().auth(), None);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path)
            .expect("file metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_keeps_nested_settings() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.backend = Backend::Rest;
        cfg.channel_url = "https://rover.example.com".to_string();
        cfg.planner.heading_tolerance_deg = 20.0;
        cfg.executor.governor.stop_distance_cm = 35.0;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.backend, Backend::Rest);
        assert_eq!(loaded.planner.heading_tolerance_deg, 20.0);
        assert_eq!(loaded.planner.manual_override_hold_ms, 10_000);
        assert_eq!(loaded.executor.governor.stop_distance_cm, 35.0);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = \"memory\"\n[planner]\narrival_threshold_m = 8.0\n")
            .expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.planner.arrival_threshold_m, 8.0);
        assert_eq!(loaded.planner.command_timeout_ms, 5_000);
        assert_eq!(loaded.executor, ExecutorConfig::default());
    }

    #[test]
    fn config_path_points_to_wayfinder_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".wayfinder"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn backend_parses_aliases() {
        assert_eq!("REST".parse::<Backend>(), Ok(Backend::Rest));
        assert_eq!("sim".parse::<Backend>(), Ok(Backend::Memory));
        assert!("serial".parse::<Backend>().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_channel_url() {
        // SAFETY: each test uses its own variable.
        unsafe { std::env::set_var("WAYFINDER_CHANNEL_URL", "http://robot-host:9000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.channel_url, "http://robot-host:9000");
        unsafe { std::env::remove_var("WAYFINDER_CHANNEL_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_auth() {
        // SAFETY: each test uses its own variable.
        unsafe { std::env::set_var("WAYFINDER_CHANNEL_AUTH", "token-xyz") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.auth().as_deref(), Some("token-xyz"));
        unsafe { std::env::remove_var("WAYFINDER_CHANNEL_AUTH") };
    }

    #[test]
    fn apply_env_overrides_changes_backend() {
        // SAFETY: each test uses its own variable.
        unsafe { std::env::set_var("WAYFINDER_BACKEND", "rest") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.backend, Backend::Rest);
        unsafe { std::env::remove_var("WAYFINDER_BACKEND") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_tick() {
        // SAFETY: each test uses its own variable.
        unsafe { std::env::set_var("WAYFINDER_TICK_MS", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.planner.tick_ms, 2_000);

        unsafe { std::env::set_var("WAYFINDER_TICK_MS", "750") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.planner.tick_ms, 750);
        unsafe { std::env::remove_var("WAYFINDER_TICK_MS") };
    }
}
