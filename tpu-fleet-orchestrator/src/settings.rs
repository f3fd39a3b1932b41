use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_ERROR_BACKOFF_JITTER_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 32;
pub const DEFAULT_ADMIN_PORT: u16 = 8001;

/// Timing knobs of the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopTiming {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Upper bound of the random delay added to `error_backoff`.
    pub error_backoff_jitter: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS),
            error_backoff_jitter: Duration::from_secs(DEFAULT_ERROR_BACKOFF_JITTER_SECS),
        }
    }
}

/// Process settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: String,
    pub fleet_config_file: PathBuf,
    pub gcloud_bin: String,
    pub launcher_cmd: String,
    pub timing: LoopTiming,
    pub max_concurrent_tasks: usize,
    /// 0 disables the admin HTTP server.
    pub admin_port: u16,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("⚠️  Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let max_concurrent_tasks =
            env_parse("MAX_CONCURRENT_TASKS", DEFAULT_MAX_CONCURRENT_TASKS).max(1);
        Self {
            provider: env_string("PROVIDER", "gcloud").to_lowercase(),
            fleet_config_file: PathBuf::from(env_string("FLEET_CONFIG_FILE", "fleet.json")),
            gcloud_bin: env_string("GCLOUD_BIN", "gcloud"),
            launcher_cmd: env_string("LAUNCHER_CMD", "python launch.py"),
            timing: LoopTiming {
                poll_interval: Duration::from_secs(env_parse(
                    "POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL_SECS,
                )),
                error_backoff: Duration::from_secs(env_parse(
                    "ERROR_BACKOFF_SECS",
                    DEFAULT_ERROR_BACKOFF_SECS,
                )),
                error_backoff_jitter: Duration::from_secs(env_parse(
                    "ERROR_BACKOFF_JITTER_SECS",
                    DEFAULT_ERROR_BACKOFF_JITTER_SECS,
                )),
            },
            max_concurrent_tasks,
            admin_port: env_parse("ADMIN_PORT", DEFAULT_ADMIN_PORT),
        }
    }
}
