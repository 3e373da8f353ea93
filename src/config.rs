//! Runtime configuration, read from the environment.
//!
//! Two timers drive the engine: the subscription scan (slow, daily by
//! default) and the reconcile pass over in-flight PRs (fast, minutes).
//! Both get jitter so that multiple instances restarting together do not
//! hit the registry and the host in lockstep.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default subscription scan interval (24 hours).
const DEFAULT_SCAN_INTERVAL_MINS: u64 = 24 * 60;

/// Default reconcile interval for in-flight PRs (5 minutes).
const DEFAULT_RECONCILE_INTERVAL_MINS: u64 = 5;

/// Default jitter percentage (0-100).
const DEFAULT_JITTER_PERCENT: u8 = 20;

const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Interval between subscription scans.
    ///
    /// Default: 24 hours. Configure via `BUILDFLOW_SCAN_INTERVAL_MINS`.
    pub scan_interval: Duration,

    /// Interval between reconcile passes over tracked PRs.
    ///
    /// Default: 5 minutes. Configure via `BUILDFLOW_RECONCILE_INTERVAL_MINS`.
    pub reconcile_interval: Duration,

    /// Jitter percentage added to both intervals (0-100). Default: 20.
    pub jitter_percent: u8,

    /// Path of the durable in-flight PR snapshot.
    ///
    /// Default: `data/state.json`. Configure via `BUILDFLOW_STATE_PATH`.
    pub state_path: PathBuf,

    /// Path of the action history log.
    ///
    /// Default: `data/actions.log`. Configure via `BUILDFLOW_HISTORY_PATH`.
    pub history_path: PathBuf,

    /// Address the HTTP API listens on.
    ///
    /// Default: `0.0.0.0:8080`. Configure via `BUILDFLOW_LISTEN_ADDR`.
    pub listen_addr: SocketAddr,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        FlowConfig {
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_MINS * 60),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_MINS * 60),
            jitter_percent: DEFAULT_JITTER_PERCENT,
            state_path: PathBuf::from("data/state.json"),
            history_path: PathBuf::from("data/actions.log"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
        }
    }

    /// Reads configuration from `BUILDFLOW_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        let scan_mins = env_u64("BUILDFLOW_SCAN_INTERVAL_MINS", DEFAULT_SCAN_INTERVAL_MINS);
        config.scan_interval = Duration::from_secs(scan_mins * 60);

        let reconcile_mins = env_u64(
            "BUILDFLOW_RECONCILE_INTERVAL_MINS",
            DEFAULT_RECONCILE_INTERVAL_MINS,
        );
        config.reconcile_interval = Duration::from_secs(reconcile_mins * 60);

        if let Ok(path) = std::env::var("BUILDFLOW_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BUILDFLOW_HISTORY_PATH") {
            config.history_path = PathBuf::from(path);
        }
        if let Some(addr) = std::env::var("BUILDFLOW_LISTEN_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.listen_addr = addr;
        }

        config
    }

    /// An interval with deterministic jitter for `seed`.
    ///
    /// `interval * (1 + (hash(seed) % jitter_percent) / 100)`
    pub fn with_jitter(&self, interval: Duration, seed: &str) -> Duration {
        if self.jitter_percent == 0 {
            return interval;
        }
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        let jitter = hasher.finish() % u64::from(self.jitter_percent);
        Duration::from_secs_f64(interval.as_secs_f64() * (1.0 + jitter as f64 / 100.0))
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
