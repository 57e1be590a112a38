use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TsloadError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Resolves profiled keys: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
///
/// The lookup function is injectable so config resolution can be tested
/// without touching the process environment.
struct Profiled<'a, F: Fn(&str) -> Option<String>> {
    profile: &'a str,
    lookup: F,
}

impl<'a, F: Fn(&str) -> Option<String>> Profiled<'a, F> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub active_load: ActiveLoadConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TSLOAD_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TSLOAD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, env_opt)
    }

    /// Build config from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let env = Profiled { profile: p.as_str(), lookup };
        let storage = StorageConfig::from_profiled(&env);
        let active_load = ActiveLoadConfig::from_profiled(&env, &storage);
        Self {
            profile: p.clone(),
            storage,
            active_load,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values the active-load pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TsloadError> {
        self.active_load.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  active_load: max_threads={}, max_pending={}, check_interval={}s, fail_dir={}",
            self.active_load.resolved_max_thread_num(),
            self.active_load.max_pending_size,
            self.active_load.check_interval_secs,
            self.active_load.fail_dir.display()
        );
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_profiled<F: Fn(&str) -> Option<String>>(env: &Profiled<'_, F>) -> Self {
        Self {
            data_dir: PathBuf::from(env.or("DATA_DIR", "data")),
        }
    }
}

// ── Active load ───────────────────────────────────────────────

/// Resolved settings for the active-load pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLoadConfig {
    /// Upper bound on concurrent load workers. 0 = half the available cores.
    #[serde(default)]
    pub max_thread_num: usize,
    /// Advisory admission limit exposed to the discovery side.
    #[serde(default = "default_max_pending_size")]
    pub max_pending_size: usize,
    /// Directory scan interval; an idle worker waits `2 x` this many polls.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Sleep between empty-queue polls.
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
    /// Where unloadable files are quarantined.
    pub fail_dir: PathBuf,
}

fn default_max_pending_size() -> usize { 1000 }
fn default_check_interval_secs() -> u64 { 5 }
fn default_idle_poll_interval_ms() -> u64 { 1000 }

impl ActiveLoadConfig {
    fn from_profiled<F: Fn(&str) -> Option<String>>(
        env: &Profiled<'_, F>,
        storage: &StorageConfig,
    ) -> Self {
        let default_fail_dir = storage.data_dir.join("load").join("failed");
        Self {
            max_thread_num: env.usize("LOAD_ACTIVE_MAX_THREAD_NUM", 0),
            max_pending_size: env.usize("LOAD_ACTIVE_MAX_PENDING_SIZE", default_max_pending_size()),
            check_interval_secs: env.u64(
                "LOAD_ACTIVE_CHECK_INTERVAL_SECS",
                default_check_interval_secs(),
            ),
            idle_poll_interval_ms: env.u64(
                "LOAD_ACTIVE_IDLE_POLL_MS",
                default_idle_poll_interval_ms(),
            ),
            fail_dir: env
                .opt("LOAD_ACTIVE_FAIL_DIR")
                .map(PathBuf::from)
                .unwrap_or(default_fail_dir),
        }
    }

    /// Defaults rooted at the given fail directory.
    pub fn with_fail_dir(fail_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_thread_num: 0,
            max_pending_size: default_max_pending_size(),
            check_interval_secs: default_check_interval_secs(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            fail_dir: fail_dir.into(),
        }
    }

    /// Resolve the worker cap (0 means half the available parallelism, at least 1).
    pub fn resolved_max_thread_num(&self) -> usize {
        if self.max_thread_num == 0 {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cpus / 2).max(1)
        } else {
            self.max_thread_num
        }
    }

    /// Number of empty polls a worker tolerates before exiting.
    pub fn idle_retry_budget(&self) -> u64 {
        self.check_interval_secs.saturating_mul(2).max(1)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), TsloadError> {
        if self.max_pending_size == 0 {
            return Err(TsloadError::Config(
                "LOAD_ACTIVE_MAX_PENDING_SIZE must be greater than 0".into(),
            ));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(TsloadError::Config(
                "LOAD_ACTIVE_IDLE_POLL_MS must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = Config::from_lookup("", lookup(&[]));
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.active_load.max_pending_size, 1000);
        assert_eq!(config.active_load.check_interval_secs, 5);
        assert_eq!(config.active_load.idle_poll_interval_ms, 1000);
        assert_eq!(
            config.active_load.fail_dir,
            PathBuf::from("data").join("load").join("failed")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn profile_prefixed_keys_win() {
        let config = Config::from_lookup(
            "prod",
            lookup(&[
                ("LOAD_ACTIVE_MAX_THREAD_NUM", "2"),
                ("PROD_LOAD_ACTIVE_MAX_THREAD_NUM", "8"),
                ("LOAD_ACTIVE_FAIL_DIR", "/srv/failed"),
            ]),
        );
        assert_eq!(config.profile, "PROD");
        assert_eq!(config.active_load.max_thread_num, 8);
        assert_eq!(config.active_load.fail_dir, PathBuf::from("/srv/failed"));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = Config::from_lookup(
            "",
            lookup(&[("LOAD_ACTIVE_CHECK_INTERVAL_SECS", "soon")]),
        );
        assert_eq!(config.active_load.check_interval_secs, 5);
    }

    #[test]
    fn zero_thread_num_resolves_to_at_least_one() {
        let config = ActiveLoadConfig::with_fail_dir("failed");
        assert!(config.resolved_max_thread_num() >= 1);
    }

    #[test]
    fn idle_retry_budget_is_twice_the_check_interval() {
        let mut config = ActiveLoadConfig::with_fail_dir("failed");
        config.check_interval_secs = 3;
        assert_eq!(config.idle_retry_budget(), 6);
        config.check_interval_secs = 0;
        assert_eq!(config.idle_retry_budget(), 1);
    }

    #[test]
    fn validate_rejects_zero_pending_size() {
        let mut config = ActiveLoadConfig::with_fail_dir("failed");
        config.max_pending_size = 0;
        assert!(matches!(config.validate(), Err(TsloadError::Config(_))));
    }
}
