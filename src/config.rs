use serde::Deserialize;

use crate::connection::{BackoffPolicy, LivenessPolicy};
use crate::models::{SortDirection, SortKey, ViewQuery};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub pending: PendingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Control API base, e.g. `http://localhost:8000`; the telemetry URL is derived from it.
    pub base_url: String,
    pub admin_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnect when no message arrives for this long. The backend pushes every 2 s.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_base_ms() -> u64 {
    800
}

fn default_cap_ms() -> u64 {
    15_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    10_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_millis(self.base_ms, self.cap_ms)
    }

    pub fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy::from_millis(self.connect_timeout_ms, self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewConfig {
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default)]
    pub sort_descending: bool,
    #[serde(default)]
    pub filter: String,
}

impl ViewConfig {
    pub fn initial_query(&self) -> ViewQuery {
        ViewQuery {
            filter_text: self.filter.clone(),
            sort_key: self.sort_key,
            direction: if self.sort_descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingConfig {
    /// Drop a kill marker whose pid is still listed after this many snapshots.
    /// Unset keeps markers until confirmed or rejected.
    #[serde(default)]
    pub expire_after_snapshots: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log console stats (snapshots applied, reconnects, pending kills) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.backend.base_url).map_err(|e| {
            anyhow::anyhow!(
                "backend.base_url must be a valid URL, got {:?}: {}",
                self.backend.base_url,
                e
            )
        })?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "backend.base_url must use http or https, got {}",
            url.scheme()
        );
        anyhow::ensure!(
            !self.backend.admin_token.is_empty(),
            "backend.admin_token must be non-empty"
        );
        anyhow::ensure!(
            self.reconnect.base_ms > 0,
            "reconnect.base_ms must be > 0, got {}",
            self.reconnect.base_ms
        );
        anyhow::ensure!(
            self.reconnect.cap_ms >= self.reconnect.base_ms,
            "reconnect.cap_ms must be >= reconnect.base_ms ({}), got {}",
            self.reconnect.base_ms,
            self.reconnect.cap_ms
        );
        anyhow::ensure!(
            self.reconnect.connect_timeout_ms > 0,
            "reconnect.connect_timeout_ms must be > 0, got {}",
            self.reconnect.connect_timeout_ms
        );
        anyhow::ensure!(
            self.reconnect.idle_timeout_ms > 0,
            "reconnect.idle_timeout_ms must be > 0, got {}",
            self.reconnect.idle_timeout_ms
        );
        if let Some(n) = self.pending.expire_after_snapshots {
            anyhow::ensure!(
                n > 0,
                "pending.expire_after_snapshots must be > 0 when set, got {}",
                n
            );
        }
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
