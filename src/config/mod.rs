//! Configuration loading and validation.
//!
//! The configuration file is TOML, grouped into sections that mirror the
//! deployment surfaces: the state store, the event store, the alert sink,
//! general paths, the geo heuristics, and the timers. Options that only
//! arrive via the command line (state index wipe, alert dry-run, initial
//! cursor offset) live in [`RuntimeOptions`] and are never read from the
//! file.

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Root configuration for the geomodel process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state_store: StateStoreConfig,
    pub event_store: EventStoreConfig,
    pub alerts: AlertsConfig,
    pub general: GeneralConfig,
    pub geo: GeoConfig,
    pub timer: TimerConfig,

    /// Options set from the CLI, not the configuration file.
    #[serde(skip)]
    pub runtime: RuntimeOptions,
}

/// Document store holding per-principal state and the global cursor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    /// Base URL of the state document store.
    pub endpoint: String,
    /// Index (collection) name for state documents.
    pub index: String,
}

/// Event source queried for authentication telemetry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Base URL of the event document store.
    pub endpoint: String,
    /// Index containing raw events.
    pub index: String,
}

/// Alert publishing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// URL alert envelopes are POSTed to.
    pub url: String,
}

/// Paths and namespace settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Context namespace included in every object id hash.
    pub context: String,
    /// Directory scanned for plugin executables.
    pub plugins_dir: PathBuf,
    /// Path to the MaxMind city database.
    pub maxmind_db: PathBuf,
    /// Optional path to the locality override list.
    pub overrides_file: Option<PathBuf>,
}

/// Parameters for the collapse and movement heuristics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Maximum distance (km) at which two branches collapse into one
    /// geocenter.
    pub collapse_maximum: u32,
    /// Wall-clock window examined by the movement heuristic.
    pub movement_window: String,
    /// Distance (km) beyond which movement inside the window alerts.
    pub movement_distance: u32,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            collapse_maximum: 500,
            movement_window: "4h".to_string(),
            movement_distance: 2000,
        }
    }
}

/// Interval and expiry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Seconds between scheduler ticks.
    pub state_interval: u64,
    /// Seconds between merge ticks.
    pub merge_interval: u64,
    /// Maximum query window size in seconds.
    pub max_query_window: u64,
    /// Duration after which stored events are pruned.
    pub expire_events: String,
    /// Optional standoff subtracted from the dispatch target, so queries
    /// never chase the event store's ingestion lag.
    pub offset: Option<String>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            state_interval: 30,
            merge_interval: 30,
            max_query_window: 600,
            expire_events: "720h".to_string(),
            offset: None,
        }
    }
}

/// CLI-provided options carried alongside the file configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Wipe and recreate the state index on startup.
    pub delete_state_index: bool,
    /// Back-date the cursor by this many seconds on first startup.
    pub initial_offset: u64,
    /// Suppress alert transmission (analysis still runs).
    pub no_send_alert: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_store: StateStoreConfig::default(),
            event_store: EventStoreConfig::default(),
            alerts: AlertsConfig::default(),
            general: GeneralConfig::default(),
            geo: GeoConfig::default(),
            timer: TimerConfig::default(),
            runtime: RuntimeOptions::default(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects missing or out-of-range settings.
    ///
    /// Interval minimums keep the process from hammering its backends;
    /// the movement distance minimum keeps the heuristic above collapse
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.state_store.endpoint.is_empty() {
            bail!("state_store.endpoint must be set");
        }
        if self.state_store.index.is_empty() {
            bail!("state_store.index must be set");
        }
        if self.event_store.endpoint.is_empty() {
            bail!("event_store.endpoint must be set");
        }
        if self.event_store.index.is_empty() {
            bail!("event_store.index must be set");
        }
        if self.alerts.url.is_empty() {
            bail!("alerts.url must be set");
        }
        if self.general.context.is_empty() {
            bail!("general.context must be set");
        }
        if self.general.plugins_dir.as_os_str().is_empty() {
            bail!("general.plugins_dir must be set");
        }
        if self.general.maxmind_db.as_os_str().is_empty() {
            bail!("general.maxmind_db must be set");
        }
        if self.timer.state_interval < 10 {
            bail!("timer.state_interval must be >= 10");
        }
        if self.timer.merge_interval < 10 {
            bail!("timer.merge_interval must be >= 10");
        }
        if self.timer.max_query_window < 60 {
            bail!("timer.max_query_window must be >= 60");
        }
        if self.geo.movement_distance < 500 {
            bail!("geo.movement_distance must be >= 500");
        }
        duration::parse(&self.timer.expire_events).context("timer.expire_events")?;
        duration::parse(&self.geo.movement_window).context("geo.movement_window")?;
        if let Some(offset) = &self.timer.offset {
            duration::parse(offset).context("timer.offset")?;
        }
        Ok(())
    }

    /// Event expiry as a parsed duration. Valid after [`validate`].
    ///
    /// [`validate`]: Config::validate
    pub fn expire_events(&self) -> Result<Duration> {
        duration::parse(&self.timer.expire_events)
    }

    /// Movement heuristic window as a parsed duration.
    pub fn movement_window(&self) -> Result<Duration> {
        duration::parse(&self.geo.movement_window)
    }

    /// Dispatch standoff; zero when unset.
    pub fn dispatch_offset(&self) -> Result<Duration> {
        match &self.timer.offset {
            Some(s) => duration::parse(s),
            None => Ok(Duration::ZERO),
        }
    }
}
