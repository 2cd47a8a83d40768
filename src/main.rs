use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use log::LevelFilter;

use geomodel::config::{duration, Config};
use geomodel::geoip::{load_overrides, MaxmindResolver};
use geomodel::plugins::{load_plugins, Plugin};
use geomodel::query::{query_using_plugin, HttpEventSource, QueryRequest};
use geomodel::store::StateStore;
use geomodel::{AlertSink, HttpAlertSink, HttpStateStore, NoopAlertSink, Service};

/// Logging verbosity.
#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "geomodel", about = "Geographic anomaly detection for authentication telemetry")]
struct Opt {
    /// Configuration file path.
    #[arg(short = 'f', long = "config", default_value = "etc/geomodel.toml")]
    config: PathBuf,

    /// Delete and recreate the state index on startup.
    #[arg(short = 'D', long = "delete-state")]
    delete_state: bool,

    /// Don't send alerts (dry run).
    #[arg(short = 'n', long = "no-alerts")]
    no_alerts: bool,

    /// Initial state offset in seconds, applied on first startup.
    #[arg(short = 'o', long = "offset", default_value_t = 0)]
    offset: u64,

    /// Override the event index name from the config file.
    #[arg(short = 'I', long = "event-index")]
    event_index: Option<String>,

    /// Run a single plugin once and print its results.
    #[arg(short = 'p', long = "plugin-test")]
    plugin_test: Option<String>,

    /// How far back to query in plugin test mode.
    #[arg(short = 'b', long = "plugin-window", default_value = "1h")]
    plugin_window: String,

    /// Log level.
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn init_logger(level: LevelFilter) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.format(|buf, record| {
        let level = record.level();
        let colored_level = match level {
            log::Level::Error => level.to_string().red(),
            log::Level::Warn => level.to_string().yellow(),
            log::Level::Info => level.to_string().green(),
            log::Level::Debug => level.to_string().blue(),
            log::Level::Trace => level.to_string().purple(),
        };
        writeln!(
            buf,
            "[{}] {} {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            colored_level,
            record.args()
        )
    });
    let _ = builder.try_init();
}

/// Queries the last `window` of events for one plugin, runs it, and
/// prints the results.
async fn run_plugin_test(
    cfg: &Config,
    plugins: &[Plugin],
    name: &str,
    window: &str,
) -> Result<()> {
    let dur = duration::parse(window).context("invalid plugin test window")?;
    let Some(plugin) = plugins.iter().find(|p| p.name == name) else {
        bail!("plugin {} not found", name);
    };

    let source = HttpEventSource::new(&cfg.event_store.endpoint, &cfg.event_store.index);
    let now = Utc::now();
    let req = QueryRequest {
        start_time: now - chrono::Duration::from_std(dur).context("window out of range")?,
        end_time: now,
    };
    if let Some(result) = query_using_plugin(plugin, &source, &req).await? {
        for r in &result.results {
            println!(
                "{} {} {} {} {}",
                r.timestamp, r.principal, r.source_ipv4, r.valid, r.name
            );
        }
    }
    Ok(())
}

async fn startup(opt: Opt) -> Result<()> {
    let mut cfg = Config::load(&opt.config)?;
    cfg.runtime.delete_state_index = opt.delete_state;
    cfg.runtime.initial_offset = opt.offset;
    cfg.runtime.no_send_alert = opt.no_alerts;
    if let Some(index) = opt.event_index {
        cfg.event_store.index = index;
    }

    let overrides = match &cfg.general.overrides_file {
        Some(path) => load_overrides(path)?,
        None => Vec::new(),
    };
    let resolver = MaxmindResolver::open(&cfg.general.maxmind_db, overrides)?;
    let plugins = load_plugins(&cfg.general.plugins_dir)?;

    let store = HttpStateStore::new(&cfg.state_store.endpoint, &cfg.state_store.index);
    store
        .init(cfg.runtime.delete_state_index)
        .await
        .context("failed to initialize state store")?;

    // Plugin test mode bypasses the task set entirely.
    if let Some(name) = &opt.plugin_test {
        return run_plugin_test(&cfg, &plugins, name, &opt.plugin_window).await;
    }

    let source = HttpEventSource::new(&cfg.event_store.endpoint, &cfg.event_store.index);
    // Dry-run mode swaps the alert sink out wholesale; analysis and
    // escalation still run against the store.
    let sink: Arc<dyn AlertSink> = if cfg.runtime.no_send_alert {
        Arc::new(NoopAlertSink)
    } else {
        Arc::new(HttpAlertSink::new(&cfg.alerts.url))
    };

    let service = Service {
        config: Arc::new(cfg),
        store: Arc::new(store),
        resolver: Arc::new(resolver),
        sink,
        source: Arc::new(source),
        plugins: Arc::new(plugins),
    };
    service.run().await
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();
    init_logger(opt.log_level.clone().into());

    if let Err(e) = startup(opt).await {
        eprintln!("error: {:#}", e);
        process::exit(2);
    }
    println!("exiting");
}
