//! Scheduler state: the global cursor and window dispatch.
//!
//! The cursor records the wall-clock point up to which events have been
//! queried, persisted as a distinguished state document. Each tick walks
//! the cursor forward to the current target in windows of at most
//! `max_query_window` seconds and hands each window to the query task.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::model::{object_id, PrincipalObject};
use crate::query::QueryRequest;
use crate::store::StateStore;

/// `object_id_string` of the global cursor document.
pub const STATE_CURSOR_KEY: &str = "GEOMODEL_STATE";

/// The scheduler's persistent position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCursor {
    pub time_endpoint: DateTime<Utc>,
}

impl StateCursor {
    /// Fresh cursor, optionally back-dated by `offset_secs` so a first
    /// startup can pick up recent history.
    pub fn initial(now: DateTime<Utc>, offset_secs: u64) -> Self {
        Self {
            time_endpoint: now - chrono::Duration::seconds(offset_secs as i64),
        }
    }

    /// Reads the cursor out of its state document; `None` when the
    /// document carries no endpoint.
    pub fn from_object(object: &PrincipalObject) -> Option<Self> {
        object
            .state
            .time_endpoint
            .map(|time_endpoint| Self { time_endpoint })
    }

    /// Builds the state document representing this cursor.
    pub fn to_object(&self, context: &str) -> Result<PrincipalObject> {
        let mut object = PrincipalObject::new(STATE_CURSOR_KEY, context)?;
        object.state.time_endpoint = Some(self.time_endpoint);
        Ok(object)
    }
}

/// Splits `[from, target)` into windows of at most `max_window_secs`.
/// Empty when `from` has already reached `target`.
pub fn plan_windows(
    from: DateTime<Utc>,
    target: DateTime<Utc>,
    max_window_secs: u64,
) -> Vec<QueryRequest> {
    let mut windows = Vec::new();
    let step = chrono::Duration::seconds(max_window_secs as i64);
    let mut sv = from;
    while sv < target {
        let mut ev = sv + step;
        if ev > target {
            ev = target;
        }
        windows.push(QueryRequest {
            start_time: sv,
            end_time: ev,
        });
        sv = ev;
    }
    windows
}

/// Loads the cursor, initializing it on first startup.
pub async fn load_cursor(store: &dyn StateStore, cfg: &Config) -> Result<StateCursor> {
    let oid = object_id(&cfg.general.context, STATE_CURSOR_KEY)?;
    match store.read(&oid).await.context("failed to read cursor")? {
        Some(object) => match StateCursor::from_object(&object) {
            Some(cursor) => Ok(cursor),
            None => {
                warn!("cursor document has no endpoint, reinitializing");
                Ok(StateCursor::initial(Utc::now(), cfg.runtime.initial_offset))
            }
        },
        None => {
            info!("no state found, setting initial value");
            Ok(StateCursor::initial(Utc::now(), cfg.runtime.initial_offset))
        }
    }
}

/// Persists the cursor.
pub async fn save_cursor(store: &dyn StateStore, cfg: &Config, cursor: &StateCursor) -> Result<()> {
    let object = cursor.to_object(&cfg.general.context)?;
    store.write(&object).await.context("failed to save cursor")
}

/// One scheduler tick: advance the cursor to the current target,
/// dispatching a query per window. The cursor is only persisted past
/// windows that were actually handed off, so a failed dispatch is
/// retried on the next tick.
pub async fn run_state_tick(
    store: &dyn StateStore,
    cfg: &Config,
    queries: &mpsc::Sender<QueryRequest>,
) -> Result<()> {
    debug!("state processor analyzing interval");
    let mut cursor = load_cursor(store, cfg).await?;

    let offset = chrono::Duration::from_std(cfg.dispatch_offset()?)
        .context("dispatch offset out of range")?;
    let target = Utc::now() - offset;
    if target <= cursor.time_endpoint {
        debug!("cursor already at target, nothing to dispatch");
        return Ok(());
    }

    for window in plan_windows(cursor.time_endpoint, target, cfg.timer.max_query_window) {
        let span = window.end_time - window.start_time;
        info!(
            "dispatch query for {} -> {} ({}s)",
            window.start_time,
            window.end_time,
            span.num_seconds()
        );
        if queries.send(window).await.is_err() {
            warn!("query channel closed, stopping dispatch");
            break;
        }
        cursor.time_endpoint = window.end_time;
    }

    save_cursor(store, cfg, &cursor).await
}
