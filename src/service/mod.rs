//! Task wiring and lifecycle.
//!
//! Four cooperating tasks connected by bounded channels:
//!
//! ```text
//! scheduler --QueryRequest--> query handler --PluginResult--> integrator
//!                                                                |
//!                                              merger <-- shared queue
//! ```
//!
//! Backpressure is the channels': a slow query handler blocks dispatch, a
//! slow merger lets the integration queue grow. SIGINT cancels the shared
//! token; every task finishes its current unit of work, the merger drains
//! the queue a final time, and `run` returns once all tasks have joined.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::config::Config;
use crate::geoip::GeoResolver;
use crate::integrate::{IntegrationQueue, Merger};
use crate::plugins::{Plugin, PluginResult};
use crate::query::{handle_query_request, EventSource, QueryRequest};
use crate::scheduler::run_state_tick;
use crate::store::StateStore;

/// Capacity of the inter-task channels.
const CHANNEL_CAPACITY: usize = 128;

/// Everything the task set needs, assembled at startup.
pub struct Service {
    pub config: Arc<Config>,
    pub store: Arc<dyn StateStore>,
    pub resolver: Arc<dyn GeoResolver>,
    pub sink: Arc<dyn AlertSink>,
    pub source: Arc<dyn EventSource>,
    pub plugins: Arc<Vec<Plugin>>,
}

impl Service {
    /// Runs the task set until SIGINT.
    pub async fn run(self) -> Result<()> {
        let (query_tx, query_rx) = mpsc::channel::<QueryRequest>(CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel::<PluginResult>(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("caught signal, attempting to exit");
                signal_cancel.cancel();
            }
        });

        let scheduler = tokio::spawn(scheduler_task(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            query_tx,
            cancel.clone(),
        ));
        let query = tokio::spawn(query_task(
            Arc::clone(&self.plugins),
            Arc::clone(&self.source),
            query_rx,
            result_tx,
            cancel.clone(),
        ));
        let integrator = tokio::spawn(integrator_task(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            Arc::clone(&self.sink),
            result_rx,
            cancel.clone(),
        ));

        scheduler.await.context("scheduler task panicked")?;
        query.await.context("query task panicked")?;
        integrator.await.context("integrator task panicked")?;
        info!("routines exited");
        Ok(())
    }
}

/// Walks the cursor forward on every state interval.
async fn scheduler_task(
    cfg: Arc<Config>,
    store: Arc<dyn StateStore>,
    queries: mpsc::Sender<QueryRequest>,
    cancel: CancellationToken,
) {
    info!("state manager started");
    loop {
        if let Err(e) = run_state_tick(store.as_ref(), &cfg, &queries).await {
            error!("state tick failed: {:#}", e);
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cfg.timer.state_interval)) => {}
            _ = cancel.cancelled() => break,
        }
    }
    info!("state manager exiting");
}

/// Consumes query requests and runs the plugin fan-out for each.
async fn query_task(
    plugins: Arc<Vec<Plugin>>,
    source: Arc<dyn EventSource>,
    mut queries: mpsc::Receiver<QueryRequest>,
    results: mpsc::Sender<PluginResult>,
    cancel: CancellationToken,
) {
    info!("query handler started");
    loop {
        tokio::select! {
            request = queries.recv() => {
                match request {
                    Some(req) => handle_query_request(&plugins, source.as_ref(), &req, &results).await,
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    info!("query handler exiting");
}

/// Feeds validated plugin results into the shared queue and owns the
/// merge timer.
async fn integrator_task(
    cfg: Arc<Config>,
    store: Arc<dyn StateStore>,
    resolver: Arc<dyn GeoResolver>,
    sink: Arc<dyn AlertSink>,
    mut results: mpsc::Receiver<PluginResult>,
    cancel: CancellationToken,
) {
    info!("integrator started");
    let queue = Arc::new(IntegrationQueue::new());
    let merger = Merger::new(store, resolver, sink);

    let merge_queue = Arc::clone(&queue);
    let merge_cfg = Arc::clone(&cfg);
    let merge_cancel = cancel.clone();
    let merge_task = tokio::spawn(async move {
        let mut timer = interval(Duration::from_secs(merge_cfg.timer.merge_interval));
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = merger.merge_queued(&merge_cfg, &merge_queue).await {
                        error!("merge tick failed: {:#}", e);
                    }
                }
                _ = merge_cancel.cancelled() => {
                    // Final drain so queued events survive a restart as
                    // state rather than being lost.
                    if let Err(e) = merger.merge_queued(&merge_cfg, &merge_queue).await {
                        error!("final merge failed: {:#}", e);
                    }
                    break;
                }
            }
        }
        info!("merger exiting");
    });

    loop {
        tokio::select! {
            result = results.recv() => {
                match result {
                    Some(r) => queue.integrate(r),
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    if let Err(e) = merge_task.await {
        warn!("merge task failed to join: {}", e);
    }
    info!("integrator exiting");
}
