//! Integration queue and the per-principal merger.
//!
//! Plugin results land in a mutex-guarded FIFO. On each merge tick the
//! queue is drained, grouped by principal (preserving each principal's
//! enqueue order), and one merge transaction runs per principal: read,
//! ingest, prune, re-cluster, analyze, write. A failure in one
//! principal's transaction is logged and does not disturb the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::alert::{AlertEvent, AlertSink};
use crate::config::Config;
use crate::geoip::GeoResolver;
use crate::model::{object_id, PrincipalObject};
use crate::plugins::{EventResult, PluginResult};
use crate::store::StateStore;

/// FIFO of validated events awaiting a merge.
#[derive(Default)]
pub struct IntegrationQueue {
    events: Mutex<Vec<EventResult>>,
}

impl IntegrationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every valid event from a plugin result. Invalid events
    /// (private source ranges, entries the plugin could not parse) are
    /// dropped here; this is normal operation, not an error.
    pub fn integrate(&self, result: PluginResult) {
        let mut queue = self.events.lock().unwrap();
        for event in result.results {
            if !event.valid {
                continue;
            }
            queue.push(event);
        }
    }

    /// Removes and returns everything queued, preserving order.
    pub fn drain(&self) -> Vec<EventResult> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies queued events to per-principal state.
pub struct Merger {
    store: Arc<dyn StateStore>,
    resolver: Arc<dyn GeoResolver>,
    sink: Arc<dyn AlertSink>,
}

impl Merger {
    pub fn new(
        store: Arc<dyn StateStore>,
        resolver: Arc<dyn GeoResolver>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            resolver,
            sink,
        }
    }

    /// Drains the queue and merges each principal's bucket. Callable
    /// directly for synchronous testing; the merge task calls it on a
    /// timer.
    pub async fn merge_queued(&self, cfg: &Config, queue: &IntegrationQueue) -> Result<()> {
        let drained = queue.drain();
        if drained.is_empty() {
            return Ok(());
        }
        debug!("merging {} queued events", drained.len());

        // Group by principal; bucket order follows first appearance.
        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<EventResult>> = HashMap::new();
        for event in drained {
            if !buckets.contains_key(&event.principal) {
                order.push(event.principal.clone());
            }
            buckets.entry(event.principal.clone()).or_default().push(event);
        }

        for principal in order {
            let events = buckets.remove(&principal).unwrap_or_default();
            if let Err(e) = self.merge_principal(cfg, &principal, events).await {
                error!("merge failed for {}: {:#}", principal, e);
            }
        }
        Ok(())
    }

    /// One merge transaction for one principal.
    async fn merge_principal(
        &self,
        cfg: &Config,
        principal: &str,
        events: Vec<EventResult>,
    ) -> Result<()> {
        let now = Utc::now();
        let oid = object_id(&cfg.general.context, principal)?;

        let mut object = match self.store.read(&oid).await? {
            Some(o) => o,
            None => {
                info!("creating new state entry for {}", principal);
                PrincipalObject::new(principal, &cfg.general.context)?
            }
        };
        object.upgrade_legacy()?;

        for event in &events {
            let ip = event.source_ip()?;
            let resolution = self
                .resolver
                .resolve(ip)
                .with_context(|| format!("failed to resolve {}", event.source_ipv4))?;
            if resolution.is_unknown() {
                debug!(
                    "dropping event for {} from {}: unresolved locality",
                    principal, event.source_ipv4
                );
                continue;
            }
            object.add_event(event, &resolution)?;
        }

        object.prune_expired(cfg.expire_events()?, now);
        object.flatten();
        object.collapse(cfg.geo.collapse_maximum);
        object.update_geocenter();
        let alerts = object.alert_analyze(&cfg.geo, now)?;
        object.last_updated = now;
        object.timestamp = now;

        self.store.write(&object).await?;

        for details in alerts {
            let event = AlertEvent::new(details)?;
            if let Err(e) = self.sink.emit(&event).await {
                warn!("failed to send alert for {}: {:#}", principal, e);
            }
        }
        Ok(())
    }
}
