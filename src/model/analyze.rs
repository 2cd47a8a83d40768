//! Anomaly analysis over a principal's state.
//!
//! `analyze_new_center` escalates branches that survived collapse without
//! having alerted before. `analyze_usage_within_window` implements the
//! movement heuristic: the latest representative of each cluster inside
//! the window, alerted when the maximum pairwise separation exceeds the
//! movement distance.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::alert::{AlertCategory, AlertDetails, BranchAlert, MovementAlert};
use crate::config::GeoConfig;
use crate::geo;
use crate::model::{Locality, ObjectResult, PrincipalObject};

impl PrincipalObject {
    /// Builds the base branch alert for a surviving branch. The `prev_*`
    /// fields and severity are filled by the caller via
    /// [`BranchAlert::add_previous_event`] and
    /// [`BranchAlert::calculate_severity`].
    pub fn create_alert_details_branch(&self, branch_id: &str) -> Result<BranchAlert> {
        let branch = self
            .results
            .iter()
            .find(|r| !r.collapsed && r.branch_id == branch_id)
            .context("no such branch for alert")?;
        if branch.locality.is_incomplete() {
            bail!("unable to create alert with no locality information");
        }
        Ok(BranchAlert {
            principal: self.object_id_string.clone(),
            locality: branch.locality.clone(),
            latitude: branch.latitude,
            longitude: branch.longitude,
            timestamp: branch.timestamp,
            weight_deviation: self.weight_deviation,
            source_ipv4: branch.source_ipv4.clone(),
            informer: branch.source_plugin.clone(),
            severity: 0,
            category: AlertCategory::NewLocation,
            prev_locality: Locality::default(),
            prev_latitude: 0.0,
            prev_longitude: 0.0,
            prev_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            prev_distance: 0.0,
        })
    }

    /// Escalates every surviving branch that has not alerted before and
    /// returns the corresponding branch alerts.
    pub fn analyze_new_center(&mut self) -> Result<Vec<AlertDetails>> {
        self.calculate_weight_deviation();
        let mut alerts = Vec::new();
        for i in 0..self.results.len() {
            if self.results[i].collapsed || self.results[i].escalated {
                continue;
            }
            let lval = self.results[i].locality.assemble()?;
            info!("new geocenter for {} ({})", self.object_id_string, lval);
            let branch_id = self.results[i].branch_id.clone();
            let mut ad = self.create_alert_details_branch(&branch_id)?;
            ad.add_previous_event(self, &branch_id);
            ad.calculate_severity();
            self.mark_escalated(&branch_id);
            alerts.push(AlertDetails::Branch(ad));
        }
        Ok(alerts)
    }

    /// Movement heuristic: keeps the latest result per cluster inside the
    /// window and returns them (ordered by timestamp) when the maximum
    /// pairwise separation reaches `distance_km`. An empty return means
    /// no violation.
    pub fn analyze_usage_within_window(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        distance_km: u32,
    ) -> Result<Vec<ObjectResult>> {
        let cutoff = now
            - chrono::Duration::from_std(window).context("movement window out of range")?;

        // Latest representative per cluster; collapsed branches belong to
        // their collapse target's cluster.
        let mut latest: HashMap<&str, &ObjectResult> = HashMap::new();
        for r in &self.results {
            if r.timestamp < cutoff {
                continue;
            }
            let key = if r.collapsed {
                r.collapse_branch.as_str()
            } else {
                r.branch_id.as_str()
            };
            match latest.get(key) {
                Some(current) if current.timestamp >= r.timestamp => {}
                _ => {
                    latest.insert(key, r);
                }
            }
        }

        let mut reps: Vec<ObjectResult> = latest.into_values().cloned().collect();
        reps.sort_by_key(|r| r.timestamp);

        let mut max_dist = 0.0f64;
        for i in 0..reps.len() {
            for j in (i + 1)..reps.len() {
                let d = geo::km_between(
                    reps[i].latitude,
                    reps[i].longitude,
                    reps[j].latitude,
                    reps[j].longitude,
                );
                if d > max_dist {
                    max_dist = d;
                }
            }
        }
        if max_dist < f64::from(distance_km) {
            return Ok(Vec::new());
        }
        Ok(reps)
    }

    /// Wraps movement representatives into an alert payload.
    pub fn create_alert_details_movement(
        &self,
        localities: Vec<ObjectResult>,
        window: &str,
    ) -> Result<MovementAlert> {
        if localities.len() < 2 {
            bail!("movement alert requires at least two localities");
        }
        Ok(MovementAlert {
            principal: self.object_id_string.clone(),
            localities,
            window: window.to_string(),
        })
    }

    /// Runs both analyzers in order. New-center escalation mutates the
    /// object first so the movement pass sees current state.
    pub fn alert_analyze(
        &mut self,
        geo_cfg: &GeoConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertDetails>> {
        let mut alerts = self.analyze_new_center()?;

        let window = crate::config::duration::parse(&geo_cfg.movement_window)?;
        let reps = self.analyze_usage_within_window(now, window, geo_cfg.movement_distance)?;
        if !reps.is_empty() {
            info!(
                "movement window violation for {} ({} localities)",
                self.object_id_string,
                reps.len()
            );
            let ad = self.create_alert_details_movement(reps, &geo_cfg.movement_window)?;
            alerts.push(AlertDetails::Movement(ad));
        }
        Ok(alerts)
    }
}
