//! State object data model and maintenance operations.

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::geoip::Resolution;
use crate::plugins::EventResult;

/// Computes the identifier a state document is stored under: the SHA-256
/// of `id-<context>-<name>`, hex encoded. The context namespaces the key
/// so deployments can share a store without collisions.
pub fn object_id(context: &str, name: &str) -> Result<String> {
    if name.is_empty() {
        bail!("zero length object id");
    }
    let mut hasher = Sha256::new();
    hasher.update(format!("id-{}-{}", context, name).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// A city/country pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub city: String,
    pub country: String,
}

impl Locality {
    /// Renders `"City, Country"`; empty components are invalid for
    /// display.
    pub fn assemble(&self) -> Result<String> {
        if self.city.is_empty() || self.country.is_empty() {
            bail!("unable to assemble locality with empty values");
        }
        Ok(format!("{}, {}", self.city, self.country))
    }

    /// True when either component is missing.
    pub fn is_incomplete(&self) -> bool {
        self.city.is_empty() || self.country.is_empty()
    }
}

/// Weighted centroid of a principal's branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geocenter {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(rename = "locality_details", default)]
    pub locality: Locality,
    #[serde(default)]
    pub avg_dist: f64,
    #[serde(default)]
    pub weight: f64,
}

/// One stored authentication event (a branch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectResult {
    pub source_plugin: String,
    pub branch_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "locality_details", default)]
    pub locality: Locality,
    pub source_ipv4: String,
    pub weight: f64,
    pub escalated: bool,
    pub timestamp: DateTime<Utc>,
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collapse_branch: String,

    /// Pre-split locality string from older state documents; cleared by
    /// [`PrincipalObject::upgrade_legacy`].
    #[serde(rename = "locality", default, skip_serializing_if = "String::is_empty")]
    pub old_locality: String,
}

/// Cursor payload carried only by the global state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_endpoint: Option<DateTime<Utc>>,
}

/// A state document: per-principal model state, or the global cursor.
/// Both shapes share this structure, keyed by `object_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalObject {
    pub object_id: String,
    pub object_id_string: String,
    pub context: String,
    #[serde(default)]
    pub state: ObjectState,
    #[serde(default)]
    pub results: Vec<ObjectResult>,
    #[serde(default)]
    pub geocenter: Geocenter,
    pub last_updated: DateTime<Utc>,
    pub weight_deviation: f64,
    #[serde(rename = "numcenters")]
    pub num_centers: usize,
    #[serde(rename = "utctimestamp")]
    pub timestamp: DateTime<Utc>,
}

impl PrincipalObject {
    /// Creates an empty state object for `principal` under `context`.
    pub fn new(principal: &str, context: &str) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            object_id: object_id(context, principal)?,
            object_id_string: principal.to_string(),
            context: context.to_string(),
            state: ObjectState::default(),
            results: Vec::new(),
            geocenter: Geocenter::default(),
            last_updated: now,
            weight_deviation: 0.0,
            num_centers: 0,
            timestamp: now,
        })
    }

    /// Splits any old-format locality strings (`"City, Country"`) into the
    /// structured form. A value that does not split cleanly is a data
    /// model violation and fails the merge for this principal.
    pub fn upgrade_legacy(&mut self) -> Result<()> {
        for r in &mut self.results {
            if r.old_locality.is_empty() {
                continue;
            }
            let parts: Vec<&str> = r.old_locality.split(',').collect();
            if parts.len() != 2 {
                bail!("unable to upgrade old format locality {:?}", r.old_locality);
            }
            r.locality.city = parts[0].trim().to_string();
            r.locality.country = parts[1].trim().to_string();
            r.old_locality.clear();
        }
        Ok(())
    }

    /// Appends a new branch for a validated event with its resolved
    /// locality. Rejecting an invalid event here is a programmer error
    /// guard; validation runs at the integration boundary.
    pub fn add_event(&mut self, event: &EventResult, geo: &Resolution) -> Result<()> {
        if !event.valid {
            bail!("attempt to add invalid result");
        }
        self.results.push(ObjectResult {
            source_plugin: event.name.clone(),
            branch_id: Uuid::new_v4().to_string(),
            latitude: geo.latitude,
            longitude: geo.longitude,
            locality: Locality {
                city: geo.city.clone(),
                country: geo.country.clone(),
            },
            source_ipv4: event.source_ipv4.clone(),
            weight: 1.0,
            escalated: false,
            timestamp: event.timestamp,
            collapsed: false,
            collapse_branch: String::new(),
            old_locality: String::new(),
        });
        Ok(())
    }

    /// Drops every branch older than `expire` relative to `now`.
    pub fn prune_expired(&mut self, expire: Duration, now: DateTime<Utc>) {
        let Ok(expire) = chrono::Duration::from_std(expire) else {
            // An expiry too large to represent never prunes anything.
            return;
        };
        let cutoff = now - expire;
        self.results.retain(|r| r.timestamp >= cutoff);
    }

    /// Resets every branch to a fresh, uncollapsed state so the next
    /// collapse pass starts from scratch. Escalation survives.
    pub fn flatten(&mut self) {
        for r in &mut self.results {
            r.collapsed = false;
            r.collapse_branch.clear();
            r.weight = 1.0;
        }
    }

    /// Population standard deviation of the weights of non-collapsed
    /// branches; zero when fewer than two remain.
    pub fn calculate_weight_deviation(&mut self) {
        let weights: Vec<f64> = self
            .results
            .iter()
            .filter(|r| !r.collapsed)
            .map(|r| r.weight)
            .collect();
        if weights.len() <= 1 {
            self.weight_deviation = 0.0;
            return;
        }
        let mean = weights.iter().sum::<f64>() / weights.len() as f64;
        let variance =
            weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / weights.len() as f64;
        self.weight_deviation = variance.sqrt();
    }

    /// Marks a surviving branch and everything collapsed into it as
    /// escalated.
    pub fn mark_escalated(&mut self, branch_id: &str) {
        for r in &mut self.results {
            if r.branch_id == branch_id || r.collapse_branch == branch_id {
                r.escalated = true;
            }
        }
    }
}
