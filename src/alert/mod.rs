//! Alert payloads, summaries, and the publishing envelope.
//!
//! Two alert shapes exist: a branch alert for a newly escalated
//! geocenter (NEWLOCATION, or NEWCOUNTRY when the country changed) and a
//! movement alert for implausible travel inside the movement window. Both
//! are carried as [`AlertDetails`] variants sharing only summary
//! construction, wrapped in an [`AlertEvent`] envelope for the sink.

pub mod sink;

use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use gethostname::gethostname;
use serde::Serialize;

use crate::geo;
use crate::model::{Locality, ObjectResult, PrincipalObject};

pub use sink::{AlertSink, HttpAlertSink, NoopAlertSink};

/// Classification of a branch alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertCategory {
    #[serde(rename = "NEWLOCATION")]
    NewLocation,
    #[serde(rename = "NEWCOUNTRY")]
    NewCountry,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::NewLocation => write!(f, "NEWLOCATION"),
            AlertCategory::NewCountry => write!(f, "NEWCOUNTRY"),
        }
    }
}

/// Details for a newly escalated geocenter.
#[derive(Debug, Clone, Serialize)]
pub struct BranchAlert {
    pub principal: String,
    #[serde(rename = "locality_details")]
    pub locality: Locality,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "event_time")]
    pub timestamp: DateTime<Utc>,
    pub weight_deviation: f64,
    pub source_ipv4: String,
    pub informer: String,
    pub severity: i32,
    pub category: AlertCategory,

    #[serde(rename = "prev_locality_details")]
    pub prev_locality: Locality,
    pub prev_latitude: f64,
    pub prev_longitude: f64,
    pub prev_timestamp: DateTime<Utc>,
    pub prev_distance: f64,
}

impl BranchAlert {
    /// Fills the `prev_*` fields from the most recent branch unrelated to
    /// the alert branch: the latest result whose `branch_id` and
    /// `collapse_branch` both differ from `branch_id`. Leaves the fields
    /// zeroed when no such branch exists.
    pub fn add_previous_event(&mut self, object: &PrincipalObject, branch_id: &str) {
        let mut prev: Option<&ObjectResult> = None;
        let mut latest = DateTime::<Utc>::UNIX_EPOCH;
        for r in &object.results {
            if r.branch_id == branch_id || r.collapse_branch == branch_id {
                continue;
            }
            if r.timestamp > latest {
                latest = r.timestamp;
                prev = Some(r);
            }
        }
        let Some(r) = prev else {
            return;
        };
        self.prev_locality = r.locality.clone();
        self.prev_latitude = r.latitude;
        self.prev_longitude = r.longitude;
        self.prev_timestamp = r.timestamp;
        self.prev_distance = geo::km_between(
            self.latitude,
            self.longitude,
            self.prev_latitude,
            self.prev_longitude,
        );
    }

    /// Severity starts at 1 and increases when the previous activity came
    /// from a different country, which also reclassifies the alert as
    /// NEWCOUNTRY.
    pub fn calculate_severity(&mut self) {
        self.severity = 1;
        if !self.prev_locality.country.is_empty()
            && self.prev_locality.country != self.locality.country
        {
            self.severity += 1;
            self.category = AlertCategory::NewCountry;
        }
    }

    /// Renders the human-readable summary line. Consumers assert on this
    /// format, so it changes only deliberately.
    pub fn make_summary(&self) -> Result<String> {
        let lval = self.locality.assemble()?;
        let mut ret = format!(
            "{} {} {} access from {} ({})",
            self.principal, self.category, lval, self.source_ipv4, self.informer
        );
        ret += &format!(" [deviation:{}]", self.weight_deviation);
        if !self.prev_locality.is_incomplete() {
            let hours = (self.timestamp - self.prev_timestamp).num_milliseconds() as f64
                / (3600.0 * 1000.0);
            let since = if hours > 1.0 {
                format!("approx {:.2} hours before", hours)
            } else {
                "within hour before".to_string()
            };
            let prev_lval = self.prev_locality.assemble()?;
            ret += &format!(
                " last activity was from {} ({:.0} km away) {}",
                prev_lval, self.prev_distance, since
            );
        } else {
            ret += ", no previous locations stored in window";
        }
        Ok(ret)
    }
}

/// Details for a movement-window violation. `localities` holds the latest
/// representative of each cluster observed inside the window, ordered by
/// timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct MovementAlert {
    pub principal: String,
    pub localities: Vec<ObjectResult>,

    /// Movement window as configured, echoed into the summary.
    #[serde(skip)]
    pub window: String,
}

impl MovementAlert {
    /// Renders the summary line. Two localities use the `->` form; more
    /// are listed comma-separated.
    pub fn make_summary(&self) -> Result<String> {
        if self.localities.len() < 2 {
            bail!("movement alert requires at least two localities");
        }
        let mut rendered = Vec::with_capacity(self.localities.len());
        for r in &self.localities {
            rendered.push(format!("({})", r.locality.assemble()?));
        }
        let span = if rendered.len() == 2 {
            rendered.join(" -> ")
        } else {
            rendered.join(",")
        };
        Ok(format!(
            "{} MOVEMENT window violation {} within {} window",
            self.principal, span, self.window
        ))
    }
}

/// An alert payload of either shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AlertDetails {
    Branch(BranchAlert),
    Movement(MovementAlert),
}

impl AlertDetails {
    pub fn make_summary(&self) -> Result<String> {
        match self {
            AlertDetails::Branch(b) => b.make_summary(),
            AlertDetails::Movement(m) => m.make_summary(),
        }
    }
}

/// The envelope published to the alert sink.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub category: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "processname")]
    pub process_name: String,
    #[serde(rename = "processid")]
    pub process_id: f64,
    pub hostname: String,
    pub source: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub details: AlertDetails,
}

impl AlertEvent {
    /// Wraps `details` in the notice envelope.
    pub fn new(details: AlertDetails) -> Result<Self> {
        let summary = details.make_summary()?;
        Ok(Self {
            category: "geomodelnotice".to_string(),
            timestamp: Utc::now(),
            process_name: std::env::args().next().unwrap_or_default(),
            process_id: f64::from(std::process::id()),
            hostname: gethostname().to_string_lossy().into_owned(),
            source: "geomodel".to_string(),
            tags: vec!["geomodel".to_string()],
            summary,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_alert() -> BranchAlert {
        BranchAlert {
            principal: "user@host.com".to_string(),
            locality: Locality {
                city: "San Francisco".to_string(),
                country: "United States".to_string(),
            },
            latitude: 37.7697,
            longitude: -122.3933,
            timestamp: Utc::now(),
            weight_deviation: 0.0,
            source_ipv4: "63.245.214.133".to_string(),
            informer: "test".to_string(),
            severity: 0,
            category: AlertCategory::NewLocation,
            prev_locality: Locality::default(),
            prev_latitude: 0.0,
            prev_longitude: 0.0,
            prev_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            prev_distance: 0.0,
        }
    }

    #[test]
    fn test_summary_without_previous_event() {
        let mut ad = branch_alert();
        ad.calculate_severity();
        assert_eq!(ad.severity, 1);
        assert_eq!(ad.category, AlertCategory::NewLocation);
        assert_eq!(
            ad.make_summary().unwrap(),
            "user@host.com NEWLOCATION San Francisco, United States access from \
             63.245.214.133 (test) [deviation:0], no previous locations stored in window"
        );
    }

    #[test]
    fn test_summary_with_previous_event_same_country() {
        let mut ad = branch_alert();
        ad.locality = Locality {
            city: "Portland".to_string(),
            country: "United States".to_string(),
        };
        ad.latitude = 45.5235;
        ad.longitude = -122.675;
        ad.source_ipv4 = "207.126.102.129".to_string();
        ad.weight_deviation = 5.0;
        ad.prev_locality = Locality {
            city: "San Francisco".to_string(),
            country: "United States".to_string(),
        };
        ad.prev_latitude = 37.7697;
        ad.prev_longitude = -122.3933;
        ad.prev_timestamp = ad.timestamp - chrono::Duration::minutes(30);
        ad.prev_distance =
            geo::km_between(ad.latitude, ad.longitude, ad.prev_latitude, ad.prev_longitude);
        ad.calculate_severity();

        assert_eq!(ad.severity, 1);
        assert_eq!(ad.category, AlertCategory::NewLocation);
        assert_eq!(
            ad.make_summary().unwrap(),
            "user@host.com NEWLOCATION Portland, United States access from \
             207.126.102.129 (test) [deviation:5] last activity was from \
             San Francisco, United States (863 km away) within hour before"
        );
    }

    #[test]
    fn test_summary_with_country_change_and_hours() {
        let mut ad = branch_alert();
        ad.locality = Locality {
            city: "Taipei".to_string(),
            country: "Taiwan".to_string(),
        };
        ad.latitude = 25.0631;
        ad.longitude = 121.5326;
        ad.source_ipv4 = "118.163.10.187".to_string();
        ad.weight_deviation = 12.5;
        ad.prev_locality = Locality {
            city: "San Francisco".to_string(),
            country: "United States".to_string(),
        };
        ad.prev_latitude = 37.7697;
        ad.prev_longitude = -122.3933;
        ad.prev_timestamp = ad.timestamp - chrono::Duration::minutes(150);
        ad.prev_distance =
            geo::km_between(ad.latitude, ad.longitude, ad.prev_latitude, ad.prev_longitude);
        ad.calculate_severity();

        assert_eq!(ad.severity, 2);
        assert_eq!(ad.category, AlertCategory::NewCountry);
        assert_eq!(
            ad.make_summary().unwrap(),
            "user@host.com NEWCOUNTRY Taipei, Taiwan access from \
             118.163.10.187 (test) [deviation:12.5] last activity was from \
             San Francisco, United States (10371 km away) approx 2.50 hours before"
        );
    }

    #[test]
    fn test_summary_requires_locality() {
        let mut ad = branch_alert();
        ad.locality = Locality::default();
        assert!(ad.make_summary().is_err());
    }

    fn movement_locality(city: &str, country: &str, ts: DateTime<Utc>) -> ObjectResult {
        ObjectResult {
            source_plugin: "test".to_string(),
            branch_id: "b".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            locality: Locality {
                city: city.to_string(),
                country: country.to_string(),
            },
            source_ipv4: "192.0.2.1".to_string(),
            weight: 1.0,
            escalated: false,
            timestamp: ts,
            collapsed: false,
            collapse_branch: String::new(),
            old_locality: String::new(),
        }
    }

    #[test]
    fn test_movement_summary_two_localities() {
        let now = Utc::now();
        let ad = MovementAlert {
            principal: "user@host.com".to_string(),
            localities: vec![
                movement_locality("Taipei", "Taiwan", now - chrono::Duration::minutes(5)),
                movement_locality("San Francisco", "United States", now),
            ],
            window: "4h".to_string(),
        };
        assert_eq!(
            ad.make_summary().unwrap(),
            "user@host.com MOVEMENT window violation (Taipei, Taiwan) -> \
             (San Francisco, United States) within 4h window"
        );
    }

    #[test]
    fn test_movement_summary_three_localities() {
        let now = Utc::now();
        let ad = MovementAlert {
            principal: "user@host.com".to_string(),
            localities: vec![
                movement_locality("Taipei", "Taiwan", now),
                movement_locality("Portland", "United States", now),
                movement_locality("San Francisco", "United States", now),
            ],
            window: "4h".to_string(),
        };
        assert_eq!(
            ad.make_summary().unwrap(),
            "user@host.com MOVEMENT window violation (Taipei, Taiwan),\
             (Portland, United States),(San Francisco, United States) within 4h window"
        );
    }

    #[test]
    fn test_movement_summary_requires_two() {
        let ad = MovementAlert {
            principal: "user@host.com".to_string(),
            localities: vec![movement_locality("Taipei", "Taiwan", Utc::now())],
            window: "4h".to_string(),
        };
        assert!(ad.make_summary().is_err());
    }

    #[test]
    fn test_envelope_carries_notice_fields() {
        let mut ad = branch_alert();
        ad.calculate_severity();
        let event = AlertEvent::new(AlertDetails::Branch(ad)).unwrap();
        assert_eq!(event.category, "geomodelnotice");
        assert_eq!(event.source, "geomodel");
        assert_eq!(event.tags, vec!["geomodel".to_string()]);
        assert!(event.summary.contains("NEWLOCATION"));

        let encoded = serde_json::to_value(&event).unwrap();
        assert!(encoded.get("processname").is_some());
        assert!(encoded.get("processid").is_some());
        assert_eq!(encoded["details"]["category"], "NEWLOCATION");
    }
}
