//! Proximity collapse: single-link clustering of branches by radius.

use crate::geo::{self, WeightedPoint};
use crate::model::{Geocenter, PrincipalObject};

impl PrincipalObject {
    /// Collapses every branch within `collapse_maximum` km of an earlier
    /// surviving branch into that survivor.
    ///
    /// Iteration is insertion order over `results`, which makes the
    /// outcome deterministic: a pair within radius collapses into
    /// whichever member is visited first. Escalation propagates across
    /// the link in both directions. Survivor weight counts the branch
    /// itself plus everything absorbed into it.
    pub fn collapse(&mut self, collapse_maximum: u32) {
        for i in 0..self.results.len() {
            if self.results[i].collapsed {
                continue;
            }
            let branch_id = self.results[i].branch_id.clone();
            let (lat, lon) = (self.results[i].latitude, self.results[i].longitude);
            let mut escalated = self.results[i].escalated;
            let mut absorbed = 0.0;

            for j in 0..self.results.len() {
                if self.results[j].branch_id == branch_id {
                    continue;
                }
                let dist =
                    geo::km_between(lat, lon, self.results[j].latitude, self.results[j].longitude);
                if dist > f64::from(collapse_maximum) {
                    continue;
                }
                self.results[j].collapsed = true;
                self.results[j].collapse_branch = branch_id.clone();
                // Escalation crosses the link either way.
                if escalated {
                    self.results[j].escalated = true;
                } else if self.results[j].escalated {
                    escalated = true;
                }
                absorbed += 1.0;
            }

            self.results[i].escalated = escalated;
            self.results[i].weight += absorbed;
        }

        self.num_centers = self.results.iter().filter(|r| !r.collapsed).count();
    }

    /// Recomputes the weighted geocenter over all branches.
    pub fn update_geocenter(&mut self) {
        let points: Vec<WeightedPoint> = self
            .results
            .iter()
            .map(|r| WeightedPoint {
                latitude: r.latitude,
                longitude: r.longitude,
                weight: r.weight,
            })
            .collect();
        let solution = geo::find_geocenter(&points);
        self.geocenter = Geocenter {
            latitude: solution.latitude,
            longitude: solution.longitude,
            locality: Default::default(),
            avg_dist: solution.avg_dist,
            weight: solution.weight,
        };
    }
}

#[cfg(test)]
mod tests {
    use crate::geoip::Resolution;
    use crate::model::PrincipalObject;
    use crate::plugins::EventResult;
    use chrono::Utc;

    const SAN_FRANCISCO: (f64, f64) = (37.7697, -122.3933);
    const TAIPEI: (f64, f64) = (25.0631, 121.5326);
    const PORTLAND: (f64, f64) = (45.5235, -122.675);

    fn add(obj: &mut PrincipalObject, coords: (f64, f64), city: &str, country: &str, n: usize) {
        for _ in 0..n {
            let e = EventResult {
                timestamp: Utc::now(),
                principal: "user@host.com".to_string(),
                source_ipv4: "63.245.214.133".to_string(),
                valid: true,
                name: "test".to_string(),
            };
            let res = Resolution {
                latitude: coords.0,
                longitude: coords.1,
                city: city.to_string(),
                country: country.to_string(),
            };
            obj.add_event(&e, &res).unwrap();
        }
    }

    fn object() -> PrincipalObject {
        PrincipalObject::new("user@host.com", "ctx").unwrap()
    }

    #[test]
    fn test_collapse_single_cluster() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 5);
        obj.flatten();
        obj.collapse(500);

        assert_eq!(obj.num_centers, 1);
        let survivors: Vec<_> = obj.results.iter().filter(|r| !r.collapsed).collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].weight, 5.0);
        // First branch in insertion order wins.
        assert_eq!(survivors[0].branch_id, obj.results[0].branch_id);
    }

    #[test]
    fn test_collapse_two_clusters() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 3);
        add(&mut obj, TAIPEI, "Taipei", "Taiwan", 2);
        obj.flatten();
        obj.collapse(500);

        assert_eq!(obj.num_centers, 2);
        let weights: Vec<f64> = obj
            .results
            .iter()
            .filter(|r| !r.collapsed)
            .map(|r| r.weight)
            .collect();
        assert_eq!(weights, vec![3.0, 2.0]);
    }

    #[test]
    fn test_collapse_weight_sum_matches_event_count() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 7);
        add(&mut obj, TAIPEI, "Taipei", "Taiwan", 4);
        add(&mut obj, PORTLAND, "Portland", "United States", 2);
        obj.flatten();
        obj.collapse(500);

        let total: f64 = obj
            .results
            .iter()
            .filter(|r| !r.collapsed)
            .map(|r| r.weight)
            .sum();
        assert_eq!(total, obj.results.len() as f64);
    }

    #[test]
    fn test_collapse_branch_points_at_survivor() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 4);
        obj.flatten();
        obj.collapse(500);

        let survivor = obj
            .results
            .iter()
            .find(|r| !r.collapsed)
            .map(|r| r.branch_id.clone())
            .unwrap();
        for r in obj.results.iter().filter(|r| r.collapsed) {
            assert_eq!(r.collapse_branch, survivor);
        }
    }

    #[test]
    fn test_collapse_no_adjacent_survivors() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 3);
        add(&mut obj, PORTLAND, "Portland", "United States", 3);
        obj.flatten();
        obj.collapse(500);

        // San Francisco and Portland sit 863 km apart, beyond the 500 km
        // radius, so both survive.
        let survivors: Vec<_> = obj.results.iter().filter(|r| !r.collapsed).collect();
        assert_eq!(survivors.len(), 2);
        let d = crate::geo::km_between(
            survivors[0].latitude,
            survivors[0].longitude,
            survivors[1].latitude,
            survivors[1].longitude,
        );
        assert!(d > 500.0);
    }

    #[test]
    fn test_collapse_escalation_propagates_to_absorbed() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 3);
        obj.results[0].escalated = true;
        obj.flatten();
        obj.collapse(500);
        assert!(obj.results.iter().all(|r| r.escalated));
    }

    #[test]
    fn test_collapse_escalation_propagates_to_survivor() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 3);
        // A branch that will be absorbed carries the escalation.
        obj.results[2].escalated = true;
        obj.flatten();
        obj.collapse(500);
        assert!(obj.results.iter().all(|r| r.escalated));
    }

    #[test]
    fn test_flatten_collapse_is_idempotent() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 6);
        add(&mut obj, TAIPEI, "Taipei", "Taiwan", 3);

        obj.flatten();
        obj.collapse(500);
        let first: Vec<(bool, String, f64)> = obj
            .results
            .iter()
            .map(|r| (r.collapsed, r.collapse_branch.clone(), r.weight))
            .collect();

        obj.flatten();
        obj.collapse(500);
        let second: Vec<(bool, String, f64)> = obj
            .results
            .iter()
            .map(|r| (r.collapsed, r.collapse_branch.clone(), r.weight))
            .collect();

        assert_eq!(first, second);
        assert_eq!(obj.num_centers, 2);
    }

    #[test]
    fn test_update_geocenter_tracks_dominant_cluster() {
        let mut obj = object();
        add(&mut obj, SAN_FRANCISCO, "San Francisco", "United States", 10);
        add(&mut obj, PORTLAND, "Portland", "United States", 1);
        obj.flatten();
        obj.collapse(500);
        obj.update_geocenter();

        let to_sf = crate::geo::km_between(
            obj.geocenter.latitude,
            obj.geocenter.longitude,
            SAN_FRANCISCO.0,
            SAN_FRANCISCO.1,
        );
        let to_pdx = crate::geo::km_between(
            obj.geocenter.latitude,
            obj.geocenter.longitude,
            PORTLAND.0,
            PORTLAND.1,
        );
        assert!(to_sf < to_pdx);
        assert!(obj.geocenter.weight > 0.0);
    }

    #[test]
    fn test_update_geocenter_empty_results() {
        let mut obj = object();
        obj.update_geocenter();
        assert_eq!(obj.geocenter.weight, 0.0);
        assert_eq!(obj.geocenter.latitude, 0.0);
    }
}
