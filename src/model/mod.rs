//! Per-principal state model.
//!
//! A principal's state is a list of branches (one per retained
//! authentication event), a weighted geocenter, and the statistics the
//! analyzers derive from them. [`object`] holds the data model and basic
//! maintenance, [`collapse`] the proximity clustering, and [`analyze`] the
//! two anomaly heuristics.

mod analyze;
mod collapse;
mod object;

pub use object::{object_id, Geocenter, Locality, ObjectResult, ObjectState, PrincipalObject};
