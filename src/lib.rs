//! geomodel library: geographic anomaly detection for authentication
//! telemetry.
//!
//! For each authenticating principal the system maintains a rolling model
//! of where that principal has recently logged in from, built from events
//! extracted by external plugins. New geographic clusters raise
//! NEWLOCATION/NEWCOUNTRY alerts; two well-separated clusters inside a
//! short wall-clock window raise MOVEMENT alerts.
//!
//! The pipeline is interval-driven: a scheduler walks a persistent cursor
//! forward in bounded windows, a query task fans each window out to the
//! plugins, and the integrator queues validated events for the merger,
//! which applies one transaction per principal against the state store.
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

pub mod alert;
pub mod config;
pub mod geo;
pub mod geoip;
pub mod integrate;
pub mod model;
pub mod plugins;
pub mod query;
pub mod scheduler;
pub mod service;
pub mod store;

// Re-export the types a deployment wires together.
pub use alert::{AlertSink, HttpAlertSink, NoopAlertSink};
pub use config::Config;
pub use geoip::{GeoResolver, MaxmindResolver};
pub use integrate::{IntegrationQueue, Merger};
pub use query::{EventSource, HttpEventSource};
pub use service::Service;
pub use store::{HttpStateStore, MemoryStateStore, StateStore};
