//! Event results returned by plugins, and their validation.

use std::net::Ipv4Addr;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::geoip::overrides::Cidr;

/// Address ranges that can never produce a useful locality: the
/// unspecified address and the RFC 1918 private blocks.
static UNROUTABLE: Lazy<Vec<Cidr>> = Lazy::new(|| {
    ["0.0.0.0/32", "10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]
        .iter()
        .map(|s| Cidr::parse(s).expect("static cidr"))
        .collect()
});

/// One authentication event extracted by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResult {
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Authentication principal, typically an email address.
    pub principal: String,
    /// Source IPv4 for the authentication.
    pub source_ipv4: String,
    /// True if the plugin parsed the entry correctly.
    pub valid: bool,
    /// Name of the plugin that created the result.
    pub name: String,
}

impl EventResult {
    /// Checks structural requirements and invalidates events whose source
    /// address is unroutable.
    ///
    /// An event already marked invalid passes untouched; the integrator
    /// discards it. A valid event with a missing principal or a
    /// malformed address is a protocol violation and errors out.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.is_empty() {
            bail!("plugin result has no name");
        }
        if !self.valid {
            return Ok(());
        }
        if self.principal.is_empty() {
            bail!("plugin result has no principal value");
        }
        if self.source_ipv4.is_empty() {
            bail!("plugin result has no source_ipv4 value");
        }
        let ip = self.source_ip()?;
        if UNROUTABLE.iter().any(|net| net.contains(ip)) {
            self.valid = false;
        }
        Ok(())
    }

    /// The source address as a parsed [`Ipv4Addr`].
    pub fn source_ip(&self) -> Result<Ipv4Addr> {
        match self.source_ipv4.parse() {
            Ok(ip) => Ok(ip),
            Err(_) => bail!("source_ipv4 value {} is invalid", self.source_ipv4),
        }
    }
}

/// The document a plugin writes to stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginResult {
    pub results: Vec<EventResult>,
}

impl PluginResult {
    /// Validates every contained event.
    pub fn validate(&mut self) -> Result<()> {
        for r in &mut self.results {
            r.validate()?;
        }
        Ok(())
    }
}
