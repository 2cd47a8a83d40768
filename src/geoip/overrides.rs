//! Operator locality overrides.
//!
//! The override file maps CIDR ranges to a fixed locality, one entry per
//! line: `cidr,city,country,latitude,longitude`. Lines starting with `#`
//! are comments. Overrides are applied in file order on top of the
//! database result.

use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::warn;

/// An IPv4 network in prefix notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    /// Parses `a.b.c.d/n` notation.
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, p),
            None => bail!("cidr {:?} missing prefix length", s),
        };
        let addr: Ipv4Addr = addr
            .parse()
            .with_context(|| format!("invalid cidr address in {:?}", s))?;
        let prefix: u8 = prefix
            .parse()
            .with_context(|| format!("invalid cidr prefix in {:?}", s))?;
        if prefix > 32 {
            bail!("cidr prefix {} out of range in {:?}", prefix, s);
        }
        Ok(Self { addr, prefix })
    }

    /// True when `ip` falls inside this network.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        };
        (u32::from(ip) & mask) == (u32::from(self.addr) & mask)
    }
}

/// A single locality override entry.
#[derive(Debug, Clone)]
pub struct Override {
    pub cidr: Cidr,
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

fn parse_line(line: &str) -> Result<Override> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 5 {
        bail!("expected 5 fields, got {}", fields.len());
    }
    Ok(Override {
        cidr: Cidr::parse(fields[0].trim())?,
        city: fields[1].trim().to_string(),
        country: fields[2].trim().to_string(),
        latitude: fields[3].trim().parse().context("invalid latitude")?,
        longitude: fields[4].trim().parse().context("invalid longitude")?,
    })
}

/// Loads the override list from `path`. Malformed lines are logged and
/// skipped so one typo does not take the resolver down.
pub fn load_overrides(path: &Path) -> Result<Vec<Override>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read overrides file: {}", path.display()))?;
    let mut overrides = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(o) => overrides.push(o),
            Err(e) => warn!(
                "skipping override at {}:{}: {}",
                path.display(),
                lineno + 1,
                e
            ),
        }
    }
    Ok(overrides)
}
