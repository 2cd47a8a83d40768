//! IP locality resolution backed by a MaxMind city database.
//!
//! Resolution maps a source address to coordinates plus a city/country
//! pair. Empty names in the database are substituted with `"Unknown"`;
//! callers at the ingest boundary drop events that resolve to an unknown
//! locality. Operator-supplied overrides (custom CIDR ranges for VPN
//! egress points, office NAT blocks, and similar) are applied on top of
//! the database result.

pub mod overrides;

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use maxminddb::Reader;

pub use overrides::{load_overrides, Override};

/// Placeholder for a locality component the database could not name.
pub const UNKNOWN_LOCALITY: &str = "Unknown";

/// A resolved source address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country: String,
}

impl Resolution {
    /// True when either locality component is unresolved; such events are
    /// dropped before ingest.
    pub fn is_unknown(&self) -> bool {
        self.city == UNKNOWN_LOCALITY || self.country == UNKNOWN_LOCALITY
    }
}

/// Source of locality information for IPv4 addresses.
///
/// The production implementation reads a MaxMind database; tests provide
/// fixture implementations.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: Ipv4Addr) -> Result<Resolution>;
}

/// [`GeoResolver`] over a MaxMind GeoLite2/GeoIP2 city database.
pub struct MaxmindResolver {
    reader: Reader<Vec<u8>>,
    overrides: Vec<Override>,
}

impl MaxmindResolver {
    /// Opens the database at `path` and installs the override list.
    pub fn open(path: &Path, overrides: Vec<Override>) -> Result<Self> {
        let db_bytes = std::fs::read(path)
            .with_context(|| format!("failed to read maxmind db: {}", path.display()))?;
        let reader = Reader::from_source(db_bytes)
            .with_context(|| format!("failed to open maxmind db: {}", path.display()))?;
        info!("initialized maxmind db from {}", path.display());
        Ok(Self { reader, overrides })
    }

    fn lookup_city(&self, ip: Ipv4Addr) -> Result<Resolution> {
        let mut res = Resolution {
            city: UNKNOWN_LOCALITY.to_string(),
            country: UNKNOWN_LOCALITY.to_string(),
            ..Resolution::default()
        };

        let lookup = self
            .reader
            .lookup(IpAddr::V4(ip))
            .with_context(|| format!("maxmind lookup failed for {}", ip))?;
        if !lookup.has_data() {
            return Ok(res);
        }
        let city: maxminddb::geoip2::City = match lookup.decode() {
            Ok(Some(city)) => city,
            Ok(None) => return Ok(res),
            Err(e) => return Err(e).with_context(|| format!("maxmind decode failed for {}", ip)),
        };

        res.latitude = city.location.latitude.unwrap_or(0.0);
        res.longitude = city.location.longitude.unwrap_or(0.0);
        if let Some(name) = city.city.names.english {
            if !name.is_empty() {
                res.city = name.to_string();
            }
        }
        if let Some(name) = city.country.names.english {
            if !name.is_empty() {
                res.country = name.to_string();
            }
        }
        Ok(res)
    }
}

impl GeoResolver for MaxmindResolver {
    fn resolve(&self, ip: Ipv4Addr) -> Result<Resolution> {
        let mut res = self.lookup_city(ip)?;

        // Apply every matching override in file order; a later match wins.
        for o in &self.overrides {
            if o.cidr.contains(ip) {
                res.city = o.city.clone();
                res.country = o.country.clone();
                res.latitude = o.latitude;
                res.longitude = o.longitude;
            }
        }
        Ok(res)
    }
}
