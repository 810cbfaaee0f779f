//! Per-request client classification.
//!
//! Derives the attributes recipe targeting is evaluated against. Nothing here
//! fails: an absent or unparseable address simply yields [`UNKNOWN_COUNTRY`].

use crate::config::{ClassifyConfig, CountryRange};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;

pub const UNKNOWN_COUNTRY: &str = "unknown";

// ---------------------------------------------------------------------------
// Cidr
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `addr/prefix`; a bare address is a single-host range.
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// CountryLookup
// ---------------------------------------------------------------------------

/// Maps an address to an ISO country code.
pub trait CountryLookup: Send + Sync {
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Ranges from config; the most specific matching range wins.
#[derive(Debug, Clone, Default)]
pub struct CidrCountryTable {
    ranges: Vec<(Cidr, String)>,
}

impl CidrCountryTable {
    pub fn from_config(ranges: &[CountryRange]) -> Self {
        let mut parsed: Vec<(Cidr, String)> = ranges
            .iter()
            .filter_map(|r| match Cidr::parse(&r.cidr) {
                Some(c) => Some((c, r.country.clone())),
                None => {
                    tracing::warn!(cidr = %r.cidr, "skipping invalid country range");
                    None
                }
            })
            .collect();
        parsed.sort_by(|a, b| b.0.prefix.cmp(&a.0.prefix));
        Self { ranges: parsed }
    }
}

impl CountryLookup for CidrCountryTable {
    fn country(&self, ip: IpAddr) -> Option<String> {
        self.ranges
            .iter()
            .find(|(cidr, _)| cidr.contains(ip))
            .map(|(_, country)| country.clone())
    }
}

// ---------------------------------------------------------------------------
// RequestInfo / Client
// ---------------------------------------------------------------------------

/// Raw request metadata, already pulled out of the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub peer: Option<IpAddr>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub accept_language: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub country: String,
    pub request_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct Classifier {
    lookup: Box<dyn CountryLookup>,
    trust_forwarded_for: bool,
}

impl Classifier {
    pub fn new(lookup: Box<dyn CountryLookup>, trust_forwarded_for: bool) -> Self {
        Self {
            lookup,
            trust_forwarded_for,
        }
    }

    pub fn from_config(cfg: &ClassifyConfig) -> Self {
        Self::new(
            Box::new(CidrCountryTable::from_config(&cfg.country_ranges)),
            cfg.trust_forwarded_for,
        )
    }

    /// Priority: X-Forwarded-For (first hop) > X-Real-IP > socket peer.
    /// Proxy headers are only read when trusted.
    pub fn client_ip(&self, req: &RequestInfo) -> Option<IpAddr> {
        if self.trust_forwarded_for {
            if let Some(xff) = &req.forwarded_for {
                return xff.split(',').next().and_then(|ip| ip.trim().parse().ok());
            }
            if let Some(real) = &req.real_ip {
                return real.trim().parse().ok();
            }
        }
        req.peer
    }

    pub fn classify(&self, req: &RequestInfo) -> Client {
        let country = self
            .client_ip(req)
            .and_then(|ip| self.lookup.country(ip))
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
        Client {
            country,
            request_time: Utc::now(),
            locale: req.accept_language.as_deref().and_then(primary_language),
            channel: req
                .channel
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        }
    }
}

/// First tag of an Accept-Language header, without its quality value.
fn primary_language(header: &str) -> Option<String> {
    header
        .split(',')
        .next()
        .map(|tag| tag.split(';').next().unwrap_or("").trim())
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CidrCountryTable {
        CidrCountryTable::from_config(&[
            CountryRange {
                cidr: "10.0.0.0/8".into(),
                country: "US".into(),
            },
            CountryRange {
                cidr: "10.1.0.0/16".into(),
                country: "DE".into(),
            },
            CountryRange {
                cidr: "2001:db8::/32".into(),
                country: "FR".into(),
            },
        ])
    }

    #[test]
    fn cidr_parsing() {
        assert!(Cidr::parse("192.168.0.0/16").is_some());
        assert!(Cidr::parse("192.168.0.1").is_some());
        assert!(Cidr::parse("192.168.0.0/33").is_none());
        assert!(Cidr::parse("nonsense/8").is_none());
        let all = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(all.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn most_specific_range_wins() {
        let t = table();
        assert_eq!(t.country("10.1.2.3".parse().unwrap()).as_deref(), Some("DE"));
        assert_eq!(t.country("10.9.2.3".parse().unwrap()).as_deref(), Some("US"));
        assert_eq!(t.country("2001:db8::1".parse().unwrap()).as_deref(), Some("FR"));
        assert_eq!(t.country("192.0.2.1".parse().unwrap()), None);
    }

    #[test]
    fn missing_ip_falls_back_to_unknown() {
        let c = Classifier::new(Box::new(table()), true);
        let client = c.classify(&RequestInfo::default());
        assert_eq!(client.country, UNKNOWN_COUNTRY);
    }

    #[test]
    fn garbage_forwarded_for_falls_back_to_unknown() {
        let c = Classifier::new(Box::new(table()), true);
        let client = c.classify(&RequestInfo {
            forwarded_for: Some("not-an-ip, 10.0.0.1".into()),
            ..Default::default()
        });
        assert_eq!(client.country, UNKNOWN_COUNTRY);
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let req = RequestInfo {
            peer: Some("192.0.2.1".parse().unwrap()),
            forwarded_for: Some("10.1.0.5, 172.16.0.1".into()),
            ..Default::default()
        };
        let trusted = Classifier::new(Box::new(table()), true);
        assert_eq!(trusted.classify(&req).country, "DE");
        let untrusted = Classifier::new(Box::new(table()), false);
        assert_eq!(untrusted.classify(&req).country, UNKNOWN_COUNTRY);
    }

    #[test]
    fn locale_and_channel_from_headers() {
        let c = Classifier::new(Box::new(table()), false);
        let client = c.classify(&RequestInfo {
            peer: Some("10.2.3.4".parse().unwrap()),
            accept_language: Some("de-DE;q=0.9, en;q=0.5".into()),
            channel: Some(" beta ".into()),
            ..Default::default()
        });
        assert_eq!(client.country, "US");
        assert_eq!(client.locale.as_deref(), Some("de-DE"));
        assert_eq!(client.channel.as_deref(), Some("beta"));
    }
}
