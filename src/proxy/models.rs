//! Proxy catalog data models

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Age after which a catalog must be harvested again
pub const STALE_AFTER_HOURS: i64 = 24;

/// Proxy type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProxyType {
    Http,
    Https,
    Socks4,
    #[default]
    Socks5,
}

impl ProxyType {
    /// URL scheme handed to the HTTP client's proxy support
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            // Target names are resolved locally, not through the proxy
            ProxyType::Socks5 => "socks5",
        }
    }

    /// Parse the free-text type column of a listing, e.g. "SOCKS5"
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "http" => Some(ProxyType::Http),
            "https" => Some(ProxyType::Https),
            "socks4" => Some(ProxyType::Socks4),
            "socks5" => Some(ProxyType::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

/// One harvested proxy entry, serialized with the snapshot's field names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    #[serde(rename = "anonymous", default)]
    pub anonymity_level: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "type", default)]
    pub proxy_type: String,
    #[serde(default)]
    pub uptime: String,
    /// `host:port`, unique within a country's list
    #[serde(rename = "proxy")]
    pub address: String,
}

impl ProxyRecord {
    /// Create a record with only an address, the remaining columns left blank
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            anonymity_level: String::new(),
            region: String::new(),
            proxy_type: ProxyType::Socks5.to_string(),
            uptime: String::new(),
            address: address.into(),
        }
    }

    /// Split the address into host and port
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let (host, port) = self.address.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        (port != 0).then_some((host, port))
    }

    /// The declared proxy type, falling back to SOCKS5 for unknown labels
    pub fn declared_type(&self) -> ProxyType {
        ProxyType::from_label(&self.proxy_type).unwrap_or_default()
    }

    /// Get the proxy URL string, e.g. `socks5://1.2.3.4:1080`
    pub fn url(&self) -> Option<String> {
        let (host, port) = self.host_port()?;
        Some(format!("{}://{}:{}", self.declared_type().scheme(), host, port))
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Proxies of a single country, grouped by protocol family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryProxies {
    #[serde(default)]
    pub socks5: Vec<ProxyRecord>,
}

/// Known countries keyed by `"<Name>/<CODE>"`, mapped to the listing's proxy count.
///
/// Entries keep the order in which the listing presented them, which is also the
/// order a harvest walks the countries in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryDirectory {
    entries: IndexMap<String, String>,
}

impl CountryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, keeping first-seen order
    pub fn insert(&mut self, name: &str, code: &str, count: impl Into<String>) {
        self.entries.insert(format!("{}/{}", name, code), count.into());
    }

    /// Remove every entry whose key ends in `/<code>`
    pub fn remove_code(&mut self, code: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|key, _| code_of(key) != Some(code));
        before != self.entries.len()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.keys().any(|key| code_of(key) == Some(code))
    }

    /// Country codes in directory order
    pub fn codes(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|key| code_of(key).map(str::to_string))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn code_of(key: &str) -> Option<&str> {
    key.rsplit_once('/').map(|(_, code)| code)
}

/// The persisted proxy dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Epoch millis of the last harvest
    #[serde(rename = "timeStamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "country", default)]
    pub directory: CountryDirectory,
    #[serde(rename = "proxies", default)]
    pub proxies: BTreeMap<String, CountryProxies>,
}

impl Catalog {
    /// Create an empty catalog stamped with the given harvest time
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(now.timestamp_millis()),
            ..Default::default()
        }
    }

    /// Whether the catalog has to be harvested again.
    ///
    /// True when no timestamp is recorded or at least 24 hours have passed since it.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.timestamp {
            None => true,
            Some(ts) => now.timestamp_millis() - ts >= Duration::hours(STALE_AFTER_HOURS).num_milliseconds(),
        }
    }

    /// Harvest time as a date, if recorded
    pub fn harvested_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::from_timestamp_millis)
    }

    /// Records of a country, empty if the country is unknown
    pub fn records(&self, code: &str) -> &[ProxyRecord] {
        self.proxies
            .get(code)
            .map(|p| p.socks5.as_slice())
            .unwrap_or_default()
    }

    /// Append a page of records to a country, skipping addresses already present.
    ///
    /// Returns the number of records actually added. A page that adds nothing leaves
    /// the catalog untouched, so no empty country list is ever created.
    pub fn append(&mut self, code: &str, records: Vec<ProxyRecord>) -> usize {
        let mut added = 0;
        for record in records {
            let list = &mut self.proxies.entry(code.to_string()).or_default().socks5;
            if list.iter().any(|r| r.address == record.address) {
                continue;
            }
            list.push(record);
            added += 1;
        }
        if self.proxies.get(code).is_some_and(|p| p.socks5.is_empty()) {
            self.proxies.remove(code);
        }
        added
    }

    /// Keep only the records whose slot in `alive` is true, preserving order.
    ///
    /// Returns the number of records kept. A country left empty is pruned.
    pub fn retain_alive(&mut self, code: &str, alive: &[bool]) -> usize {
        let Some(country) = self.proxies.get_mut(code) else {
            return 0;
        };
        let mut mask = alive.iter();
        country
            .socks5
            .retain(|_| mask.next().copied().unwrap_or(false));
        let kept = country.socks5.len();
        self.prune_if_empty(code);
        kept
    }

    /// Remove a country from both collections when it has no records left
    pub fn prune_if_empty(&mut self, code: &str) -> bool {
        if !self.records(code).is_empty() {
            return false;
        }
        let had_list = self.proxies.remove(code).is_some();
        let had_entry = self.directory.remove_code(code);
        had_list || had_entry
    }

    /// Prune every country without records from both collections
    pub fn prune_empty_countries(&mut self) -> Vec<String> {
        let mut codes = self.directory.codes();
        codes.extend(self.proxies.keys().cloned());
        codes.sort();
        codes.dedup();
        codes
            .into_iter()
            .filter(|code| self.prune_if_empty(code))
            .collect()
    }

    /// Drop record lists of countries the directory does not list
    pub fn drop_unlisted(&mut self) -> Vec<String> {
        let listed = self.directory.codes();
        let unlisted: Vec<String> = self
            .proxies
            .keys()
            .filter(|code| !listed.contains(code))
            .cloned()
            .collect();
        for code in &unlisted {
            self.proxies.remove(code);
        }
        unlisted
    }

    /// Country codes that currently have records
    pub fn country_codes(&self) -> Vec<String> {
        self.proxies.keys().cloned().collect()
    }

    /// Every record across all countries, in country order
    pub fn all_records(&self) -> Vec<&ProxyRecord> {
        self.proxies.values().flat_map(|p| p.socks5.iter()).collect()
    }

    pub fn total_records(&self) -> usize {
        self.proxies.values().map(|p| p.socks5.len()).sum()
    }
}
