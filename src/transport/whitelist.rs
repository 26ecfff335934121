//! # Connection Whitelist
//!
//! Admission control for incoming sockets. A peer is admitted when either
//! - its address is private (loopback, RFC 1918, link-local, unique-local), whatever its port, or
//! - its exact `(ip, port)` pair is listed.
//!
//! Entries come from configuration: inline TOML, the `WHITELIST` environment variable
//! (`ip:port,ip:port`), or a JSON file holding `[{"ip": "...", "port": ...}]`.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// One allowed `(ip, port)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub ip: IpAddr,
    pub port: u16,
}

impl WhitelistEntry {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
        }
    }

    fn matches(&self, peer: &SocketAddr) -> bool {
        self.ip.to_canonical() == peer.ip().to_canonical() && self.port == peer.port()
    }
}

/// Immutable set of allowed peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    pub fn new(entries: Vec<WhitelistEntry>) -> Self {
        Self { entries }
    }

    /// Parse the `ip:port,ip:port` list format. Blank items are skipped.
    pub fn parse_list(list: &str) -> Result<Vec<WhitelistEntry>> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_entry)
            .collect()
    }

    /// Parse a JSON array of `{ "ip": ..., "port": ... }` objects.
    pub fn parse_json(content: &str) -> Result<Vec<WhitelistEntry>> {
        serde_json::from_str::<Vec<WhitelistEntry>>(content)
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|entry| WhitelistEntry::new(entry.ip, entry.port))
                    .collect()
            })
            .map_err(|e| RelayError::ConfigError(format!("Invalid whitelist JSON: {e}")))
    }

    /// Read a JSON whitelist file.
    pub fn load_json_file<P: AsRef<Path>>(path: P) -> Result<Vec<WhitelistEntry>> {
        let content = fs::read_to_string(&path).map_err(|e| {
            RelayError::ConfigError(format!(
                "Failed to read whitelist file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse_json(&content)
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a connection from `peer` may be admitted.
    pub fn permits(&self, peer: &SocketAddr) -> bool {
        is_private(peer.ip()) || self.entries.iter().any(|entry| entry.matches(peer))
    }
}

fn parse_entry(item: &str) -> Result<WhitelistEntry> {
    if let Ok(addr) = item.parse::<SocketAddr>() {
        return Ok(WhitelistEntry::new(addr.ip(), addr.port()));
    }

    let (ip, port) = item
        .rsplit_once(':')
        .ok_or_else(|| RelayError::ConfigError(format!("invalid format (need ip:port): {item}")))?;

    let ip = ip
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map_err(|_| RelayError::ConfigError(format!("invalid ip: {ip}")))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| RelayError::ConfigError(format!("invalid port: {port}")))?;

    Ok(WhitelistEntry::new(ip, port))
}

/// Private, loopback and link-local ranges that bypass the whitelist.
pub fn is_private(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
