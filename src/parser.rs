//! Parsers for switch `show` command output.
//!
//! Every parser is tolerant: lines that do not match the expected layout are
//! skipped, so empty or garbled output yields fewer records (or none) and
//! never an error. When the same address appears more than once, lookups
//! return the first matching record.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `show ip arp`:
/// `Internet  192.168.1.50  3  0011.2233.4455  ARPA  Vlan1`
static ARP_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^\s*Internet\s+(?P<ip>\d+\.\d+\.\d+\.\d+)\s+\S+\s+(?P<mac>[0-9a-fA-F.]+)\s+ARPA\s+(?P<interface>\S+)",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid ARP_LINE regex: {err}"),
    }
});

/// `show mac address-table`:
/// `   1    0011.2233.4455    DYNAMIC     Gi0/1`
static MAC_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^\s*\*?\s*(?P<vlan>\d+)\s+(?P<mac>[0-9a-fA-F.:-]+)\s+(?P<type>\S+)\s+(?P<port>\S+)",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid MAC_LINE regex: {err}"),
    }
});

static CDP_DEVICE_ID: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^\s*Device ID:\s*(?P<id>\S+)") {
    Ok(re) => re,
    Err(err) => panic!("invalid CDP_DEVICE_ID regex: {err}"),
});

static CDP_INTERFACE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^\s*Interface:\s*(?P<local>[^,\s]+),?\s*Port ID \(outgoing port\):\s*(?P<remote>\S+)",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid CDP_INTERFACE regex: {err}"),
    }
});

static CDP_IP: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^\s*(?:IP address|IPv4 Address|IPv6 address):\s*(?P<ip>[0-9A-Fa-f:.]+)") {
        Ok(re) => re,
        Err(err) => panic!("invalid CDP_IP regex: {err}"),
    }
});

static CDP_CAPABILITIES: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"Capabilities:\s*(?P<caps>.*?)\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid CDP_CAPABILITIES regex: {err}"),
    }
});

static CDP_MGMT_HEADER: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^\s*Management address") {
    Ok(re) => re,
    Err(err) => panic!("invalid CDP_MGMT_HEADER regex: {err}"),
});

/// A 48-bit hardware address.
///
/// Parses Cisco dotted (`0011.2233.4455`), colon, dash and bare hex forms;
/// displays in Cisco dotted lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

/// Returned when a string is not a MAC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMacAddress(pub String);

impl fmt::Display for InvalidMacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mac address '{}'", self.0)
    }
}

impl std::error::Error for InvalidMacAddress {}

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex: String = trimmed
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | '-'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidMacAddress(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| InvalidMacAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = InvalidMacAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// One row of `show ip arp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    #[schemars(with = "String")]
    pub mac: MacAddress,
    pub interface: String,
}

/// One row of `show mac address-table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MacTableEntry {
    pub vlan: u16,
    #[schemars(with = "String")]
    pub mac: MacAddress,
    /// `DYNAMIC`, `STATIC`, ...
    pub entry_type: String,
    pub port: String,
}

/// The adjacent device reported on one local port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NeighborEntry {
    pub local_port: String,
    pub remote_device_id: String,
    pub remote_port: Option<String>,
    pub remote_management_ip: Option<IpAddr>,
    /// CDP capability codes, e.g. `Switch`, `Router`, `Host`, `Phone`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl NeighborEntry {
    /// True when the neighbor forwards frames for other hosts.
    pub fn is_network_device(&self) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap.eq_ignore_ascii_case("switch") || cap.eq_ignore_ascii_case("router"))
    }
}

/// Parses `show ip arp` output.
pub fn parse_arp(raw: &str) -> Vec<ArpEntry> {
    raw.lines()
        .filter_map(|line| {
            let caps = ARP_LINE.captures(line)?;
            let ip = caps["ip"].parse().ok()?;
            let mac = caps["mac"].parse().ok()?;
            Some(ArpEntry {
                ip,
                mac,
                interface: caps["interface"].to_string(),
            })
        })
        .collect()
}

/// Parses `show mac address-table` output.
pub fn parse_mac_table(raw: &str) -> Vec<MacTableEntry> {
    raw.lines()
        .filter_map(|line| {
            let caps = MAC_LINE.captures(line)?;
            let vlan = caps["vlan"].parse().ok()?;
            let mac = caps["mac"].parse().ok()?;
            Some(MacTableEntry {
                vlan,
                mac,
                entry_type: caps["type"].to_string(),
                port: caps["port"].to_string(),
            })
        })
        .collect()
}

#[derive(Default)]
struct CdpBlock {
    device_id: String,
    local_port: Option<String>,
    remote_port: Option<String>,
    capabilities: Vec<String>,
    entry_ips: Vec<IpAddr>,
    management_ips: Vec<IpAddr>,
}

impl CdpBlock {
    /// Management addresses before entry addresses, IPv4 before IPv6.
    /// Link-local IPv6 addresses are never used.
    fn address(&self) -> Option<IpAddr> {
        let mut candidates = self.management_ips.iter().chain(self.entry_ips.iter());
        if let Some(v4) = candidates.clone().find(|ip| ip.is_ipv4()) {
            return Some(*v4);
        }
        candidates
            .find(|ip| match ip {
                IpAddr::V6(v6) => !v6.is_unicast_link_local() && !v6.is_unspecified(),
                IpAddr::V4(_) => false,
            })
            .copied()
    }
}

/// Parses `show cdp neighbors <port> detail` output for one local port.
///
/// Returns `None` when no neighbor is reported on `local_port`; a block
/// without an `Interface:` line never matches. A neighbor that advertises no
/// usable address is returned with `remote_management_ip` unset.
pub fn parse_neighbor_detail(raw: &str, local_port: &str) -> Option<NeighborEntry> {
    let mut blocks: Vec<CdpBlock> = Vec::new();
    let mut in_management = false;

    for line in raw.lines() {
        if let Some(caps) = CDP_DEVICE_ID.captures(line) {
            blocks.push(CdpBlock {
                device_id: caps["id"].to_string(),
                ..Default::default()
            });
            in_management = false;
            continue;
        }
        let Some(block) = blocks.last_mut() else {
            continue;
        };
        if let Some(caps) = CDP_CAPABILITIES.captures(line) {
            block.capabilities = caps["caps"]
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }
        if CDP_MGMT_HEADER.is_match(line) {
            in_management = true;
        } else if let Some(caps) = CDP_INTERFACE.captures(line) {
            block.local_port = Some(caps["local"].to_string());
            block.remote_port = Some(caps["remote"].to_string());
            in_management = false;
        } else if let Some(caps) = CDP_IP.captures(line) {
            let Ok(ip) = caps["ip"].parse::<IpAddr>() else {
                continue;
            };
            if in_management {
                block.management_ips.push(ip);
            } else {
                block.entry_ips.push(ip);
            }
        } else if !line.starts_with(' ') && !line.trim().is_empty() {
            // Any unindented field ends an address list.
            in_management = false;
        }
    }

    let block = blocks.into_iter().find(|block| {
        block
            .local_port
            .as_deref()
            .is_some_and(|port| interfaces_match(port, local_port))
    })?;
    trace!("Neighbor on {}: {}", local_port, block.device_id);

    let remote_management_ip = block.address();
    Some(NeighborEntry {
        local_port: block.local_port.unwrap_or_else(|| local_port.to_string()),
        remote_device_id: block.device_id,
        remote_port: block.remote_port,
        remote_management_ip,
        capabilities: block.capabilities,
    })
}

/// First ARP entry for `ip`.
pub fn find_arp(entries: &[ArpEntry], ip: Ipv4Addr) -> Option<&ArpEntry> {
    entries.iter().find(|entry| entry.ip == ip)
}

/// First MAC-table entry for `mac`, whatever its VLAN.
pub fn find_mac(entries: &[MacTableEntry], mac: MacAddress) -> Option<&MacTableEntry> {
    entries.iter().find(|entry| entry.mac == mac)
}

/// Full interface type names and the abbreviations IOS accepts for them.
const INTERFACE_TYPES: &[(&str, &[&str])] = &[
    ("gigabitethernet", &["gi", "gig", "ge"]),
    ("fastethernet", &["fa", "fas"]),
    ("tengigabitethernet", &["te", "ten", "tengig"]),
    ("twogigabitethernet", &["tw", "two"]),
    ("twentyfivegige", &["twe"]),
    ("fortygigabitethernet", &["fo", "for"]),
    ("hundredgige", &["hu", "hun"]),
    ("ethernet", &["eth", "et", "e"]),
    ("port-channel", &["po"]),
    ("vlan", &["vl"]),
];

/// Expands an abbreviated interface name, lowercased: `Gi0/1` -> `gigabitethernet0/1`.
pub fn canonical_interface(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (kind, rest) = lower.split_at(split);
    let kind = kind.trim_end();
    let full = INTERFACE_TYPES
        .iter()
        .find(|(full, abbrevs)| *full == kind || abbrevs.contains(&kind))
        .map(|(full, _)| *full)
        .unwrap_or(kind);
    format!("{full}{rest}")
}

/// True when two interface names refer to the same port.
pub fn interfaces_match(a: &str, b: &str) -> bool {
    canonical_interface(a) == canonical_interface(b)
}
