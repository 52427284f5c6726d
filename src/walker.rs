//! Hop-by-hop search for the access port of a target device.
//!
//! On every switch the walker runs three lookups in order: the target's IP in
//! the ARP table, the resulting MAC in the MAC address table, and the CDP
//! neighbor on the port that MAC was learned on. A neighbor reporting the
//! `Switch` or `Router` capability with an address other than the target's is
//! the next switch; any other port is the access port.
//!
//! The walk is an explicit loop over one [`SearchState`]. Exactly one session
//! is open at any time and it is closed before the next hop starts, whatever
//! the outcome of the hop.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::ConnectError;
use crate::parser::{self, MacAddress};
use crate::path::{HopRecord, PathRecorder};
use crate::session::{Credentials, Session, SessionProvider};
use crate::templates::{self, CommandSet};

/// Tunables for one locate operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateOptions {
    /// Upper bound on switches visited.
    pub max_hops: usize,
    pub commands: CommandSet,
}

impl Default for LocateOptions {
    fn default() -> Self {
        Self {
            max_hops: config::DEFAULT_MAX_HOPS,
            commands: CommandSet::default(),
        }
    }
}

impl LocateOptions {
    /// Options using the command set of a built-in template.
    pub fn for_template(name: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            commands: templates::commands(name)?,
            ..Self::default()
        })
    }

    /// Sets the switch limit; the seed switch is always visited.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }
}

/// Walker states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Start,
    Connected,
    MacResolved,
    PortResolved,
    Forward,
    TerminalFound,
    TerminalNotFound,
    Aborted,
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The target's MAC was learned on a port without a switch behind it.
    Found,
    /// The current switch has no ARP entry for the target IP.
    ArpMiss,
    /// The current switch has not learned the target's MAC.
    MacMiss,
    /// The next hop points back into the walked path.
    CycleDetected,
    /// A switch could not be reached, rejected the login or dropped the session.
    ConnectFailure,
    /// More switches than allowed were visited.
    HopLimit,
}

impl Termination {
    fn final_state(self) -> WalkState {
        match self {
            Termination::Found => WalkState::TerminalFound,
            Termination::ArpMiss | Termination::MacMiss => WalkState::TerminalNotFound,
            Termination::CycleDetected | Termination::ConnectFailure | Termination::HopLimit => {
                WalkState::Aborted
            }
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Termination::Found => "found",
            Termination::ArpMiss => "no ARP entry for the target",
            Termination::MacMiss => "target MAC not in the MAC address table",
            Termination::CycleDetected => "topology loop suspected",
            Termination::ConnectFailure => "connection failure",
            Termination::HopLimit => "hop limit reached",
        };
        f.write_str(text)
    }
}

/// Outcome of one locate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocateResult {
    pub found: bool,
    /// Hops in traversal order. Partial when `found` is false.
    pub path: Vec<HopRecord>,
    /// The access port; equal to the last path entry when found.
    pub final_hop: Option<HopRecord>,
    pub termination: Termination,
    pub seed_ip: IpAddr,
    pub target_ip: IpAddr,
    /// Switch the search stopped on when it did not find the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LocateResult {
    /// Human readable trace: one line per hop, then the outcome when not found.
    pub fn trace(&self) -> Vec<String> {
        let mut lines = PathRecorder::from(self.path.clone()).render(self.found);
        if !self.found {
            let mut line = format!("target {} not found: {}", self.target_ip, self.termination);
            if let Some(at) = self.stopped_at {
                line.push_str(&format!(" (at {at})"));
            }
            if let Some(reason) = self.reason.as_deref() {
                line.push_str(&format!(": {reason}"));
            }
            lines.push(line);
        }
        lines
    }
}

/// Mutable state of one search; never shared across searches.
struct SearchState<'a> {
    visited: HashSet<IpAddr>,
    path: PathRecorder,
    target: Ipv4Addr,
    credentials: &'a Credentials,
}

/// How one hop ended.
enum HopOutcome {
    Forward(IpAddr),
    Done {
        termination: Termination,
        reason: Option<String>,
    },
}

impl HopOutcome {
    fn done(termination: Termination, reason: impl Into<String>) -> Self {
        HopOutcome::Done {
            termination,
            reason: Some(reason.into()),
        }
    }
}

/// Walks the topology through switches opened by a [`SessionProvider`].
pub struct Walker<P> {
    provider: P,
    options: LocateOptions,
}

impl<P: SessionProvider> Walker<P> {
    pub fn new(provider: P, options: LocateOptions) -> Self {
        Self { provider, options }
    }

    /// Finds the switch port `target` is attached to, starting at `seed`.
    ///
    /// Never fails: connectivity problems and lookup misses end the search
    /// with `found = false` and the hops walked so far.
    pub async fn locate(
        &self,
        seed: IpAddr,
        target: IpAddr,
        credentials: &Credentials,
    ) -> LocateResult {
        info!("Locating {} starting at switch {}", target, seed);

        let IpAddr::V4(target_v4) = target else {
            warn!("{} is not an IPv4 address and has no ARP entry", target);
            return finish(
                seed,
                target,
                PathRecorder::new(),
                Termination::ArpMiss,
                None,
                Some("only IPv4 targets can be resolved through ARP".to_string()),
            );
        };

        let mut search = SearchState {
            visited: HashSet::new(),
            path: PathRecorder::new(),
            target: target_v4,
            credentials,
        };
        let mut current = seed;

        loop {
            if search.visited.len() >= self.options.max_hops {
                warn!("Hop limit of {} reached before {}", self.options.max_hops, current);
                return finish(
                    seed,
                    target,
                    search.path,
                    Termination::HopLimit,
                    Some(current),
                    Some(format!("visited {} switches", search.visited.len())),
                );
            }
            search.visited.insert(current);

            match self.hop(&mut search, current).await {
                HopOutcome::Forward(next) => {
                    transition(current, WalkState::PortResolved, WalkState::Forward);
                    current = next;
                }
                HopOutcome::Done {
                    termination,
                    reason,
                } => {
                    let stopped_at = (termination != Termination::Found).then_some(current);
                    return finish(seed, target, search.path, termination, stopped_at, reason);
                }
            }
        }
    }

    /// One hop: open, inspect, always close.
    async fn hop(&self, search: &mut SearchState<'_>, switch: IpAddr) -> HopOutcome {
        let mut session = match self.provider.open(switch, search.credentials).await {
            Ok(session) => session,
            Err(err) => {
                warn!("Cannot connect to switch {}: {}", switch, err);
                transition(switch, WalkState::Start, WalkState::Aborted);
                return HopOutcome::done(Termination::ConnectFailure, err.to_string());
            }
        };
        transition(switch, WalkState::Start, WalkState::Connected);

        let outcome = match self.inspect(&mut session, search, switch).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Session to switch {} failed: {}", switch, err);
                transition(switch, WalkState::Connected, WalkState::Aborted);
                HopOutcome::done(Termination::ConnectFailure, err.to_string())
            }
        };

        if let Err(err) = session.close().await {
            debug!("Closing session to {} failed: {}", switch, err);
        }
        outcome
    }

    /// ARP -> MAC table -> neighbor on one open session.
    async fn inspect<S: Session>(
        &self,
        session: &mut S,
        search: &mut SearchState<'_>,
        switch: IpAddr,
    ) -> Result<HopOutcome, ConnectError> {
        let commands = &self.options.commands;
        let hostname = session
            .hostname()
            .unwrap_or_else(|| switch.to_string());

        let arp = parser::parse_arp(&session.run(&commands.arp_table).await?);
        trace!("{} ARP entries on {}", arp.len(), hostname);
        let Some(arp_entry) = parser::find_arp(&arp, search.target) else {
            info!("No ARP entry for {} on {} ({})", search.target, hostname, switch);
            transition(switch, WalkState::Connected, WalkState::TerminalNotFound);
            return Ok(HopOutcome::done(
                Termination::ArpMiss,
                format!("{hostname} has no ARP entry for {}", search.target),
            ));
        };
        let target_mac: MacAddress = arp_entry.mac;
        transition(switch, WalkState::Connected, WalkState::MacResolved);

        let macs = parser::parse_mac_table(&session.run(&commands.mac_table).await?);
        trace!("{} MAC table entries on {}", macs.len(), hostname);
        let Some(mac_entry) = parser::find_mac(&macs, target_mac) else {
            info!("MAC {} not learned on {} ({})", target_mac, hostname, switch);
            transition(switch, WalkState::MacResolved, WalkState::TerminalNotFound);
            return Ok(HopOutcome::done(
                Termination::MacMiss,
                format!("{hostname} has not learned {target_mac}"),
            ));
        };
        transition(switch, WalkState::MacResolved, WalkState::PortResolved);

        let hop = HopRecord {
            switch_hostname: hostname,
            switch_ip: switch,
            port: mac_entry.port.clone(),
            mac: mac_entry.mac,
        };

        let raw = session
            .run(&commands.neighbor_detail_for(&hop.port))
            .await?;
        let target_ip = IpAddr::V4(search.target);
        let next = match parser::parse_neighbor_detail(&raw, &hop.port) {
            None => None,
            Some(neighbor) => match neighbor.remote_management_ip {
                Some(ip) if ip == target_ip => {
                    info!(
                        "Neighbor {} on {} {} is the target itself",
                        neighbor.remote_device_id, hop.switch_hostname, hop.port
                    );
                    None
                }
                Some(ip) if neighbor.is_network_device() => Some((neighbor.remote_device_id, ip)),
                Some(ip) => {
                    info!(
                        "Neighbor {} ({}) on {} {} reports capabilities [{}], not a switch",
                        neighbor.remote_device_id,
                        ip,
                        hop.switch_hostname,
                        hop.port,
                        neighbor.capabilities.join(" ")
                    );
                    None
                }
                None => {
                    warn!(
                        "Neighbor {} on {} {} advertises no address, treating the port as the access port",
                        neighbor.remote_device_id, hop.switch_hostname, hop.port
                    );
                    None
                }
            },
        };

        match next {
            None => {
                info!(
                    "{} is on {} ({}) port {}",
                    search.target, hop.switch_hostname, switch, hop.port
                );
                transition(switch, WalkState::PortResolved, WalkState::TerminalFound);
                search.path.push(hop);
                Ok(HopOutcome::Done {
                    termination: Termination::Found,
                    reason: None,
                })
            }
            Some((device_id, ip)) if search.visited.contains(&ip) => {
                warn!(
                    "Neighbor {} ({}) on {} {} was already visited",
                    device_id, ip, hop.switch_hostname, hop.port
                );
                transition(switch, WalkState::PortResolved, WalkState::Aborted);
                Ok(HopOutcome::done(
                    Termination::CycleDetected,
                    format!(
                        "neighbor {device_id} ({ip}) on {} {} was already visited",
                        hop.switch_hostname, hop.port
                    ),
                ))
            }
            Some((device_id, ip)) => {
                info!(
                    "{} port {} leads to {} ({})",
                    hop.switch_hostname, hop.port, device_id, ip
                );
                search.path.push(hop);
                Ok(HopOutcome::Forward(ip))
            }
        }
    }
}

fn transition(switch: IpAddr, from: WalkState, to: WalkState) {
    debug!("{} {:?} -> {:?}", switch, from, to);
}

fn finish(
    seed: IpAddr,
    target: IpAddr,
    path: PathRecorder,
    termination: Termination,
    stopped_at: Option<IpAddr>,
    reason: Option<String>,
) -> LocateResult {
    let found = termination == Termination::Found;
    debug!(
        "Search for {} ended in {:?} after {} hops",
        target,
        termination.final_state(),
        path.len()
    );
    let path = path.into_hops();
    let final_hop = if found { path.last().cloned() } else { None };
    LocateResult {
        found,
        path,
        final_hop,
        termination,
        seed_ip: seed,
        target_ip: target,
        stopped_at,
        reason,
    }
}
