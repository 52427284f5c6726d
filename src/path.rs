//! Hop path accumulation and trace rendering.

use std::net::IpAddr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::parser::MacAddress;

/// One switch visited by the walker, with the port the target's MAC was
/// learned on in that switch's own MAC table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HopRecord {
    pub switch_hostname: String,
    pub switch_ip: IpAddr,
    pub port: String,
    #[schemars(with = "String")]
    pub mac: MacAddress,
}

/// Append-only list of hops in traversal order, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PathRecorder {
    hops: Vec<HopRecord>,
}

impl PathRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hop: HopRecord) {
        self.hops.push(hop);
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn into_hops(self) -> Vec<HopRecord> {
        self.hops
    }

    /// Renders one line per hop.
    ///
    /// When `found` is set the last hop is rendered as the access port,
    /// every other hop as a forwarding hop.
    pub fn render(&self, found: bool) -> Vec<String> {
        let last = self.hops.len().saturating_sub(1);
        self.hops
            .iter()
            .enumerate()
            .map(|(i, hop)| {
                if found && i == last {
                    format!(
                        "found at switch {} ({}), port {}, mac {}",
                        hop.switch_hostname, hop.switch_ip, hop.port, hop.mac
                    )
                } else {
                    format!(
                        "at switch {} ({}) the target's MAC {} was seen on port {}, forwarding to next switch",
                        hop.switch_hostname, hop.switch_ip, hop.mac, hop.port
                    )
                }
            })
            .collect()
    }
}

impl From<Vec<HopRecord>> for PathRecorder {
    fn from(hops: Vec<HopRecord>) -> Self {
        Self { hops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(name: &str, ip: &str, port: &str) -> HopRecord {
        HopRecord {
            switch_hostname: name.to_string(),
            switch_ip: ip.parse().expect("ip"),
            port: port.to_string(),
            mac: "0011.2233.4455".parse().expect("mac"),
        }
    }

    #[test]
    fn hops_keep_traversal_order() {
        let mut recorder = PathRecorder::new();
        assert_eq!(recorder.len(), 0);
        recorder.push(hop("SW1", "10.0.0.1", "Gi0/24"));
        recorder.push(hop("SW2", "10.0.0.2", "Gi0/1"));

        assert_eq!(recorder.len(), 2);
        let hops = recorder.into_hops();
        assert_eq!(hops[0].switch_hostname, "SW1");
        assert_eq!(hops[1].port, "Gi0/1");
    }

    #[test]
    fn render_marks_last_hop_as_found() {
        let mut recorder = PathRecorder::new();
        recorder.push(hop("SW1", "10.0.0.1", "Gi0/24"));
        recorder.push(hop("SW2", "10.0.0.2", "Gi0/1"));

        let lines = recorder.render(true);
        assert_eq!(
            lines,
            vec![
                "at switch SW1 (10.0.0.1) the target's MAC 0011.2233.4455 was seen on port Gi0/24, forwarding to next switch".to_string(),
                "found at switch SW2 (10.0.0.2), port Gi0/1, mac 0011.2233.4455".to_string(),
            ]
        );
    }

    #[test]
    fn render_without_found_lists_only_forwarding_hops() {
        let mut recorder = PathRecorder::new();
        recorder.push(hop("SW1", "10.0.0.1", "Gi0/24"));

        let lines = recorder.render(false);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("forwarding to next switch"));
        assert!(PathRecorder::new().render(true).is_empty());
    }

    #[test]
    fn recorder_rebuilt_from_hops_renders_the_same() {
        let hops = vec![hop("SW1", "10.0.0.1", "Gi0/24"), hop("SW2", "10.0.0.2", "Gi0/1")];
        let mut recorder = PathRecorder::new();
        for h in hops.clone() {
            recorder.push(h);
        }
        assert_eq!(PathRecorder::from(hops).render(true), recorder.render(true));
    }
}
