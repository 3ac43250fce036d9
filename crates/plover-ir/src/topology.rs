//! Device-port topology.
//!
//! Links are point-to-point between named ports on named devices. The
//! adjacency map is stored symmetrically so either endpoint resolves its
//! peer in one lookup, and insertion order is preserved everywhere so runs
//! are deterministic.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// A port on a device, the endpoint granularity of every link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePort {
    pub device: String,
    pub port: String,
}

impl DevicePort {
    pub fn new(device: impl Into<String>, port: impl Into<String>) -> Self {
        DevicePort {
            device: device.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for DevicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.device, self.port)
    }
}

/// The symmetrized link map plus per-device port lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    peers: IndexMap<DevicePort, DevicePort>,
    ports_by_device: IndexMap<String, Vec<String>>,
}

impl Topology {
    /// Build from one-directional link declarations; the reverse direction
    /// is filled in automatically. A port can terminate at most one link.
    pub fn from_links(links: impl IntoIterator<Item = (DevicePort, DevicePort)>) -> Result<Self, IrError> {
        let mut topo = Topology::default();
        for (a, b) in links {
            if topo.peers.contains_key(&a) {
                return Err(IrError::DuplicateEndpoint(a.to_string()));
            }
            if topo.peers.contains_key(&b) {
                return Err(IrError::DuplicateEndpoint(b.to_string()));
            }
            topo.attach(&a);
            topo.attach(&b);
            topo.peers.insert(a.clone(), b.clone());
            topo.peers.insert(b, a);
        }
        Ok(topo)
    }

    fn attach(&mut self, endpoint: &DevicePort) {
        let ports = self
            .ports_by_device
            .entry(endpoint.device.clone())
            .or_default();
        if !ports.contains(&endpoint.port) {
            ports.push(endpoint.port.clone());
        }
    }

    /// The far end of the link terminating at `endpoint`.
    pub fn peer(&self, endpoint: &DevicePort) -> Option<&DevicePort> {
        self.peers.get(endpoint)
    }

    pub fn contains_device(&self, device: &str) -> bool {
        self.ports_by_device.contains_key(device)
    }

    /// Linked ports of a device, in declaration order.
    pub fn device_ports(&self, device: &str) -> &[String] {
        self.ports_by_device
            .get(device)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.ports_by_device.keys().map(String::as_str)
    }

    /// Devices one hop away from `device`.
    pub fn neighbors(&self, device: &str) -> IndexSet<&str> {
        self.device_ports(device)
            .iter()
            .filter_map(|port| {
                self.peers
                    .get(&DevicePort::new(device, port.clone()))
                    .map(|peer| peer.device.as_str())
            })
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.peers.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Topology {
        Topology::from_links([
            (DevicePort::new("a", "p1"), DevicePort::new("b", "p1")),
            (DevicePort::new("b", "p2"), DevicePort::new("c", "p1")),
        ])
        .unwrap()
    }

    #[test]
    fn links_resolve_in_both_directions() {
        let topo = chain();
        assert_eq!(
            topo.peer(&DevicePort::new("a", "p1")),
            Some(&DevicePort::new("b", "p1"))
        );
        assert_eq!(
            topo.peer(&DevicePort::new("b", "p1")),
            Some(&DevicePort::new("a", "p1"))
        );
        assert_eq!(topo.peer(&DevicePort::new("a", "p9")), None);
        assert_eq!(topo.link_count(), 2);
    }

    #[test]
    fn ports_and_neighbors_follow_declaration_order() {
        let topo = chain();
        assert_eq!(topo.device_ports("b"), ["p1", "p2"]);
        let neighbors: Vec<&str> = topo.neighbors("b").into_iter().collect();
        assert_eq!(neighbors, ["a", "c"]);
        assert!(topo.neighbors("c").contains("b"));
    }

    #[test]
    fn reusing_an_endpoint_is_rejected() {
        let err = Topology::from_links([
            (DevicePort::new("a", "p1"), DevicePort::new("b", "p1")),
            (DevicePort::new("a", "p1"), DevicePort::new("c", "p1")),
        ]);
        assert_eq!(err, Err(IrError::DuplicateEndpoint("a@p1".to_string())));
    }
}
