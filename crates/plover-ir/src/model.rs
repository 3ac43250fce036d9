//! Per-device forwarding behavior.
//!
//! A device's forwarding state is a list of [`Lec`]s (local equivalence
//! classes): each pairs a destination prefix set with the action applied to
//! packets in it. Actions either forward out one or more ports (several
//! ports means the device load-balances across them) or drop.

use serde::{Deserialize, Serialize};

use plover_bdd::Prefix;

/// What a device does with packets matching a [`Lec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardAction {
    /// Forward out of every listed port (multipath when more than one).
    Forward(Vec<String>),
    Drop,
}

impl ForwardAction {
    pub fn ports(&self) -> &[String] {
        match self {
            ForwardAction::Forward(ports) => ports,
            ForwardAction::Drop => &[],
        }
    }
}

/// A local equivalence class: all packets a device treats identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lec {
    pub prefixes: Vec<Prefix>,
    pub action: ForwardAction,
}

impl Lec {
    pub fn forward(prefixes: Vec<Prefix>, ports: Vec<String>) -> Self {
        Lec {
            prefixes,
            action: ForwardAction::Forward(ports),
        }
    }

    pub fn drop(prefixes: Vec<Prefix>) -> Self {
        Lec {
            prefixes,
            action: ForwardAction::Drop,
        }
    }
}

/// A device and its forwarding state.
///
/// Destination devices are the roots the orchestrator builds verification
/// instances for; source devices are where invariants are judged, and
/// announcements are not propagated past them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub lecs: Vec<Lec>,
    pub is_destination: bool,
    pub is_source: bool,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Device {
            name: name.into(),
            lecs: Vec::new(),
            is_destination: false,
            is_source: false,
        }
    }

    pub fn destination(name: impl Into<String>) -> Self {
        Device {
            is_destination: true,
            ..Device::new(name)
        }
    }

    pub fn source(name: impl Into<String>) -> Self {
        Device {
            is_source: true,
            ..Device::new(name)
        }
    }

    pub fn with_lec(mut self, lec: Lec) -> Self {
        self.lecs.push(lec);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn devices_round_trip_through_json() {
        let device = Device::source("leaf1").with_lec(Lec::forward(
            vec![Prefix::v4(Ipv4Addr::new(10, 0, 0, 0), 8)],
            vec!["eth0".to_string()],
        ));
        let json = serde_json::to_string(&device).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn drop_actions_expose_no_ports() {
        let lec = Lec::drop(vec![Prefix::v4(Ipv4Addr::new(0, 0, 0, 0), 0)]);
        assert!(lec.action.ports().is_empty());
        let fwd = Lec::forward(vec![], vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(fwd.action.ports().len(), 2);
    }
}
