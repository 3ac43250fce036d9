//! The read-only bundle a verification run operates on.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use plover_bdd::{AddressFamily, Prefix};

use crate::error::IrError;
use crate::invariant::Invariant;
use crate::model::Device;
use crate::topology::Topology;

/// Everything a run needs: topology, per-device forwarding state, named
/// packet spaces, and the invariants attached to destination devices.
///
/// Built once, validated once, then shared immutably (the orchestrator wraps
/// it in an `Arc`) across all verification instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyContext {
    pub family: AddressFamily,
    #[serde(skip)]
    pub topology: Topology,
    pub devices: IndexMap<String, Device>,
    pub packet_spaces: IndexMap<String, Vec<Prefix>>,
    /// Keyed by destination device name.
    pub invariants: IndexMap<String, Vec<Invariant>>,
}

impl VerifyContext {
    pub fn new(family: AddressFamily, topology: Topology) -> Self {
        VerifyContext {
            family,
            topology,
            devices: IndexMap::new(),
            packet_spaces: IndexMap::new(),
            invariants: IndexMap::new(),
        }
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.name.clone(), device);
    }

    pub fn add_packet_space(&mut self, name: impl Into<String>, prefixes: Vec<Prefix>) {
        self.packet_spaces.insert(name.into(), prefixes);
    }

    pub fn add_invariant(&mut self, device: impl Into<String>, invariant: Invariant) {
        self.invariants.entry(device.into()).or_default().push(invariant);
    }

    pub fn device(&self, name: &str) -> Result<&Device, IrError> {
        self.devices
            .get(name)
            .ok_or_else(|| IrError::UnknownDevice(name.to_string()))
    }

    pub fn packet_space(&self, name: &str) -> Result<&[Prefix], IrError> {
        self.packet_spaces
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| IrError::UnknownPacketSpace(name.to_string()))
    }

    /// Devices flagged as destinations, in declaration order.
    pub fn destination_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_destination)
    }

    /// Cross-check every reference: devices against the topology, forwarding
    /// ports against device port lists, invariants against declared devices
    /// and packet spaces.
    pub fn validate(&self) -> Result<(), IrError> {
        for device in self.devices.values() {
            if !self.topology.contains_device(&device.name) {
                return Err(IrError::UnknownDevice(device.name.clone()));
            }
            let linked = self.topology.device_ports(&device.name);
            for lec in &device.lecs {
                for port in lec.action.ports() {
                    if !linked.contains(port) {
                        return Err(IrError::UnknownPort {
                            device: device.name.clone(),
                            port: port.clone(),
                        });
                    }
                }
            }
        }
        for (device, invariants) in &self.invariants {
            self.device(device)?;
            for invariant in invariants {
                // `*` is the built-in universal space.
                if invariant.packet_space != "*" {
                    self.packet_space(&invariant.packet_space)?;
                }
            }
        }
        Ok(())
    }
}
