//! Node identity and network configurations
//!
//! [`NodeIdentity`] carries the values sourced from the persistent identity
//! store. [`ActiveConfig`] and [`TentativeConfig`] are the two halves of the
//! reconfiguration scheme: a tentative configuration is opened by the first
//! beacon of a fresh wave and promoted to active, atomically, when the base
//! assigns this device an address.

use crate::neighbor::Neighbor;
use serde::{Deserialize, Serialize};

/// Default capacity of the child table.
pub const MAX_CHILD_TABLE_LEN: usize = 5;

/// Default capacity of the routing table.
pub const MAX_ROUTING_TABLE_LEN: usize = 5;

/// Persistent identity of a device, normally read from EEPROM or flash.
/// The core never writes any of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Identifier of the logical network; beacons from other networks are
    /// ignored.
    pub network_id: u16,
    /// Pre-shared secret mixed into every HMAC key.
    pub network_key: u32,
    /// Capability class of this device.
    pub device_type: u32,
    /// Factory-unique identifier.
    pub device_unique_id: u32,
}

/// Construction-time parameters of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub identity: NodeIdentity,
    /// Number of attached L2 drivers; beacons are re-broadcast on all of
    /// them.
    pub num_interfaces: u8,
    /// Child table capacity.
    pub max_children: usize,
    /// Routing table capacity.
    pub max_routes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: NodeIdentity::default(),
            num_interfaces: 1,
            max_children: MAX_CHILD_TABLE_LEN,
            max_routes: MAX_ROUTING_TABLE_LEN,
        }
    }
}

impl NodeConfig {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    pub fn with_interfaces(mut self, num_interfaces: u8) -> Self {
        self.num_interfaces = num_interfaces;
        self
    }

    pub fn with_capacities(mut self, max_children: usize, max_routes: usize) -> Self {
        self.max_children = max_children;
        self.max_routes = max_routes;
        self
    }
}

/// The configuration the node currently operates under. Present iff the
/// device has been addressed in the current wave, so holding an
/// `Option<ActiveConfig>` makes "joined" and "has an upstream hop" the same
/// fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Nonce of the beacon wave this configuration was built in.
    pub base_nonce: u32,
    /// Upstream hop toward the base.
    pub to_base: Neighbor,
    /// Our assigned L3 address.
    pub address: u8,
    /// The nonce we identified ourselves with during the wave.
    pub child_nonce: u32,
}

/// A configuration under construction, opened by the first beacon of a wave
/// whose nonce differs from anything already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TentativeConfig {
    pub base_nonce: u32,
    /// The neighbor the beacon arrived from; our prospective parent.
    pub to_base: Neighbor,
    /// Freshly drawn nonce identifying us to the base for this wave.
    pub child_nonce: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let identity = NodeIdentity {
            network_id: 10101,
            network_key: 80808,
            device_type: 7,
            device_unique_id: 42,
        };
        let config = NodeConfig::new(identity)
            .with_interfaces(3)
            .with_capacities(8, 16);
        assert_eq!(config.identity.network_id, 10101);
        assert_eq!(config.num_interfaces, 3);
        assert_eq!(config.max_children, 8);
        assert_eq!(config.max_routes, 16);
    }

    #[test]
    fn test_default_capacities() {
        let config = NodeConfig::default();
        assert_eq!(config.max_children, MAX_CHILD_TABLE_LEN);
        assert_eq!(config.max_routes, MAX_ROUTING_TABLE_LEN);
        assert_eq!(config.num_interfaces, 1);
    }
}
