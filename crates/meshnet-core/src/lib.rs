//! # MeshNet protocol engine
//!
//! This crate implements the device-side network layer (L3) of MeshNet, a
//! tree-structured mesh for constrained low-power nodes, plus the thin L4
//! command dispatch that rides above it. A network is one *base* and many
//! *devices*; devices discover the base through flooded beacons, prove
//! themselves with an HMAC handshake, receive addresses covering their
//! subtree, and then carry unicast traffic between the base and any device.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Application (L7)                          │
//! │                 CommandHandler::on_command_received           │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MeshNode (L3/L4)                       │
//! │  ┌────────────┐ ┌────────────┐ ┌───────────┐ ┌────────────┐  │
//! │  │ handshake  │ │ forwarding │ │ ChildTable│ │RoutingTable│  │
//! │  │ (beacons,  │ │ (to-base + │ │ (per wave)│ │ (per config)│ │
//! │  │  assigns)  │ │ tree route)│ └───────────┘ └────────────┘  │
//! │  └────────────┘ └────────────┘                                │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  L2 drivers (one per interface)               │
//! │                   LinkDriver::send_packet                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is single-threaded and callback-driven: L2 drivers feed
//! received frames into [`MeshNode::process_incoming_packet`], which runs to
//! completion and emits any responses synchronously. All protocol error
//! paths are silent drops, tallied in [`NodeStats`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshnet_core::{MeshNode, NodeConfig, NodeIdentity};
//!
//! let identity = NodeIdentity {
//!     network_id: 10101,
//!     network_key: 80808,
//!     device_type: 7,
//!     device_unique_id: 42,
//! };
//! let mut node = MeshNode::new(NodeConfig::new(identity), platform);
//!
//! // Feed frames from the L2 driver:
//! node.process_incoming_packet(&bytes, iface, src_mac);
//!
//! // Once joined, talk to the base:
//! node.send_command(3, b"sensor reading");
//! ```

pub mod command;
pub mod config;
pub mod keys;
pub mod neighbor;
pub mod node;
pub mod routing;
pub mod simulation;
pub mod traits;
pub mod wire;

// Re-export main types
pub use command::{DeviceInfo, DEVICE_INFO_COMMAND};
pub use config::{
    ActiveConfig, NodeConfig, NodeIdentity, TentativeConfig, MAX_CHILD_TABLE_LEN,
    MAX_ROUTING_TABLE_LEN,
};
pub use neighbor::{ChildEntry, ChildTable, InterfaceId, MacAddr, Neighbor, BROADCAST_MAC};
pub use node::{DropReason, MeshNode, NodeStats, NodeSummary};
pub use routing::{RouteEntry, RoutingTable};
pub use simulation::{EntityId, MeshSimulator, SimConfig, SimPlatform};
pub use traits::{CommandHandler, EntropySource, LinkDriver};
pub use wire::{Frame, FrameError, FrameType};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::command::DEVICE_INFO_COMMAND;
    pub use crate::config::{NodeConfig, NodeIdentity};
    pub use crate::neighbor::{InterfaceId, MacAddr, Neighbor, BROADCAST_MAC};
    pub use crate::node::MeshNode;
    pub use crate::traits::{CommandHandler, EntropySource, LinkDriver};
    pub use crate::wire::Frame;
}
