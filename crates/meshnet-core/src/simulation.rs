//! In-process mesh simulation
//!
//! This module wires any number of [`MeshNode`] instances and one scripted
//! base into a virtual network so the protocol can be exercised end-to-end
//! without hardware. It models:
//!
//! - Broadcast segments with per-segment MAC addresses
//! - FIFO frame delivery (a node is never re-entered from its own transmit
//!   path; frames queue and are dispatched from the pump loop)
//! - A base that runs complete beacon waves: it collects child and parent
//!   responses, reconstructs the tree, numbers subtrees with contiguous
//!   address ranges and issues `AssignAddress` frames level by level
//!
//! The base here is test tooling, not a base implementation: `MeshNode`
//! never depends on it.

use crate::config::{NodeConfig, NodeIdentity};
use crate::keys;
use crate::neighbor::{InterfaceId, MacAddr, Neighbor, BROADCAST_MAC};
use crate::node::MeshNode;
use crate::routing::RouteEntry;
use crate::traits::{CommandHandler, EntropySource, LinkDriver};
use crate::wire::Frame;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Deterministic generator for reproducible runs (64-bit LCG, high word
/// output).
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.state >> 32) as u32
    }
}

impl EntropySource for Lcg {
    fn random_u32(&mut self) -> u32 {
        self.next_u32()
    }
}

/// Platform fake handed to every simulated node: outbound frames queue in
/// an outbox the simulator drains, nonces come from a seeded [`Lcg`], and
/// L7 deliveries are recorded for inspection.
#[derive(Debug)]
pub struct SimPlatform {
    outbox: VecDeque<(Vec<u8>, InterfaceId, MacAddr)>,
    rng: Lcg,
    /// Commands delivered to the (absent) application layer.
    pub commands: Vec<(u8, Vec<u8>)>,
}

impl SimPlatform {
    pub fn new(seed: u64) -> Self {
        Self {
            outbox: VecDeque::new(),
            rng: Lcg::new(seed),
            commands: Vec::new(),
        }
    }
}

impl LinkDriver for SimPlatform {
    fn send_packet(&mut self, frame: &[u8], iface: InterfaceId, mac: MacAddr) {
        self.outbox.push_back((frame.to_vec(), iface, mac));
    }
}

impl EntropySource for SimPlatform {
    fn random_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }
}

impl CommandHandler for SimPlatform {
    fn on_command_received(&mut self, command: u8, data: &[u8]) {
        self.commands.push((command, data.to_vec()));
    }
}

/// Who an attachment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId {
    Base,
    Device(usize),
}

#[derive(Debug, Clone, Copy)]
struct Attachment {
    entity: EntityId,
    iface: InterfaceId,
    mac: MacAddr,
    segment: usize,
}

#[derive(Debug)]
struct Delivery {
    to: EntityId,
    iface: InterfaceId,
    mac: MacAddr,
    bytes: Vec<u8>,
}

/// An L4 payload that reached the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub src: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

/// Scripted base: beacon origination, tree reconstruction and address
/// allocation for one wave at a time.
#[derive(Debug)]
pub struct SimBase {
    network_key: u32,
    rng: Lcg,
    wave_nonce: u32,
    /// Direct children heard this wave, in arrival order.
    direct: Vec<(u32, Neighbor)>,
    /// Parent-child edges reported this wave.
    edges: Vec<(u32, u32)>,
    /// Ranges of the direct children, valid after assignment.
    routes: Vec<RouteEntry>,
    /// `DataToBase` payloads, in arrival order.
    pub inbox: Vec<ReceivedCommand>,
    outbox: VecDeque<(Vec<u8>, InterfaceId, MacAddr)>,
    /// Address and range assigned to each nonce in the last wave.
    pub assignments: HashMap<u32, (u8, u8)>,
}

impl SimBase {
    fn new(network_key: u32, seed: u64) -> Self {
        Self {
            network_key,
            rng: Lcg::new(seed),
            wave_nonce: 0,
            direct: Vec::new(),
            edges: Vec::new(),
            routes: Vec::new(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            assignments: HashMap::new(),
        }
    }

    fn begin_wave(&mut self) -> u32 {
        self.wave_nonce = self.rng.next_u32();
        self.direct.clear();
        self.edges.clear();
        self.routes.clear();
        self.assignments.clear();
        self.wave_nonce
    }

    fn receive(&mut self, bytes: &[u8], iface: InterfaceId, mac: MacAddr) {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                trace!(%err, "base dropping unparseable frame");
                return;
            }
        };
        let key = keys::to_base_key(self.wave_nonce, self.network_key);
        match frame {
            Frame::ChildResponse { child_nonce, .. } => {
                if !keys::verify(bytes, &key) {
                    trace!(child_nonce, "base dropping child response with bad hmac");
                    return;
                }
                if !self.direct.iter().any(|(n, _)| *n == child_nonce) {
                    self.direct.push((child_nonce, Neighbor::new(iface, mac)));
                }
            }
            Frame::ParentResponse {
                child_nonce,
                parent_nonce,
                ..
            } => {
                if !keys::verify(bytes, &key) {
                    trace!(child_nonce, "base dropping parent response with bad hmac");
                    return;
                }
                let edge = (parent_nonce, child_nonce);
                if !self.edges.contains(&edge) {
                    self.edges.push(edge);
                }
            }
            Frame::DataToBase { src, command, data } => {
                self.inbox.push(ReceivedCommand { src, command, data });
            }
            // The base originates beacons and assignments; echoes of either
            // are not meaningful to it.
            _ => {}
        }
    }

    /// Number every reported subtree with contiguous address ranges and
    /// queue the `AssignAddress` frames, level by level.
    fn assign_addresses(&mut self) {
        let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();
        for (parent, child) in &self.edges {
            children_of.entry(*parent).or_default().push(*child);
        }

        // Depth-first numbering: a node's range covers its whole subtree.
        let mut next: u8 = 1;
        let direct: Vec<(u32, Neighbor)> = self.direct.clone();
        for (nonce, _) in &direct {
            next = self.number_subtree(*nonce, next, &children_of, &mut Vec::new());
        }

        self.routes = direct
            .iter()
            .filter_map(|(nonce, link)| {
                self.assignments.get(nonce).map(|(address, max_route)| RouteEntry {
                    address: *address,
                    max_route: *max_route,
                    link: *link,
                })
            })
            .collect();

        // Breadth-first emission: parents are always addressed before their
        // children, so forwarding state exists when a child's frame passes.
        let mut level: Vec<(u32, Neighbor)> = direct;
        while !level.is_empty() {
            let mut next_level = Vec::new();
            for (nonce, via) in &level {
                if let Some((address, max_route)) = self.assignments.get(nonce).copied() {
                    let mut frame = Frame::AssignAddress {
                        child_nonce: *nonce,
                        address,
                        max_route,
                        hmac: 0,
                    }
                    .encode();
                    keys::seal(
                        &mut frame,
                        &keys::to_device_key(*nonce, self.wave_nonce, self.network_key),
                    );
                    self.outbox.push_back((frame, via.iface, via.mac));
                }
                for child in children_of.get(nonce).cloned().unwrap_or_default() {
                    next_level.push((child, *via));
                }
            }
            level = next_level;
        }
        debug!(
            devices = self.assignments.len(),
            "wave assignment complete"
        );
    }

    fn number_subtree(
        &mut self,
        nonce: u32,
        next: u8,
        children_of: &HashMap<u32, Vec<u32>>,
        path: &mut Vec<u32>,
    ) -> u8 {
        if path.contains(&nonce) {
            // A malformed edge report produced a cycle; stop descending.
            return next;
        }
        path.push(nonce);
        let address = next;
        let mut cursor = next.wrapping_add(1);
        for child in children_of.get(&nonce).cloned().unwrap_or_default() {
            cursor = self.number_subtree(child, cursor, children_of, path);
        }
        path.pop();
        self.assignments
            .insert(nonce, (address, cursor.wrapping_sub(1)));
        cursor
    }

    /// Queue a `DataToDevice` toward `address`. Returns `false` when no
    /// assigned range covers it.
    fn queue_data(&mut self, address: u8, command: u8, data: &[u8]) -> bool {
        let link = match self.routes.iter().find(|r| r.covers(address)) {
            Some(route) => route.link,
            None => return false,
        };
        let frame = Frame::DataToDevice {
            dst: address,
            command,
            data: data.to_vec(),
        }
        .encode();
        self.outbox.push_back((frame, link.iface, link.mac));
        true
    }
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub network_id: u16,
    pub network_key: u32,
    /// Seed for every generator in the run; same seed, same run.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            network_id: 10101,
            network_key: 80808,
            seed: 42,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// The virtual network: nodes, the scripted base, and the broadcast
/// segments connecting them.
#[derive(Debug)]
pub struct MeshSimulator {
    config: SimConfig,
    base: SimBase,
    nodes: Vec<MeshNode<SimPlatform>>,
    attachments: Vec<Attachment>,
    segments: Vec<Vec<usize>>,
    queue: VecDeque<Delivery>,
}

impl MeshSimulator {
    pub fn new(config: SimConfig) -> Self {
        let base = SimBase::new(config.network_key, config.seed);
        Self {
            config,
            base,
            nodes: Vec::new(),
            attachments: Vec::new(),
            segments: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Add a device with the given number of interfaces; returns its index.
    pub fn add_device(&mut self, num_interfaces: u8) -> usize {
        let index = self.nodes.len();
        let identity = NodeIdentity {
            network_id: self.config.network_id,
            network_key: self.config.network_key,
            device_type: 1,
            device_unique_id: 0x1000 + index as u32,
        };
        let node_config = NodeConfig::new(identity).with_interfaces(num_interfaces);
        let seed = self
            .config
            .seed
            .wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        self.nodes
            .push(MeshNode::new(node_config, SimPlatform::new(seed)));
        index
    }

    /// Join two interfaces with a point-to-point segment.
    pub fn connect(&mut self, a: (EntityId, InterfaceId), b: (EntityId, InterfaceId)) {
        let segment = self.segments.len();
        let first = self.attachments.len();
        self.attachments.push(Attachment {
            entity: a.0,
            iface: a.1,
            mac: 1,
            segment,
        });
        self.attachments.push(Attachment {
            entity: b.0,
            iface: b.1,
            mac: 2,
            segment,
        });
        self.segments.push(vec![first, first + 1]);
    }

    pub fn device(&self, index: usize) -> &MeshNode<SimPlatform> {
        &self.nodes[index]
    }

    pub fn device_mut(&mut self, index: usize) -> &mut MeshNode<SimPlatform> {
        &mut self.nodes[index]
    }

    pub fn base(&self) -> &SimBase {
        &self.base
    }

    /// The `(address, max_route)` the base assigned to a device in the last
    /// wave, if it joined.
    pub fn assigned_range(&self, device: usize) -> Option<(u8, u8)> {
        let nonce = self.nodes[device].active()?.child_nonce;
        self.base.assignments.get(&nonce).copied()
    }

    /// Run one complete beacon wave: flood the beacon, let the handshake
    /// settle, then assign addresses and let the assignments settle.
    /// Returns the wave nonce.
    pub fn run_wave(&mut self) -> u32 {
        let nonce = self.base.begin_wave();
        let beacon = Frame::Beacon {
            network_id: self.config.network_id,
            base_nonce: nonce,
        }
        .encode();
        let base_ifaces: Vec<InterfaceId> = self
            .attachments
            .iter()
            .filter(|a| a.entity == EntityId::Base)
            .map(|a| a.iface)
            .collect();
        for iface in base_ifaces {
            self.base
                .outbox
                .push_back((beacon.clone(), iface, BROADCAST_MAC));
        }
        self.pump();
        self.base.assign_addresses();
        self.pump();
        nonce
    }

    /// Inject a base-originated command toward an assigned address.
    pub fn send_command_to(&mut self, address: u8, command: u8, data: &[u8]) -> bool {
        if !self.base.queue_data(address, command, data) {
            return false;
        }
        self.pump();
        true
    }

    /// Deliver queued frames until the network is quiet.
    pub fn pump(&mut self) {
        loop {
            self.collect_outboxes();
            match self.queue.pop_front() {
                Some(delivery) => self.dispatch(delivery),
                None => break,
            }
        }
    }

    fn collect_outboxes(&mut self) {
        let mut sends: Vec<(EntityId, Vec<u8>, InterfaceId, MacAddr)> = Vec::new();
        while let Some((bytes, iface, mac)) = self.base.outbox.pop_front() {
            sends.push((EntityId::Base, bytes, iface, mac));
        }
        for (index, node) in self.nodes.iter_mut().enumerate() {
            while let Some((bytes, iface, mac)) = node.platform_mut().outbox.pop_front() {
                sends.push((EntityId::Device(index), bytes, iface, mac));
            }
        }
        for (from, bytes, iface, mac) in sends {
            self.route_send(from, bytes, iface, mac);
        }
    }

    fn route_send(&mut self, from: EntityId, bytes: Vec<u8>, iface: InterfaceId, mac: MacAddr) {
        let sender = self
            .attachments
            .iter()
            .position(|a| a.entity == from && a.iface == iface);
        let sender = match sender {
            Some(sender) => sender,
            // An interface with no segment attached; the frame vanishes,
            // like a radio with no one in range.
            None => return,
        };
        let sender_mac = self.attachments[sender].mac;
        let segment = self.attachments[sender].segment;
        for &member in &self.segments[segment] {
            if member == sender {
                continue;
            }
            let peer = self.attachments[member];
            if mac == BROADCAST_MAC || peer.mac == mac {
                self.queue.push_back(Delivery {
                    to: peer.entity,
                    iface: peer.iface,
                    mac: sender_mac,
                    bytes: bytes.clone(),
                });
            }
        }
    }

    fn dispatch(&mut self, delivery: Delivery) {
        match delivery.to {
            EntityId::Base => self
                .base
                .receive(&delivery.bytes, delivery.iface, delivery.mac),
            EntityId::Device(index) => self.nodes[index].process_incoming_packet(
                &delivery.bytes,
                delivery.iface,
                delivery.mac,
            ),
        }
    }
}
