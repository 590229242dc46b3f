//! The device-side L3 protocol engine
//!
//! [`MeshNode`] owns the whole per-device protocol state — the active and
//! tentative configurations, the child and routing tables — and drives it
//! from a single entry point, [`MeshNode::process_incoming_packet`]. The
//! engine runs to completion on every call and emits outbound frames
//! synchronously through the platform's [`LinkDriver`], in a fixed order.
//!
//! ## Join sequence
//!
//! ```text
//!  base                    parent                   this node
//!   │  Beacon(nonce) ──────►│  Beacon ──────────────►│ open tentative config
//!   │                       │◄── ChildResponse ──────│ (rebroadcast + respond)
//!   │◄── ParentResponse ────│                        │
//!   │  AssignAddress(us) ──────────────────────────► │ promote to active,
//!   │◄───────────────────────────── DataToBase(cmd 0)│ report device info
//! ```
//!
//! Every failure path is a silent drop: no error frames, no error returns.
//! Drops are tallied in [`NodeStats`] and traced, a pure observation
//! channel.

use crate::command::{DeviceInfo, DEVICE_INFO_COMMAND};
use crate::config::{ActiveConfig, NodeConfig, NodeIdentity, TentativeConfig};
use crate::keys;
use crate::neighbor::{ChildEntry, ChildTable, InterfaceId, MacAddr, Neighbor, BROADCAST_MAC};
use crate::routing::{RouteEntry, RoutingTable};
use crate::traits::{CommandHandler, EntropySource, LinkDriver};
use crate::wire::{Frame, FrameType, MAX_DATA_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Why a received frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Failed to parse: too short, bad length, unknown type.
    Malformed,
    /// Received with the broadcast MAC as source.
    InvalidSource,
    /// Beacon for a different network.
    ForeignNetwork,
    /// HMAC verification failed, or there is no wave to verify against.
    BadHmac,
    /// Beacon for a wave we are already processing.
    DuplicateBeacon,
    /// Child or routing table at capacity.
    TableFull,
    /// No upstream hop or no covering routing row.
    Unroutable,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::Malformed => "malformed",
            DropReason::InvalidSource => "invalid source",
            DropReason::ForeignNetwork => "foreign network",
            DropReason::BadHmac => "bad hmac",
            DropReason::DuplicateBeacon => "duplicate beacon",
            DropReason::TableFull => "table full",
            DropReason::Unroutable => "unroutable",
        };
        f.write_str(name)
    }
}

/// Traffic and drop counters. Observation only; nothing reads these to make
/// protocol decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub frames_rx: u64,
    pub frames_tx: u64,
    pub frames_forwarded: u64,
    /// L4 payloads delivered locally (command 0 included).
    pub commands_rx: u64,
    pub dropped_malformed: u64,
    pub dropped_invalid_source: u64,
    pub dropped_foreign_network: u64,
    pub dropped_bad_hmac: u64,
    pub dropped_duplicate_beacon: u64,
    pub dropped_table_full: u64,
    pub dropped_unroutable: u64,
}

impl NodeStats {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_invalid_source
            + self.dropped_foreign_network
            + self.dropped_bad_hmac
            + self.dropped_duplicate_beacon
            + self.dropped_table_full
            + self.dropped_unroutable
    }
}

/// Condensed view of a node's state, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub joined: bool,
    pub address: Option<u8>,
    pub base_nonce: Option<u32>,
    pub pending_wave: bool,
    pub children: usize,
    pub routes: usize,
}

/// The per-device protocol engine.
///
/// Generic over the platform `P`, the capability bundle providing L2
/// transmit, entropy and L7 dispatch. All state mutation happens inside
/// [`process_incoming_packet`](Self::process_incoming_packet) and the
/// `send_*` helpers; nothing blocks or suspends.
#[derive(Debug)]
pub struct MeshNode<P> {
    config: NodeConfig,
    platform: P,
    active: Option<ActiveConfig>,
    tentative: Option<TentativeConfig>,
    children: ChildTable,
    routes: RoutingTable,
    stats: NodeStats,
}

impl<P> MeshNode<P> {
    pub fn new(config: NodeConfig, platform: P) -> Self {
        let children = ChildTable::new(config.max_children);
        let routes = RoutingTable::new(config.max_routes);
        Self {
            config,
            platform,
            active: None,
            tentative: None,
            children,
            routes,
            stats: NodeStats::default(),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.config.identity
    }

    /// Our assigned address, once joined.
    pub fn my_address(&self) -> Option<u8> {
        self.active.map(|a| a.address)
    }

    pub fn is_joined(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveConfig> {
        self.active.as_ref()
    }

    pub fn tentative(&self) -> Option<&TentativeConfig> {
        self.tentative.as_ref()
    }

    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            joined: self.active.is_some(),
            address: self.active.map(|a| a.address),
            base_nonce: self.active.map(|a| a.base_nonce),
            pending_wave: self.tentative.is_some(),
            children: self.children.len(),
            routes: self.routes.len(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn into_platform(self) -> P {
        self.platform
    }

    /// The wave currently accepting handshake traffic: the tentative
    /// configuration if one is open, else the active one.
    fn wave(&self) -> Option<(u32, Neighbor, u32)> {
        if let Some(t) = self.tentative {
            Some((t.base_nonce, t.to_base, t.child_nonce))
        } else {
            self.active
                .map(|a| (a.base_nonce, a.to_base, a.child_nonce))
        }
    }

    fn drop_frame(&mut self, frame_type: Option<FrameType>, reason: DropReason) {
        trace!(?frame_type, %reason, "dropping frame");
        match reason {
            DropReason::Malformed => self.stats.dropped_malformed += 1,
            DropReason::InvalidSource => self.stats.dropped_invalid_source += 1,
            DropReason::ForeignNetwork => self.stats.dropped_foreign_network += 1,
            DropReason::BadHmac => self.stats.dropped_bad_hmac += 1,
            DropReason::DuplicateBeacon => self.stats.dropped_duplicate_beacon += 1,
            DropReason::TableFull => self.stats.dropped_table_full += 1,
            DropReason::Unroutable => self.stats.dropped_unroutable += 1,
        }
    }
}

impl<P> MeshNode<P>
where
    P: LinkDriver + EntropySource + CommandHandler,
{
    /// Feed one received L2 frame into the engine.
    ///
    /// `mac` must be the true source MAC; L2 drivers that received a
    /// broadcast substitute the sender's address. The call runs to
    /// completion, emitting any response frames through the platform before
    /// returning.
    pub fn process_incoming_packet(&mut self, frame: &[u8], iface: InterfaceId, mac: MacAddr) {
        self.stats.frames_rx += 1;
        if mac == BROADCAST_MAC {
            self.drop_frame(None, DropReason::InvalidSource);
            return;
        }
        let parsed = match Frame::parse(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                trace!(%err, "unparseable frame");
                self.drop_frame(None, DropReason::Malformed);
                return;
            }
        };
        match parsed {
            Frame::DataToBase { .. } => self.relay_to_base(frame),
            Frame::DataToDevice { dst, .. } => self.handle_data_to_device(frame, dst),
            Frame::Beacon {
                network_id,
                base_nonce,
            } => self.handle_beacon(frame, network_id, base_nonce, iface, mac),
            Frame::ChildResponse { child_nonce, .. } => {
                self.handle_child_response(frame, child_nonce, iface, mac)
            }
            Frame::ParentResponse { .. } => self.relay_parent_response(frame),
            Frame::AssignAddress {
                child_nonce,
                address,
                max_route,
                ..
            } => self.handle_assign_address(frame, child_nonce, address, max_route),
        }
    }

    /// Send an L4 command to the base. Silently no-ops when not joined.
    pub fn send_command(&mut self, command: u8, data: &[u8]) {
        let active = match self.active {
            Some(active) => active,
            None => {
                trace!(command, "send_command while unjoined, dropping");
                return;
            }
        };
        if data.len() > MAX_DATA_LEN {
            trace!(command, len = data.len(), "command data too long for one frame");
            return;
        }
        let frame = Frame::DataToBase {
            src: active.address,
            command,
            data: data.to_vec(),
        }
        .encode();
        self.transmit(&frame, active.to_base);
    }

    /// Send the command-0 device-info report to the base. Invoked
    /// automatically on join and on request.
    pub fn send_device_info(&mut self) {
        let info = DeviceInfo {
            device_type: self.config.identity.device_type,
            device_unique_id: self.config.identity.device_unique_id,
        };
        self.send_command(DEVICE_INFO_COMMAND, &info.to_bytes());
    }

    fn transmit(&mut self, frame: &[u8], to: Neighbor) {
        self.stats.frames_tx += 1;
        self.platform.send_packet(frame, to.iface, to.mac);
    }

    fn forward(&mut self, frame: &[u8], to: Neighbor) {
        self.stats.frames_forwarded += 1;
        self.transmit(frame, to);
    }

    fn handle_beacon(
        &mut self,
        frame: &[u8],
        network_id: u16,
        base_nonce: u32,
        iface: InterfaceId,
        mac: MacAddr,
    ) {
        if network_id != self.config.identity.network_id {
            self.drop_frame(Some(FrameType::Beacon), DropReason::ForeignNetwork);
            return;
        }
        // One handshake round per wave: the nonce of the wave being
        // processed (tentative) and of the wave already joined (active)
        // both count as seen.
        let seen = self.tentative.map(|t| t.base_nonce) == Some(base_nonce)
            || self.active.map(|a| a.base_nonce) == Some(base_nonce);
        if seen {
            self.drop_frame(Some(FrameType::Beacon), DropReason::DuplicateBeacon);
            return;
        }

        let child_nonce = self.platform.random_u32();
        self.tentative = Some(TentativeConfig {
            base_nonce,
            to_base: Neighbor::new(iface, mac),
            child_nonce,
        });
        // Rows left over from a superseded wave can never be addressed
        // again; their nonces verify under a key that no longer exists.
        self.children.clear();
        debug!(base_nonce, iface, mac, "new beacon wave, tentative config opened");

        // Propagate the wave first, then announce ourselves upstream.
        for out_iface in 0..self.config.num_interfaces {
            self.stats.frames_tx += 1;
            self.platform.send_packet(frame, out_iface, BROADCAST_MAC);
        }
        let key = keys::to_base_key(base_nonce, self.config.identity.network_key);
        let mut response = Frame::ChildResponse {
            child_nonce,
            hmac: 0,
        }
        .encode();
        keys::seal(&mut response, &key);
        self.transmit(&response, Neighbor::new(iface, mac));
    }

    fn handle_child_response(
        &mut self,
        frame: &[u8],
        child_nonce: u32,
        iface: InterfaceId,
        mac: MacAddr,
    ) {
        let (base_nonce, to_base, my_child_nonce) = match self.wave() {
            Some(wave) => wave,
            None => {
                self.drop_frame(Some(FrameType::ChildResponse), DropReason::BadHmac);
                return;
            }
        };
        let key = keys::to_base_key(base_nonce, self.config.identity.network_key);
        if !keys::verify(frame, &key) {
            self.drop_frame(Some(FrameType::ChildResponse), DropReason::BadHmac);
            return;
        }
        if self.children.is_full() {
            self.drop_frame(Some(FrameType::ChildResponse), DropReason::TableFull);
            return;
        }
        self.children.insert(ChildEntry {
            child_nonce,
            link: Neighbor::new(iface, mac),
        });
        debug!(child_nonce, iface, mac, "registered prospective child");

        let mut response = Frame::ParentResponse {
            child_nonce,
            parent_nonce: my_child_nonce,
            hmac: 0,
        }
        .encode();
        keys::seal(&mut response, &key);
        self.transmit(&response, to_base);
    }

    /// Parent responses are consumed by the base alone; intermediates relay
    /// them verbatim without verifying.
    fn relay_parent_response(&mut self, frame: &[u8]) {
        match self.wave() {
            Some((_, to_base, _)) => self.forward(frame, to_base),
            None => self.drop_frame(Some(FrameType::ParentResponse), DropReason::Unroutable),
        }
    }

    fn handle_assign_address(
        &mut self,
        frame: &[u8],
        child_nonce: u32,
        address: u8,
        max_route: u8,
    ) {
        let wave_nonce = match self.wave() {
            Some((nonce, _, _)) => nonce,
            None => {
                self.drop_frame(Some(FrameType::AssignAddress), DropReason::BadHmac);
                return;
            }
        };
        let key = keys::to_device_key(child_nonce, wave_nonce, self.config.identity.network_key);
        if !keys::verify(frame, &key) {
            self.drop_frame(Some(FrameType::AssignAddress), DropReason::BadHmac);
            return;
        }

        // Addressed to us: cut over to the new configuration.
        if let Some(tentative) = self.tentative {
            if child_nonce == tentative.child_nonce {
                self.promote(tentative, address);
                return;
            }
        }
        // A repeated assignment for the wave we already joined; refresh the
        // address and reply again. Command 0 is idempotent.
        if let Some(active) = self.active {
            if self.tentative.is_none() && child_nonce == active.child_nonce {
                self.active = Some(ActiveConfig { address, ..active });
                debug!(address, "self assignment repeated");
                self.send_device_info();
                return;
            }
        }

        // Addressed to one of our pending children: consume the child row
        // into the routing table and pass the frame along.
        if self.children.contains(child_nonce) {
            if self.routes.is_full() {
                // Leave the child row alone as well; a later wave gets a
                // fresh chance.
                self.drop_frame(Some(FrameType::AssignAddress), DropReason::TableFull);
                return;
            }
            if let Some(entry) = self.children.take(child_nonce) {
                let inserted = self.routes.insert(RouteEntry {
                    address,
                    max_route,
                    link: entry.link,
                });
                debug_assert!(inserted);
                debug!(
                    child_nonce,
                    address, max_route, "child addressed, route installed"
                );
                self.forward(frame, entry.link);
            }
            return;
        }

        // Deeper in the tree: route by the assigned address.
        match self.routes.lookup(address).map(|r| r.link) {
            Some(link) => self.forward(frame, link),
            None => self.drop_frame(Some(FrameType::AssignAddress), DropReason::Unroutable),
        }
    }

    fn promote(&mut self, tentative: TentativeConfig, address: u8) {
        // Routes from the previous configuration describe an address plan
        // that no longer exists. Child rows stay: in BFS assignment order
        // our children are addressed after us, within this same wave.
        self.routes.clear();
        self.active = Some(ActiveConfig {
            base_nonce: tentative.base_nonce,
            to_base: tentative.to_base,
            address,
            child_nonce: tentative.child_nonce,
        });
        self.tentative = None;
        debug!(
            address,
            base_nonce = tentative.base_nonce,
            "joined: tentative configuration promoted"
        );
        self.send_device_info();
    }

    fn relay_to_base(&mut self, frame: &[u8]) {
        match self.active {
            Some(active) => self.forward(frame, active.to_base),
            None => self.drop_frame(Some(FrameType::DataToBase), DropReason::Unroutable),
        }
    }

    fn handle_data_to_device(&mut self, frame: &[u8], dst: u8) {
        if self.my_address() == Some(dst) {
            // Strip the type and address bytes; the rest is the L4 payload.
            self.deliver_l4(&frame[2..]);
            return;
        }
        match self.routes.lookup(dst).map(|r| r.link) {
            Some(link) => self.forward(frame, link),
            None => self.drop_frame(Some(FrameType::DataToDevice), DropReason::Unroutable),
        }
    }

    fn deliver_l4(&mut self, payload: &[u8]) {
        self.stats.commands_rx += 1;
        let command = payload[0];
        if command == DEVICE_INFO_COMMAND && payload.len() >= DeviceInfo::LEN {
            self.send_device_info();
        } else {
            self.platform.on_command_received(command, &payload[1..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{BEACON_LEN, CHILD_RESPONSE_LEN};
    use std::collections::VecDeque;

    const NETWORK_ID: u16 = 10101;
    const NETWORK_KEY: u32 = 80808;
    const DEVICE_TYPE: u32 = 0x0000_0011;
    const DEVICE_UNIQUE_ID: u32 = 0x0000_0022;
    const BASE_NONCE: u32 = 0x1111_1122;

    #[derive(Debug, Default)]
    struct TestPlatform {
        sent: Vec<(Vec<u8>, InterfaceId, MacAddr)>,
        nonces: VecDeque<u32>,
        commands: Vec<(u8, Vec<u8>)>,
    }

    impl TestPlatform {
        fn scripted(nonces: &[u32]) -> Self {
            Self {
                nonces: nonces.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl LinkDriver for TestPlatform {
        fn send_packet(&mut self, frame: &[u8], iface: InterfaceId, mac: MacAddr) {
            self.sent.push((frame.to_vec(), iface, mac));
        }
    }

    impl EntropySource for TestPlatform {
        fn random_u32(&mut self) -> u32 {
            self.nonces.pop_front().expect("test ran out of scripted nonces")
        }
    }

    impl CommandHandler for TestPlatform {
        fn on_command_received(&mut self, command: u8, data: &[u8]) {
            self.commands.push((command, data.to_vec()));
        }
    }

    fn test_node(nonces: &[u32]) -> MeshNode<TestPlatform> {
        let identity = NodeIdentity {
            network_id: NETWORK_ID,
            network_key: NETWORK_KEY,
            device_type: DEVICE_TYPE,
            device_unique_id: DEVICE_UNIQUE_ID,
        };
        MeshNode::new(NodeConfig::new(identity), TestPlatform::scripted(nonces))
    }

    fn beacon(base_nonce: u32) -> Vec<u8> {
        Frame::Beacon {
            network_id: NETWORK_ID,
            base_nonce,
        }
        .encode()
    }

    fn sealed_child_response(child_nonce: u32, base_nonce: u32) -> Vec<u8> {
        let mut frame = Frame::ChildResponse {
            child_nonce,
            hmac: 0,
        }
        .encode();
        keys::seal(&mut frame, &keys::to_base_key(base_nonce, NETWORK_KEY));
        frame
    }

    fn sealed_assign(child_nonce: u32, address: u8, max_route: u8, base_nonce: u32) -> Vec<u8> {
        let mut frame = Frame::AssignAddress {
            child_nonce,
            address,
            max_route,
            hmac: 0,
        }
        .encode();
        keys::seal(
            &mut frame,
            &keys::to_device_key(child_nonce, base_nonce, NETWORK_KEY),
        );
        frame
    }

    fn data_to_device(dst: u8, command: u8, data: &[u8]) -> Vec<u8> {
        Frame::DataToDevice {
            dst,
            command,
            data: data.to_vec(),
        }
        .encode()
    }

    /// S1: node with scripted nonce hears a beacon and answers.
    fn start_wave(node: &mut MeshNode<TestPlatform>) {
        node.process_incoming_packet(&beacon(BASE_NONCE), 0, 1);
    }

    /// S2 on top of S1: the base addresses the node itself.
    fn join(node: &mut MeshNode<TestPlatform>, address: u8) {
        start_wave(node);
        let nonce = node.tentative().unwrap().child_nonce;
        node.process_incoming_packet(&sealed_assign(nonce, address, address, BASE_NONCE), 0, 1);
        assert_eq!(node.my_address(), Some(address));
        node.platform_mut().sent.clear();
    }

    #[test]
    fn test_lone_device_answers_beacon() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);

        let tentative = node.tentative().unwrap();
        assert_eq!(tentative.base_nonce, BASE_NONCE);
        assert_eq!(tentative.to_base, Neighbor::new(0, 1));
        assert_eq!(tentative.child_nonce, 0x5555_0001);
        assert!(!node.is_joined());

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 2);

        // Rebroadcast first, verbatim, to the broadcast MAC.
        let (rebroadcast, iface, mac) = &sent[0];
        assert_eq!(rebroadcast, &beacon(BASE_NONCE));
        assert_eq!((*iface, *mac), (0, BROADCAST_MAC));

        // Then the child response, unicast to the prospective parent.
        let (response, iface, mac) = &sent[1];
        assert_eq!((*iface, *mac), (0, 1));
        assert_eq!(response.len(), CHILD_RESPONSE_LEN);
        match Frame::parse(response).unwrap() {
            Frame::ChildResponse { child_nonce, .. } => assert_eq!(child_nonce, 0x5555_0001),
            other => panic!("expected child response, got {:?}", other),
        }
        assert!(keys::verify(
            response,
            &keys::to_base_key(BASE_NONCE, NETWORK_KEY)
        ));
    }

    #[test]
    fn test_beacon_rebroadcast_covers_all_interfaces() {
        let identity = NodeIdentity {
            network_id: NETWORK_ID,
            network_key: NETWORK_KEY,
            device_type: DEVICE_TYPE,
            device_unique_id: DEVICE_UNIQUE_ID,
        };
        let config = NodeConfig::new(identity).with_interfaces(3);
        let mut node = MeshNode::new(config, TestPlatform::scripted(&[7]));
        node.process_incoming_packet(&beacon(BASE_NONCE), 1, 4);

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 4);
        for (iface, frame) in sent.iter().take(3).enumerate() {
            assert_eq!(frame.0, beacon(BASE_NONCE));
            assert_eq!((frame.1, frame.2), (iface as u8, BROADCAST_MAC));
        }
        // Response goes back out the arrival interface.
        assert_eq!((sent[3].1, sent[3].2), (1, 4));
    }

    #[test]
    fn test_self_assignment_promotes_and_reports() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.platform_mut().sent.clear();

        node.process_incoming_packet(&sealed_assign(0x5555_0001, 100, 100, BASE_NONCE), 0, 1);

        assert_eq!(node.my_address(), Some(100));
        assert!(node.tentative().is_none());
        let active = node.active().unwrap();
        assert_eq!(active.base_nonce, BASE_NONCE);
        assert_eq!(active.to_base, Neighbor::new(0, 1));
        assert_eq!(active.child_nonce, 0x5555_0001);

        // Exactly one frame: the command-0 report, 8-byte body.
        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        let (report, iface, mac) = &sent[0];
        assert_eq!((*iface, *mac), (0, 1));
        match Frame::parse(report).unwrap() {
            Frame::DataToBase { src, command, data } => {
                assert_eq!(src, 100);
                assert_eq!(command, DEVICE_INFO_COMMAND);
                assert_eq!(data.len(), DeviceInfo::LEN);
                let info = DeviceInfo::from_bytes(&data).unwrap();
                assert_eq!(info.device_type, DEVICE_TYPE);
                assert_eq!(info.device_unique_id, DEVICE_UNIQUE_ID);
            }
            other => panic!("expected data-to-base, got {:?}", other),
        }
    }

    #[test]
    fn test_child_registration() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.platform_mut().sent.clear();

        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);

        assert_eq!(node.children().len(), 1);
        assert!(node.children().contains(2));

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        let (response, iface, mac) = &sent[0];
        assert_eq!((*iface, *mac), (0, 1));
        match Frame::parse(response).unwrap() {
            Frame::ParentResponse {
                child_nonce,
                parent_nonce,
                ..
            } => {
                assert_eq!(child_nonce, 2);
                assert_eq!(parent_nonce, 0x5555_0001);
            }
            other => panic!("expected parent response, got {:?}", other),
        }
        assert!(keys::verify(
            response,
            &keys::to_base_key(BASE_NONCE, NETWORK_KEY)
        ));
    }

    #[test]
    fn test_child_assignment_moves_row_and_forwards() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.platform_mut().sent.clear();

        let assign = sealed_assign(2, 101, 120, BASE_NONCE);
        node.process_incoming_packet(&assign, 0, 1);

        assert!(node.children().is_empty());
        let route = node.routes().lookup(110).unwrap();
        assert_eq!(route.address, 101);
        assert_eq!(route.max_route, 120);
        assert_eq!(route.link, Neighbor::new(0, 2));

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (assign, 0, 2));
    }

    #[test]
    fn test_tree_routing_forwards_data() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.process_incoming_packet(&sealed_assign(2, 101, 120, BASE_NONCE), 0, 1);
        node.platform_mut().sent.clear();

        let data = data_to_device(115, 7, &[1, 2, 3]);
        node.process_incoming_packet(&data, 0, 1);

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (data, 0, 2));
        assert_eq!(node.stats().frames_forwarded, 2); // assign + data
    }

    #[test]
    fn test_unknown_destination_drops() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.platform_mut().sent.clear();

        node.process_incoming_packet(&data_to_device(200, 7, &[]), 0, 1);
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_unroutable, 1);
    }

    #[test]
    fn test_foreign_network_beacon_is_inert() {
        let mut node = test_node(&[1]);
        let foreign = Frame::Beacon {
            network_id: NETWORK_ID + 1,
            base_nonce: BASE_NONCE,
        }
        .encode();
        node.process_incoming_packet(&foreign, 0, 1);

        assert!(node.tentative().is_none());
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_foreign_network, 1);
        // The nonce was never drawn.
        assert_eq!(node.platform().nonces.len(), 1);
    }

    #[test]
    fn test_beacon_dedup_one_round_per_wave() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        assert_eq!(node.platform().sent.len(), 2);

        node.process_incoming_packet(&beacon(BASE_NONCE), 0, 3);
        assert_eq!(node.platform().sent.len(), 2);
        assert_eq!(node.stats().dropped_duplicate_beacon, 1);
        // The first parent won; the duplicate did not steal the upstream hop.
        assert_eq!(node.tentative().unwrap().to_base, Neighbor::new(0, 1));
    }

    #[test]
    fn test_beacon_dedup_includes_active_wave() {
        let mut node = test_node(&[0x5555_0001]);
        join(&mut node, 100);

        node.process_incoming_packet(&beacon(BASE_NONCE), 0, 1);
        assert!(node.tentative().is_none());
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_duplicate_beacon, 1);
    }

    #[test]
    fn test_hmac_forgery_is_inert() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.platform_mut().sent.clear();

        let mut forged = sealed_child_response(2, BASE_NONCE);
        forged[5] ^= 0x01; // tamper with the tag
        node.process_incoming_packet(&forged, 0, 2);

        let mut forged = sealed_child_response(2, BASE_NONCE);
        forged[1] ^= 0x80; // tamper with the nonce
        node.process_incoming_packet(&forged, 0, 2);

        let nonce = node.tentative().unwrap().child_nonce;
        let mut forged = sealed_assign(nonce, 100, 100, BASE_NONCE);
        forged[5] ^= 0x01; // tamper with the address
        node.process_incoming_packet(&forged, 0, 1);

        assert!(node.children().is_empty());
        assert!(!node.is_joined());
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_bad_hmac, 3);
    }

    #[test]
    fn test_handshake_frames_without_wave_are_dropped() {
        let mut node = test_node(&[]);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.process_incoming_packet(&sealed_assign(2, 101, 120, BASE_NONCE), 0, 1);
        let parent_response = Frame::ParentResponse {
            child_nonce: 2,
            parent_nonce: 3,
            hmac: 0,
        }
        .encode();
        node.process_incoming_packet(&parent_response, 0, 2);

        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_bad_hmac, 2);
        assert_eq!(node.stats().dropped_unroutable, 1);
    }

    #[test]
    fn test_child_table_capacity_drops_overflow() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.platform_mut().sent.clear();

        for nonce in 1..=5u32 {
            node.process_incoming_packet(&sealed_child_response(nonce, BASE_NONCE), 0, 10 + nonce as u8);
        }
        assert_eq!(node.children().len(), 5);
        assert_eq!(node.platform().sent.len(), 5);

        node.process_incoming_packet(&sealed_child_response(6, BASE_NONCE), 0, 16);
        assert_eq!(node.children().len(), 5);
        assert_eq!(node.platform().sent.len(), 5);
        assert_eq!(node.stats().dropped_table_full, 1);
    }

    #[test]
    fn test_routing_table_overflow_leaves_tables_untouched() {
        let identity = NodeIdentity {
            network_id: NETWORK_ID,
            network_key: NETWORK_KEY,
            device_type: DEVICE_TYPE,
            device_unique_id: DEVICE_UNIQUE_ID,
        };
        let config = NodeConfig::new(identity).with_capacities(5, 1);
        let mut node = MeshNode::new(config, TestPlatform::scripted(&[0x5555_0001]));
        node.process_incoming_packet(&beacon(BASE_NONCE), 0, 1);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.process_incoming_packet(&sealed_child_response(3, BASE_NONCE), 0, 3);
        node.platform_mut().sent.clear();

        node.process_incoming_packet(&sealed_assign(2, 101, 110, BASE_NONCE), 0, 1);
        assert_eq!(node.routes().len(), 1);

        node.process_incoming_packet(&sealed_assign(3, 111, 120, BASE_NONCE), 0, 1);
        assert_eq!(node.routes().len(), 1);
        // The pending child row survives the refused insertion.
        assert!(node.children().contains(3));
        assert_eq!(node.stats().dropped_table_full, 1);
        // Only the first assignment was forwarded.
        assert_eq!(node.platform().sent.len(), 1);
    }

    #[test]
    fn test_routing_intervals_stay_disjoint() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        for nonce in 2..=4u32 {
            node.process_incoming_packet(&sealed_child_response(nonce, BASE_NONCE), 0, nonce as u8);
        }
        node.process_incoming_packet(&sealed_assign(2, 101, 110, BASE_NONCE), 0, 1);
        node.process_incoming_packet(&sealed_assign(3, 111, 120, BASE_NONCE), 0, 1);
        node.process_incoming_packet(&sealed_assign(4, 121, 121, BASE_NONCE), 0, 1);

        let routes: Vec<_> = node.routes().iter().collect();
        assert_eq!(routes.len(), 3);
        for (i, a) in routes.iter().enumerate() {
            for b in routes.iter().skip(i + 1) {
                assert!(
                    a.max_route < b.address || b.max_route < a.address,
                    "overlapping ranges {:?} and {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_assign_for_grandchild_tree_routes() {
        let mut node = test_node(&[0x5555_0001]);
        start_wave(&mut node);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.process_incoming_packet(&sealed_assign(2, 101, 120, BASE_NONCE), 0, 1);
        node.platform_mut().sent.clear();

        // Nonce 99 is unknown here; the frame rides the routing table on its
        // assigned address.
        let assign = sealed_assign(99, 115, 118, BASE_NONCE);
        node.process_incoming_packet(&assign, 0, 1);

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (assign, 0, 2));
        assert_eq!(node.routes().len(), 1);
    }

    #[test]
    fn test_data_to_base_relays_upstream() {
        let mut node = test_node(&[0x5555_0001]);
        join(&mut node, 100);

        let frame = Frame::DataToBase {
            src: 115,
            command: 9,
            data: vec![1],
        }
        .encode();
        node.process_incoming_packet(&frame, 0, 2);

        let sent = &node.platform().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (frame, 0, 1));
    }

    #[test]
    fn test_data_to_base_dropped_when_unjoined() {
        let mut node = test_node(&[]);
        let frame = Frame::DataToBase {
            src: 115,
            command: 9,
            data: vec![],
        }
        .encode();
        node.process_incoming_packet(&frame, 0, 2);
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_unroutable, 1);
    }

    #[test]
    fn test_local_delivery_and_l7_dispatch() {
        let mut node = test_node(&[0x5555_0001]);
        join(&mut node, 100);

        node.process_incoming_packet(&data_to_device(100, 7, &[1, 2, 3]), 0, 1);
        assert_eq!(node.platform().commands, vec![(7, vec![1, 2, 3])]);
        assert_eq!(node.stats().commands_rx, 1);
        assert!(node.platform().sent.is_empty());
    }

    #[test]
    fn test_command_zero_round_trip() {
        let mut node = test_node(&[0x5555_0001]);
        join(&mut node, 100);

        // A full-length command 0 is answered, not handed to L7.
        node.process_incoming_packet(&data_to_device(100, 0, &[0; 7]), 0, 1);
        assert!(node.platform().commands.is_empty());
        assert_eq!(node.platform().sent.len(), 1);
        match Frame::parse(&node.platform().sent[0].0).unwrap() {
            Frame::DataToBase { command, data, .. } => {
                assert_eq!(command, DEVICE_INFO_COMMAND);
                assert_eq!(data.len(), DeviceInfo::LEN);
            }
            other => panic!("expected data-to-base, got {:?}", other),
        }

        // Repeated reception repeats the benign report.
        node.process_incoming_packet(&data_to_device(100, 0, &[0; 7]), 0, 1);
        assert_eq!(node.platform().sent.len(), 2);

        // A short command 0 goes to the application instead.
        node.process_incoming_packet(&data_to_device(100, 0, &[1, 2]), 0, 1);
        assert_eq!(node.platform().commands, vec![(0, vec![1, 2])]);
    }

    #[test]
    fn test_send_command_is_noop_when_unjoined() {
        let mut node = test_node(&[]);
        node.send_command(5, &[1, 2, 3]);
        assert!(node.platform().sent.is_empty());
    }

    #[test]
    fn test_broadcast_source_mac_is_rejected() {
        let mut node = test_node(&[1]);
        node.process_incoming_packet(&beacon(BASE_NONCE), 0, BROADCAST_MAC);
        assert!(node.tentative().is_none());
        assert!(node.platform().sent.is_empty());
        assert_eq!(node.stats().dropped_invalid_source, 1);
    }

    #[test]
    fn test_malformed_frames_are_counted() {
        let mut node = test_node(&[1]);
        node.process_incoming_packet(&[0x02, 0x75], 0, 1); // truncated
        node.process_incoming_packet(&[0x0E, 0, 0], 0, 1); // unknown type
        let mut long_beacon = beacon(BASE_NONCE);
        long_beacon.push(0);
        node.process_incoming_packet(&long_beacon, 0, 1); // length mismatch
        assert_eq!(long_beacon.len(), BEACON_LEN + 1);

        assert_eq!(node.stats().dropped_malformed, 3);
        assert!(node.platform().sent.is_empty());
    }

    #[test]
    fn test_rejoin_replaces_configuration() {
        let mut node = test_node(&[0x5555_0001, 0x6666_0001]);
        join(&mut node, 100);
        node.process_incoming_packet(&sealed_child_response(2, BASE_NONCE), 0, 2);
        node.process_incoming_packet(&sealed_assign(2, 101, 120, BASE_NONCE), 0, 1);
        assert_eq!(node.routes().len(), 1);
        node.platform_mut().sent.clear();

        // A fresh wave arrives through a different neighbor.
        let new_nonce = 0x2222_3344;
        node.process_incoming_packet(&beacon(new_nonce), 0, 9);
        let tentative = node.tentative().unwrap();
        assert_eq!(tentative.base_nonce, new_nonce);
        assert_eq!(tentative.to_base, Neighbor::new(0, 9));
        // Still operating under the old configuration until promoted.
        assert_eq!(node.my_address(), Some(100));
        assert_eq!(node.routes().len(), 1);
        // Stale child rows from the old wave are gone.
        assert!(node.children().is_empty());

        node.process_incoming_packet(
            &sealed_assign(0x6666_0001, 50, 60, new_nonce),
            0,
            9,
        );
        assert_eq!(node.my_address(), Some(50));
        assert_eq!(node.active().unwrap().base_nonce, new_nonce);
        assert_eq!(node.active().unwrap().to_base, Neighbor::new(0, 9));
        // Routes of the old address plan were flushed at cut-over.
        assert!(node.routes().is_empty());
    }

    #[test]
    fn test_repeated_self_assignment_is_idempotent() {
        let mut node = test_node(&[0x5555_0001]);
        join(&mut node, 100);

        node.process_incoming_packet(&sealed_assign(0x5555_0001, 100, 100, BASE_NONCE), 0, 1);
        assert_eq!(node.my_address(), Some(100));
        // Answered with another benign command-0 report.
        assert_eq!(node.platform().sent.len(), 1);
    }

    #[test]
    fn test_summary_reflects_state() {
        let mut node = test_node(&[0x5555_0001]);
        let summary = node.summary();
        assert!(!summary.joined);
        assert_eq!(summary.address, None);

        join(&mut node, 100);
        let summary = node.summary();
        assert!(summary.joined);
        assert_eq!(summary.address, Some(100));
        assert_eq!(summary.base_nonce, Some(BASE_NONCE));
        assert!(!summary.pending_wave);
    }
}
