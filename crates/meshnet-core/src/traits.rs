//! Capability seams between the protocol engine and its platform
//!
//! The engine owns no I/O, no entropy and no application logic; it is handed
//! a *platform* implementing the three traits below. Production firmware
//! wires them to real L2 drivers, a hardware RNG and the application; tests
//! and the simulator substitute deterministic fakes.

use crate::neighbor::{InterfaceId, MacAddr};

/// The L2 driver contract.
///
/// `mac == 0` means broadcast on that interface; a driver whose medium lacks
/// broadcast emulates it by unicasting to every known peer. Drivers must not
/// re-enter the engine from inside their transmit path: the engine calls
/// `send_packet` synchronously while processing an inbound frame.
pub trait LinkDriver {
    fn send_packet(&mut self, frame: &[u8], iface: InterfaceId, mac: MacAddr);
}

/// Source of 32-bit nonces. Must be cryptographically adequate in
/// production; the handshake leans on nonce unpredictability.
pub trait EntropySource {
    fn random_u32(&mut self) -> u32;
}

impl EntropySource for rand::rngs::ThreadRng {
    fn random_u32(&mut self) -> u32 {
        rand::Rng::gen(self)
    }
}

/// L7 dispatch: invoked for every received command other than a well-formed
/// command 0 (which the engine answers itself). The engine provides no
/// sequencing; handlers are expected to be idempotent.
pub trait CommandHandler {
    fn on_command_received(&mut self, command: u8, data: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_rng_entropy() {
        let mut rng = rand::thread_rng();
        // Three draws all equal is astronomically unlikely; catches a
        // constant-returning wiring mistake.
        let draws = [rng.random_u32(), rng.random_u32(), rng.random_u32()];
        assert!(!(draws[0] == draws[1] && draws[1] == draws[2]));
    }
}
