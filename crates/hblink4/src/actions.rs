//! The side effects a protocol handler wants performed, decoupled from the
//! actual socket and event-sink I/O (§5: handlers are pure between
//! suspension points).

use std::net::SocketAddr;

use hblink4_core::CoreEvent;
use hblink4_wire::{DmrdFrame, RadioId};

pub enum Action {
    /// Send a pre-encoded frame to an explicit address (used during login,
    /// before the peer has a settled identity to route by radio_id).
    SendTo { addr: SocketAddr, bytes: Vec<u8> },
    /// Send a pre-encoded frame to a known connected radio_id; the caller
    /// resolves this to the peer's or outbound's bound address/socket.
    SendToPeer { radio_id: RadioId, bytes: Vec<u8> },
    /// Forward a DMRD frame to every radio_id in the routing target set. Each
    /// target gets the frame re-encoded with its own radio_id as the
    /// `repeater_id` field (`DmrdFrame::retargeted`), not the source's.
    Forward { frame: DmrdFrame, targets: Vec<RadioId> },
    Emit(CoreEvent),
}
