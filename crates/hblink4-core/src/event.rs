//! Event-sink payloads (§6 "Event sink"). The core produces these; the
//! `hblink4-events` crate owns turning them into JSON datagrams.

use std::net::SocketAddr;

use hblink4_config::TgSet;
use hblink4_wire::{CallType, RadioId, Slot, StreamId};

use crate::stream::EndReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    Peer,
    Outbound,
}

#[derive(Clone, Debug)]
pub enum CoreEvent {
    RepeaterConnected {
        radio_id: RadioId,
        callsign: String,
        address: SocketAddr,
        slot1_tgs: TgSet,
        slot2_tgs: TgSet,
    },
    RepeaterDisconnected {
        radio_id: RadioId,
        reason: &'static str,
    },
    RepeaterKeepalive {
        radio_id: RadioId,
        missed_pings: u32,
    },
    StreamStart {
        connection_type: ConnectionType,
        connection_id: RadioId,
        slot: Slot,
        src_id: RadioId,
        dst_id: u32,
        stream_id: StreamId,
        call_type: CallType,
        assumed: bool,
    },
    StreamUpdate {
        connection_id: RadioId,
        slot: Slot,
        stream_id: StreamId,
        duration_ms: u64,
        packet_count: u64,
    },
    StreamEnd {
        connection_id: RadioId,
        slot: Slot,
        stream_id: StreamId,
        duration_ms: u64,
        packet_count: u64,
        end_reason: EndReason,
    },
    HangTimeExpired {
        connection_id: RadioId,
        slot: Slot,
    },
}

/// Emit a `stream_update` roughly every `N` packets (§6: "every N packets, N≈60").
pub const STREAM_UPDATE_PACKET_INTERVAL: u64 = 60;
