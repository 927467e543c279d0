//! JSON shapes for the event sink (§6 "Event sink" table).

use chrono::{DateTime, Utc};
use hblink4_config::TgSet;
use hblink4_core::{ConnectionType, CoreEvent, EndReason};
use serde::Serialize;

/// One event as written to the wire: the core's `Instant`-timed event plus
/// a wall-clock timestamp, since `CoreEvent` itself carries no clock state
/// (§3 "clock source"/Open Question 3 — `Instant` only, `DateTime<Utc>` is
/// strictly an outward-facing concern of this crate).
#[derive(Serialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn now(event: &CoreEvent) -> Self {
        Self { ts: Utc::now(), payload: EventPayload::from(event) }
    }
}

fn slot_str(slot: hblink4_wire::Slot) -> &'static str {
    match slot {
        hblink4_wire::Slot::One => "TS1",
        hblink4_wire::Slot::Two => "TS2",
    }
}

fn connection_type_str(ct: ConnectionType) -> &'static str {
    match ct {
        ConnectionType::Peer => "peer",
        ConnectionType::Outbound => "outbound",
    }
}

fn call_type_str(ct: hblink4_wire::CallType) -> &'static str {
    match ct {
        hblink4_wire::CallType::Group => "group",
        hblink4_wire::CallType::Private => "private",
    }
}

fn end_reason_str(reason: EndReason) -> &'static str {
    match reason {
        EndReason::Terminator => "terminator",
        EndReason::FastTerminator => "fast_terminator",
        EndReason::Timeout => "timeout",
        EndReason::PeerTimeout => "peer_timeout",
        EndReason::Contention => "contention",
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    RepeaterConnected {
        radio_id: u32,
        callsign: String,
        address: String,
        slot1_tgs: TgSet,
        slot2_tgs: TgSet,
    },
    RepeaterDisconnected {
        radio_id: u32,
        reason: &'static str,
    },
    RepeaterKeepalive {
        radio_id: u32,
        missed_pings: u32,
    },
    StreamStart {
        connection_type: &'static str,
        connection_id: u32,
        slot: &'static str,
        src_id: u32,
        dst_id: u32,
        stream_id: String,
        call_type: &'static str,
        assumed: bool,
    },
    StreamUpdate {
        connection_id: u32,
        slot: &'static str,
        stream_id: String,
        duration_ms: u64,
        packet_count: u64,
    },
    StreamEnd {
        connection_id: u32,
        slot: &'static str,
        stream_id: String,
        duration_ms: u64,
        packet_count: u64,
        end_reason: &'static str,
    },
    HangTimeExpired {
        connection_id: u32,
        slot: &'static str,
    },
}

impl From<&CoreEvent> for EventPayload {
    fn from(event: &CoreEvent) -> Self {
        match event {
            CoreEvent::RepeaterConnected { radio_id, callsign, address, slot1_tgs, slot2_tgs } => {
                EventPayload::RepeaterConnected {
                    radio_id: radio_id.as_u32(),
                    callsign: callsign.clone(),
                    address: address.to_string(),
                    slot1_tgs: slot1_tgs.clone(),
                    slot2_tgs: slot2_tgs.clone(),
                }
            }
            CoreEvent::RepeaterDisconnected { radio_id, reason } => {
                EventPayload::RepeaterDisconnected { radio_id: radio_id.as_u32(), reason }
            }
            CoreEvent::RepeaterKeepalive { radio_id, missed_pings } => {
                EventPayload::RepeaterKeepalive { radio_id: radio_id.as_u32(), missed_pings: *missed_pings }
            }
            CoreEvent::StreamStart { connection_type, connection_id, slot, src_id, dst_id, stream_id, call_type, assumed } => {
                EventPayload::StreamStart {
                    connection_type: connection_type_str(*connection_type),
                    connection_id: connection_id.as_u32(),
                    slot: slot_str(*slot),
                    src_id: src_id.as_u32(),
                    dst_id: *dst_id,
                    stream_id: stream_id.to_string(),
                    call_type: call_type_str(*call_type),
                    assumed: *assumed,
                }
            }
            CoreEvent::StreamUpdate { connection_id, slot, stream_id, duration_ms, packet_count } => {
                EventPayload::StreamUpdate {
                    connection_id: connection_id.as_u32(),
                    slot: slot_str(*slot),
                    stream_id: stream_id.to_string(),
                    duration_ms: *duration_ms,
                    packet_count: *packet_count,
                }
            }
            CoreEvent::StreamEnd { connection_id, slot, stream_id, duration_ms, packet_count, end_reason } => {
                EventPayload::StreamEnd {
                    connection_id: connection_id.as_u32(),
                    slot: slot_str(*slot),
                    stream_id: stream_id.to_string(),
                    duration_ms: *duration_ms,
                    packet_count: *packet_count,
                    end_reason: end_reason_str(*end_reason),
                }
            }
            CoreEvent::HangTimeExpired { connection_id, slot } => {
                EventPayload::HangTimeExpired { connection_id: connection_id.as_u32(), slot: slot_str(*slot) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hblink4_core::ConnectionType;
    use hblink4_wire::{CallType, RadioId, Slot, StreamId};

    #[test]
    fn stream_start_serializes_with_event_tag() {
        let event = CoreEvent::StreamStart {
            connection_type: ConnectionType::Peer,
            connection_id: RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]),
            slot: Slot::One,
            src_id: RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]),
            dst_id: 3120,
            stream_id: StreamId::from_be_bytes([0xAA, 0xAA, 0xAA, 0xAA]),
            call_type: CallType::Group,
            assumed: false,
        };
        let payload = EventPayload::from(&event);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event"], "stream_start");
        assert_eq!(json["dst_id"], 3120);
        assert_eq!(json["assumed"], false);
    }

    #[test]
    fn repeater_connected_serializes_tg_sets() {
        let event = CoreEvent::RepeaterConnected {
            radio_id: RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]),
            callsign: "W1AW".into(),
            address: "127.0.0.1:62031".parse().unwrap(),
            slot1_tgs: TgSet::Wildcard,
            slot2_tgs: TgSet::deny_all(),
        };
        let payload = EventPayload::from(&event);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["slot1_tgs"], "*");
        assert_eq!(json["slot2_tgs"], serde_json::json!([]));
    }

    #[test]
    fn event_wrapper_flattens_payload_alongside_a_timestamp() {
        let event = CoreEvent::RepeaterKeepalive {
            radio_id: RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]),
            missed_pings: 1,
        };
        let wrapped = Event::now(&event);
        let json = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(json["event"], "repeater_keepalive");
        assert!(json["ts"].is_string());
    }
}
