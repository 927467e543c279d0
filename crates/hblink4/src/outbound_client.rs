//! Outbound client FSM (§4.7): the peer role, reversed. Drives one
//! [`OutboundConnection`] through login/challenge/config and into the ping
//! loop, over its own UDP socket.

use hblink4_core::outbound::{format_options, OutboundConnection, OutboundState};
use hblink4_wire::{Frame, RepeaterConfigInfo};
use tracing::{info, warn};

use crate::actions::Action;
use crate::auth;

fn our_config_info(outbound: &OutboundConnection) -> RepeaterConfigInfo {
    RepeaterConfigInfo {
        callsign: outbound.name.chars().take(8).collect(),
        rx_freq_hz: "000000000".into(),
        tx_freq_hz: "000000000".into(),
        tx_power: "00".into(),
        color_code: "1".into(),
        latitude: "0.0000".into(),
        longitude: "0.00000".into(),
        height_m: "0".into(),
        location: "hblink4".into(),
        description: "hblink4 outbound".into(),
        slots: "3".into(),
        url: String::new(),
        software_id: "hblink4".into(),
        package_id: env!("CARGO_PKG_VERSION").into(),
    }
}

/// Kick off (or resume) a connection attempt: call once a reconnect's
/// backoff delay has elapsed.
pub fn start_login(outbound: &mut OutboundConnection) -> Vec<Action> {
    outbound.state = OutboundState::LoginSent;
    vec![Action::SendToPeer { radio_id: outbound.our_id, bytes: Frame::Login { repeater_id: outbound.our_id }.encode() }]
}

/// Handle one frame received on this outbound's socket from the remote master.
pub fn handle_inbound(outbound: &mut OutboundConnection, frame: Frame) -> Vec<Action> {
    match (&outbound.state, frame) {
        (OutboundState::LoginSent, Frame::LoginAck { salt, .. }) => {
            let hash_hex = auth::challenge_hash(&salt, &outbound.password);
            outbound.state = OutboundState::ChallengeReceived { salt };
            vec![Action::SendToPeer {
                radio_id: outbound.our_id,
                bytes: Frame::AuthResponse { repeater_id: outbound.our_id, hash_hex }.encode(),
            }]
        }
        (OutboundState::ChallengeReceived { .. }, Frame::Ack { .. }) => {
            outbound.state = OutboundState::Authenticated;
            vec![Action::SendToPeer {
                radio_id: outbound.our_id,
                bytes: Frame::Config { repeater_id: outbound.our_id, info: our_config_info(outbound) }.encode(),
            }]
        }
        (OutboundState::Authenticated, Frame::Ack { .. }) => {
            outbound.state = OutboundState::ConfigSent;
            let options = format_options(&outbound.slot1_talkgroups, &outbound.slot2_talkgroups);
            vec![Action::SendToPeer {
                radio_id: outbound.our_id,
                bytes: Frame::Options { repeater_id: outbound.our_id, options }.encode(),
            }]
        }
        (OutboundState::ConfigSent, Frame::Ack { .. }) => {
            info!(name = %outbound.name, "outbound connected");
            outbound.state = OutboundState::Connected;
            outbound.on_connected();
            Vec::new()
        }
        (OutboundState::Connected, Frame::Pong { .. }) => {
            outbound.missed_pings = 0;
            Vec::new()
        }
        (_, Frame::Nak { .. }) => {
            warn!(name = %outbound.name, "outbound rejected by remote");
            outbound.on_disconnect();
            Vec::new()
        }
        (_, Frame::MasterClose { .. }) => {
            info!(name = %outbound.name, "remote closed outbound connection");
            outbound.on_disconnect();
            Vec::new()
        }
        (state, other) => {
            warn!(name = %outbound.name, ?state, ?other, "unexpected frame in outbound FSM, ignored");
            Vec::new()
        }
    }
}

/// Ping loop tick (§5 Timer wheel / §4.7): while connected, count this tick
/// as a missed ping and send `RPTPING`; `handle_inbound` resets the counter
/// to 0 once a `Pong` actually arrives. The caller sweeps for outbounds that
/// exceeded the threshold (mirrors `Server::tick_peer_timeouts`).
pub fn ping_tick(outbound: &mut OutboundConnection) -> Vec<Action> {
    if !outbound.is_connected() {
        return Vec::new();
    }
    outbound.missed_pings += 1;
    vec![Action::SendToPeer { radio_id: outbound.our_id, bytes: Frame::Ping { repeater_id: outbound.our_id }.encode() }]
}
