//! Repeater protocol FSM (§4.5): login, challenge, auth, configuration, and
//! the connected keepalive/options/disconnect loop.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use hblink4_core::{AccessMatcher, Peer, PeerState, PeerTable};
use hblink4_wire::{Frame, RadioId};
use tracing::{info, warn};

use crate::actions::Action;
use crate::auth;

/// Dispatch one non-DMRD frame arriving from `from` against the peer table.
/// DMRD frames are handled by the routing layer in `server.rs`, not here.
pub fn handle_frame(
    peers: &mut PeerTable,
    access: &AccessMatcher,
    reserved_ids: &HashSet<RadioId>,
    frame: Frame,
    from: SocketAddr,
    now: Instant,
) -> Vec<Action> {
    match frame {
        Frame::Login { repeater_id } => on_login(peers, reserved_ids, repeater_id, from, now),
        Frame::AuthResponse { repeater_id, hash_hex } => on_auth_response(peers, access, repeater_id, from, &hash_hex),
        Frame::Config { repeater_id, info } => on_config(peers, repeater_id, from, &info.callsign),
        Frame::Options { repeater_id, options } => on_options(peers, repeater_id, from, &options),
        Frame::Ping { repeater_id } => on_ping(peers, repeater_id, from, now),
        Frame::Disconnect { repeater_id } => on_disconnect(peers, repeater_id, from),
        Frame::StatusBeacon { repeater_id, .. } => {
            if peers.check_source_address(repeater_id, from).is_ok() {
                info!(radio_id = %repeater_id, "status beacon received");
            }
            Vec::new()
        }
        _ => {
            warn!("unexpected outbound-only frame received from {from}");
            Vec::new()
        }
    }
}

fn nak(radio_id: RadioId, addr: SocketAddr) -> Vec<Action> {
    vec![Action::SendTo { addr, bytes: Frame::Nak { repeater_id: radio_id }.encode() }]
}

fn on_login(peers: &mut PeerTable, reserved_ids: &HashSet<RadioId>, radio_id: RadioId, from: SocketAddr, now: Instant) -> Vec<Action> {
    if peers.contains(radio_id) || reserved_ids.contains(&radio_id) {
        warn!(radio_id = %radio_id, "login rejected: radio_id collision");
        return nak(radio_id, from);
    }

    let salt = auth::random_salt();
    let mut peer = Peer::new(radio_id, from, now);
    peer.state = PeerState::ChallengeSent { salt };
    peers.insert(peer);

    vec![Action::SendTo { addr: from, bytes: Frame::LoginAck { repeater_id: radio_id, salt }.encode() }]
}

fn on_auth_response(peers: &mut PeerTable, access: &AccessMatcher, radio_id: RadioId, from: SocketAddr, hash_hex: &[u8; 64]) -> Vec<Action> {
    let Some(peer) = peers.get_mut(radio_id) else {
        return nak(radio_id, from);
    };
    if peer.address != from {
        warn!(radio_id = %radio_id, "RPTK from wrong source address, dropped");
        return Vec::new();
    }
    let PeerState::ChallengeSent { salt } = peer.state else {
        warn!(radio_id = %radio_id, "RPTK in wrong state");
        return nak(radio_id, from);
    };

    let auth_result = access.authenticate(radio_id.as_u32(), &peer.callsign);
    let Ok(authorization) = auth_result else {
        warn!(radio_id = %radio_id, "authentication failed: no matching access rule");
        peers.remove(radio_id);
        let mut actions = nak(radio_id, from);
        actions.push(Action::Emit(hblink4_core::CoreEvent::RepeaterDisconnected { radio_id, reason: "auth_failed" }));
        return actions;
    };

    if !auth::verify(&salt, &authorization.passphrase, hash_hex) {
        warn!(radio_id = %radio_id, "authentication failed: hash mismatch");
        peers.remove(radio_id);
        let mut actions = nak(radio_id, from);
        actions.push(Action::Emit(hblink4_core::CoreEvent::RepeaterDisconnected { radio_id, reason: "auth_failed" }));
        return actions;
    }

    let peer = peers.get_mut(radio_id).expect("just looked up above");
    peer.passphrase = authorization.passphrase;
    peer.slot1_talkgroups = authorization.slot1_talkgroups;
    peer.slot2_talkgroups = authorization.slot2_talkgroups;
    peer.state = PeerState::WaitingConfig;

    vec![Action::SendTo { addr: from, bytes: Frame::Ack { repeater_id: radio_id }.encode() }]
}

fn on_config(peers: &mut PeerTable, radio_id: RadioId, from: SocketAddr, callsign: &str) -> Vec<Action> {
    let Some(peer) = peers.get_mut(radio_id) else {
        return nak(radio_id, from);
    };
    if peer.address != from || !matches!(peer.state, PeerState::WaitingConfig) {
        return Vec::new();
    }
    peer.callsign = callsign.trim().to_string();
    peer.state = PeerState::Connected;

    let mut actions = vec![Action::SendTo { addr: from, bytes: Frame::Ack { repeater_id: radio_id }.encode() }];
    actions.push(Action::Emit(hblink4_core::CoreEvent::RepeaterConnected {
        radio_id,
        callsign: peer.callsign.clone(),
        address: from,
        slot1_tgs: peer.slot1_talkgroups.clone(),
        slot2_tgs: peer.slot2_talkgroups.clone(),
    }));
    actions
}

fn on_options(peers: &mut PeerTable, radio_id: RadioId, from: SocketAddr, _options: &str) -> Vec<Action> {
    let Some(peer) = peers.get_mut(radio_id) else {
        return Vec::new();
    };
    if peer.address != from {
        return Vec::new();
    }
    vec![Action::SendTo { addr: from, bytes: Frame::Ack { repeater_id: radio_id }.encode() }]
}

fn on_ping(peers: &mut PeerTable, radio_id: RadioId, from: SocketAddr, now: Instant) -> Vec<Action> {
    let Some(peer) = peers.get_mut(radio_id) else {
        return Vec::new();
    };
    if peer.address != from {
        warn!(radio_id = %radio_id, "RPTPING from wrong source address, dropped");
        return Vec::new();
    }
    peer.missed_pings = 0;
    peer.last_activity = now;
    vec![Action::SendTo { addr: from, bytes: Frame::Pong { repeater_id: radio_id }.encode() }]
}

fn on_disconnect(peers: &mut PeerTable, radio_id: RadioId, from: SocketAddr) -> Vec<Action> {
    let Some(peer) = peers.get(radio_id) else {
        return Vec::new();
    };
    if peer.address != from {
        return Vec::new();
    }
    peers.remove(radio_id);
    vec![Action::Emit(hblink4_core::CoreEvent::RepeaterDisconnected { radio_id, reason: "client_disconnect" })]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hblink4_config::{AccessControlConfig, AuthenticationConfig, Policy, RepeaterConfigEntry, Rule, TgSet};

    fn matcher() -> AccessMatcher {
        let ac = AccessControlConfig {
            default_policy: Policy::Deny,
            authentication: AuthenticationConfig { rules: vec![Rule::RadioId { radio_id: 311100 }] },
            blacklist: vec![],
        };
        let entries = vec![RepeaterConfigEntry {
            match_rule: Rule::RadioId { radio_id: 311100 },
            slot1_talkgroups: TgSet::Wildcard,
            slot2_talkgroups: TgSet::Wildcard,
            passphrase: "secret".into(),
        }];
        AccessMatcher::new(&ac, &entries)
    }

    fn radio(n: u32) -> RadioId {
        RadioId::from_be_bytes(n.to_be_bytes())
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:62031".parse().unwrap()
    }

    #[test]
    fn login_then_valid_auth_reaches_waiting_config() {
        let mut peers = PeerTable::new();
        let access = matcher();
        let reserved = HashSet::new();
        let now = Instant::now();

        let actions = on_login(&mut peers, &reserved, radio(311100), addr(), now);
        assert_eq!(actions.len(), 1);
        let PeerState::ChallengeSent { salt } = peers.get(radio(311100)).unwrap().state else {
            panic!("expected challenge sent");
        };

        let hash = auth::challenge_hash(&salt, "secret");
        let actions = on_auth_response(&mut peers, &access, radio(311100), addr(), &hash);
        assert_eq!(actions.len(), 1);
        assert_eq!(peers.get(radio(311100)).unwrap().state, PeerState::WaitingConfig);
    }

    #[test]
    fn wrong_passphrase_destroys_peer_and_naks() {
        let mut peers = PeerTable::new();
        let access = matcher();
        let reserved = HashSet::new();
        let now = Instant::now();

        on_login(&mut peers, &reserved, radio(311100), addr(), now);
        let PeerState::ChallengeSent { salt } = peers.get(radio(311100)).unwrap().state else {
            panic!("expected challenge sent");
        };
        let hash = auth::challenge_hash(&salt, "wrong");
        let actions = on_auth_response(&mut peers, &access, radio(311100), addr(), &hash);

        assert!(peers.get(radio(311100)).is_none());
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Emit(hblink4_core::CoreEvent::RepeaterDisconnected { reason: "auth_failed", .. })
        )));
    }

    #[test]
    fn login_with_reserved_id_is_rejected() {
        let mut peers = PeerTable::new();
        let mut reserved = HashSet::new();
        reserved.insert(radio(311100));
        let actions = on_login(&mut peers, &reserved, radio(311100), addr(), Instant::now());
        assert!(peers.get(radio(311100)).is_none());
        assert_eq!(actions.len(), 1);
    }
}
