//! Repeater protocol FSM state (§4.5) and the peer table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use hblink4_config::TgSet;
use hblink4_wire::RadioId;

use crate::errors::{CoreError, CoreResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    LoginReceived,
    ChallengeSent { salt: [u8; 4] },
    Authenticated,
    WaitingConfig,
    Configured,
    Connected,
}

#[derive(Clone, Debug)]
pub struct Peer {
    pub radio_id: RadioId,
    pub address: SocketAddr,
    pub state: PeerState,
    pub callsign: String,
    pub passphrase: String,
    pub slot1_talkgroups: TgSet,
    pub slot2_talkgroups: TgSet,
    pub missed_pings: u32,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl Peer {
    pub fn new(radio_id: RadioId, address: SocketAddr, now: Instant) -> Self {
        Self {
            radio_id,
            address,
            state: PeerState::LoginReceived,
            callsign: String::new(),
            passphrase: String::new(),
            slot1_talkgroups: TgSet::Wildcard,
            slot2_talkgroups: TgSet::Wildcard,
            missed_pings: 0,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, PeerState::Connected)
    }

    pub fn talkgroups_for(&self, slot: hblink4_wire::Slot) -> &TgSet {
        match slot {
            hblink4_wire::Slot::One => &self.slot1_talkgroups,
            hblink4_wire::Slot::Two => &self.slot2_talkgroups,
        }
    }
}

/// Connected-peer table, keyed by `radio_id` (§3 Peer invariant: unique
/// radio_id across all peers and outbound connections — uniqueness against
/// outbound `our_id`s is enforced by the caller holding both tables).
#[derive(Default)]
pub struct PeerTable {
    by_radio_id: HashMap<RadioId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: Peer) {
        self.by_radio_id.insert(peer.radio_id, peer);
    }

    pub fn get(&self, radio_id: RadioId) -> Option<&Peer> {
        self.by_radio_id.get(&radio_id)
    }

    pub fn get_mut(&mut self, radio_id: RadioId) -> Option<&mut Peer> {
        self.by_radio_id.get_mut(&radio_id)
    }

    pub fn remove(&mut self, radio_id: RadioId) -> Option<Peer> {
        self.by_radio_id.remove(&radio_id)
    }

    pub fn contains(&self, radio_id: RadioId) -> bool {
        self.by_radio_id.contains_key(&radio_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.by_radio_id.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.by_radio_id.values_mut()
    }

    pub fn connected_ids(&self) -> impl Iterator<Item = RadioId> + '_ {
        self.by_radio_id.values().filter(|p| p.is_connected()).map(|p| p.radio_id)
    }

    /// §3 Peer invariant / §4.5 source-address binding: once `Connected`, a
    /// datagram claiming this `radio_id` from a different address is rejected.
    pub fn check_source_address(&self, radio_id: RadioId, from: SocketAddr) -> CoreResult<()> {
        match self.by_radio_id.get(&radio_id) {
            Some(peer) if peer.is_connected() && peer.address != from => {
                Err(CoreError::AddressMismatch(radio_id.as_u32()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn source_address_mismatch_rejected_once_connected() {
        let mut table = PeerTable::new();
        let id = RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]);
        let mut peer = Peer::new(id, addr(1000), Instant::now());
        peer.state = PeerState::Connected;
        table.insert(peer);

        assert!(table.check_source_address(id, addr(1000)).is_ok());
        assert!(table.check_source_address(id, addr(2000)).is_err());
    }

    #[test]
    fn unauthenticated_peer_is_not_address_bound() {
        let mut table = PeerTable::new();
        let id = RadioId::from_be_bytes([0, 4, 0xC0, 0xAB]);
        table.insert(Peer::new(id, addr(1000), Instant::now()));
        assert!(table.check_source_address(id, addr(2000)).is_ok());
    }
}
