//! Ties the peer table, stream tracker, access matcher, outbound
//! connections and user cache into the single-threaded event loop driven by
//! `main.rs` (§5). Every method here is synchronous and side-effect-free
//! beyond its own state: I/O is expressed as [`Action`]s for the caller to
//! perform.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hblink4_config::{Config, TgSet};
use hblink4_core::{
    hang_time_duration, stream_timeout_duration, AccessMatcher, Candidate, ConnectionType, CoreEvent, EndReason, OptionsParseError,
    OutboundConnection, OutboundState, Peer, PeerTable, ScanOutcome, StreamTracker, UserCache,
};
use hblink4_wire::{Frame, RadioId, Slot};
use tracing::warn;

use crate::actions::Action;
use crate::dmrd_routing;
use crate::fsm;
use crate::outbound_client;

/// Where a connected radio_id's traffic should be delivered, resolved by
/// the caller to an actual socket (a peer listener reply address, or a
/// specific outbound's own socket).
pub enum Location {
    Peer(SocketAddr),
    Outbound(usize),
}

pub struct Server {
    pub peers: PeerTable,
    pub tracker: StreamTracker,
    pub access: AccessMatcher,
    pub user_cache: UserCache,
    pub outbounds: Vec<OutboundConnection>,
    reconnect_deadlines: Vec<Option<Instant>>,
    reserved_ids: HashSet<RadioId>,
    max_missed: u32,
    stream_timeout: Duration,
    stream_hang_time: Duration,
}

impl Server {
    pub fn new(config: &Config, user_cache: UserCache) -> Result<Self, OptionsParseError> {
        let access = AccessMatcher::from_config(config);
        let mut outbounds = Vec::new();
        let mut reserved_ids = HashSet::new();
        for oc in &config.outbound_connections {
            if !oc.enabled {
                continue;
            }
            let outbound = OutboundConnection::from_config(oc)?;
            reserved_ids.insert(outbound.our_id);
            outbounds.push(outbound);
        }
        let reconnect_deadlines = vec![None; outbounds.len()];

        Ok(Self {
            peers: PeerTable::new(),
            tracker: StreamTracker::new(),
            access,
            user_cache,
            outbounds,
            reconnect_deadlines,
            reserved_ids,
            max_missed: config.global.max_missed,
            stream_timeout: stream_timeout_duration(config.global.stream_timeout),
            stream_hang_time: hang_time_duration(config.global.stream_hang_time),
        })
    }

    pub fn locate(&self, radio_id: RadioId) -> Option<Location> {
        if let Some(peer) = self.peers.get(radio_id) {
            if peer.is_connected() {
                return Some(Location::Peer(peer.address));
            }
        }
        self.outbounds
            .iter()
            .position(|o| o.our_id == radio_id && o.is_connected())
            .map(Location::Outbound)
    }

    fn candidates_excluding(&self, source: RadioId, slot: Slot) -> Vec<Candidate> {
        let mut out = Vec::new();
        for peer in self.peers.iter() {
            if peer.radio_id == source || !peer.is_connected() {
                continue;
            }
            out.push(Candidate { radio_id: peer.radio_id, talkgroups: peer.talkgroups_for(slot).clone() });
        }
        for outbound in &self.outbounds {
            if outbound.our_id == source || !outbound.is_connected() {
                continue;
            }
            let talkgroups = match slot {
                Slot::One => outbound.slot1_talkgroups.clone(),
                Slot::Two => outbound.slot2_talkgroups.clone(),
            };
            out.push(Candidate { radio_id: outbound.our_id, talkgroups });
        }
        out
    }

    /// The source's own slot-`slot` allowed talkgroup set (§4.4 step 1):
    /// looked up from the peer table or the outbound's config, matching
    /// whichever the datagram actually arrived on.
    fn source_talkgroups(&self, source: RadioId, source_type: ConnectionType, slot: Slot) -> TgSet {
        match source_type {
            ConnectionType::Peer => self.peers.get(source).map(|p| p.talkgroups_for(slot).clone()).unwrap_or_else(TgSet::deny_all),
            ConnectionType::Outbound => self
                .outbounds
                .iter()
                .find(|o| o.our_id == source)
                .map(|o| match slot {
                    Slot::One => o.slot1_talkgroups.clone(),
                    Slot::Two => o.slot2_talkgroups.clone(),
                })
                .unwrap_or_else(TgSet::deny_all),
        }
    }

    fn route_dmrd(&mut self, source: RadioId, source_type: ConnectionType, dmrd: &hblink4_wire::DmrdFrame, now: Instant) -> Vec<Action> {
        if let Some(callsign) = self.user_cache.lookup(dmrd.rf_src.as_u32()) {
            let callsign = callsign.to_string();
            self.user_cache.touch(dmrd.rf_src.as_u32(), &callsign, now);
        }

        let source_talkgroups = self.source_talkgroups(source, source_type, dmrd.slot);
        let candidates = self.candidates_excluding(source, dmrd.slot);
        let peer_ids: HashSet<RadioId> = self.peers.iter().map(|p| p.radio_id).collect();
        let connection_of = move |id: RadioId| if peer_ids.contains(&id) { ConnectionType::Peer } else { ConnectionType::Outbound };

        dmrd_routing::handle_dmrd(&mut self.tracker, source, source_type, &source_talkgroups, dmrd, &candidates, connection_of, now)
    }

    /// Dispatch one datagram received on a peer-facing listener.
    pub fn handle_peer_datagram(&mut self, frame: Frame, from: SocketAddr, now: Instant) -> Vec<Action> {
        match frame {
            Frame::Dmrd(dmrd) => {
                if self.peers.check_source_address(dmrd.repeater_id, from).is_err() {
                    warn!(radio_id = %dmrd.repeater_id, "DMRD from mismatched source address, dropped");
                    return Vec::new();
                }
                let connected = self.peers.get(dmrd.repeater_id).map(Peer::is_connected).unwrap_or(false);
                if !connected {
                    return Vec::new();
                }
                self.route_dmrd(dmrd.repeater_id, ConnectionType::Peer, &dmrd, now)
            }
            other => fsm::handle_frame(&mut self.peers, &self.access, &self.reserved_ids, other, from, now),
        }
    }

    /// Dispatch one datagram received on outbound connection `idx`'s own socket.
    pub fn handle_outbound_datagram(&mut self, idx: usize, frame: Frame, now: Instant) -> Vec<Action> {
        let was_disconnected = matches!(self.outbounds[idx].state, OutboundState::Disconnected);

        let actions = match frame {
            Frame::Dmrd(dmrd) => {
                let our_id = self.outbounds[idx].our_id;
                if dmrd.repeater_id != our_id {
                    return Vec::new();
                }
                self.route_dmrd(our_id, ConnectionType::Outbound, &dmrd, now)
            }
            other => outbound_client::handle_inbound(&mut self.outbounds[idx], other),
        };

        if !was_disconnected && matches!(self.outbounds[idx].state, OutboundState::Disconnected) {
            let delay = self.outbounds[idx].backoff_delay();
            self.reconnect_deadlines[idx] = Some(now + delay);
        }
        actions
    }

    /// The outbound socket itself failed (recv/send error, §4.8): tear down
    /// and schedule a reconnect.
    pub fn on_outbound_socket_error(&mut self, idx: usize, now: Instant) {
        self.outbounds[idx].on_disconnect();
        let delay = self.outbounds[idx].backoff_delay();
        self.reconnect_deadlines[idx] = Some(now + delay);
    }

    /// Timer wheel: start (or restart, once backoff has elapsed) any
    /// disconnected outbound.
    pub fn tick_reconnects(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        for idx in 0..self.outbounds.len() {
            if !matches!(self.outbounds[idx].state, OutboundState::Disconnected) {
                continue;
            }
            let due = match self.reconnect_deadlines[idx] {
                Some(deadline) => now >= deadline,
                None => true,
            };
            if due {
                self.reconnect_deadlines[idx] = None;
                actions.extend(outbound_client::start_login(&mut self.outbounds[idx]));
            }
        }
        actions
    }

    /// Outbound ping loop tick (§5 Timer wheel / §4.7): run every
    /// `timeout_duration` seconds. Increments each connected outbound's
    /// missed-ping counter and sends `RPTPING`; any outbound that exceeds
    /// `max_missed` is disconnected and scheduled for reconnect, mirroring
    /// `tick_peer_timeouts` for the peer role.
    pub fn ping_tick_outbounds(&mut self, now: Instant) -> Vec<Action> {
        let mut actions: Vec<Action> = self.outbounds.iter_mut().flat_map(outbound_client::ping_tick).collect();

        let timed_out: Vec<usize> = (0..self.outbounds.len())
            .filter(|&idx| self.outbounds[idx].is_connected() && self.outbounds[idx].missed_pings > self.max_missed)
            .collect();

        for idx in timed_out {
            let radio_id = self.outbounds[idx].our_id;
            warn!(name = %self.outbounds[idx].name, "outbound missed too many pings, reconnecting");

            for slot in [Slot::One, Slot::Two] {
                if let Some(s) = self.tracker.get(radio_id, slot) {
                    if !s.ended {
                        actions.push(Action::Emit(CoreEvent::StreamEnd {
                            connection_id: radio_id,
                            slot,
                            stream_id: s.stream_id,
                            duration_ms: now.saturating_duration_since(s.start).as_millis() as u64,
                            packet_count: s.packet_count,
                            end_reason: EndReason::PeerTimeout,
                        }));
                    }
                }
                self.tracker.clear(radio_id, slot);
            }

            self.outbounds[idx].on_disconnect();
            let delay = self.outbounds[idx].backoff_delay();
            self.reconnect_deadlines[idx] = Some(now + delay);
        }

        actions
    }

    /// Peer-timeout scan (§4.5 Keepalive, §5 Timer wheel): run every
    /// `timeout_duration` seconds.
    pub fn tick_peer_timeouts(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut timed_out = Vec::new();

        for peer in self.peers.iter_mut() {
            if !peer.is_connected() {
                continue;
            }
            peer.missed_pings += 1;
            actions.push(Action::Emit(CoreEvent::RepeaterKeepalive { radio_id: peer.radio_id, missed_pings: peer.missed_pings }));
            if peer.missed_pings > self.max_missed {
                timed_out.push(peer.radio_id);
            }
        }

        for radio_id in timed_out {
            for slot in [Slot::One, Slot::Two] {
                if let Some(s) = self.tracker.get(radio_id, slot) {
                    if !s.ended {
                        actions.push(Action::Emit(CoreEvent::StreamEnd {
                            connection_id: radio_id,
                            slot,
                            stream_id: s.stream_id,
                            duration_ms: now.saturating_duration_since(s.start).as_millis() as u64,
                            packet_count: s.packet_count,
                            end_reason: EndReason::PeerTimeout,
                        }));
                    }
                }
                self.tracker.clear(radio_id, slot);
            }
            self.peers.remove(radio_id);
            actions.push(Action::Emit(CoreEvent::RepeaterDisconnected { radio_id, reason: "timeout" }));
        }

        actions
    }

    /// Stream-timeout / hang-time scan (§4.3, §5 Timer wheel): run every ~1 s.
    pub fn tick_stream_scan(&mut self, now: Instant) -> Vec<Action> {
        let outcomes = self.tracker.scan(now, self.stream_timeout, self.stream_hang_time);
        let mut actions = Vec::with_capacity(outcomes.len());
        for ((connection_id, slot), outcome) in outcomes {
            match outcome {
                ScanOutcome::EndedOnTimeout => {
                    if let Some(s) = self.tracker.get(connection_id, slot) {
                        actions.push(Action::Emit(CoreEvent::StreamEnd {
                            connection_id,
                            slot,
                            stream_id: s.stream_id,
                            duration_ms: now.saturating_duration_since(s.start).as_millis() as u64,
                            packet_count: s.packet_count,
                            end_reason: EndReason::Timeout,
                        }));
                    }
                }
                ScanOutcome::HangTimeExpired => {
                    actions.push(Action::Emit(CoreEvent::HangTimeExpired { connection_id, slot }));
                }
            }
        }
        actions
    }

    /// User-cache expiry sweep (§5 Timer wheel, every 60 s by default).
    pub fn tick_user_cache(&mut self, now: Instant) {
        self.user_cache.expire(now);
    }

    /// Graceful shutdown (§5 Cancellation): `MSTCL` to every connected peer,
    /// `RPTCL` on every connected outbound.
    pub fn shutdown_actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for peer in self.peers.iter() {
            if peer.is_connected() {
                actions.push(Action::SendTo {
                    addr: peer.address,
                    bytes: Frame::MasterClose { repeater_id: peer.radio_id }.encode(),
                });
            }
        }
        for outbound in &self.outbounds {
            if outbound.is_connected() {
                actions.push(Action::SendToPeer {
                    radio_id: outbound.our_id,
                    bytes: Frame::Disconnect { repeater_id: outbound.our_id }.encode(),
                });
            }
        }
        actions
    }
}
