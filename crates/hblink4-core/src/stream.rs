//! Stream tracker (§4.3): per-(connection, slot) transmission state, with
//! terminator, fast-terminator and silence-timeout detection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hblink4_wire::{CallType, RadioId, Slot, StreamId, Tg};

/// A DMRD destination: a talkgroup for group calls, a radio for private
/// calls (§3 Stream: "destination (TG or radio)").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Group(Tg),
    Private(RadioId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Terminator,
    FastTerminator,
    Timeout,
    PeerTimeout,
    Contention,
}

/// Per-slot in-flight (or just-ended, within hang-time) transmission (§3 Stream).
#[derive(Clone, Debug)]
pub struct Stream {
    pub rf_src: RadioId,
    pub dst: Destination,
    pub call_type: CallType,
    pub stream_id: StreamId,
    pub start: Instant,
    pub last_seen: Instant,
    pub packet_count: u64,
    pub ended: bool,
    pub end_time: Option<Instant>,
    pub end_reason: Option<EndReason>,
    /// True iff this stream was installed by the routing engine to represent
    /// traffic being forwarded *to* this connection, not originated by it.
    pub is_assumed: bool,
    pub cached_targets: Vec<RadioId>,
    pub routing_cached: bool,
}

impl Stream {
    fn new(rf_src: RadioId, dst: Destination, call_type: CallType, stream_id: StreamId, now: Instant, is_assumed: bool) -> Self {
        Self {
            rf_src,
            dst,
            call_type,
            stream_id,
            start: now,
            last_seen: now,
            packet_count: 0,
            ended: false,
            end_time: None,
            end_reason: None,
            is_assumed,
            cached_targets: Vec::new(),
            routing_cached: false,
        }
    }

    pub fn dst_tg(&self) -> Option<Tg> {
        match self.dst {
            Destination::Group(tg) => Some(tg),
            Destination::Private(_) => None,
        }
    }
}

/// 200 ms fast-terminator threshold (§4.3 step 4; boundary uses `>=`, §8).
pub const FAST_TERMINATOR_GAP: Duration = Duration::from_millis(200);

/// What happened to the slot as a result of observing one DMRD packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Observation {
    /// No stream previously held the slot (or it was just cleared): the
    /// caller should install a fresh `Stream` and run routing/hang-time rules.
    SlotEmpty,
    /// Same `stream_id` as the current holder: caller should bump
    /// `packet_count`/`last_seen` on the existing stream.
    Continuing,
    /// A different `stream_id` arrived less than `FAST_TERMINATOR_GAP` after
    /// the holder's last packet: drop the new packet, leave state untouched.
    Contention,
    /// A different `stream_id` arrived at least `FAST_TERMINATOR_GAP` after
    /// the holder's last packet: the holder is ended with
    /// `EndReason::FastTerminator` and the slot is now empty for the new
    /// stream to claim.
    FastTerminator,
    /// The slot held an ended stream within hang-time: the caller must run
    /// the hang-time policy before accepting or denying the new stream.
    HangTime,
}

#[derive(Default)]
pub struct StreamTracker {
    slots: HashMap<(RadioId, Slot), Stream>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection_id: RadioId, slot: Slot) -> Option<&Stream> {
        self.slots.get(&(connection_id, slot))
    }

    pub fn get_mut(&mut self, connection_id: RadioId, slot: Slot) -> Option<&mut Stream> {
        self.slots.get_mut(&(connection_id, slot))
    }

    /// Decide what a new packet with `stream_id` means for this slot right
    /// now, without mutating anything except fast-terminator bookkeeping
    /// (ending the displaced stream is the one mutation this step owns; the
    /// caller installs the new `Stream` itself via `start`).
    pub fn observe(&mut self, connection_id: RadioId, slot: Slot, stream_id: StreamId, now: Instant) -> Observation {
        let key = (connection_id, slot);
        let Some(s) = self.slots.get_mut(&key) else {
            return Observation::SlotEmpty;
        };

        if !s.ended {
            if s.stream_id == stream_id {
                return Observation::Continuing;
            }
            if now.saturating_duration_since(s.last_seen) < FAST_TERMINATOR_GAP {
                return Observation::Contention;
            }
            s.ended = true;
            s.end_time = Some(now);
            s.end_reason = Some(EndReason::FastTerminator);
            return Observation::FastTerminator;
        }

        Observation::HangTime
    }

    /// Install a brand-new stream on an empty slot, overwriting whatever was
    /// there (used after `FastTerminator`/`HangTime` clears it, or on a
    /// genuinely empty slot).
    pub fn start(
        &mut self,
        connection_id: RadioId,
        slot: Slot,
        rf_src: RadioId,
        dst: Destination,
        call_type: CallType,
        stream_id: StreamId,
        now: Instant,
        is_assumed: bool,
    ) {
        self.slots.insert(
            (connection_id, slot),
            Stream::new(rf_src, dst, call_type, stream_id, now, is_assumed),
        );
    }

    /// Record one more packet on the current holder (`Observation::Continuing`).
    pub fn continue_stream(&mut self, connection_id: RadioId, slot: Slot, now: Instant) {
        if let Some(s) = self.slots.get_mut(&(connection_id, slot)) {
            s.last_seen = now;
            s.packet_count += 1;
        }
    }

    /// Terminator frame detected on the current holder: mark ended, keep the
    /// record in place for hang-time.
    pub fn end_normal(&mut self, connection_id: RadioId, slot: Slot, now: Instant) {
        if let Some(s) = self.slots.get_mut(&(connection_id, slot)) {
            s.ended = true;
            s.end_time = Some(now);
            s.end_reason = Some(EndReason::Terminator);
        }
    }

    /// Force-end a stream for a reason not driven by packet arrival
    /// (contention, peer timeout). No-op if the slot is already empty.
    pub fn force_end(&mut self, connection_id: RadioId, slot: Slot, reason: EndReason, now: Instant) {
        if let Some(s) = self.slots.get_mut(&(connection_id, slot)) {
            if !s.ended {
                s.ended = true;
                s.end_time = Some(now);
                s.end_reason = Some(reason);
            }
        }
    }

    pub fn clear(&mut self, connection_id: RadioId, slot: Slot) {
        self.slots.remove(&(connection_id, slot));
    }

    pub fn remove_connection(&mut self, connection_id: RadioId) {
        self.slots.retain(|(id, _), _| *id != connection_id);
    }

    /// Route-cache invalidation (§4.4): strike `target` out of every other
    /// stream's cached target set once its assumed stream has been
    /// displaced by a real RX.
    pub fn remove_target(&mut self, target: RadioId) {
        for s in self.slots.values_mut() {
            s.cached_targets.retain(|id| *id != target);
        }
    }

    /// Silence-timeout scan (§4.3, run every ~1s): end active streams whose
    /// `last_seen` has exceeded `stream_timeout`, and clear ended streams
    /// whose hang-time has elapsed. Returns the keys that transitioned, for
    /// event emission by the caller.
    pub fn scan(&mut self, now: Instant, stream_timeout: Duration, hang_time: Duration) -> Vec<((RadioId, Slot), ScanOutcome)> {
        let mut outcomes = Vec::new();
        let mut to_clear = Vec::new();

        for (key, s) in self.slots.iter_mut() {
            if !s.ended {
                if now.saturating_duration_since(s.last_seen) > stream_timeout {
                    s.ended = true;
                    s.end_time = Some(now);
                    s.end_reason = Some(EndReason::Timeout);
                    outcomes.push((*key, ScanOutcome::EndedOnTimeout));
                }
            } else if let Some(end_time) = s.end_time {
                if now.saturating_duration_since(end_time) >= hang_time {
                    to_clear.push(*key);
                }
            }
        }

        for key in to_clear {
            self.slots.remove(&key);
            outcomes.push((key, ScanOutcome::HangTimeExpired));
        }

        outcomes
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    EndedOnTimeout,
    HangTimeExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> RadioId {
        RadioId::from_be_bytes(n.to_be_bytes())
    }
    fn sid(n: u32) -> StreamId {
        StreamId::from_be_bytes(n.to_be_bytes())
    }

    #[test]
    fn empty_slot_reports_slot_empty() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        assert_eq!(t.observe(ids(1), Slot::One, sid(1), now), Observation::SlotEmpty);
    }

    #[test]
    fn same_stream_id_continues() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        assert_eq!(t.observe(ids(1), Slot::One, sid(1), now), Observation::Continuing);
    }

    #[test]
    fn different_stream_within_gap_is_contention() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        let later = now + Duration::from_millis(50);
        assert_eq!(t.observe(ids(1), Slot::One, sid(2), later), Observation::Contention);
        assert_eq!(t.get(ids(1), Slot::One).unwrap().stream_id, sid(1));
    }

    #[test]
    fn different_stream_at_or_past_gap_is_fast_terminator() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        let later = now + FAST_TERMINATOR_GAP;
        assert_eq!(t.observe(ids(1), Slot::One, sid(2), later), Observation::FastTerminator);
        let s = t.get(ids(1), Slot::One).unwrap();
        assert!(s.ended);
        assert_eq!(s.end_reason, Some(EndReason::FastTerminator));
    }

    #[test]
    fn ended_stream_reports_hang_time() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        t.end_normal(ids(1), Slot::One, now);
        assert_eq!(t.observe(ids(1), Slot::One, sid(2), now), Observation::HangTime);
    }

    #[test]
    fn scan_ends_on_silence_timeout() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        let later = now + Duration::from_secs(3);
        let outcomes = t.scan(later, Duration::from_secs_f64(2.0), Duration::from_secs_f64(10.0));
        assert_eq!(outcomes, vec![((ids(1), Slot::One), ScanOutcome::EndedOnTimeout)]);
    }

    #[test]
    fn scan_clears_after_hang_time_elapses() {
        let mut t = StreamTracker::new();
        let now = Instant::now();
        t.start(ids(1), Slot::One, ids(2), Destination::Group(Tg::new(3120)), CallType::Group, sid(1), now, false);
        t.end_normal(ids(1), Slot::One, now);
        let later = now + Duration::from_secs_f64(10.0);
        let outcomes = t.scan(later, Duration::from_secs_f64(2.0), Duration::from_secs_f64(10.0));
        assert_eq!(outcomes, vec![((ids(1), Slot::One), ScanOutcome::HangTimeExpired)]);
        assert!(t.get(ids(1), Slot::One).is_none());
    }
}
