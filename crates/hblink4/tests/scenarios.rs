//! End-to-end protocol walkthroughs, driven directly against the stream
//! tracker and routing engine (the pure layer `hblink4_core` exports),
//! without a socket in sight.

use std::time::{Duration, Instant};

use hblink4_config::TgSet;
use hblink4_core::{
    Candidate, Destination, EndReason, HangTimeVerdict, Observation, RoutingEngine, ScanOutcome, StreamTracker,
};
use hblink4_wire::{CallType, RadioId, Slot, StreamId, Tg};

fn id(n: u32) -> RadioId {
    RadioId::from_be_bytes(n.to_be_bytes())
}
fn sid(n: u32) -> StreamId {
    StreamId::from_be_bytes(n.to_be_bytes())
}

/// S1. Happy-path voice pass-through: 50 voice packets then a terminator,
/// forwarded byte-for-byte to a single eligible target, then hang-time
/// expiry on both ends.
#[test]
fn s1_happy_path_pass_through_then_hang_time_expiry() {
    let mut tracker = StreamTracker::new();
    let a = id(311100);
    let b = id(311200);
    let tg3120 = Destination::Group(Tg::new(0x000C30));
    let src = id(0x0004C0AB);
    let stream = sid(0xAAAAAAAA);
    let now = Instant::now();

    tracker.start(a, Slot::One, src, tg3120, CallType::Group, stream, now, false);
    let candidates = [Candidate { radio_id: b, talkgroups: TgSet::Wildcard }];
    let targets = RoutingEngine::compute_targets(&mut tracker, a, Slot::One, src, tg3120, CallType::Group, stream, &candidates, now);
    assert_eq!(targets, vec![b]);
    assert!(tracker.get(b, Slot::One).unwrap().is_assumed);

    // 49 more voice packets, each `Continuing`.
    let mut t = now;
    for _ in 0..49 {
        t += Duration::from_millis(60);
        assert_eq!(tracker.observe(a, Slot::One, stream, t), Observation::Continuing);
        tracker.continue_stream(a, Slot::One, t);
    }
    assert_eq!(tracker.get(a, Slot::One).unwrap().packet_count, 49);

    // Terminator.
    t += Duration::from_millis(60);
    tracker.end_normal(a, Slot::One, t);
    assert!(tracker.get(a, Slot::One).unwrap().ended);
    assert_eq!(tracker.get(a, Slot::One).unwrap().end_reason, Some(EndReason::Terminator));

    // B's assumed stream is a separate record; it only ends once the caller
    // force-ends it on its own terminator detection path (mirrors B never
    // transmitting a terminator of its own — this server marks it ended too
    // via the forwarding loop, so simulate that directly here).
    tracker.end_normal(b, Slot::One, t);

    // Both slots sit in hang-time until 10s after end.
    let mid_hang = t + Duration::from_secs(5);
    let outcomes = tracker.scan(mid_hang, Duration::from_secs_f64(2.0), Duration::from_secs_f64(10.0));
    assert!(outcomes.is_empty());
    assert!(tracker.get(a, Slot::One).is_some());
    assert!(tracker.get(b, Slot::One).is_some());

    let past_hang = t + Duration::from_secs(10);
    let outcomes = tracker.scan(past_hang, Duration::from_secs_f64(2.0), Duration::from_secs_f64(10.0));
    let cleared: Vec<_> = outcomes.into_iter().filter(|(_, o)| *o == ScanOutcome::HangTimeExpired).collect();
    assert_eq!(cleared.len(), 2);
    assert!(tracker.get(a, Slot::One).is_none());
    assert!(tracker.get(b, Slot::One).is_none());
}

/// S2. Hang-time hijack: a third party is unaffected, but a second call on
/// the same (src, dst) pair during hang-time is accepted, while an
/// unrelated destination is denied.
#[test]
fn s2_hang_time_hijack_denied_for_unrelated_destination() {
    let a = id(311100);
    let user1 = id(0x0004C0AB);
    let user2 = id(0x0004C1F1);
    let tg3120 = Destination::Group(Tg::new(0x000C30));
    let tg9 = Destination::Group(Tg::new(9));
    let now = Instant::now();

    let mut tracker = StreamTracker::new();
    tracker.start(a, Slot::One, user1, tg3120, CallType::Group, sid(1), now, false);
    tracker.end_normal(a, Slot::One, now);

    let during_hang = now + Duration::from_secs(2);
    assert_eq!(tracker.observe(a, Slot::One, sid(2), during_hang), Observation::HangTime);
    let held = tracker.get(a, Slot::One).unwrap();
    let verdict = hblink4_core::evaluate_hang_time(held.rf_src, held.dst, user2, tg9);
    assert_eq!(verdict, HangTimeVerdict::Deny);

    // Same source continuing their own conversation is accepted.
    let verdict_continuation = hblink4_core::evaluate_hang_time(held.rf_src, held.dst, user1, tg3120);
    assert!(verdict_continuation.accepted());
}

/// S3. Fast terminator: a lost terminator is inferred from a new stream_id
/// arriving at least 200ms after the last packet.
#[test]
fn s3_fast_terminator_then_immediate_new_stream() {
    let mut tracker = StreamTracker::new();
    let a = id(311100);
    let src = id(0x0004C0AB);
    let tg = Destination::Group(Tg::new(0x000C30));
    let now = Instant::now();

    tracker.start(a, Slot::One, src, tg, CallType::Group, sid(0xBEEF0001), now, false);
    for i in 0..29 {
        let t = now + Duration::from_millis(60 * (i + 1));
        tracker.continue_stream(a, Slot::One, t);
    }

    let gap_ok = now + Duration::from_millis(60 * 30) + hblink4_core::FAST_TERMINATOR_GAP;
    let observation = tracker.observe(a, Slot::One, sid(0xBEEF0002), gap_ok);
    assert_eq!(observation, Observation::FastTerminator);
    assert_eq!(tracker.get(a, Slot::One).unwrap().end_reason, Some(EndReason::FastTerminator));

    tracker.start(a, Slot::One, src, tg, CallType::Group, sid(0xBEEF0002), gap_ok, false);
    assert_eq!(tracker.get(a, Slot::One).unwrap().stream_id, sid(0xBEEF0002));
}

/// S4. A real RX on B's own slot immediately displaces an assumed stream
/// there, regardless of how recently it was installed, and strikes B out of
/// A's cached target set.
#[test]
fn s4_real_rx_beats_assumed_tx() {
    let mut tracker = StreamTracker::new();
    let a = id(311100);
    let b = id(311200);
    let tg = Destination::Group(Tg::new(0x000C30));
    let now = Instant::now();

    tracker.start(a, Slot::One, a, tg, CallType::Group, sid(1), now, false);
    let candidates = [Candidate { radio_id: b, talkgroups: TgSet::Wildcard }];
    let targets = RoutingEngine::compute_targets(&mut tracker, a, Slot::One, a, tg, CallType::Group, sid(1), &candidates, now);
    assert_eq!(targets, vec![b]);
    assert!(tracker.get(b, Slot::One).unwrap().is_assumed);

    let displaced = RoutingEngine::invalidate_on_real_rx(&mut tracker, b, Slot::One, now);
    assert!(displaced);
    assert!(tracker.get(b, Slot::One).unwrap().ended);
    assert_eq!(tracker.get(b, Slot::One).unwrap().end_reason, Some(EndReason::Contention));
    assert!(tracker.get(a, Slot::One).unwrap().cached_targets.is_empty());

    tracker.start(b, Slot::One, b, tg, CallType::Group, sid(2), now, false);
    assert!(!tracker.get(b, Slot::One).unwrap().is_assumed);
}

/// S6. Keepalive timeout: scan semantics for the stream-timeout wheel, used
/// by `Server::tick_peer_timeouts` to end active streams with
/// `end_reason=peer_timeout` once a peer is destroyed.
#[test]
fn s6_keepalive_timeout_ends_active_stream_as_peer_timeout() {
    let mut tracker = StreamTracker::new();
    let a = id(311100);
    let tg = Destination::Group(Tg::new(0x000C30));
    let now = Instant::now();
    tracker.start(a, Slot::One, a, tg, CallType::Group, sid(1), now, false);

    // The peer is destroyed directly (not via the tracker's own silence
    // scan); the caller force-ends any still-active stream with
    // end_reason=peer_timeout before clearing the slot.
    assert!(!tracker.get(a, Slot::One).unwrap().ended);
    tracker.force_end(a, Slot::One, EndReason::PeerTimeout, now);
    assert_eq!(tracker.get(a, Slot::One).unwrap().end_reason, Some(EndReason::PeerTimeout));
    tracker.clear(a, Slot::One);
    assert!(tracker.get(a, Slot::One).is_none());
}
