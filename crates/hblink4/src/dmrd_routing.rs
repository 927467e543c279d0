//! Glues the stream tracker, hang-time policy and routing engine together
//! for one inbound DMRD packet (§4.3, §4.4). Kept separate from `server.rs`
//! so the state-machine logic is testable without real sockets.

use std::time::Instant;

use hblink4_config::TgSet;
use hblink4_core::{
    Candidate, ConnectionType, CoreError, CoreEvent, Destination, EndReason, HangTimeVerdict, Observation, RoutingEngine, StreamTracker,
    STREAM_UPDATE_PACKET_INTERVAL,
};
use hblink4_wire::{CallType, DmrdFrame, RadioId, Slot};
use tracing::info;

use crate::actions::Action;

/// Process one DMRD packet received from `source` (a connected peer or
/// outbound, identified by its radio_id). `candidates` is every other
/// connected connection eligible to carry this slot, with `connection_of`
/// mapping a radio_id back to peer-vs-outbound for event tagging.
///
/// Returns the wire/event actions to perform; never yields between them so
/// the caller can apply them without an intervening suspension point
/// (§5 "the fan-out loop ... must not yield between the first and last send").
pub fn handle_dmrd(
    tracker: &mut StreamTracker,
    source: RadioId,
    source_type: ConnectionType,
    source_talkgroups: &TgSet,
    frame: &DmrdFrame,
    candidates: &[Candidate],
    connection_of: impl Fn(RadioId) -> ConnectionType,
    now: Instant,
) -> Vec<Action> {
    let slot = frame.slot;

    if frame.call_type == CallType::Private {
        // Unit calls are logged and dropped, never forwarded (§4.4).
        return Vec::new();
    }
    let dst = Destination::Group(frame.dst);

    // §4.4 step 1, inbound check: P may only transmit a tg its own slot-k
    // allowed set admits. Checked before any stream-tracker mutation.
    if let Destination::Group(tg) = dst {
        if !source_talkgroups.allows(tg.value()) {
            let err = CoreError::TalkgroupDenied { radio_id: source.as_u32(), slot: slot.index() as u8, tg: tg.value() };
            info!("{err}");
            return Vec::new();
        }
    }

    // A real RX always displaces an assumed stream on its own slot,
    // regardless of timing (§4.4 contention invalidation), so check that
    // before running the ordinary contention/fast-terminator rules.
    if let Some(held) = tracker.get(source, slot) {
        if held.is_assumed && !held.ended && held.stream_id != frame.stream_id {
            return handle_contention_then_start(tracker, source, source_type, frame, dst, candidates, &connection_of, now);
        }
    }

    match tracker.observe(source, slot, frame.stream_id, now) {
        Observation::SlotEmpty => start_new_stream(tracker, source, source_type, frame, dst, candidates, &connection_of, now),
        Observation::FastTerminator => {
            let mut actions = stream_end_action(tracker, source, slot, EndReason::FastTerminator, now);
            actions.extend(start_new_stream(tracker, source, source_type, frame, dst, candidates, &connection_of, now));
            actions
        }
        Observation::Contention => Vec::new(),
        Observation::HangTime => {
            let Some(held) = tracker.get(source, slot) else { return Vec::new() };
            let verdict = hangtime_verdict(held.rf_src, held.dst, frame.rf_src, dst);
            if verdict.accepted() {
                start_new_stream(tracker, source, source_type, frame, dst, candidates, &connection_of, now)
            } else {
                Vec::new()
            }
        }
        Observation::Continuing => continue_stream(tracker, source, slot, frame, now),
    }
}

fn hangtime_verdict(held_src: RadioId, held_dst: Destination, candidate_src: RadioId, candidate_dst: Destination) -> HangTimeVerdict {
    hblink4_core::evaluate_hang_time(held_src, held_dst, candidate_src, candidate_dst)
}

fn continue_stream(tracker: &mut StreamTracker, source: RadioId, slot: Slot, frame: &DmrdFrame, now: Instant) -> Vec<Action> {
    tracker.continue_stream(source, slot, now);

    let mut actions = Vec::new();
    if frame.is_terminator() {
        tracker.end_normal(source, slot, now);
        actions.extend(stream_end_action(tracker, source, slot, EndReason::Terminator, now));
    } else if let Some(s) = tracker.get(source, slot) {
        if s.packet_count % STREAM_UPDATE_PACKET_INTERVAL == 0 {
            actions.push(Action::Emit(CoreEvent::StreamUpdate {
                connection_id: source,
                slot,
                stream_id: s.stream_id,
                duration_ms: now.saturating_duration_since(s.start).as_millis() as u64,
                packet_count: s.packet_count,
            }));
        }
    }

    if let Some(s) = tracker.get(source, slot) {
        actions.push(Action::Forward { frame: frame.clone(), targets: s.cached_targets.clone() });
    }
    actions
}

fn stream_end_action(tracker: &StreamTracker, connection_id: RadioId, slot: Slot, reason: EndReason, now: Instant) -> Vec<Action> {
    let Some(s) = tracker.get(connection_id, slot) else { return Vec::new() };
    vec![Action::Emit(CoreEvent::StreamEnd {
        connection_id,
        slot,
        stream_id: s.stream_id,
        duration_ms: now.saturating_duration_since(s.start).as_millis() as u64,
        packet_count: s.packet_count,
        end_reason: reason,
    })]
}

fn start_new_stream(
    tracker: &mut StreamTracker,
    source: RadioId,
    source_type: ConnectionType,
    frame: &DmrdFrame,
    dst: Destination,
    candidates: &[Candidate],
    connection_of: &impl Fn(RadioId) -> ConnectionType,
    now: Instant,
) -> Vec<Action> {
    tracker.start(source, frame.slot, frame.rf_src, dst, frame.call_type, frame.stream_id, now, false);

    let targets = RoutingEngine::compute_targets(
        tracker,
        source,
        frame.slot,
        frame.rf_src,
        dst,
        frame.call_type,
        frame.stream_id,
        candidates,
        now,
    );

    let mut actions = vec![Action::Emit(CoreEvent::StreamStart {
        connection_type: source_type,
        connection_id: source,
        slot: frame.slot,
        src_id: frame.rf_src,
        dst_id: frame.dst.value(),
        stream_id: frame.stream_id,
        call_type: frame.call_type,
        assumed: false,
    })];

    for target in &targets {
        actions.push(Action::Emit(CoreEvent::StreamStart {
            connection_type: connection_of(*target),
            connection_id: *target,
            slot: frame.slot,
            src_id: frame.rf_src,
            dst_id: frame.dst.value(),
            stream_id: frame.stream_id,
            call_type: frame.call_type,
            assumed: true,
        }));
    }

    actions.push(Action::Forward { frame: frame.clone(), targets });
    actions
}

fn handle_contention_then_start(
    tracker: &mut StreamTracker,
    source: RadioId,
    source_type: ConnectionType,
    frame: &DmrdFrame,
    dst: Destination,
    candidates: &[Candidate],
    connection_of: &impl Fn(RadioId) -> ConnectionType,
    now: Instant,
) -> Vec<Action> {
    RoutingEngine::invalidate_on_real_rx(tracker, source, frame.slot, now);
    let mut actions = stream_end_action(tracker, source, frame.slot, EndReason::Contention, now);
    tracker.clear(source, frame.slot);
    actions.extend(start_new_stream(tracker, source, source_type, frame, dst, candidates, connection_of, now));
    actions
}
