//! Routing engine (§4.4): computes the fan-out target set for a newly
//! accepted stream, installs assumed streams on the targets, and invalidates
//! the cache when a real RX displaces an assumed one.

use std::time::{Duration, Instant};

use hblink4_config::TgSet;
use hblink4_wire::{CallType, RadioId, Slot, StreamId};

use crate::hangtime::{self, HangTimeVerdict};
use crate::stream::{Destination, EndReason, StreamTracker};

/// One candidate forwarding target: its radio_id and the talkgroup set that
/// governs both its inbound acceptance and outbound delivery on this slot
/// (§4.4 "Symmetric routing").
pub struct Candidate {
    pub radio_id: RadioId,
    pub talkgroups: TgSet,
}

pub struct RoutingEngine;

impl RoutingEngine {
    /// Decide whether `tg` may be forwarded to `candidate` on `slot`, and if
    /// so whether the slot is presently available to receive it; if
    /// available, install an assumed stream there.
    ///
    /// Returns `true` iff the candidate was added to the target set.
    fn try_install(
        tracker: &mut StreamTracker,
        candidate: &Candidate,
        slot: Slot,
        rf_src: RadioId,
        dst: Destination,
        call_type: CallType,
        stream_id: StreamId,
        now: Instant,
    ) -> bool {
        let tg = match dst {
            Destination::Group(tg) => tg,
            Destination::Private(_) => return false,
        };
        if !candidate.talkgroups.allows(tg.value()) {
            return false;
        }

        let available = match tracker.get(candidate.radio_id, slot) {
            None => true,
            Some(s) if s.is_assumed => true,
            Some(s) if s.ended => {
                let verdict = hangtime::evaluate(s.rf_src, s.dst, rf_src, dst);
                matches!(verdict, HangTimeVerdict::AcceptContinuation | HangTimeVerdict::AcceptJoin)
            }
            Some(_) => false,
        };

        if available {
            tracker.start(candidate.radio_id, slot, rf_src, dst, call_type, stream_id, now, true);
        }
        available
    }

    /// Compute and install the target set for a freshly accepted RX stream
    /// originating from `source` (§4.4 steps 2-4). Candidates are every
    /// other connected peer/outbound eligible to carry this slot; `source`
    /// should not appear among them.
    pub fn compute_targets(
        tracker: &mut StreamTracker,
        source: RadioId,
        slot: Slot,
        rf_src: RadioId,
        dst: Destination,
        call_type: CallType,
        stream_id: StreamId,
        candidates: &[Candidate],
        now: Instant,
    ) -> Vec<RadioId> {
        let mut targets = Vec::new();
        for candidate in candidates {
            if candidate.radio_id == source {
                continue;
            }
            if Self::try_install(tracker, candidate, slot, rf_src, dst, call_type, stream_id, now) {
                targets.push(candidate.radio_id);
            }
        }

        if let Some(s) = tracker.get_mut(source, slot) {
            s.cached_targets = targets.clone();
            s.routing_cached = true;
        }
        targets
    }

    /// A real RX just started on `(q, slot)` while it held an assumed
    /// stream: clear the assumed stream, strike `q` from every other
    /// stream's cached target set, and report the end reason so the caller
    /// can emit `stream_end(end_reason=contention)`.
    ///
    /// Returns `true` iff an assumed stream was actually displaced.
    pub fn invalidate_on_real_rx(tracker: &mut StreamTracker, q: RadioId, slot: Slot, now: Instant) -> bool {
        let was_assumed = matches!(tracker.get(q, slot), Some(s) if s.is_assumed && !s.ended);
        if was_assumed {
            tracker.force_end(q, slot, EndReason::Contention, now);
            tracker.remove_target(q);
        }
        was_assumed
    }
}

/// Silence/hang-time scan periods (§5 Timer wheel, §6 defaults) expressed as
/// the durations the routing/stream-tracker layer consumes.
pub fn stream_timeout_duration(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds)
}
pub fn hang_time_duration(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds)
}
