//! Hang-time policy (§4.6): a pure function of the ended stream's
//! (source, destination) and the candidate's (source, destination).

use crate::stream::Destination;
use hblink4_wire::RadioId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HangTimeVerdict {
    /// Same source: continuing or switching talkgroup.
    AcceptContinuation,
    /// Different source, same destination: another user joining the conversation.
    AcceptJoin,
    /// Different source and destination: slot-hijack attempt.
    Deny,
}

impl HangTimeVerdict {
    pub fn accepted(self) -> bool {
        !matches!(self, HangTimeVerdict::Deny)
    }
}

/// Evaluate a candidate stream against the stream currently holding the slot
/// in hang-time. Same inputs always produce the same verdict.
pub fn evaluate(held_src: RadioId, held_dst: Destination, candidate_src: RadioId, candidate_dst: Destination) -> HangTimeVerdict {
    let same_src = held_src == candidate_src;
    let same_dst = held_dst == candidate_dst;
    match (same_src, same_dst) {
        (true, _) => HangTimeVerdict::AcceptContinuation,
        (false, true) => HangTimeVerdict::AcceptJoin,
        (false, false) => HangTimeVerdict::Deny,
    }
}
