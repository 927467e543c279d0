use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Routing/protocol-level errors (§7 "Protocol errors" / "Routing errors").
///
/// None of these are fatal: every handler that returns one is a failure
/// boundary, and the caller drops the packet and keeps serving.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("talkgroup {tg} denied on slot {slot} for peer {radio_id}")]
    TalkgroupDenied { radio_id: u32, slot: u8, tg: u32 },

    #[error("slot busy: {0}")]
    SlotBusy(&'static str),

    #[error("hang-time deny: {0}")]
    HangTimeDeny(&'static str),

    #[error("wrong source address for radio_id {0}")]
    AddressMismatch(u32),

    #[error("internal invariant violation: {0}")]
    InvariantViolation(&'static str),
}
