//! HomeBrew/DMR protocol packet codec (§4.1).
//!
//! Pure, synchronous, allocation-light parsing and formatting: no I/O, no
//! async. The rest of the workspace treats a [`Frame`] as the unit of wire
//! meaning and never inspects raw bytes directly.

pub mod dmrd;
pub mod frame;
pub mod ids;

pub use dmrd::{CallType, DmrdFrame, FrameType, DMRD_FRAME_LEN, SYNC_VOICE_TERMINATOR};
pub use frame::{DecodeError, Frame, RepeaterConfigInfo};
pub use ids::{RadioId, Slot, StreamId, Tg};
