//! Stream routing and contention engine: the access matcher, stream
//! tracker, routing engine, hang-time policy, peer/outbound protocol state,
//! and user cache (§2, §3, §4.2-§4.7).
//!
//! Pure logic, no I/O and no async: the binary crate drives this from its
//! UDP event loop and timer wheel.

pub mod access;
pub mod errors;
pub mod event;
pub mod hangtime;
pub mod outbound;
pub mod peer;
pub mod routing;
pub mod stream;
pub mod usercache;

pub use access::{AccessMatcher, Authorization};
pub use errors::{CoreError, CoreResult};
pub use event::{ConnectionType, CoreEvent, STREAM_UPDATE_PACKET_INTERVAL};
pub use hangtime::{evaluate as evaluate_hang_time, HangTimeVerdict};
pub use outbound::{format_options, parse_options, OutboundConnection, OutboundState, OptionsParseError};
pub use peer::{Peer, PeerState, PeerTable};
pub use routing::{hang_time_duration, stream_timeout_duration, Candidate, RoutingEngine};
pub use stream::{Destination, EndReason, Observation, ScanOutcome, Stream, StreamTracker, FAST_TERMINATOR_GAP};
pub use usercache::{UserCache, UserCacheError};
