//! Best-effort event-sink sidecar (§6 "Event sink"): turns [`CoreEvent`]s
//! into JSON datagrams for a local monitoring dashboard. Never part of the
//! forwarding path's critical section.

mod payload;
mod sink;
mod transport;

pub use payload::{Event, EventPayload};
pub use sink::EventSink;
pub use transport::{connect as connect_transport, EventTransport, TransportError};
