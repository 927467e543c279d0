//! The event sink (§5 "Shared-resource policy": "a write-only datagram
//! socket with a bounded send buffer — overflow drops events, never
//! blocks").
//!
//! [`EventSink::emit`] is synchronous and non-blocking from the caller's
//! point of view: it pushes onto a bounded channel and returns immediately.
//! A background task owns the actual transport and serializes writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hblink4_config::DashboardConfig;
use hblink4_core::CoreEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::payload::Event;
use crate::transport::{self, EventTransport};

const CHANNEL_CAPACITY: usize = 1024;
/// Log dropped-event backpressure once per this many occurrences (§7
/// "Resource errors": "drop event, log once per N occurrences").
const DROP_LOG_INTERVAL: u64 = 100;

pub struct EventSink {
    sender: mpsc::Sender<CoreEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Connect to the configured dashboard transport and spawn the writer
    /// task. Returns `None` (a no-op sink) if `dashboard` is absent from the
    /// config, matching the event sink's externally-optional role.
    pub async fn connect(config: Option<&DashboardConfig>) -> Self {
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        match config {
            Some(cfg) => match transport::connect(cfg).await {
                Ok(transport) => {
                    tokio::spawn(run_writer(transport, rx));
                }
                Err(err) => {
                    warn!(error = %err, "event sink transport unavailable, events will be dropped");
                    rx.close();
                }
            },
            None => {
                rx.close();
            }
        }

        Self { sender: tx, dropped }
    }

    /// Never blocks: a full channel means the event is dropped and counted.
    pub fn emit(&self, event: CoreEvent) {
        if self.sender.try_send(event).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n % DROP_LOG_INTERVAL == 1 {
                warn!(dropped_total = n, "event sink backpressure, dropping events");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_writer(mut transport: Box<dyn EventTransport>, mut rx: mpsc::Receiver<CoreEvent>) {
    while let Some(event) = rx.recv().await {
        let payload = Event::now(&event);
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(err) => {
                debug!(error = %err, "failed to encode event payload");
                continue;
            }
        };
        if let Err(err) = transport.send(&bytes).await {
            debug!(error = %err, "event sink write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_a_configured_transport_never_blocks() {
        let sink = EventSink::connect(None).await;
        sink.emit(CoreEvent::RepeaterKeepalive {
            radio_id: hblink4_wire::RadioId::from_be_bytes([0, 0, 0, 1]),
            missed_pings: 1,
        });
        // The writer never started, so the event is silently absorbed by a
        // closed channel rather than blocking the caller.
    }
}
