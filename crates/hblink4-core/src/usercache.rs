//! User cache (§3 UserCache): a read-only, TTL-aged radio_id → callsign
//! lookup, populated from an external CSV at startup and refreshed on
//! sighting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserCacheError {
    #[error("failed to read user cache CSV {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("malformed CSV row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },
}

struct Entry {
    callsign: String,
    expires_at: Instant,
}

pub struct UserCache {
    entries: HashMap<u32, Entry>,
    ttl: Duration,
}

impl UserCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    /// Parse a `radio_id,callsign` CSV (no header) such as the DMR-ID
    /// database distributed by radioid.net.
    pub fn load_csv(csv: &str, ttl: Duration, now: Instant) -> Result<Self, UserCacheError> {
        let mut cache = Self::new(ttl);
        for (idx, line) in csv.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ',');
            let radio_id: u32 = parts
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .map_err(|_| UserCacheError::MalformedRow { line: idx + 1, reason: "radio_id is not an integer".into() })?;
            let callsign = parts
                .next()
                .ok_or_else(|| UserCacheError::MalformedRow { line: idx + 1, reason: "missing callsign column".into() })?
                .trim()
                .to_string();
            cache.entries.insert(radio_id, Entry { callsign, expires_at: now + ttl });
        }
        Ok(cache)
    }

    pub fn lookup(&self, radio_id: u32) -> Option<&str> {
        self.entries.get(&radio_id).map(|e| e.callsign.as_str())
    }

    /// Refresh an entry's expiry on sighting (a DMRD or login frame naming
    /// this radio_id), extending the TTL from `now`.
    pub fn touch(&mut self, radio_id: u32, callsign: &str, now: Instant) {
        self.entries
            .entry(radio_id)
            .and_modify(|e| {
                e.callsign = callsign.to_string();
                e.expires_at = now + self.ttl;
            })
            .or_insert_with(|| Entry { callsign: callsign.to_string(), expires_at: now + self.ttl });
    }

    /// User-cache expiry sweep (§5 Timer wheel, every 60s by default).
    pub fn expire(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
