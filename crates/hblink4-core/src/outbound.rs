//! Outbound client FSM state (§4.7): the peer role, reversed.

use std::collections::HashSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use hblink4_config::{OutboundConnectionConfig, TgSet};
use hblink4_wire::RadioId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsParseError {
    #[error("malformed slot key/value pair: {0}")]
    MalformedPair(String),
    #[error("talkgroup list contains a non-integer value: {0}")]
    NonIntegerTalkgroup(String),
}

/// Parse an options string of the form `TS1=1,2,3;TS2=10,20`. A bare `*` or
/// an absent slot key means wildcard (§3 OutboundConnection).
pub fn parse_options(options: &str) -> Result<(TgSet, TgSet), OptionsParseError> {
    let mut ts1 = TgSet::Wildcard;
    let mut ts2 = TgSet::Wildcard;

    for clause in options.split(';') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (key, value) = clause
            .split_once('=')
            .ok_or_else(|| OptionsParseError::MalformedPair(clause.to_string()))?;
        let parsed = parse_tg_value(value.trim())?;
        match key.trim().to_ascii_uppercase().as_str() {
            "TS1" => ts1 = parsed,
            "TS2" => ts2 = parsed,
            other => return Err(OptionsParseError::MalformedPair(other.to_string())),
        }
    }

    Ok((ts1, ts2))
}

fn parse_tg_value(value: &str) -> Result<TgSet, OptionsParseError> {
    if value.is_empty() || value == "*" {
        return Ok(TgSet::Wildcard);
    }
    let mut set = HashSet::new();
    for tok in value.split(',') {
        let tok = tok.trim();
        if tok.is_empty() {
            continue;
        }
        let tg: u32 = tok.parse().map_err(|_| OptionsParseError::NonIntegerTalkgroup(tok.to_string()))?;
        set.insert(tg);
    }
    Ok(if set.is_empty() { TgSet::deny_all() } else { TgSet::Explicit(set) })
}

/// Encode the reverse of [`parse_options`], for the `RPTO` frame this side
/// sends when acting as an outbound client.
pub fn format_options(ts1: &TgSet, ts2: &TgSet) -> String {
    fn format_one(label: &str, set: &TgSet) -> String {
        match set {
            TgSet::Wildcard => format!("{label}=*"),
            TgSet::Explicit(tgs) => {
                let mut sorted: Vec<u32> = tgs.iter().copied().collect();
                sorted.sort_unstable();
                let joined = sorted.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
                format!("{label}={joined}")
            }
        }
    }
    format!("{};{}", format_one("TS1", ts1), format_one("TS2", ts2))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundState {
    Disconnected,
    LoginSent,
    ChallengeReceived { salt: [u8; 4] },
    Authenticated,
    ConfigSent,
    Connected,
}

pub struct OutboundConnection {
    pub name: String,
    pub our_id: RadioId,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub slot1_talkgroups: TgSet,
    pub slot2_talkgroups: TgSet,
    pub state: OutboundState,
    pub missed_pings: u32,
    pub reconnect_attempt: u32,
}

impl OutboundConnection {
    pub fn from_config(cfg: &OutboundConnectionConfig) -> Result<Self, OptionsParseError> {
        let (ts1, ts2) = parse_options(&cfg.options)?;
        Ok(Self {
            name: cfg.name.clone(),
            our_id: RadioId::from_be_bytes(cfg.our_id.to_be_bytes()),
            host: cfg.host.clone(),
            port: cfg.port,
            password: cfg.password.clone(),
            slot1_talkgroups: ts1,
            slot2_talkgroups: ts2,
            state: OutboundState::Disconnected,
            missed_pings: 0,
            reconnect_attempt: 0,
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, OutboundState::Connected)
    }

    /// Reconnect backoff (Open Question 1 resolution, SPEC_FULL.md): capped
    /// exponential backoff, doubling from a 1s base, capped at 60s, ±20%
    /// jitter so a simultaneous outage of several outbounds doesn't retry
    /// in lockstep.
    pub fn backoff_delay(&self) -> Duration {
        let capped_attempt = self.reconnect_attempt.min(6);
        let base_ms = (1u64 << capped_attempt).saturating_mul(1000).min(60_000);
        jitter(base_ms)
    }

    pub fn on_disconnect(&mut self) {
        self.state = OutboundState::Disconnected;
        self.missed_pings = 0;
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
    }

    pub fn on_connected(&mut self) {
        self.reconnect_attempt = 0;
    }
}

/// Apply ±20% jitter to a base delay, seeded from the current time rather
/// than stored state so the connection struct stays clock-free.
fn jitter(base_ms: u64) -> Duration {
    let jitter_range = base_ms / 5;
    if jitter_range == 0 {
        return Duration::from_millis(base_ms);
    }
    let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
    let offset = (now_nanos % (jitter_range * 2)) as i64 - jitter_range as i64;
    Duration::from_millis((base_ms as i64 + offset).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_lists_on_both_slots() {
        let (ts1, ts2) = parse_options("TS1=1,2,3;TS2=10,20").unwrap();
        assert!(ts1.allows(2));
        assert!(!ts1.allows(4));
        assert!(ts2.allows(20));
    }

    #[test]
    fn bare_star_or_absent_slot_is_wildcard() {
        let (ts1, ts2) = parse_options("TS1=*").unwrap();
        assert_eq!(ts1, TgSet::Wildcard);
        assert_eq!(ts2, TgSet::Wildcard);
    }

    #[test]
    fn empty_value_is_deny_all() {
        let (ts1, _) = parse_options("TS1=").unwrap();
        assert_eq!(ts1, TgSet::deny_all());
    }

    #[test]
    fn format_options_round_trips_through_parse() {
        let original = "TS1=1,2,3;TS2=*";
        let (ts1, ts2) = parse_options(original).unwrap();
        let formatted = format_options(&ts1, &ts2);
        let (ts1_again, ts2_again) = parse_options(&formatted).unwrap();
        assert_eq!(ts1, ts1_again);
        assert_eq!(ts2, ts2_again);
    }

    fn test_outbound() -> OutboundConnection {
        OutboundConnection {
            name: "test".into(),
            our_id: RadioId::from_be_bytes([0, 0, 0, 1]),
            host: "example.com".into(),
            port: 62031,
            password: "x".into(),
            slot1_talkgroups: TgSet::Wildcard,
            slot2_talkgroups: TgSet::Wildcard,
            state: OutboundState::Disconnected,
            missed_pings: 0,
            reconnect_attempt: 0,
        }
    }

    #[test]
    fn backoff_starts_near_one_second() {
        let outbound = test_outbound();
        let delay = outbound.backoff_delay();
        assert!(delay >= Duration::from_millis(800));
        assert!(delay <= Duration::from_millis(1200));
    }

    #[test]
    fn backoff_grows_then_caps_at_sixty_seconds() {
        let mut outbound = test_outbound();
        for _ in 0..10 {
            outbound.on_disconnect();
        }
        let delay = outbound.backoff_delay();
        assert!(delay >= Duration::from_secs(48));
        assert!(delay <= Duration::from_secs(72));
    }
}
