use serde::{Deserialize, Serialize};

/// One access-control or blacklist rule (§4.2).
///
/// First-match-wins; priority within a category is decided by specificity
/// (exact before range before wildcard), handled by [`Rule::specificity`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    RadioId { radio_id: u32 },
    RadioIdRange { radio_id_range: (u32, u32) },
    Callsign { callsign: String },
    CallsignWild { callsign_wild: String },
}

impl Rule {
    /// Lower value = matched first when more than one rule matches the same peer.
    pub fn specificity(&self) -> u8 {
        match self {
            Rule::RadioId { .. } => 0,
            Rule::Callsign { .. } => 0,
            Rule::RadioIdRange { .. } => 1,
            Rule::CallsignWild { .. } => 2,
        }
    }

    pub fn matches(&self, radio_id: u32, callsign: &str) -> bool {
        match self {
            Rule::RadioId { radio_id: want } => radio_id == *want,
            Rule::RadioIdRange { radio_id_range: (lo, hi) } => radio_id >= *lo && radio_id <= *hi,
            Rule::Callsign { callsign: want } => callsign.eq_ignore_ascii_case(want),
            Rule::CallsignWild { callsign_wild: pattern } => {
                wildcard_match(pattern.as_bytes(), callsign.as_bytes())
            }
        }
    }
}

/// Shell-style `*`/`?` matcher, case-insensitive (callsigns are conventionally
/// upper-cased but operators type them however).
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    fn upper(b: u8) -> u8 {
        b.to_ascii_uppercase()
    }
    fn go(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                // Try consuming zero or more characters of text for this '*'.
                go(&pattern[1..], text) || (!text.is_empty() && go(pattern, &text[1..]))
            }
            Some(b'?') => !text.is_empty() && go(&pattern[1..], &text[1..]),
            Some(&p) => {
                !text.is_empty() && upper(p) == upper(text[0]) && go(&pattern[1..], &text[1..])
            }
        }
    }
    go(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_radio_id_matches() {
        let r = Rule::RadioId { radio_id: 311100 };
        assert!(r.matches(311100, "W1AW"));
        assert!(!r.matches(311101, "W1AW"));
    }

    #[test]
    fn range_is_inclusive() {
        let r = Rule::RadioIdRange { radio_id_range: (311100, 311199) };
        assert!(r.matches(311100, ""));
        assert!(r.matches(311199, ""));
        assert!(!r.matches(311200, ""));
    }

    #[test]
    fn wildcard_star_matches_any_suffix() {
        let r = Rule::CallsignWild { callsign_wild: "W1*".into() };
        assert!(r.matches(0, "W1ABC"));
        assert!(r.matches(0, "w1abc"));
        assert!(!r.matches(0, "K1ABC"));
    }

    #[test]
    fn wildcard_question_matches_one_char() {
        let r = Rule::CallsignWild { callsign_wild: "W1A?C".into() };
        assert!(r.matches(0, "W1ABC"));
        assert!(!r.matches(0, "W1ABBC"));
    }

    #[test]
    fn specificity_orders_exact_before_range_before_wildcard() {
        assert!(Rule::RadioId { radio_id: 1 }.specificity() < Rule::RadioIdRange { radio_id_range: (1, 2) }.specificity());
        assert!(
            Rule::RadioIdRange { radio_id_range: (1, 2) }.specificity()
                < Rule::CallsignWild { callsign_wild: "*".into() }.specificity()
        );
    }
}
