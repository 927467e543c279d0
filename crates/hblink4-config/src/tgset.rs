use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ConfigError;

/// A per-(peer, slot) allowed-talkgroup set (§3 Peer invariants, §4.2, §8
/// invariant 6).
///
/// `Wildcard` accepts every talkgroup; `Explicit(HashSet::new())` is a
/// distinct, valid value meaning deny-all. These must never collapse into
/// the same representation.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum TgSet {
    #[default]
    Wildcard,
    Explicit(HashSet<u32>),
}

impl TgSet {
    pub fn allows(&self, tg: u32) -> bool {
        match self {
            TgSet::Wildcard => true,
            TgSet::Explicit(set) => set.contains(&tg),
        }
    }

    pub fn deny_all() -> Self {
        TgSet::Explicit(HashSet::new())
    }
}

/// Untagged wire shape: either the literal string `"*"` or a JSON array of
/// talkgroup numbers. Absent-field wildcard is handled by `#[serde(default)]`
/// on the containing struct, not here.
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum TgSetWire {
    Star(String),
    List(Vec<u32>),
}

impl TryFrom<TgSetWire> for TgSet {
    type Error = ConfigError;

    fn try_from(wire: TgSetWire) -> Result<Self, Self::Error> {
        match wire {
            TgSetWire::Star(s) if s == "*" => Ok(TgSet::Wildcard),
            TgSetWire::Star(other) => Err(ConfigError::InvalidField {
                field: "talkgroup set",
                reason: format!("expected \"*\" or an array of talkgroup ids, got \"{other}\""),
            }),
            TgSetWire::List(list) => Ok(TgSet::Explicit(list.into_iter().collect())),
        }
    }
}

impl<'de> Deserialize<'de> for TgSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = TgSetWire::deserialize(deserializer)?;
        TgSet::try_from(wire).map_err(serde::de::Error::custom)
    }
}

impl Serialize for TgSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TgSet::Wildcard => serializer.serialize_str("*"),
            TgSet::Explicit(set) => {
                let mut list: Vec<u32> = set.iter().copied().collect();
                list.sort_unstable();
                list.serialize(serializer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_is_wildcard() {
        let v: TgSet = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(v, TgSet::Wildcard);
        assert!(v.allows(3120));
    }

    #[test]
    fn empty_array_is_deny_all() {
        let v: TgSet = serde_json::from_str("[]").unwrap();
        assert_eq!(v, TgSet::deny_all());
        assert!(!v.allows(3120));
    }

    #[test]
    fn explicit_list_is_exact_membership() {
        let v: TgSet = serde_json::from_str("[9, 3120]").unwrap();
        assert!(v.allows(9));
        assert!(v.allows(3120));
        assert!(!v.allows(10));
    }

    #[test]
    fn invalid_string_is_rejected() {
        let res: Result<TgSet, _> = serde_json::from_str("\"nope\"");
        assert!(res.is_err());
    }
}
