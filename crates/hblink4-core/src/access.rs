//! Access matcher (§4.2): resolves `(radio_id, callsign)` to the passphrase
//! and per-slot talkgroup sets a peer is allowed to use.

use hblink4_config::{AccessControlConfig, Config, Policy, Rule, RepeaterConfigEntry, TgSet};

use crate::errors::{CoreError, CoreResult};

/// The outcome of a successful `authenticate` call: what the protocol FSM
/// needs to run the challenge/response and configure the peer's slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub passphrase: String,
    pub slot1_talkgroups: TgSet,
    pub slot2_talkgroups: TgSet,
}

pub struct AccessMatcher {
    default_policy: Policy,
    auth_rules: Vec<Rule>,
    blacklist: Vec<Rule>,
    repeater_configs: Vec<RepeaterConfigEntry>,
}

impl AccessMatcher {
    pub fn new(access_control: &AccessControlConfig, repeater_configs: &[RepeaterConfigEntry]) -> Self {
        let mut auth_rules = access_control.authentication.rules.clone();
        auth_rules.sort_by_key(Rule::specificity);
        let mut blacklist = access_control.blacklist.clone();
        blacklist.sort_by_key(Rule::specificity);
        Self {
            default_policy: access_control.default_policy,
            auth_rules,
            blacklist,
            repeater_configs: repeater_configs.to_vec(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.access_control, &config.repeater_configs)
    }

    pub fn is_blacklisted(&self, radio_id: u32, callsign: &str) -> bool {
        self.blacklist.iter().any(|rule| rule.matches(radio_id, callsign))
    }

    /// Resolve a login attempt to its passphrase and slot talkgroup sets.
    ///
    /// Fails with `Unauthorized` when the peer is blacklisted, when no
    /// authentication rule matches under a deny-by-default policy, or when no
    /// `repeater_configs` entry supplies a passphrase for the match.
    pub fn authenticate(&self, radio_id: u32, callsign: &str) -> CoreResult<Authorization> {
        if self.is_blacklisted(radio_id, callsign) {
            return Err(CoreError::Unauthorized("peer is blacklisted"));
        }

        let rule_matches = self.auth_rules.iter().any(|rule| rule.matches(radio_id, callsign));
        if !rule_matches && self.default_policy == Policy::Deny {
            return Err(CoreError::Unauthorized("no matching authentication rule"));
        }

        let entry = self
            .repeater_configs
            .iter()
            .filter(|entry| entry.match_rule.matches(radio_id, callsign))
            .min_by_key(|entry| entry.match_rule.specificity())
            .ok_or(CoreError::Unauthorized("no repeater_configs entry for this peer"))?;

        Ok(Authorization {
            passphrase: entry.passphrase.clone(),
            slot1_talkgroups: entry.slot1_talkgroups.clone(),
            slot2_talkgroups: entry.slot2_talkgroups.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hblink4_config::AuthenticationConfig;

    fn matcher(default_policy: Policy, rules: Vec<Rule>, repeater_configs: Vec<RepeaterConfigEntry>) -> AccessMatcher {
        let ac = AccessControlConfig {
            default_policy,
            authentication: AuthenticationConfig { rules },
            blacklist: vec![],
        };
        AccessMatcher::new(&ac, &repeater_configs)
    }

    fn entry(radio_id: u32, passphrase: &str) -> RepeaterConfigEntry {
        RepeaterConfigEntry {
            match_rule: Rule::RadioId { radio_id },
            slot1_talkgroups: TgSet::Wildcard,
            slot2_talkgroups: TgSet::deny_all(),
            passphrase: passphrase.into(),
        }
    }

    #[test]
    fn deny_default_without_matching_rule_is_unauthorized() {
        let m = matcher(Policy::Deny, vec![], vec![entry(311100, "secret")]);
        assert!(m.authenticate(311100, "W1AW").is_err());
    }

    #[test]
    fn allow_default_still_requires_repeater_config_entry() {
        let m = matcher(Policy::Allow, vec![], vec![]);
        assert!(m.authenticate(311100, "W1AW").is_err());
    }

    #[test]
    fn matching_rule_and_entry_succeeds() {
        let m = matcher(
            Policy::Deny,
            vec![Rule::RadioId { radio_id: 311100 }],
            vec![entry(311100, "secret")],
        );
        let auth = m.authenticate(311100, "W1AW").unwrap();
        assert_eq!(auth.passphrase, "secret");
        assert!(auth.slot1_talkgroups.allows(3120));
        assert!(!auth.slot2_talkgroups.allows(3120));
    }

    #[test]
    fn blacklist_overrides_allow_policy() {
        let ac = AccessControlConfig {
            default_policy: Policy::Allow,
            authentication: AuthenticationConfig { rules: vec![] },
            blacklist: vec![Rule::RadioId { radio_id: 311100 }],
        };
        let m = AccessMatcher::new(&ac, &[entry(311100, "secret")]);
        assert!(m.is_blacklisted(311100, "W1AW"));
        assert!(m.authenticate(311100, "W1AW").is_err());
    }
}
