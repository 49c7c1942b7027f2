//! Access policies attached to object metadata.
//!
//! A policy names subjects, resources and actions, any of which may be left
//! empty to mean "any". Evaluation picks the most specific matching policy;
//! among equally specific matches the later one wins.

use std::fmt;
use std::str::FromStr;

use crate::crypto::PublicKey;
use crate::error::{CoreError, Result};
use crate::value::{Map, Value};

/// The outcome of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(CoreError::MalformedObject(format!(
                "unknown policy effect {:?}",
                other
            ))),
        }
    }
}

/// A single access rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Policy {
    pub subjects: Vec<PublicKey>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub effect: Effect,
}

impl Policy {
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            ..Default::default()
        }
    }

    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Default::default()
        }
    }

    pub fn subject(mut self, key: PublicKey) -> Self {
        self.subjects.push(key);
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// How many dimensions this policy constrains and satisfies for the probe,
    /// or `None` if it does not apply.
    fn specificity(&self, subject: &PublicKey, resource: &str, action: &str) -> Option<u8> {
        let mut specificity = 0;
        if !self.subjects.is_empty() {
            if !self.subjects.contains(subject) {
                return None;
            }
            specificity += 1;
        }
        if !self.resources.is_empty() {
            if !self.resources.iter().any(|r| r == resource) {
                return None;
            }
            specificity += 1;
        }
        if !self.actions.is_empty() {
            if !self.actions.iter().any(|a| a == action) {
                return None;
            }
            specificity += 1;
        }
        Some(specificity)
    }

    /// Evaluate an ordered policy list for a (subject, resource, action) probe.
    ///
    /// With no matching policy the result is [`Effect::Allow`].
    pub fn evaluate(
        policies: &[Policy],
        subject: &PublicKey,
        resource: &str,
        action: &str,
    ) -> Effect {
        let mut result = Effect::Allow;
        let mut best = 0;
        for policy in policies {
            if let Some(specificity) = policy.specificity(subject, resource, action) {
                if specificity >= best {
                    result = policy.effect;
                    best = specificity;
                }
            }
        }
        result
    }

    pub fn to_map(&self) -> Map {
        let mut map = Map::new();
        if !self.subjects.is_empty() {
            map.insert(
                "subjects".into(),
                Value::list(self.subjects.iter().map(PublicKey::fingerprint)),
            );
        }
        if !self.resources.is_empty() {
            map.insert("resources".into(), Value::list(self.resources.clone()));
        }
        if !self.actions.is_empty() {
            map.insert("actions".into(), Value::list(self.actions.clone()));
        }
        map.insert("effect".into(), Value::from(self.effect.as_str()));
        map
    }

    pub fn from_map(map: &Map) -> Result<Self> {
        let strings = |key: &str| -> Result<Vec<String>> {
            match map.get(key) {
                None => Ok(Vec::new()),
                Some(Value::List(items)) => items
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| CoreError::mismatch(key, "string array"))
                    })
                    .collect(),
                Some(_) => Err(CoreError::mismatch(key, "string array")),
            }
        };

        let subjects = strings("subjects")?
            .iter()
            .map(|s| PublicKey::from_fingerprint(s))
            .collect::<Result<Vec<_>>>()?;

        let effect = match map.get("effect") {
            None => Effect::Allow,
            Some(v) => v
                .as_str()
                .ok_or_else(|| CoreError::mismatch("effect", "string"))?
                .parse()?,
        };

        Ok(Self {
            subjects,
            resources: strings("resources")?,
            actions: strings("actions")?,
            effect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_no_policies_allows() {
        let alice = Keypair::generate().public_key();
        assert_eq!(Policy::evaluate(&[], &alice, "doc", "read"), Effect::Allow);
    }

    #[test]
    fn test_more_specific_policy_wins() {
        let alice = Keypair::generate().public_key();
        let bob = Keypair::generate().public_key();

        let policies = vec![
            Policy::deny().subject(alice).resource("doc").action("read"),
            Policy::allow().subject(alice),
        ];

        // The deny is more specific for alice reading doc.
        assert_eq!(
            Policy::evaluate(&policies, &alice, "doc", "read"),
            Effect::Deny
        );
        // Only the allow matches alice writing doc.
        assert_eq!(
            Policy::evaluate(&policies, &alice, "doc", "write"),
            Effect::Allow
        );
        // Nothing matches bob.
        assert_eq!(
            Policy::evaluate(&policies, &bob, "doc", "read"),
            Effect::Allow
        );
    }

    #[test]
    fn test_later_policy_wins_ties() {
        let alice = Keypair::generate().public_key();
        let policies = vec![Policy::allow().action("read"), Policy::deny().action("read")];
        assert_eq!(
            Policy::evaluate(&policies, &alice, "doc", "read"),
            Effect::Deny
        );
    }

    #[test]
    fn test_wildcard_policy_applies_to_everyone() {
        let alice = Keypair::generate().public_key();
        let policies = vec![Policy::deny()];
        assert_eq!(
            Policy::evaluate(&policies, &alice, "anything", "any"),
            Effect::Deny
        );
    }

    #[test]
    fn test_map_roundtrip() {
        let alice = Keypair::generate().public_key();
        let policy = Policy::deny().subject(alice).resource("doc").action("read");
        let map = policy.to_map();
        assert_eq!(map.get("effect").and_then(Value::as_str), Some("deny"));
        assert_eq!(Policy::from_map(&map).unwrap(), policy);
    }

    #[test]
    fn test_from_map_rejects_unknown_effect() {
        let mut map = Map::new();
        map.insert("effect".into(), Value::from("maybe"));
        assert!(Policy::from_map(&map).is_err());
    }
}
