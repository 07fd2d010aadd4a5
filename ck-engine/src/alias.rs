//! Maps raw trigger identifiers and display titles onto canonical actions.

use crate::types::ActionName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Static description of one rate-limited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: ActionName,
    pub display_name: String,
    pub duration_seconds: u64,
    /// Raw identifiers the watched actor reports for this action.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Display titles accepted when no trigger identifier is available.
    #[serde(default)]
    pub titles: Vec<String>,
    #[serde(default)]
    pub failure_signatures: Vec<String>,
}

/// Result of resolving an event onto the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub action: ActionName,
    pub display_name: String,
    pub default_duration_seconds: u64,
    pub failure_signatures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AliasResolver {
    specs: Arc<Vec<ActionSpec>>,
    by_trigger: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
}

impl AliasResolver {
    /// Builds the lookup tables. Later specs never shadow earlier ones.
    pub fn new(specs: Vec<ActionSpec>) -> Self {
        let mut by_trigger = HashMap::new();
        let mut by_title = HashMap::new();
        for (idx, spec) in specs.iter().enumerate() {
            for trigger in &spec.triggers {
                let trigger = trigger.trim();
                if trigger.is_empty() {
                    continue;
                }
                if by_trigger.contains_key(trigger) {
                    tracing::warn!(trigger, action = %spec.name, "duplicate trigger ignored");
                    continue;
                }
                by_trigger.insert(trigger.to_string(), idx);
            }
            for title in &spec.titles {
                let title = title.trim();
                if title.is_empty() {
                    continue;
                }
                by_title.entry(title.to_string()).or_insert(idx);
            }
        }
        Self {
            specs: Arc::new(specs),
            by_trigger,
            by_title,
        }
    }

    /// Trigger identifier first, title second. Unknown input is `None`, never an error.
    pub fn resolve(&self, trigger: Option<&str>, title: Option<&str>) -> Option<Resolution> {
        let idx = trigger
            .map(str::trim)
            .and_then(|t| self.by_trigger.get(t))
            .or_else(|| title.map(str::trim).and_then(|t| self.by_title.get(t)))?;
        self.specs.get(*idx).map(Resolution::from)
    }

    /// Admin lookup by canonical name or display name, case-insensitive.
    pub fn lookup(&self, name: &str) -> Option<&ActionSpec> {
        let name = name.trim();
        self.specs.iter().find(|spec| {
            spec.name.eq_ignore_ascii_case(name) || spec.display_name.eq_ignore_ascii_case(name)
        })
    }

    pub fn display_name<'a>(&'a self, action: &'a ActionName) -> &'a str {
        self.specs
            .iter()
            .find(|spec| &spec.name == action)
            .map(|spec| spec.display_name.as_str())
            .unwrap_or(action.as_str())
    }

    pub fn actions(&self) -> &[ActionSpec] {
        &self.specs
    }
}

impl From<&ActionSpec> for Resolution {
    fn from(spec: &ActionSpec) -> Self {
        Self {
            action: spec.name.clone(),
            display_name: spec.display_name.clone(),
            default_duration_seconds: spec.duration_seconds,
            failure_signatures: spec.failure_signatures.clone(),
        }
    }
}

/// The three actions the watched bot is known for.
///
/// Signature matching is case-sensitive, so each phrase ships in both the
/// lowercase and sentence-case form the watched bot uses.
pub fn default_actions() -> Vec<ActionSpec> {
    vec![
        ActionSpec {
            name: ActionName::new("box-refresh"),
            display_name: "Refreshing Box".to_string(),
            duration_seconds: 60,
            triggers: vec!["open-boxes".to_string()],
            titles: vec!["Refreshing Box".to_string()],
            failure_signatures: vec![
                "no boxes available to open".to_string(),
                "No boxes available to open".to_string(),
            ],
        },
        ActionSpec {
            name: ActionName::new("premium-pack"),
            display_name: "Premium Pack".to_string(),
            duration_seconds: 60,
            triggers: vec!["premium-pack".to_string()],
            titles: vec!["Premium Pack".to_string()],
            failure_signatures: vec![
                "no premium packs available to open".to_string(),
                "No premium packs available to open".to_string(),
            ],
        },
        ActionSpec {
            name: ActionName::new("summon"),
            display_name: "Summon".to_string(),
            duration_seconds: 1800,
            triggers: vec!["summon".to_string()],
            titles: vec!["Summon".to_string()],
            failure_signatures: vec![
                "you can summon again in".to_string(),
                "You can summon again in".to_string(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_configured_trigger() {
        let resolver = AliasResolver::new(default_actions());
        for spec in default_actions() {
            for trigger in &spec.triggers {
                let resolved = resolver.resolve(Some(trigger), None).expect("resolve trigger");
                assert_eq!(resolved.action, spec.name);
                assert_eq!(resolved.default_duration_seconds, spec.duration_seconds);
            }
        }
    }

    #[test]
    fn unknown_trigger_is_not_recognized() {
        let resolver = AliasResolver::new(default_actions());
        assert!(resolver.resolve(Some("daily"), None).is_none());
        assert!(resolver.resolve(None, None).is_none());
    }

    #[test]
    fn title_is_a_fallback() {
        let resolver = AliasResolver::new(default_actions());
        let resolved = resolver
            .resolve(None, Some("Premium Pack"))
            .expect("resolve title");
        assert_eq!(resolved.action.as_str(), "premium-pack");

        // Unknown trigger still falls through to the title.
        let resolved = resolver
            .resolve(Some("unrelated"), Some("Summon"))
            .expect("resolve title after unknown trigger");
        assert_eq!(resolved.action.as_str(), "summon");
    }

    #[test]
    fn trigger_wins_over_title() {
        let resolver = AliasResolver::new(default_actions());
        let resolved = resolver
            .resolve(Some("summon"), Some("Refreshing Box"))
            .expect("resolve");
        assert_eq!(resolved.action.as_str(), "summon");
    }

    #[test]
    fn lookup_accepts_canonical_or_display_name() {
        let resolver = AliasResolver::new(default_actions());
        assert_eq!(
            resolver.lookup("BOX-REFRESH").map(|s| s.name.as_str()),
            Some("box-refresh")
        );
        assert_eq!(
            resolver.lookup("refreshing box").map(|s| s.name.as_str()),
            Some("box-refresh")
        );
        assert!(resolver.lookup("open-boxes").is_none());
    }

    #[test]
    fn default_signatures_cover_sentence_case() {
        use crate::outcome::{Outcome, OutcomeClassifier};

        let classifier = OutcomeClassifier::new(Vec::new());
        for spec in default_actions() {
            for signature in &spec.failure_signatures {
                let mut chars = signature.chars();
                let capitalized: String = chars
                    .next()
                    .map(|c| c.to_ascii_uppercase())
                    .into_iter()
                    .chain(chars)
                    .collect();
                let summary = format!("{capitalized}.");
                assert!(
                    matches!(
                        classifier.classify(&spec.failure_signatures, None, Some(&summary)),
                        Outcome::Failed { .. }
                    ),
                    "{} should reject {summary:?}",
                    spec.name
                );
            }
        }
    }
}
