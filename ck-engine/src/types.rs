use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Human whose action is rate-limited.
id_newtype!(OperatorId);
// Canonical, deduplicated action key.
id_newtype!(ActionName);
// Location where a triggering event was observed.
id_newtype!(ChannelRef);

/// Composite map key: one cooldown per (operator, action).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CooldownKey {
    pub operator: OperatorId,
    pub action: ActionName,
}

impl CooldownKey {
    pub fn new(operator: impl Into<OperatorId>, action: impl Into<ActionName>) -> Self {
        Self {
            operator: operator.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.operator, self.action)
    }
}

/// A raw notification from the watched actor, as handed over by the inbound transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedEvent {
    /// Raw trigger identifier (e.g. the invoked command name).
    #[serde(default)]
    pub trigger: Option<String>,
    /// Display title used when the trigger is missing or unknown.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub operator: Option<OperatorId>,
    #[serde(default)]
    pub body: Option<String>,
    /// Descriptive text of a structured summary (embed description).
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub origin: Option<ChannelRef>,
}

impl ObservedEvent {
    pub(crate) fn has_text(&self) -> bool {
        [&self.body, &self.summary]
            .into_iter()
            .any(|text| text.as_deref().is_some_and(|t| !t.trim().is_empty()))
    }

    pub(crate) fn has_identifier(&self) -> bool {
        [&self.trigger, &self.title]
            .into_iter()
            .any(|v| v.as_deref().is_some_and(|t| !t.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorPreference {
    pub deliver_direct: bool,
}

impl Default for OperatorPreference {
    fn default() -> Self {
        Self {
            deliver_direct: true,
        }
    }
}

/// One row of an operator's "what's active?" answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveCooldown {
    pub action: ActionName,
    pub remaining_seconds: u64,
}
