//! Cooldown tracking and notification engine.
//!
//! Watches a third-party bot's activity, starts one cooldown per
//! (operator, action) when an action really happened, reminds the operator
//! when it is over, and keeps that state across restarts.

pub mod alias;
pub mod clock;
mod engine;
mod error;
pub mod messages;
pub mod notifier;
pub mod outcome;
pub mod persistence;
pub mod preferences;
pub mod scheduler;
pub mod store;
mod types;

pub use alias::{ActionSpec, AliasResolver, Resolution, default_actions};
pub use clock::Clock;
pub use engine::{
    ActionSummary, AlreadyActiveDelivery, CooldownEngine, EngineSettings, EventOutcome,
    IgnoreReason, ReloadReport,
};
pub use error::{DeliveryError, EngineError, NotifyError, PersistError, Result};
pub use notifier::{Delivery, DeliveryTransport, Destination, Notifier};
pub use outcome::{Outcome, OutcomeClassifier};
pub use persistence::{JsonFileBackend, MemoryBackend, StateBackend, StateSnapshot};
pub use preferences::PreferenceStore;
pub use store::{CooldownEntry, CooldownStore, StartOutcome};
pub use types::{
    ActionName, ActiveCooldown, ChannelRef, CooldownKey, ObservedEvent, OperatorId,
    OperatorPreference,
};
