//! The cooldown engine: one explicit instance per process.
//!
//! Inbound event → alias resolution → outcome classification → atomic start
//! → start notification → deferred reminder. Construction loads persisted
//! state and re-arms surviving cooldowns; `shutdown` stops timers and saves.

use crate::alias::{ActionSpec, AliasResolver, default_actions};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::messages;
use crate::notifier::{Delivery, DeliveryTransport, Notifier};
use crate::outcome::{Outcome, OutcomeClassifier};
use crate::persistence::{Persistence, StateBackend, StateSnapshot};
use crate::preferences::PreferenceStore;
use crate::scheduler::{ReminderScheduler, ReminderTask};
use crate::store::{CooldownEntry, CooldownStore, StartOutcome};
use crate::types::{
    ActionName, ActiveCooldown, ChannelRef, CooldownKey, ObservedEvent, OperatorId,
    OperatorPreference,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where "still on cooldown" replies go when an action is re-triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlreadyActiveDelivery {
    /// Same rule as start/expiry notifications.
    #[default]
    Preferred,
    /// Always the channel where the re-trigger was observed.
    Fallback,
    Silent,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub actions: Vec<ActionSpec>,
    /// Failure signatures applied to every action.
    pub failure_signatures: Vec<String>,
    pub already_active: AlreadyActiveDelivery,
    /// `None` disables the periodic sweep.
    pub sweep_interval: Option<Duration>,
    /// Entries are swept only once they are this far past expiry, leaving
    /// their reminders time to fire first.
    pub sweep_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            actions: default_actions(),
            failure_signatures: Vec::new(),
            already_active: AlreadyActiveDelivery::Preferred,
            sweep_interval: Some(Duration::from_secs(300)),
            sweep_grace: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingOperator,
    NoContent,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    Suppressed {
        action: ActionName,
        signature: String,
    },
    Started {
        action: ActionName,
        expires_at: DateTime<Utc>,
        /// `None` when the start notification could not be delivered.
        delivery: Option<Delivery>,
    },
    AlreadyActive {
        action: ActionName,
        remaining: Duration,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub name: ActionName,
    pub display_name: String,
    pub default_duration_seconds: u64,
    pub effective_duration_seconds: u64,
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub restored: usize,
    pub dropped_expired: usize,
    pub rearmed: usize,
}

/// State shared between the engine facade and reminder tasks.
pub(crate) struct EngineCore {
    pub(crate) store: CooldownStore,
    pub(crate) preferences: Arc<PreferenceStore>,
    pub(crate) notifier: Notifier,
    pub(crate) persistence: Persistence,
    pub(crate) clock: Clock,
    /// Shared by single-key mutations; held exclusively while `reload`
    /// swaps the whole state.
    pub(crate) state_lock: RwLock<()>,
}

impl EngineCore {
    pub(crate) async fn persist(&self) {
        self.persistence
            .save_logged(&self.store, &self.preferences, self.clock.now())
            .await;
    }
}

pub struct CooldownEngine {
    core: Arc<EngineCore>,
    resolver: AliasResolver,
    classifier: OutcomeClassifier,
    scheduler: ReminderScheduler,
    settings: EngineSettings,
    shutdown: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CooldownEngine {
    /// Builds the engine, restores persisted state and re-arms live cooldowns.
    ///
    /// A read failure is logged and treated as a cold start.
    pub async fn start(
        settings: EngineSettings,
        transport: Arc<dyn DeliveryTransport>,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        let preferences = Arc::new(PreferenceStore::new());
        let core = Arc::new(EngineCore {
            store: CooldownStore::new(),
            preferences: preferences.clone(),
            notifier: Notifier::new(transport, preferences),
            persistence: Persistence::new(backend),
            clock: Clock::new(),
            state_lock: RwLock::new(()),
        });
        let shutdown = CancellationToken::new();
        let engine = Self {
            scheduler: ReminderScheduler::new(core.clone(), shutdown.child_token()),
            resolver: AliasResolver::new(settings.actions.clone()),
            classifier: OutcomeClassifier::new(settings.failure_signatures.clone()),
            core,
            settings,
            shutdown,
            background_tasks: Mutex::new(Vec::new()),
        };

        let snapshot = match engine.core.persistence.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::info!(
                    backend = %engine.core.persistence.describe(),
                    "no persisted cooldown state; starting empty"
                );
                StateSnapshot::default()
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = %engine.core.persistence.describe(),
                    "failed to read persisted cooldown state; cold start"
                );
                StateSnapshot::default()
            }
        };
        let report = engine.restore(snapshot);
        tracing::info!(
            restored = report.restored,
            dropped_expired = report.dropped_expired,
            rearmed = report.rearmed,
            actions = engine.resolver.actions().len(),
            "cooldown engine started"
        );
        if report.dropped_expired > 0 {
            engine.core.persist().await;
        }
        engine.spawn_sweep_loop().await;
        engine
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(trigger = ?event.trigger, operator = ?event.operator)
    )]
    pub async fn handle_event(&self, event: ObservedEvent) -> EventOutcome {
        let Some(operator) = event.operator.clone() else {
            return EventOutcome::Ignored(IgnoreReason::MissingOperator);
        };
        if !event.has_identifier() && !event.has_text() {
            return EventOutcome::Ignored(IgnoreReason::NoContent);
        }
        let Some(resolution) = self
            .resolver
            .resolve(event.trigger.as_deref(), event.title.as_deref())
        else {
            return EventOutcome::Ignored(IgnoreReason::Unrecognized);
        };

        if let Outcome::Failed { signature } = self.classifier.classify(
            &resolution.failure_signatures,
            event.body.as_deref(),
            event.summary.as_deref(),
        ) {
            tracing::info!(
                operator = %operator,
                action = %resolution.action,
                signature = %signature,
                "action did not happen; cooldown not started"
            );
            return EventOutcome::Suppressed {
                action: resolution.action,
                signature,
            };
        }

        let state = self.core.state_lock.read().await;
        let seconds = self
            .core
            .preferences
            .duration_override(&resolution.action)
            .unwrap_or(resolution.default_duration_seconds);
        let duration = Duration::from_secs(seconds);
        let key = CooldownKey::new(operator.clone(), resolution.action.clone());
        let now = self.core.clock.now();

        match self
            .core
            .store
            .try_start(key.clone(), duration, now, event.origin.clone())
        {
            StartOutcome::AlreadyActive { remaining } => {
                drop(state);
                tracing::info!(
                    operator = %operator,
                    action = %resolution.action,
                    remaining_ms = remaining.as_millis() as u64,
                    "cooldown already active"
                );
                self.report_already_active(
                    &operator,
                    event.origin.as_ref(),
                    &resolution.display_name,
                    remaining,
                )
                .await;
                EventOutcome::AlreadyActive {
                    action: resolution.action,
                    remaining,
                }
            }
            StartOutcome::Started { expires_at } => {
                tracing::info!(
                    operator = %operator,
                    action = %resolution.action,
                    expires_at = %expires_at,
                    duration_seconds = seconds,
                    "cooldown started"
                );
                self.core.persist().await;
                self.scheduler.arm(ReminderTask {
                    key,
                    expires_at,
                    display_name: resolution.display_name.clone(),
                    origin: event.origin.clone(),
                });
                drop(state);

                let message = messages::cooldown_started(&resolution.display_name, duration);
                let delivery = match self
                    .core
                    .notifier
                    .notify(&operator, event.origin.as_ref(), &message)
                    .await
                {
                    Ok(delivery) => Some(delivery),
                    Err(e) => {
                        tracing::warn!(
                            operator = %operator,
                            action = %resolution.action,
                            error = %e,
                            "start notification not delivered"
                        );
                        None
                    }
                };
                EventOutcome::Started {
                    action: resolution.action,
                    expires_at,
                    delivery,
                }
            }
        }
    }

    async fn report_already_active(
        &self,
        operator: &OperatorId,
        origin: Option<&ChannelRef>,
        display_name: &str,
        remaining: Duration,
    ) {
        let message = messages::still_active(display_name, remaining);
        let result = match self.settings.already_active {
            AlreadyActiveDelivery::Silent => return,
            AlreadyActiveDelivery::Preferred => {
                self.core.notifier.notify(operator, origin, &message).await
            }
            AlreadyActiveDelivery::Fallback => {
                self.core
                    .notifier
                    .notify_fallback(operator, origin, &message)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(operator = %operator, error = %e, "already-active reply not delivered");
        }
    }

    pub fn active_cooldowns(&self, operator: &OperatorId) -> Vec<ActiveCooldown> {
        self.core.store.query(operator, self.core.clock.now())
    }

    pub fn display_name<'a>(&'a self, action: &'a ActionName) -> &'a str {
        self.resolver.display_name(action)
    }

    pub fn delivery_preference(&self, operator: &OperatorId) -> OperatorPreference {
        self.core.preferences.get(operator)
    }

    pub async fn set_delivery_preference(
        &self,
        operator: &OperatorId,
        deliver_direct: bool,
    ) -> OperatorPreference {
        let _state = self.core.state_lock.read().await;
        let pref = self
            .core
            .preferences
            .set_deliver_direct(operator, deliver_direct);
        tracing::info!(operator = %operator, deliver_direct, "delivery preference changed");
        self.core.persist().await;
        pref
    }

    pub fn actions(&self) -> Vec<ActionSummary> {
        self.resolver
            .actions()
            .iter()
            .map(|spec| ActionSummary {
                name: spec.name.clone(),
                display_name: spec.display_name.clone(),
                default_duration_seconds: spec.duration_seconds,
                effective_duration_seconds: self
                    .core
                    .preferences
                    .duration_override(&spec.name)
                    .unwrap_or(spec.duration_seconds),
                triggers: spec.triggers.clone(),
            })
            .collect()
    }

    /// Overrides the duration used for new cooldowns of `action`. Running
    /// cooldowns keep their expiry.
    pub async fn set_action_duration(&self, action: &str, seconds: u64) -> Result<ActionName> {
        if seconds == 0 {
            return Err(EngineError::InvalidInput(
                "duration must be at least one second".to_string(),
            ));
        }
        let name = self
            .resolver
            .lookup(action)
            .map(|spec| spec.name.clone())
            .ok_or_else(|| EngineError::UnknownAction(action.trim().to_string()))?;
        let _state = self.core.state_lock.read().await;
        self.core
            .preferences
            .set_duration_override(name.clone(), seconds);
        tracing::info!(action = %name, seconds, "action duration overridden");
        self.core.persist().await;
        Ok(name)
    }

    /// Administrative clear. The pending reminder later finds its generation
    /// gone and ends without notifying.
    pub async fn clear_cooldown(&self, operator: &OperatorId, action: &str) -> Result<bool> {
        let name = self
            .resolver
            .lookup(action)
            .map(|spec| spec.name.clone())
            .ok_or_else(|| EngineError::UnknownAction(action.trim().to_string()))?;
        let _state = self.core.state_lock.read().await;
        let removed = self
            .core
            .store
            .remove(&CooldownKey::new(operator.clone(), name.clone()))
            .is_some();
        if removed {
            tracing::info!(operator = %operator, action = %name, "cooldown cleared");
            self.core.persist().await;
        }
        Ok(removed)
    }

    /// Re-reads persisted state and replaces the in-memory view with it.
    ///
    /// Starts and admin edits wait until the swap is saved.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _state = self.core.state_lock.write().await;
        let snapshot = self.core.persistence.load().await?.unwrap_or_default();
        let report = self.restore(snapshot);
        tracing::info!(
            restored = report.restored,
            dropped_expired = report.dropped_expired,
            rearmed = report.rearmed,
            "cooldown state reloaded"
        );
        self.core.persist().await;
        Ok(report)
    }

    fn restore(&self, snapshot: StateSnapshot) -> ReloadReport {
        let now = self.core.clock.now();
        let (live, dropped_expired) = snapshot.live_entries(now);
        self.core
            .preferences
            .replace(snapshot.preferences, snapshot.duration_overrides);

        // Entries already armed with the same generation keep their timers.
        let armed: HashMap<CooldownKey, DateTime<Utc>> = self
            .core
            .store
            .snapshot(now)
            .into_iter()
            .map(|(key, entry)| (key, entry.expires_at))
            .collect();
        let restored = live.len();
        let mut rearmed = 0;
        self.core.store.replace_all(live.clone());
        for (key, CooldownEntry { expires_at, origin }) in live {
            if armed.get(&key) == Some(&expires_at) {
                continue;
            }
            let display_name = self.resolver.display_name(&key.action).to_string();
            self.scheduler.arm(ReminderTask {
                key,
                expires_at,
                display_name,
                origin,
            });
            rearmed += 1;
        }
        ReloadReport {
            restored,
            dropped_expired,
            rearmed,
        }
    }

    pub fn pending_reminders(&self) -> usize {
        self.scheduler.pending()
    }

    async fn spawn_sweep_loop(&self) {
        let Some(interval) = self.settings.sweep_interval else {
            return;
        };
        let core = self.core.clone();
        let grace = chrono::Duration::from_std(self.settings.sweep_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let shutdown = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("cooldown sweep loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _state = core.state_lock.read().await;
                        let removed = core.store.sweep(core.clock.now() - grace);
                        if removed > 0 {
                            tracing::info!(removed, "swept expired cooldowns");
                            core.persist().await;
                        }
                    }
                }
            }
        });
        self.background_tasks.lock().await.push(handle);
    }

    /// Stops reminders and background loops, then writes a final snapshot.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = {
            let mut guard = self.background_tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "engine background task join failed");
                }
                Err(_) => {
                    tracing::warn!("timed out waiting for engine background task shutdown");
                }
            }
        }
        self.core.persist().await;
        tracing::info!("cooldown engine stopped");
    }
}
