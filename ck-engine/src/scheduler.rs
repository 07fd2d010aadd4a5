//! Deferred expiry reminders.
//!
//! Each armed cooldown gets one task that sleeps until the expiry instant it
//! captured, then disarms the entry with compare-and-clear. Only the task
//! whose generation still owns the key notifies; any other outcome ends
//! silently.

use crate::engine::EngineCore;
use crate::messages;
use crate::types::{ChannelRef, CooldownKey};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReminderTask {
    pub key: CooldownKey,
    /// Generation this task is allowed to disarm.
    pub expires_at: DateTime<Utc>,
    pub display_name: String,
    pub origin: Option<ChannelRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    Armed,
    /// Disarmed its own generation and attempted the expiry notification.
    Fired,
    /// The entry was cleared or replaced before the task woke up.
    Superseded,
    /// Shutdown; the entry stays persisted and is re-armed on next start.
    Cancelled,
}

pub struct ReminderScheduler {
    core: Arc<EngineCore>,
    shutdown: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl ReminderScheduler {
    pub(crate) fn new(core: Arc<EngineCore>, shutdown: CancellationToken) -> Self {
        Self {
            core,
            shutdown,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn arm(&self, task: ReminderTask) {
        let core = self.core.clone();
        let shutdown = self.shutdown.child_token();
        let pending = self.pending.clone();
        let deadline = core.clock.deadline_for(task.expires_at);
        pending.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            key = %task.key,
            expires_at = %task.expires_at,
            state = ?ReminderState::Armed,
            "reminder armed"
        );
        tokio::spawn(async move {
            let state = tokio::select! {
                _ = shutdown.cancelled() => ReminderState::Cancelled,
                _ = tokio::time::sleep_until(deadline) => fire(&core, &task).await,
            };
            pending.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(
                key = %task.key,
                expires_at = %task.expires_at,
                state = ?state,
                "reminder finished"
            );
        });
    }

    /// Reminders armed and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn fire(core: &EngineCore, task: &ReminderTask) -> ReminderState {
    if !core.store.clear(&task.key, task.expires_at) {
        return ReminderState::Superseded;
    }
    core.persist().await;

    let message = messages::cooldown_over(&task.display_name);
    match core
        .notifier
        .notify(&task.key.operator, task.origin.as_ref(), &message)
        .await
    {
        Ok(delivery) => {
            tracing::info!(
                operator = %task.key.operator,
                action = %task.key.action,
                delivery = ?delivery,
                "cooldown expired; reminder delivered"
            );
        }
        Err(e) => {
            tracing::warn!(
                operator = %task.key.operator,
                action = %task.key.action,
                error = %e,
                "cooldown expired; reminder could not be delivered"
            );
        }
    }
    ReminderState::Fired
}
