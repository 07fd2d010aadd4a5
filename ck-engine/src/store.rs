//! Authoritative cooldown map.
//!
//! Every read-modify-write goes through the per-key entry lock of the
//! underlying `DashMap`, so two concurrent `try_start` calls for one key can
//! never both observe "no entry". Disarming is compare-and-clear: a reminder
//! only removes the generation (expiry instant) it was armed for.

use crate::types::{ActionName, ActiveCooldown, ChannelRef, CooldownKey, OperatorId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub expires_at: DateTime<Utc>,
    /// Where the triggering event was seen; fallback destination for reminders.
    #[serde(default)]
    pub origin: Option<ChannelRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { expires_at: DateTime<Utc> },
    AlreadyActive { remaining: Duration },
}

#[derive(Debug, Default)]
pub struct CooldownStore {
    entries: DashMap<CooldownKey, CooldownEntry>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically arms `key` unless a non-expired entry already exists.
    pub fn try_start(
        &self,
        key: CooldownKey,
        duration: Duration,
        now: DateTime<Utc>,
        origin: Option<ChannelRef>,
    ) -> StartOutcome {
        let span = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let fresh = CooldownEntry { expires_at, origin };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(remaining) = remaining_at(occupied.get().expires_at, now) {
                    return StartOutcome::AlreadyActive { remaining };
                }
                occupied.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
        StartOutcome::Started { expires_at }
    }

    /// Removes the entry only if it still carries `expected_expires_at`.
    pub fn clear(&self, key: &CooldownKey, expected_expires_at: DateTime<Utc>) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.expires_at == expected_expires_at)
            .is_some()
    }

    /// Unconditional removal for administrative clears.
    pub fn remove(&self, key: &CooldownKey) -> Option<CooldownEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    pub fn get(&self, key: &CooldownKey) -> Option<CooldownEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Non-expired cooldowns for one operator, ordered by action name.
    pub fn query(&self, operator: &OperatorId, now: DateTime<Utc>) -> Vec<ActiveCooldown> {
        let mut out: Vec<ActiveCooldown> = self
            .entries
            .iter()
            .filter(|entry| &entry.key().operator == operator)
            .filter_map(|entry| {
                let remaining = remaining_at(entry.value().expires_at, now)?;
                Some(ActiveCooldown {
                    action: entry.key().action.clone(),
                    remaining_seconds: ceil_seconds(remaining),
                })
            })
            .collect();
        out.sort_by(|a, b| a.action.cmp(&b.action));
        out
    }

    /// Drops every entry whose expiry is at or before `cutoff`. Sends nothing.
    pub fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > cutoff);
        before.saturating_sub(self.entries.len())
    }

    /// All entries still active at `now`, ordered by key.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(CooldownKey, CooldownEntry)> {
        let mut out: Vec<(CooldownKey, CooldownEntry)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at > now)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replaces the whole map with restored entries. Not atomic on its own;
    /// callers hold the engine's state lock exclusively.
    pub(crate) fn replace_all(&self, entries: Vec<(CooldownKey, CooldownEntry)>) {
        self.entries.clear();
        for (key, entry) in entries {
            self.entries.insert(key, entry);
        }
    }

    /// Actions holding an entry for `operator`, expired or not.
    pub fn actions_of(&self, operator: &OperatorId) -> Vec<ActionName> {
        let mut out: Vec<ActionName> = self
            .entries
            .iter()
            .filter(|entry| &entry.key().operator == operator)
            .map(|entry| entry.key().action.clone())
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn remaining_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    if expires_at <= now {
        return None;
    }
    (expires_at - now).to_std().ok()
}

fn ceil_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
