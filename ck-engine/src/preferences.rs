use crate::types::{ActionName, OperatorId, OperatorPreference};
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Per-operator delivery preferences and administrative duration overrides.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    operators: DashMap<OperatorId, OperatorPreference>,
    duration_overrides: DashMap<ActionName, u64>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operator's preference, creating the default on first access.
    pub fn get_or_default(&self, operator: &OperatorId) -> OperatorPreference {
        *self
            .operators
            .entry(operator.clone())
            .or_default()
            .value()
    }

    /// Read-only view; unknown operators get the default without a row.
    pub fn get(&self, operator: &OperatorId) -> OperatorPreference {
        self.operators
            .get(operator)
            .map(|pref| *pref)
            .unwrap_or_default()
    }

    pub fn set_deliver_direct(&self, operator: &OperatorId, deliver_direct: bool) -> OperatorPreference {
        let mut pref = self.operators.entry(operator.clone()).or_default();
        pref.deliver_direct = deliver_direct;
        *pref
    }

    pub fn duration_override(&self, action: &ActionName) -> Option<u64> {
        self.duration_overrides.get(action).map(|v| *v)
    }

    pub fn set_duration_override(&self, action: ActionName, seconds: u64) {
        self.duration_overrides.insert(action, seconds);
    }

    pub fn operators_snapshot(&self) -> BTreeMap<OperatorId, OperatorPreference> {
        self.operators
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn overrides_snapshot(&self) -> BTreeMap<ActionName, u64> {
        self.duration_overrides
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Replaces all state with a restored snapshot.
    pub(crate) fn replace(
        &self,
        operators: BTreeMap<OperatorId, OperatorPreference>,
        overrides: BTreeMap<ActionName, u64>,
    ) {
        self.operators.clear();
        self.duration_overrides.clear();
        for (operator, pref) in operators {
            self.operators.insert(operator, pref);
        }
        for (action, seconds) in overrides {
            self.duration_overrides.insert(action, seconds);
        }
    }
}
