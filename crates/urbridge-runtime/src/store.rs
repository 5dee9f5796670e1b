//! [`StateStore`] – the process-wide last-known state.
//!
//! Only the state monitor loop writes to it ([`StateStore::merge`] is
//! crate-private); HTTP and WebSocket handlers read cloned snapshots.  The
//! store is never cleared, so after a stop it keeps serving the last values
//! the controller reported.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use urbridge_types::{StateMap, StateMessage};

#[derive(Default)]
struct StoreInner {
    state: StateMap,
    sequence: u64,
    updated_at: Option<DateTime<Utc>>,
}

/// Cheaply cloneable handle to the shared last-known state.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of every field observed so far.
    pub fn snapshot(&self) -> StateMap {
        self.read().state.clone()
    }

    /// Number of merges applied so far.
    pub fn sequence(&self) -> u64 {
        self.read().sequence
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().updated_at
    }

    /// The current state as a message, with every known field marked as
    /// changed.  `None` until the first merge.  Sent to a subscriber right
    /// after it connects.
    pub fn current_message(&self) -> Option<StateMessage> {
        let inner = self.read();
        let timestamp = inner.updated_at?;
        Some(StateMessage {
            sequence: inner.sequence,
            timestamp,
            changed: inner.state.keys().copied().collect(),
            state: inner.state.clone(),
        })
    }

    /// Merge `changes` over the current state and return the message
    /// describing the result.
    pub(crate) fn merge(&self, changes: StateMap) -> StateMessage {
        let mut inner = self.write();
        let changed = changes.keys().copied().collect();
        inner.state.extend(changes);
        inner.sequence += 1;
        let now = Utc::now();
        inner.updated_at = Some(now);
        StateMessage {
            sequence: inner.sequence,
            timestamp: now,
            changed,
            state: inner.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use urbridge_types::{FieldValue, StateField};

    #[test]
    fn new_store_is_empty() {
        let store = StateStore::new();
        assert!(store.snapshot().is_empty());
        assert_eq!(store.sequence(), 0);
        assert!(store.current_message().is_none());
    }

    #[test]
    fn merge_updates_only_given_fields() {
        let store = StateStore::new();
        let mut first = StateMap::new();
        first.insert(StateField::RuntimeState, FieldValue::Integer(1));
        first.insert(StateField::SafetyStatus, FieldValue::Integer(1));
        store.merge(first);

        let mut second = StateMap::new();
        second.insert(StateField::SafetyStatus, FieldValue::Integer(3));
        let msg = store.merge(second);

        assert_eq!(msg.sequence, 2);
        assert_eq!(msg.changed, vec![StateField::SafetyStatus]);
        let snap = store.snapshot();
        assert_eq!(snap[&StateField::RuntimeState], FieldValue::Integer(1));
        assert_eq!(snap[&StateField::SafetyStatus], FieldValue::Integer(3));
    }

    #[test]
    fn clones_share_state() {
        let store = StateStore::new();
        let reader = store.clone();
        let mut changes = StateMap::new();
        changes.insert(StateField::RobotMode, FieldValue::Integer(7));
        store.merge(changes);
        assert_eq!(reader.sequence(), 1);
        assert!(reader.updated_at().is_some());
    }

    #[test]
    fn current_message_marks_every_field() {
        let store = StateStore::new();
        let mut changes = StateMap::new();
        changes.insert(StateField::RobotMode, FieldValue::Integer(7));
        changes.insert(StateField::DigitalOutputBits, FieldValue::Bits(3));
        store.merge(changes);
        let msg = store.current_message().unwrap();
        assert_eq!(msg.changed.len(), 2);
        assert_eq!(msg.sequence, 1);
    }
}
