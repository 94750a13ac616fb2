//! Capability-changed notification for commands.
//!
//! Unlike [`crate::events::WeakEventManager`] this holds its subscribers
//! strongly; unsubscribe with the returned id.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::ChangeSubscriptionId;

type ChangedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct CanExecuteChanged {
    subscribers: Mutex<Vec<(ChangeSubscriptionId, ChangedCallback)>>,
}

impl CanExecuteChanged {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> ChangeSubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ChangeSubscriptionId::generate();
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&self, id: ChangeSubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Notify every subscriber. Callbacks run outside the lock, so they may
    /// subscribe or unsubscribe.
    pub fn raise(&self) {
        let snapshot: Vec<ChangedCallback> =
            self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ChangeSubscriptionId, ChangedCallback)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
