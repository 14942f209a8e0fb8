//! Durable budget state: keys, partial writes and typed change notifications.
//!
//! The store is an external key-value interface with three keys. It is the
//! single source of truth for the budget; the tracker only keeps a mirror.
//!
//! # Notifications
//!
//! Every write publishes one [`StoreChange`] per key it touched, including
//! writes issued by the tracker itself. Listeners run while the write lock is
//! held, so they observe changes in commit order. A listener must not write
//! back into the store; forward the change onto an event queue instead.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::DayId;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreKey {
    DailyLimitSeconds,
    RemainingSeconds,
    CurrentDay,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [
        StoreKey::DailyLimitSeconds,
        StoreKey::RemainingSeconds,
        StoreKey::CurrentDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::DailyLimitSeconds => "dailyLimitSeconds",
            StoreKey::RemainingSeconds => "remainingSeconds",
            StoreKey::CurrentDay => "currentDay",
        }
    }

    pub fn parse_key(value: &str) -> Option<Self> {
        match value {
            "dailyLimitSeconds" => Some(StoreKey::DailyLimitSeconds),
            "remainingSeconds" => Some(StoreKey::RemainingSeconds),
            "currentDay" => Some(StoreKey::CurrentDay),
            _ => None,
        }
    }
}

/// Raw contents of the store. Any key may be unset (first run) or have held
/// a value that could not be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredBudget {
    pub daily_limit_seconds: Option<i64>,
    pub remaining_seconds: Option<i64>,
    pub current_day: Option<DayId>,
}

impl StoredBudget {
    /// Decodes one persisted `key = raw` pair. Unknown keys and undecodable
    /// values are dropped so the caller falls back to defaults.
    pub fn decode_entry(&mut self, key: &str, raw: &str) {
        let Some(key) = StoreKey::parse_key(key) else {
            tracing::debug!(key, "Ignoring unknown budget store key");
            return;
        };
        match key {
            StoreKey::DailyLimitSeconds => self.daily_limit_seconds = decode_seconds(key, raw),
            StoreKey::RemainingSeconds => self.remaining_seconds = decode_seconds(key, raw),
            StoreKey::CurrentDay => match raw.parse::<DayId>() {
                Ok(day) => self.current_day = Some(day),
                Err(err) => {
                    tracing::warn!(key = key.as_str(), error = %err, "Discarding stored day");
                    self.current_day = None;
                }
            },
        }
    }

    pub fn merge(&mut self, patch: &BudgetPatch) {
        if let Some(value) = patch.daily_limit_seconds {
            self.daily_limit_seconds = Some(value);
        }
        if let Some(value) = patch.remaining_seconds {
            self.remaining_seconds = Some(value);
        }
        if let Some(value) = patch.current_day {
            self.current_day = Some(value);
        }
    }
}

fn decode_seconds(key: StoreKey, raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key = key.as_str(), raw, error = %err, "Discarding stored seconds");
            None
        }
    }
}

/// Partial write. Only the keys that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetPatch {
    pub daily_limit_seconds: Option<i64>,
    pub remaining_seconds: Option<i64>,
    pub current_day: Option<DayId>,
}

impl BudgetPatch {
    pub fn daily_limit(seconds: i64) -> Self {
        BudgetPatch {
            daily_limit_seconds: Some(seconds),
            ..Default::default()
        }
    }

    pub fn remaining(seconds: i64) -> Self {
        BudgetPatch {
            remaining_seconds: Some(seconds),
            ..Default::default()
        }
    }

    pub fn with_current_day(mut self, day: DayId) -> Self {
        self.current_day = Some(day);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.daily_limit_seconds.is_none()
            && self.remaining_seconds.is_none()
            && self.current_day.is_none()
    }

    /// Persisted text form of every key in the patch.
    pub fn encoded(&self) -> Vec<(StoreKey, String)> {
        let mut entries = Vec::new();
        if let Some(value) = self.daily_limit_seconds {
            entries.push((StoreKey::DailyLimitSeconds, value.to_string()));
        }
        if let Some(value) = self.remaining_seconds {
            entries.push((StoreKey::RemainingSeconds, value.to_string()));
        }
        if let Some(value) = self.current_day {
            entries.push((StoreKey::CurrentDay, value.to_string()));
        }
        entries
    }

    /// One change per written key, in `StoreKey::ALL` order.
    pub fn changes_from(&self, before: &StoredBudget) -> Vec<StoreChange> {
        let mut changes = Vec::new();
        if let Some(new) = self.daily_limit_seconds {
            changes.push(StoreChange::DailyLimit {
                old: before.daily_limit_seconds,
                new,
            });
        }
        if let Some(new) = self.remaining_seconds {
            changes.push(StoreChange::Remaining {
                old: before.remaining_seconds,
                new,
            });
        }
        if let Some(new) = self.current_day {
            changes.push(StoreChange::CurrentDay {
                old: before.current_day,
                new,
            });
        }
        changes
    }
}

/// Typed notification for a single key write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "key", rename_all = "snake_case")]
pub enum StoreChange {
    DailyLimit { old: Option<i64>, new: i64 },
    Remaining { old: Option<i64>, new: i64 },
    CurrentDay { old: Option<DayId>, new: DayId },
}

impl StoreChange {
    pub fn key(&self) -> StoreKey {
        match self {
            StoreChange::DailyLimit { .. } => StoreKey::DailyLimitSeconds,
            StoreChange::Remaining { .. } => StoreKey::RemainingSeconds,
            StoreChange::CurrentDay { .. } => StoreKey::CurrentDay,
        }
    }
}

pub type ChangeListener = Box<dyn Fn(&StoreChange) + Send>;

/// Durable key-value budget store.
///
/// `apply` must not return before the write is visible to `load` and has
/// been published to every subscriber.
pub trait BudgetStore {
    fn load(&self) -> Result<StoredBudget>;
    fn apply(&self, patch: &BudgetPatch) -> Result<()>;
    fn subscribe(&self, listener: ChangeListener);
}

impl<S: BudgetStore + ?Sized> BudgetStore for Arc<S> {
    fn load(&self) -> Result<StoredBudget> {
        (**self).load()
    }

    fn apply(&self, patch: &BudgetPatch) -> Result<()> {
        (**self).apply(patch)
    }

    fn subscribe(&self, listener: ChangeListener) {
        (**self).subscribe(listener)
    }
}

/// Serializes writes and fans their changes out to listeners.
#[derive(Default)]
pub struct ChangeNotifier {
    write_lock: Mutex<()>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: ChangeListener) {
        lock(&self.listeners).push(listener);
    }

    /// Runs `write` under the write lock and publishes the changes it
    /// returns before releasing the lock.
    pub fn commit<F>(&self, write: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<StoreChange>>,
    {
        let _guard = lock(&self.write_lock);
        let changes = write()?;
        let listeners = lock(&self.listeners);
        for change in &changes {
            for listener in listeners.iter() {
                listener(change);
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Store kept entirely in memory. Clones share contents and listeners.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    data: Mutex<StoredBudget>,
    notifier: ChangeNotifier,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated as if a previous process had written `budget`.
    pub fn with_contents(budget: StoredBudget) -> Self {
        let store = Self::default();
        *lock(&store.inner.data) = budget;
        store
    }

    pub fn contents(&self) -> StoredBudget {
        lock(&self.inner.data).clone()
    }
}

impl BudgetStore for MemoryStore {
    fn load(&self) -> Result<StoredBudget> {
        Ok(self.contents())
    }

    fn apply(&self, patch: &BudgetPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.inner.notifier.commit(|| {
            let mut data = lock(&self.inner.data);
            let changes = patch.changes_from(&data);
            data.merge(patch);
            Ok(changes)
        })
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.inner.notifier.subscribe(listener);
    }
}
