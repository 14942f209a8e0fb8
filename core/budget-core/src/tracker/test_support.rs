use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};

use super::{Ticker, Tracker, ViewHost};
use crate::classifier::DomainClassifier;
use crate::clock::{Clock, DayId, ManualClock};
use crate::events::BudgetEvent;
use crate::limits::set_daily_limit;
use crate::registry::ViewId;
use crate::store::{BudgetStore, MemoryStore, StoreChange, StoredBudget};

pub const MAX_LIMIT: i64 = 5400;

pub fn day(d: u32) -> DayId {
    DayId::from_ymd(2026, 5, d).unwrap()
}

pub fn classifier() -> DomainClassifier {
    DomainClassifier::new(["youtube.com", "netflix.com", "instagram.com"])
}

#[derive(Debug, Default)]
pub struct RecordingHost {
    pub destinations: HashMap<ViewId, String>,
    pub redirects: Vec<ViewId>,
}

impl ViewHost for RecordingHost {
    fn destination(&self, view: ViewId) -> Option<String> {
        self.destinations.get(&view).cloned()
    }

    fn redirect_to_blocking_target(&mut self, view: ViewId) {
        self.redirects.push(view);
    }
}

#[derive(Debug, Default)]
pub struct ManualTicker {
    pub running: Option<u64>,
    pub starts: Vec<u64>,
    pub stops: Vec<u64>,
}

impl Ticker for ManualTicker {
    fn start(&mut self, generation: u64) {
        assert!(self.running.is_none(), "two tickers running at once");
        self.running = Some(generation);
        self.starts.push(generation);
    }

    fn stop(&mut self, generation: u64) {
        assert_eq!(self.running, Some(generation), "stopped a ticker that was not running");
        self.running = None;
        self.stops.push(generation);
    }
}

pub type TestTracker = Tracker<MemoryStore, RecordingHost, ManualTicker, ManualClock>;

/// Tracker wired to an in-memory store whose notifications are fed back in
/// the way the daemon's event loop does it.
pub struct Harness {
    pub tracker: TestTracker,
    pub store: MemoryStore,
    pub clock: ManualClock,
    changes: Receiver<StoreChange>,
}

impl Harness {
    /// First run on `today` with an empty store.
    pub fn new(today: DayId, default_limit: i64) -> Self {
        Self::with_store(today, default_limit, MemoryStore::new())
    }

    pub fn with_contents(today: DayId, default_limit: i64, stored: StoredBudget) -> Self {
        Self::with_store(today, default_limit, MemoryStore::with_contents(stored))
    }

    pub fn with_store(today: DayId, default_limit: i64, store: MemoryStore) -> Self {
        let (tx, rx) = mpsc::channel();
        store.subscribe(Box::new(move |change| {
            let _ = tx.send(change.clone());
        }));
        let clock = ManualClock::new(today);
        let tracker = Tracker::new(
            store.clone(),
            RecordingHost::default(),
            ManualTicker::default(),
            clock.clone(),
            classifier(),
            default_limit,
        )
        .unwrap();
        let mut harness = Harness {
            tracker,
            store,
            clock,
            changes: rx,
        };
        harness.drain();
        harness
    }

    pub fn send(&mut self, event: BudgetEvent) {
        self.tracker.handle(event);
        self.drain();
    }

    /// Delivers pending store notifications until none are left.
    pub fn drain(&mut self) {
        while let Ok(change) = self.changes.try_recv() {
            self.tracker.handle(BudgetEvent::StoreChanged(change));
        }
    }

    /// Opens `view` on `url`, brings it to the front and lets it finish loading.
    pub fn open(&mut self, view: u64, url: &str) {
        let view_id = ViewId(view);
        self.tracker
            .host_mut()
            .destinations
            .insert(view_id, url.to_string());
        self.send(BudgetEvent::ViewActivated { view_id });
        self.send(BudgetEvent::ViewContentSettled {
            view_id,
            url: url.to_string(),
            complete: true,
        });
    }

    pub fn activate(&mut self, view: u64) {
        self.send(BudgetEvent::ViewActivated {
            view_id: ViewId(view),
        });
    }

    pub fn navigate(&mut self, view: u64, url: &str, complete: bool) {
        let view_id = ViewId(view);
        self.tracker
            .host_mut()
            .destinations
            .insert(view_id, url.to_string());
        self.send(BudgetEvent::ViewContentSettled {
            view_id,
            url: url.to_string(),
            complete,
        });
    }

    /// Delivers one tick from whichever ticker is running. Returns whether
    /// one was running.
    pub fn tick(&mut self) -> bool {
        match self.tracker.ticker().running {
            Some(generation) => {
                self.send(BudgetEvent::Tick { generation });
                true
            }
            None => false,
        }
    }

    pub fn ticks(&mut self, count: usize) {
        for _ in 0..count {
            self.tick();
        }
    }

    pub fn set_limit(&mut self, seconds: i64) {
        self.write_limit(seconds);
        self.drain();
    }

    /// Writes the limit the way another connection would, leaving its
    /// notification queued behind whatever the tracker handles next.
    pub fn write_limit(&mut self, seconds: i64) {
        set_daily_limit(&self.store, seconds, MAX_LIMIT).unwrap();
    }

    pub fn remaining(&self) -> i64 {
        self.tracker.budget().remaining_seconds
    }

    pub fn stored(&self) -> StoredBudget {
        self.store.load().unwrap()
    }

    pub fn today(&self) -> DayId {
        self.clock.today()
    }

    pub fn redirects(&self) -> &[ViewId] {
        &self.tracker.host().redirects
    }
}
