//! Budget tracking state machine.
//!
//! States: `Idle`, `Tracking` (ticker running, frontmost view monitored) and
//! `Blocked` (budget exhausted for today).
//!
//! # Event handling
//!
//! Every handler first runs the day-rollover check, then applies the event.
//! Registry updates and the start/stop decision they imply happen inside the
//! same handler, so a tick can never see one without the other.
//!
//! # Ticker
//!
//! The tracker owns at most one [`TickerHandle`]. Each start gets a fresh
//! generation number and ticks carry the generation that produced them, so a
//! tick queued before a stop is dropped instead of charging time.
//!
//! # Durable state
//!
//! The store is authoritative. The tracker keeps a write-through mirror of it
//! that is rebuilt at construction and on resume. `remaining_seconds` and
//! `current_day` are only written here; `daily_limit_seconds` is written by
//! configuration surfaces and observed through [`StoreChange::DailyLimit`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::clock::{Clock, DayId};
use crate::error::Result;
use crate::events::BudgetEvent;
use crate::reconcile::{elapsed_seconds, reconcile_remaining};
use crate::registry::{OpenView, ViewId, ViewRegistry};
use crate::rollover::{check_rollover, reset_patch, Rollover};
use crate::store::{BudgetPatch, BudgetStore, StoreChange, StoredBudget};

#[cfg(test)]
pub(crate) mod test_support;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    Idle,
    Tracking,
    Blocked,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Idle => "idle",
            TrackingState::Tracking => "tracking",
            TrackingState::Blocked => "blocked",
        }
    }
}

/// In-memory mirror of the durable budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetState {
    pub daily_limit_seconds: i64,
    pub remaining_seconds: i64,
    pub current_day: DayId,
}

/// Read-only view handed to display surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub daily_limit_seconds: i64,
    pub remaining_seconds: i64,
    pub current_day: DayId,
    pub state: TrackingState,
    pub active_view: Option<ViewId>,
    pub monitored_views: usize,
}

/// The view layer, as seen from the tracker.
pub trait ViewHost {
    /// Last known destination of `view`, if any.
    fn destination(&self, view: ViewId) -> Option<String>;

    fn redirect_to_blocking_target(&mut self, view: ViewId);
}

/// Source of one-second ticks.
///
/// `start(generation)` must arrange for `BudgetEvent::Tick { generation }` to
/// be delivered every second until `stop(generation)`.
pub trait Ticker {
    fn start(&mut self, generation: u64);
    fn stop(&mut self, generation: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickerHandle {
    generation: u64,
}

pub struct Tracker<S, H, T, C> {
    store: S,
    host: H,
    ticker: T,
    clock: C,
    classifier: Box<dyn Classifier + Send>,
    default_limit_seconds: i64,
    budget: BudgetState,
    registry: ViewRegistry,
    state: TrackingState,
    ticker_handle: Option<TickerHandle>,
    last_generation: u64,
}

impl<S, H, T, C> Tracker<S, H, T, C>
where
    S: BudgetStore,
    H: ViewHost,
    T: Ticker,
    C: Clock,
{
    /// Loads the budget from `store`, filling in any missing keys, and
    /// applies a pending day rollover. The session starts empty; feed a
    /// [`BudgetEvent::Resume`] to populate it.
    pub fn new(
        store: S,
        host: H,
        ticker: T,
        clock: C,
        classifier: impl Classifier + Send + 'static,
        default_limit_seconds: i64,
    ) -> Result<Self> {
        let stored = store.load()?;
        let today = clock.today();
        let (budget, patch) = hydrate(&stored, default_limit_seconds, today);
        if !patch.is_empty() {
            info!(
                daily_limit_seconds = budget.daily_limit_seconds,
                remaining_seconds = budget.remaining_seconds,
                current_day = %budget.current_day,
                "Filling in missing budget keys"
            );
            store.apply(&patch)?;
        }

        let state = initial_state(&budget);
        let mut tracker = Tracker {
            store,
            host,
            ticker,
            clock,
            classifier: Box::new(classifier),
            default_limit_seconds,
            budget,
            registry: ViewRegistry::new(),
            state,
            ticker_handle: None,
            last_generation: 0,
        };
        tracker.ensure_today();
        info!(
            state = tracker.state.as_str(),
            remaining_seconds = tracker.budget.remaining_seconds,
            daily_limit_seconds = tracker.budget.daily_limit_seconds,
            current_day = %tracker.budget.current_day,
            "Budget tracker ready"
        );
        Ok(tracker)
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn budget(&self) -> &BudgetState {
        &self.budget
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker_handle.is_some()
    }

    /// Applies one event. Never fails; problems are logged and the tracker
    /// keeps its last-known budget.
    pub fn handle(&mut self, event: BudgetEvent) {
        debug!(event = event.kind(), "Budget event");
        let rolled_over = self.ensure_today();

        match event {
            BudgetEvent::ViewActivated { view_id } => self.on_view_activated(view_id),
            BudgetEvent::ViewDeactivated { view_id } => self.on_view_deactivated(view_id),
            BudgetEvent::ViewContentSettled {
                view_id,
                url,
                complete,
            } => self.on_view_content_settled(view_id, &url, complete),
            BudgetEvent::ViewClosed { view_id } => self.on_view_closed(view_id),
            BudgetEvent::StoreChanged(change) => self.on_store_changed(change),
            BudgetEvent::Tick { generation } => self.on_tick(generation),
            BudgetEvent::Resume { views } => self.on_resume(views),
            BudgetEvent::RolloverCheck => {}
            BudgetEvent::AdminReset => self.on_admin_reset(),
        }

        if rolled_over {
            self.reevaluate();
        }
    }

    /// Current budget, after applying a pending rollover.
    pub fn snapshot(&mut self) -> BudgetSnapshot {
        if self.ensure_today() {
            self.reevaluate();
        }
        let limit = self.budget.daily_limit_seconds;
        BudgetSnapshot {
            daily_limit_seconds: limit,
            remaining_seconds: self.budget.remaining_seconds.clamp(0, limit.max(0)),
            current_day: self.budget.current_day,
            state: self.state,
            active_view: self.registry.active(),
            monitored_views: self.registry.monitored_count(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // View events
    // ─────────────────────────────────────────────────────────────────────

    fn on_view_activated(&mut self, view: ViewId) {
        let monitored = match self.host.destination(view) {
            Some(url) => self.classifier.is_monitored(&url),
            None => self.registry.is_monitored(view),
        };
        debug!(view = %view, monitored, "View activated");
        self.registry.activate(view, monitored);
        self.enforce_block(view, monitored);
        self.reevaluate();
    }

    fn on_view_deactivated(&mut self, view: ViewId) {
        if self.registry.deactivate(view) {
            debug!(view = %view, "Frontmost view deactivated");
            self.reevaluate();
        }
    }

    fn on_view_content_settled(&mut self, view: ViewId, url: &str, complete: bool) {
        let monitored = self.classifier.is_monitored(url);
        if monitored && !complete {
            debug!(view = %view, "Monitored destination still loading");
            return;
        }
        debug!(view = %view, monitored, "View content settled");
        self.registry.settle(view, monitored);
        self.enforce_block(view, monitored);
        self.reevaluate();
    }

    fn on_view_closed(&mut self, view: ViewId) {
        debug!(view = %view, "View closed");
        self.registry.close(view);
        self.reevaluate();
    }

    fn on_resume(&mut self, views: Vec<OpenView>) {
        self.stop_tracking();
        self.reload_from_store();
        self.ensure_today();

        let classified: Vec<(ViewId, bool, bool)> = views
            .iter()
            .map(|view| {
                let monitored = view
                    .url
                    .as_deref()
                    .is_some_and(|url| self.classifier.is_monitored(url));
                (view.view_id, monitored, view.active)
            })
            .collect();
        self.registry.rebuild(classified);
        info!(
            views = views.len(),
            monitored = self.registry.monitored_count(),
            state = self.state.as_str(),
            remaining_seconds = self.budget.remaining_seconds,
            "Session rebuilt from view snapshot"
        );

        if self.state == TrackingState::Blocked {
            self.redirect_monitored_views();
        } else {
            self.reevaluate();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Store, ticks and administration
    // ─────────────────────────────────────────────────────────────────────

    fn on_store_changed(&mut self, change: StoreChange) {
        match change {
            StoreChange::DailyLimit { old, new } => self.on_limit_changed(old, new),
            StoreChange::Remaining { .. } | StoreChange::CurrentDay { .. } => {
                debug!(key = change.key().as_str(), "Ignoring budget write notification");
            }
        }
    }

    fn on_limit_changed(&mut self, old: Option<i64>, new: i64) {
        if new <= 0 {
            warn!(new, "Ignoring non-positive daily limit from store");
            return;
        }
        let basis = self.budget.daily_limit_seconds;
        if new == basis {
            debug!(new, "Daily limit already reconciled");
            return;
        }

        let elapsed = elapsed_seconds(basis, self.budget.remaining_seconds);
        let remaining = reconcile_remaining(basis, self.budget.remaining_seconds, new);
        self.budget.daily_limit_seconds = new;
        info!(
            old = ?old,
            basis,
            new,
            elapsed,
            remaining,
            "Daily limit changed; remaining reconciled"
        );

        if remaining == 0 {
            self.block("limit below today's usage");
            return;
        }

        self.budget.remaining_seconds = remaining;
        self.persist(&BudgetPatch::remaining(remaining), "limit_change");
        if self.state == TrackingState::Blocked {
            info!(remaining, "Limit raise lifted the block");
            self.state = TrackingState::Idle;
        }
        self.reevaluate();
    }

    fn on_tick(&mut self, generation: u64) {
        let running = self.ticker_handle.map(|handle| handle.generation);
        if self.state != TrackingState::Tracking || running != Some(generation) {
            debug!(generation, running = ?running, "Ignoring stale tick");
            return;
        }

        let remaining = self.budget.remaining_seconds - 1;
        if remaining <= 0 {
            self.block("budget exhausted");
            return;
        }
        self.budget.remaining_seconds = remaining;
        self.persist(&BudgetPatch::remaining(remaining), "tick");
    }

    fn on_admin_reset(&mut self) {
        self.stop_ticker();
        let today = self.clock.today();
        let limit = self.budget.daily_limit_seconds;
        self.budget.remaining_seconds = limit;
        self.budget.current_day = today;
        self.persist(&reset_patch(limit, today), "admin_reset");
        info!(
            previous_state = self.state.as_str(),
            daily_limit_seconds = limit,
            "Budget reset by administrator"
        );
        self.state = TrackingState::Idle;
        self.reevaluate();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────

    /// Resets the budget if the day changed. Returns whether it did.
    fn ensure_today(&mut self) -> bool {
        let today = self.clock.today();
        let (from, to) = match check_rollover(self.budget.current_day, today) {
            Rollover::Current => return false,
            Rollover::Reset { from, to } => (from, to),
        };

        self.stop_ticker();
        let limit = match self.store.load() {
            Ok(stored) => stored
                .daily_limit_seconds
                .filter(|limit| *limit > 0)
                .unwrap_or(self.budget.daily_limit_seconds),
            Err(err) => {
                warn!(error = %err, "Failed to read daily limit for rollover; using last known");
                self.budget.daily_limit_seconds
            }
        };
        self.budget = BudgetState {
            daily_limit_seconds: limit,
            remaining_seconds: limit,
            current_day: to,
        };
        self.persist(&reset_patch(limit, to), "rollover");
        info!(
            from = %from,
            to = %to,
            daily_limit_seconds = limit,
            previous_state = self.state.as_str(),
            "Day rollover; budget reset"
        );
        self.state = TrackingState::Idle;
        true
    }

    /// Starts or stops the ticker to match the registry and the budget.
    fn reevaluate(&mut self) {
        if self.state == TrackingState::Blocked {
            return;
        }
        if self.registry.active_is_monitored() && self.budget.remaining_seconds > 0 {
            self.start_tracking();
        } else {
            self.stop_tracking();
        }
    }

    /// Idempotent: a second call while ticking does nothing.
    pub(crate) fn start_tracking(&mut self) {
        if self.ticker_handle.is_some() {
            return;
        }
        self.last_generation += 1;
        let generation = self.last_generation;
        self.ticker.start(generation);
        self.ticker_handle = Some(TickerHandle { generation });
        self.state = TrackingState::Tracking;
        info!(
            generation,
            view = ?self.registry.active(),
            remaining_seconds = self.budget.remaining_seconds,
            "Tracking started"
        );
    }

    /// Idempotent: a call while stopped does nothing.
    pub(crate) fn stop_tracking(&mut self) {
        if self.stop_ticker() {
            info!(
                remaining_seconds = self.budget.remaining_seconds,
                "Tracking stopped"
            );
        }
        if self.state == TrackingState::Tracking {
            self.state = TrackingState::Idle;
        }
    }

    fn stop_ticker(&mut self) -> bool {
        match self.ticker_handle.take() {
            Some(handle) => {
                self.ticker.stop(handle.generation);
                true
            }
            None => false,
        }
    }

    fn block(&mut self, reason: &'static str) {
        self.stop_ticker();
        if self.budget.remaining_seconds != 0 || self.state != TrackingState::Blocked {
            self.budget.remaining_seconds = 0;
            self.persist(&BudgetPatch::remaining(0), "block");
        }
        if self.state == TrackingState::Blocked {
            return;
        }
        self.state = TrackingState::Blocked;
        info!(
            reason,
            views = self.registry.monitored_count(),
            "Budget exhausted; blocking monitored views"
        );
        self.redirect_monitored_views();
    }

    fn redirect_monitored_views(&mut self) {
        for view in self.registry.monitored_views() {
            self.host.redirect_to_blocking_target(view);
        }
    }

    /// While blocked, a view that starts showing a monitored destination is
    /// sent to the blocking target straight away.
    fn enforce_block(&mut self, view: ViewId, monitored: bool) {
        if monitored && self.state == TrackingState::Blocked {
            info!(view = %view, "Redirecting monitored view while blocked");
            self.host.redirect_to_blocking_target(view);
        }
    }

    fn reload_from_store(&mut self) {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "Failed to reload budget; keeping last known");
                return;
            }
        };
        let (mut budget, mut patch) =
            hydrate(&stored, self.default_limit_seconds, self.clock.today());

        // A limit written since the mirror was last reconciled still has its
        // notification queued. Reconcile against the mirror's limit here; the
        // notification then finds nothing left to do.
        let basis = self.budget.daily_limit_seconds;
        if budget.current_day == self.budget.current_day && budget.daily_limit_seconds != basis {
            let stored_remaining = stored
                .remaining_seconds
                .unwrap_or(self.budget.remaining_seconds)
                .clamp(0, basis.max(0));
            let remaining =
                reconcile_remaining(basis, stored_remaining, budget.daily_limit_seconds);
            info!(
                basis,
                new = budget.daily_limit_seconds,
                remaining,
                "Daily limit changed before reload; remaining reconciled"
            );
            budget.remaining_seconds = remaining;
            patch.remaining_seconds = Some(remaining);
        }

        if !patch.is_empty() {
            self.persist(&patch, "reload");
        }
        self.budget = budget;
        self.state = initial_state(&self.budget);
    }

    fn persist(&self, patch: &BudgetPatch, reason: &'static str) {
        if let Err(err) = self.store.apply(patch) {
            warn!(reason, error = %err, "Failed to persist budget");
        }
    }
}

fn initial_state(budget: &BudgetState) -> TrackingState {
    if budget.remaining_seconds <= 0 {
        TrackingState::Blocked
    } else {
        TrackingState::Idle
    }
}

/// Builds the mirror from raw store contents. The returned patch holds the
/// defaults and repairs that need to be written back.
fn hydrate(
    stored: &StoredBudget,
    default_limit_seconds: i64,
    today: DayId,
) -> (BudgetState, BudgetPatch) {
    let mut patch = BudgetPatch::default();

    let daily_limit_seconds = match stored.daily_limit_seconds {
        Some(limit) if limit > 0 => limit,
        _ => {
            patch.daily_limit_seconds = Some(default_limit_seconds);
            default_limit_seconds
        }
    };

    let current_day = match stored.current_day {
        Some(day) => day,
        None => {
            patch.current_day = Some(today);
            today
        }
    };

    let remaining_seconds = match stored.remaining_seconds {
        Some(remaining) if (0..=daily_limit_seconds).contains(&remaining) => remaining,
        Some(remaining) => {
            let repaired = remaining.clamp(0, daily_limit_seconds);
            patch.remaining_seconds = Some(repaired);
            repaired
        }
        None => {
            patch.remaining_seconds = Some(daily_limit_seconds);
            daily_limit_seconds
        }
    };

    (
        BudgetState {
            daily_limit_seconds,
            remaining_seconds,
            current_day,
        },
        patch,
    )
}
