//! Shared state for connection threads, and the event loop that owns the
//! tracker.
//!
//! Only the event-loop thread touches the tracker. Connection threads,
//! the ticker, the rollover checker and store notifications all feed it
//! through one channel, so events are applied strictly in arrival order.
//! Requests that need an answer carry a reply channel and receive the
//! budget snapshot taken right after their event was applied.

use budget_core::{
    set_daily_limit, BudgetConfig, BudgetEvent, BudgetSnapshot, BudgetStore, Clock, OpenView,
    Ticker, Tracker, ViewId,
};
use budget_protocol::{
    ErrorInfo, RedirectAction, SyncViewsParams, ViewEventEnvelope, ViewEventType,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::db::Db;
use crate::views::{DaemonViews, RedirectOutbox};

const REPLY_TIMEOUT_SECS: u64 = 5;

pub enum LoopMessage {
    Event(BudgetEvent),
    Request(LoopRequest),
}

pub struct LoopRequest {
    /// Destination reported alongside the event, recorded before it is applied.
    pub destination: Option<(ViewId, String)>,
    pub event: Option<BudgetEvent>,
    pub reply: Sender<BudgetSnapshot>,
}

/// Runs until every sender is gone.
pub fn run_event_loop<S, T, C>(
    mut tracker: Tracker<S, DaemonViews, T, C>,
    rx: Receiver<LoopMessage>,
) where
    S: BudgetStore,
    T: Ticker,
    C: Clock,
{
    for message in rx {
        match message {
            LoopMessage::Event(event) => apply(&mut tracker, event),
            LoopMessage::Request(request) => {
                if let Some((view, url)) = request.destination {
                    tracker.host_mut().remember(view, url);
                }
                if let Some(event) = request.event {
                    apply(&mut tracker, event);
                }
                let _ = request.reply.send(tracker.snapshot());
            }
        }
    }
    tracing::info!("Event loop stopped");
}

fn apply<S, T, C>(tracker: &mut Tracker<S, DaemonViews, T, C>, event: BudgetEvent)
where
    S: BudgetStore,
    T: Ticker,
    C: Clock,
{
    tracker.host_mut().observe(&event);
    tracker.handle(event);
}

pub struct SharedState {
    db: Arc<Db>,
    loop_tx: Sender<LoopMessage>,
    outbox: RedirectOutbox,
    config: BudgetConfig,
}

impl SharedState {
    pub fn new(
        db: Arc<Db>,
        loop_tx: Sender<LoopMessage>,
        outbox: RedirectOutbox,
        config: BudgetConfig,
    ) -> Self {
        Self {
            db,
            loop_tx,
            outbox,
            config,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn pending_redirects(&self) -> usize {
        self.outbox.len()
    }

    pub fn budget_snapshot(&self) -> Result<BudgetSnapshot, ErrorInfo> {
        self.request(None, None)
    }

    /// Applies a validated view event. Returns `None` for a replayed event id.
    pub fn apply_view_event(
        &self,
        envelope: &ViewEventEnvelope,
    ) -> Result<Option<BudgetSnapshot>, ErrorInfo> {
        let (destination, event) = to_budget_event(envelope)?;

        match self.db.insert_event(envelope) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(event_id = %envelope.event_id, "Duplicate event ignored");
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to record event; applying anyway");
            }
        }

        self.request(destination, Some(event)).map(Some)
    }

    /// Writes the limit straight to the store. The tracker reconciles when the
    /// change notification reaches the loop, which happens before the snapshot
    /// request queued here.
    pub fn set_daily_limit(&self, seconds: i64) -> Result<BudgetSnapshot, ErrorInfo> {
        let max = self.config.budget.max_daily_limit_seconds;
        set_daily_limit(self.db.as_ref(), seconds, max).map_err(|err| {
            tracing::warn!(requested = seconds, error = %err, "Rejected daily limit");
            ErrorInfo::new(err.code(), err.to_string())
        })?;
        self.request(None, None)
    }

    pub fn reset_budget(&self) -> Result<BudgetSnapshot, ErrorInfo> {
        self.request(None, Some(BudgetEvent::AdminReset))
    }

    pub fn sync_views(&self, params: SyncViewsParams) -> Result<BudgetSnapshot, ErrorInfo> {
        let views = params
            .views
            .into_iter()
            .map(|view| OpenView {
                view_id: ViewId(view.view_id),
                url: view.url,
                active: view.active,
            })
            .collect();
        self.request(None, Some(BudgetEvent::Resume { views }))
    }

    pub fn take_redirects(&self) -> Vec<RedirectAction> {
        self.outbox.drain()
    }

    fn request(
        &self,
        destination: Option<(ViewId, String)>,
        event: Option<BudgetEvent>,
    ) -> Result<BudgetSnapshot, ErrorInfo> {
        let (reply, response) = mpsc::channel();
        self.loop_tx
            .send(LoopMessage::Request(LoopRequest {
                destination,
                event,
                reply,
            }))
            .map_err(|_| ErrorInfo::new("loop_unavailable", "budget event loop has stopped"))?;
        response
            .recv_timeout(Duration::from_secs(REPLY_TIMEOUT_SECS))
            .map_err(|err| {
                ErrorInfo::new(
                    "loop_unavailable",
                    format!("budget event loop did not answer: {}", err),
                )
            })
    }
}

fn to_budget_event(
    envelope: &ViewEventEnvelope,
) -> Result<(Option<(ViewId, String)>, BudgetEvent), ErrorInfo> {
    let view_id = envelope
        .view_id
        .map(ViewId)
        .ok_or_else(|| ErrorInfo::new("invalid_view_id", "view_id is required"))?;

    let converted = match envelope.event_type {
        ViewEventType::ViewActivated => (
            envelope.url.clone().map(|url| (view_id, url)),
            BudgetEvent::ViewActivated { view_id },
        ),
        ViewEventType::ViewDeactivated => (None, BudgetEvent::ViewDeactivated { view_id }),
        ViewEventType::ViewContentSettled => {
            let url = envelope
                .url
                .clone()
                .ok_or_else(|| ErrorInfo::new("missing_field", "url is required"))?;
            let complete = envelope
                .complete
                .ok_or_else(|| ErrorInfo::new("missing_field", "complete is required"))?;
            (
                None,
                BudgetEvent::ViewContentSettled {
                    view_id,
                    url,
                    complete,
                },
            )
        }
        ViewEventType::ViewClosed => (None, BudgetEvent::ViewClosed { view_id }),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_core::{DayId, ManualClock, TrackingState};
    use std::thread;

    struct NoopTicker;

    impl Ticker for NoopTicker {
        fn start(&mut self, _generation: u64) {}
        fn stop(&mut self, _generation: u64) {}
    }

    fn envelope(event_id: &str, event_type: ViewEventType) -> ViewEventEnvelope {
        ViewEventEnvelope {
            event_id: event_id.to_string(),
            recorded_at: "2026-02-01T09:00:00Z".to_string(),
            event_type,
            view_id: Some(5),
            url: None,
            complete: None,
        }
    }

    fn start(temp_dir: &tempfile::TempDir) -> SharedState {
        let db = Arc::new(Db::new(temp_dir.path().join("budget.db")).expect("db init"));
        let (tx, rx) = mpsc::channel();
        let store_tx = tx.clone();
        db.subscribe(Box::new(move |change| {
            let _ = store_tx.send(LoopMessage::Event(BudgetEvent::StoreChanged(change.clone())));
        }));
        let config = BudgetConfig::default();
        let outbox = RedirectOutbox::new();
        let tracker = Tracker::new(
            Arc::clone(&db),
            DaemonViews::new(outbox.clone(), config.monitor.blocking_target.clone()),
            NoopTicker,
            ManualClock::new(DayId::from_ymd(2026, 2, 1).expect("day")),
            config.monitor.classifier(),
            config.budget.default_daily_limit_seconds,
        )
        .expect("tracker");
        thread::spawn(move || run_event_loop(tracker, rx));
        SharedState::new(db, tx, outbox, config)
    }

    #[test]
    fn activation_with_url_starts_tracking() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let state = start(&temp_dir);

        let mut event = envelope("evt-1", ViewEventType::ViewActivated);
        event.url = Some("https://m.youtube.com/shorts".to_string());
        let snapshot = state
            .apply_view_event(&event)
            .expect("apply")
            .expect("first delivery");
        assert_eq!(snapshot.state, TrackingState::Tracking);
        assert_eq!(snapshot.active_view, Some(ViewId(5)));

        assert!(state.apply_view_event(&event).expect("replay").is_none());
    }

    #[test]
    fn limit_edit_is_reconciled_before_the_reply() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let state = start(&temp_dir);

        let snapshot = state.set_daily_limit(1800).expect("set limit");
        assert_eq!(snapshot.daily_limit_seconds, 1800);
        assert_eq!(snapshot.remaining_seconds, 1800);

        let err = state.set_daily_limit(0).unwrap_err();
        assert_eq!(err.code, "invalid_limit");
        let err = state.set_daily_limit(10_000).unwrap_err();
        assert_eq!(err.code, "invalid_limit");
        assert_eq!(
            state.budget_snapshot().expect("snapshot").daily_limit_seconds,
            1800
        );
    }

    #[test]
    fn resume_while_exhausted_queues_redirects() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let state = start(&temp_dir);
        state
            .db
            .apply(&budget_core::BudgetPatch::remaining(0))
            .expect("exhaust");

        let params = budget_protocol::SyncViewsParams {
            views: vec![
                budget_protocol::SyncedView {
                    view_id: 2,
                    url: Some("https://www.netflix.com/watch/1".to_string()),
                    active: true,
                },
                budget_protocol::SyncedView {
                    view_id: 3,
                    url: Some("https://docs.rs".to_string()),
                    active: false,
                },
            ],
        };
        let snapshot = state.sync_views(params).expect("sync");
        assert_eq!(snapshot.state, TrackingState::Blocked);

        let redirects = state.take_redirects();
        assert_eq!(redirects.len(), 1);
        assert_eq!(redirects[0].view_id, 2);
        assert_eq!(redirects[0].target, "blocked.html");
        assert!(state.take_redirects().is_empty());

        let snapshot = state.reset_budget().expect("reset");
        assert_eq!(snapshot.state, TrackingState::Idle);
        assert_eq!(snapshot.remaining_seconds, snapshot.daily_limit_seconds);
    }
}
