//! The daemon's side of the view layer.
//!
//! The daemon cannot navigate views itself. It remembers the last destination
//! each view reported and queues redirects in an outbox that the view layer
//! drains with `take_redirects`.

use budget_core::{BudgetEvent, ViewHost, ViewId};
use budget_protocol::RedirectAction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct RedirectOutbox {
    queue: Arc<Mutex<Vec<RedirectAction>>>,
}

impl RedirectOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a redirect unless one is already pending for the same view.
    pub fn push(&self, action: RedirectAction) -> bool {
        let mut queue = self.lock();
        if queue.iter().any(|queued| queued.view_id == action.view_id) {
            return false;
        }
        queue.push(action);
        true
    }

    pub fn drain(&self) -> Vec<RedirectAction> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RedirectAction>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct DaemonViews {
    destinations: HashMap<ViewId, String>,
    outbox: RedirectOutbox,
    blocking_target: String,
}

impl DaemonViews {
    pub fn new(outbox: RedirectOutbox, blocking_target: impl Into<String>) -> Self {
        Self {
            destinations: HashMap::new(),
            outbox,
            blocking_target: blocking_target.into(),
        }
    }

    pub fn remember(&mut self, view: ViewId, url: String) {
        self.destinations.insert(view, url);
    }

    /// Keeps the destination map in step with an event before the tracker
    /// sees it.
    pub fn observe(&mut self, event: &BudgetEvent) {
        match event {
            BudgetEvent::ViewContentSettled { view_id, url, .. } => {
                self.remember(*view_id, url.clone());
            }
            BudgetEvent::ViewClosed { view_id } => {
                self.destinations.remove(view_id);
            }
            BudgetEvent::Resume { views } => {
                self.destinations = views
                    .iter()
                    .filter_map(|view| view.url.clone().map(|url| (view.view_id, url)))
                    .collect();
            }
            _ => {}
        }
    }
}

impl ViewHost for DaemonViews {
    fn destination(&self, view: ViewId) -> Option<String> {
        self.destinations.get(&view).cloned()
    }

    fn redirect_to_blocking_target(&mut self, view: ViewId) {
        let queued = self.outbox.push(RedirectAction {
            view_id: view.0,
            target: self.blocking_target.clone(),
        });
        tracing::debug!(view = %view, queued, "Redirect requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_core::OpenView;

    #[test]
    fn redirects_are_queued_once_per_view_until_drained() {
        let outbox = RedirectOutbox::new();
        let mut views = DaemonViews::new(outbox.clone(), "blocked.html");
        views.redirect_to_blocking_target(ViewId(4));
        views.redirect_to_blocking_target(ViewId(4));
        views.redirect_to_blocking_target(ViewId(9));
        assert_eq!(outbox.len(), 2);

        let drained = outbox.drain();
        assert_eq!(
            drained,
            vec![
                RedirectAction {
                    view_id: 4,
                    target: "blocked.html".to_string()
                },
                RedirectAction {
                    view_id: 9,
                    target: "blocked.html".to_string()
                },
            ]
        );
        assert_eq!(outbox.len(), 0);

        views.redirect_to_blocking_target(ViewId(4));
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn observe_tracks_destinations() {
        let mut views = DaemonViews::new(RedirectOutbox::new(), "blocked.html");
        views.observe(&BudgetEvent::ViewContentSettled {
            view_id: ViewId(1),
            url: "https://youtube.com".to_string(),
            complete: false,
        });
        assert_eq!(
            views.destination(ViewId(1)).as_deref(),
            Some("https://youtube.com")
        );

        views.observe(&BudgetEvent::ViewClosed { view_id: ViewId(1) });
        assert_eq!(views.destination(ViewId(1)), None);
    }

    #[test]
    fn resume_replaces_every_destination() {
        let mut views = DaemonViews::new(RedirectOutbox::new(), "blocked.html");
        views.remember(ViewId(1), "https://netflix.com".to_string());
        views.observe(&BudgetEvent::Resume {
            views: vec![
                OpenView {
                    view_id: ViewId(2),
                    url: Some("https://docs.rs".to_string()),
                    active: true,
                },
                OpenView {
                    view_id: ViewId(3),
                    url: None,
                    active: false,
                },
            ],
        });
        assert_eq!(views.destination(ViewId(1)), None);
        assert_eq!(views.destination(ViewId(2)).as_deref(), Some("https://docs.rs"));
        assert_eq!(views.destination(ViewId(3)), None);
    }
}
