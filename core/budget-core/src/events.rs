//! Inputs to the tracker. Every source (view layer, store notifications, the
//! ticker, the rollover timer, resume) is serialized onto one queue of these.

use crate::registry::{OpenView, ViewId};
use crate::store::StoreChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetEvent {
    ViewActivated {
        view_id: ViewId,
    },
    /// The view lost focus without another view gaining it (e.g. the window
    /// was minimized).
    ViewDeactivated {
        view_id: ViewId,
    },
    ViewContentSettled {
        view_id: ViewId,
        url: String,
        complete: bool,
    },
    ViewClosed {
        view_id: ViewId,
    },
    StoreChanged(StoreChange),
    /// Produced by the ticker started with `generation`.
    Tick {
        generation: u64,
    },
    /// Full snapshot of open views after the host process (re)started.
    Resume {
        views: Vec<OpenView>,
    },
    RolloverCheck,
    AdminReset,
}

impl BudgetEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BudgetEvent::ViewActivated { .. } => "view_activated",
            BudgetEvent::ViewDeactivated { .. } => "view_deactivated",
            BudgetEvent::ViewContentSettled { .. } => "view_content_settled",
            BudgetEvent::ViewClosed { .. } => "view_closed",
            BudgetEvent::StoreChanged(_) => "store_changed",
            BudgetEvent::Tick { .. } => "tick",
            BudgetEvent::Resume { .. } => "resume",
            BudgetEvent::RolloverCheck => "rollover_check",
            BudgetEvent::AdminReset => "admin_reset",
        }
    }
}
