//! View registry: which open views show a monitored destination, and which
//! view is frontmost.
//!
//! The registry only records membership. Whether that membership means the
//! ticker should run is decided by the tracker in the same handler, so a tick
//! never observes one without the other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of an open view (a tab or window in the host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open view as reported in a resume snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenView {
    pub view_id: ViewId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// What the registry knows about the frontmost view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Focus {
    /// Nothing reported yet this session.
    #[default]
    Unknown,
    /// The host reported that no view is frontmost.
    None,
    View(ViewId),
}

impl Focus {
    pub fn view(self) -> Option<ViewId> {
        match self {
            Focus::View(view) => Some(view),
            Focus::Unknown | Focus::None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewRegistry {
    monitored: BTreeSet<ViewId>,
    focus: Focus,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `view` as frontmost and updates its membership.
    pub fn activate(&mut self, view: ViewId, monitored: bool) {
        self.focus = Focus::View(view);
        self.set_membership(view, monitored);
    }

    /// Clears the frontmost view if it is `view`. Returns whether it was.
    pub fn deactivate(&mut self, view: ViewId) -> bool {
        if self.focus == Focus::View(view) {
            self.focus = Focus::None;
            true
        } else {
            false
        }
    }

    /// Reclassification after a navigation. A view that settles before any
    /// focus was reported is presumed to be the frontmost one. After an
    /// explicit deactivation it is not.
    pub fn settle(&mut self, view: ViewId, monitored: bool) {
        if self.focus == Focus::Unknown {
            self.focus = Focus::View(view);
        }
        self.set_membership(view, monitored);
    }

    pub fn close(&mut self, view: ViewId) {
        self.monitored.remove(&view);
        if self.focus == Focus::View(view) {
            self.focus = Focus::None;
        }
    }

    /// Replaces all membership with the classified snapshot.
    pub fn rebuild<I>(&mut self, views: I)
    where
        I: IntoIterator<Item = (ViewId, bool, bool)>,
    {
        self.monitored.clear();
        self.focus = Focus::None;
        for (view, monitored, active) in views {
            if monitored {
                self.monitored.insert(view);
            }
            if active {
                self.focus = Focus::View(view);
            }
        }
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn active(&self) -> Option<ViewId> {
        self.focus.view()
    }

    pub fn is_monitored(&self, view: ViewId) -> bool {
        self.monitored.contains(&view)
    }

    /// True when the frontmost view shows a monitored destination.
    pub fn active_is_monitored(&self) -> bool {
        self.active().is_some_and(|view| self.monitored.contains(&view))
    }

    /// Monitored views in ascending id order.
    pub fn monitored_views(&self) -> Vec<ViewId> {
        self.monitored.iter().copied().collect()
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.len()
    }

    fn set_membership(&mut self, view: ViewId, monitored: bool) {
        if monitored {
            self.monitored.insert(view);
        } else {
            self.monitored.remove(&view);
        }
    }
}
