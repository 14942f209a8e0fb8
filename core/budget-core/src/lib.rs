//! # budget-core
//!
//! Daily time budget for monitored destinations, shared by the daemon and the
//! hook CLI.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The daemon drives the
//!   tracker from a single event-loop thread.
//! - **Store is authoritative**: The tracker's budget is a mirror of the
//!   durable store, rebuilt on startup and on resume.
//! - **Graceful degradation**: Missing or undecodable store keys are
//!   defaulted, not errors. Failed writes are logged and tracking continues.
//! - **Seams are traits**: The store, the view layer, the ticker, the clock
//!   and the classifier are injected, so every transition is testable
//!   without a real browser or timer.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use budget_core::{BudgetEvent, MemoryStore, SystemClock, Tracker};
//!
//! let config = budget_core::load_config(None)?;
//! let mut tracker = Tracker::new(
//!     MemoryStore::new(),
//!     host,
//!     ticker,
//!     SystemClock,
//!     config.monitor.classifier(),
//!     config.budget.default_daily_limit_seconds,
//! )?;
//! tracker.handle(BudgetEvent::RolloverCheck);
//! ```

pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod limits;
pub mod reconcile;
pub mod registry;
pub mod rollover;
pub mod store;
pub mod tracker;

pub use classifier::{Classifier, DomainClassifier};
pub use clock::{Clock, DayId, ManualClock, SystemClock};
pub use config::*;
pub use error::{BudgetError, Result};
pub use events::BudgetEvent;
pub use limits::{parse_minutes, set_daily_limit, validate_daily_limit};
pub use registry::{Focus, OpenView, ViewId, ViewRegistry};
pub use store::{
    BudgetPatch, BudgetStore, ChangeListener, ChangeNotifier, MemoryStore, StoreChange, StoreKey,
    StoredBudget,
};
pub use tracker::{BudgetSnapshot, BudgetState, Ticker, Tracker, TrackingState, ViewHost};
