//! SQLite persistence for budget-daemon.
//!
//! This is the single-writer store backing the daemon: a `budget_kv` table
//! holding the three budget keys, and an append-only `events` table used to
//! acknowledge replayed view events without applying them twice.

use budget_core::{
    BudgetError, BudgetPatch, BudgetStore, ChangeListener, ChangeNotifier, DayId, StoredBudget,
};
use budget_protocol::ViewEventEnvelope;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Db {
    path: PathBuf,
    notifier: ChangeNotifier,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self {
            path,
            notifier: ChangeNotifier::new(),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Records a view event. Returns `false` if an event with the same id was
    /// already recorded.
    pub fn insert_event(&self, event: &ViewEventEnvelope) -> Result<bool, String> {
        self.with_connection(|conn| {
            let payload = serde_json::to_string(event)
                .map_err(|err| format!("Failed to serialize event payload: {}", err))?;
            let event_type = serde_json::to_string(&event.event_type)
                .unwrap_or_else(|_| "unknown".to_string())
                .trim_matches('"')
                .to_string();

            let inserted = conn
                .execute(
                    "INSERT INTO events (id, recorded_at, event_type, view_id, payload)\
                     VALUES (?1, ?2, ?3, ?4, ?5)\
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        event.event_id,
                        event.recorded_at,
                        event_type,
                        event.view_id.map(|id| id as i64),
                        payload
                    ],
                )
                .map_err(|err| format!("Failed to insert event: {}", err))?;

            Ok(inserted > 0)
        })
    }

    #[cfg(test)]
    pub fn count_events(&self) -> Result<i64, String> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|err| format!("Failed to count events: {}", err))
        })
    }

    /// Deletes events recorded more than `max_age_days` ago.
    pub fn prune_events(&self, max_age_days: i64) -> Result<u64, String> {
        let cutoff = (Utc::now() - Duration::days(max_age_days)).to_rfc3339();
        self.with_connection(|conn| {
            let deleted = conn
                .execute("DELETE FROM events WHERE recorded_at < ?1", params![cutoff])
                .map_err(|err| format!("Failed to prune events: {}", err))?;
            Ok(deleted as u64)
        })
    }

    pub fn load_budget(&self) -> Result<StoredBudget, String> {
        self.with_connection(|conn| read_budget(conn))
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS budget_kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS events (
                    id TEXT PRIMARY KEY,
                    recorded_at TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    view_id INTEGER,
                    payload TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl BudgetStore for Db {
    fn load(&self) -> budget_core::Result<StoredBudget> {
        self.load_budget()
            .map_err(|details| BudgetError::store("load", details))
    }

    fn apply(&self, patch: &BudgetPatch) -> budget_core::Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.notifier.commit(|| {
            self.with_connection(|conn| {
                let tx = conn
                    .transaction()
                    .map_err(|err| format!("Failed to begin transaction: {}", err))?;
                let before = read_budget(&tx)?;
                let updated_at = Utc::now().to_rfc3339();
                for (key, value) in patch.encoded() {
                    tx.execute(
                        "INSERT INTO budget_kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                         ON CONFLICT(key) DO UPDATE SET \
                            value = excluded.value, \
                            updated_at = excluded.updated_at",
                        params![key.as_str(), value, updated_at],
                    )
                    .map_err(|err| format!("Failed to write {}: {}", key.as_str(), err))?;
                }
                tx.commit()
                    .map_err(|err| format!("Failed to commit budget write: {}", err))?;
                Ok(patch.changes_from(&before))
            })
            .map_err(|details| BudgetError::store("apply", details))
        })
    }

    fn subscribe(&self, listener: ChangeListener) {
        self.notifier.subscribe(listener);
    }
}

fn read_budget(conn: &Connection) -> Result<StoredBudget, String> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM budget_kv")
        .map_err(|err| format!("Failed to prepare budget query: {}", err))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|err| format!("Failed to read budget rows: {}", err))?;

    let mut budget = StoredBudget::default();
    for row in rows {
        let (key, value) = row.map_err(|err| format!("Failed to decode budget row: {}", err))?;
        budget.decode_entry(&key, &value);
    }
    Ok(budget)
}

/// Prunes the `events` table at most once per calendar day.
pub struct EventPruner {
    db: Arc<Db>,
    max_age_days: i64,
    last_day: Option<DayId>,
}

impl EventPruner {
    pub fn new(db: Arc<Db>, max_age_days: i64) -> Self {
        Self {
            db,
            max_age_days,
            last_day: None,
        }
    }

    /// Prunes if `today` has not been pruned yet. Returns the number of
    /// deleted rows, or `None` when nothing ran.
    pub fn run(&mut self, today: DayId) -> Option<u64> {
        if self.last_day == Some(today) {
            return None;
        }
        match self.db.prune_events(self.max_age_days) {
            Ok(pruned) => {
                self.last_day = Some(today);
                if pruned > 0 {
                    tracing::info!(pruned, "Pruned old view events");
                }
                Some(pruned)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to prune old view events");
                None
            }
        }
    }
}
