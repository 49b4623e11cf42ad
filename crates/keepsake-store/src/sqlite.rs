//! SQLite store backend.
//!
//! One connection behind a mutex; every shared-state mutation is a
//! single conditional statement (`INSERT OR IGNORE`, `UPDATE ... WHERE
//! state = 'claimed'`, `UPDATE ... WHERE sent = 0`) so racing callers
//! never both win.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keepsake_core::error::{KeepsakeError, Result};
use keepsake_core::traits::{EntryStore, MarkSent, OccasionStore, UserStore};
use keepsake_core::types::{Entitlement, Entry, OccasionClaim, OccasionState, User};
use rusqlite::{Connection, OptionalExtension};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                phone TEXT NOT NULL UNIQUE,
                timezone TEXT NOT NULL,
                weekly_quota INTEGER NOT NULL DEFAULT 7,
                window_start_hour INTEGER NOT NULL DEFAULT 9,
                window_end_hour INTEGER NOT NULL DEFAULT 21,
                opted_out INTEGER NOT NULL DEFAULT 0,
                entitlement_active INTEGER NOT NULL DEFAULT 0,
                trial_ends_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                sent_at TEXT,
                delivered_via TEXT,
                scheduled_for TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_entries_user ON entries(user_id);
            CREATE TABLE IF NOT EXISTS occasions (
                user_id TEXT NOT NULL,
                period_key TEXT NOT NULL,
                send_at TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'claimed',
                claimed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, period_key)
            );",
        )
        .map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KeepsakeError::Store(e.to_string()))
    }
}

fn store_err(e: rusqlite::Error) -> KeepsakeError {
    KeepsakeError::Store(e.to_string())
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        phone: row.get(1)?,
        timezone: row.get(2)?,
        weekly_quota: row.get(3)?,
        window_start_hour: row.get(4)?,
        window_end_hour: row.get(5)?,
        opted_out: row.get::<_, i64>(6)? != 0,
        entitlement: Entitlement {
            active: row.get::<_, i64>(7)? != 0,
            trial_ends_at: row.get::<_, Option<String>>(8)?.map(parse_ts),
        },
        created_at: parse_ts(row.get(9)?),
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        body: row.get(2)?,
        created_at: parse_ts(row.get(3)?),
        sent: row.get::<_, i64>(4)? != 0,
        sent_at: row.get::<_, Option<String>>(5)?.map(parse_ts),
        delivered_via: row.get(6)?,
        scheduled_for: row.get::<_, Option<String>>(7)?.map(parse_ts),
    })
}

const USER_COLS: &str = "id, phone, timezone, weekly_quota, window_start_hour, \
window_end_hour, opted_out, entitlement_active, trial_ends_at, created_at";

const ENTRY_COLS: &str =
    "id, user_id, body, created_at, sent, sent_at, delivered_via, scheduled_for";

#[async_trait]
impl UserStore for SqliteStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLS} FROM users ORDER BY created_at"))
            .map_err(store_err)?;
        let rows = stmt.query_map([], row_to_user).map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))
            .map_err(store_err)?;
        stmt.query_row(rusqlite::params![user_id], row_to_user)
            .optional()
            .map_err(store_err)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLS} FROM users WHERE phone = ?1"))
            .map_err(store_err)?;
        stmt.query_row(rusqlite::params![phone], row_to_user)
            .optional()
            .map_err(store_err)
    }

    async fn add_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, phone, timezone, weekly_quota, window_start_hour, \
             window_end_hour, opted_out, entitlement_active, trial_ends_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                user.id,
                user.phone,
                user.timezone,
                user.weekly_quota,
                user.window_start_hour,
                user.window_end_hour,
                user.opted_out as i64,
                user.entitlement.active as i64,
                user.entitlement.trial_ends_at.map(|t| t.to_rfc3339()),
                user.created_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn set_opt_out(&self, user_id: &str, opted_out: bool) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE users SET opted_out = ?2 WHERE id = ?1",
                rusqlite::params![user_id, opted_out as i64],
            )
            .map_err(store_err)?;
        if rows == 0 {
            return Err(KeepsakeError::UserNotFound(user_id.into()));
        }
        Ok(())
    }

    async fn entitlement_snapshot(&self, user_id: &str) -> Result<Entitlement> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT entitlement_active, trial_ends_at FROM users WHERE id = ?1")
            .map_err(store_err)?;
        stmt.query_row(rusqlite::params![user_id], |row| {
            Ok(Entitlement {
                active: row.get::<_, i64>(0)? != 0,
                trial_ends_at: row.get::<_, Option<String>>(1)?.map(parse_ts),
            })
        })
        .map_err(|_| KeepsakeError::UserNotFound(user_id.into()))
    }
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLS} FROM entries WHERE user_id = ?1 ORDER BY created_at"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user_id], row_to_entry)
            .map_err(store_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn add_entry(&self, entry: &Entry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO entries (id, user_id, body, created_at, sent, sent_at, \
             delivered_via, scheduled_for) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                entry.id,
                entry.user_id,
                entry.body,
                entry.created_at.to_rfc3339(),
                entry.sent as i64,
                entry.sent_at.map(|t| t.to_rfc3339()),
                entry.delivered_via,
                entry.scheduled_for.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn mark_sent(
        &self,
        entry_id: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<MarkSent> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE entries SET sent = 1, sent_at = ?2, delivered_via = ?3, \
                 scheduled_for = NULL WHERE id = ?1 AND sent = 0",
                rusqlite::params![entry_id, now.to_rfc3339(), channel],
            )
            .map_err(store_err)?;
        if rows == 1 {
            return Ok(MarkSent::Updated);
        }

        // Lost the conditional write: already sent, or unknown entry.
        let mut stmt = conn
            .prepare("SELECT sent FROM entries WHERE id = ?1")
            .map_err(store_err)?;
        match stmt
            .query_row(rusqlite::params![entry_id], |row| row.get::<_, i64>(0))
        {
            Ok(_) => Ok(MarkSent::AlreadySent),
            Err(_) => Err(KeepsakeError::EntryNotFound(entry_id.into())),
        }
    }
}

#[async_trait]
impl OccasionStore for SqliteStore {
    async fn claim_occasion(&self, claim: &OccasionClaim) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO occasions (user_id, period_key, send_at, state, \
                 claimed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    claim.user_id,
                    claim.period_key,
                    claim.send_at.to_rfc3339(),
                    claim.state.as_str(),
                    claim.claimed_at.to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    async fn load_claim(&self, user_id: &str, period_key: &str) -> Result<Option<OccasionClaim>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, period_key, send_at, state, claimed_at FROM occasions \
                 WHERE user_id = ?1 AND period_key = ?2",
            )
            .map_err(store_err)?;
        stmt.query_row(rusqlite::params![user_id, period_key], |row| {
            Ok(OccasionClaim {
                user_id: row.get(0)?,
                period_key: row.get(1)?,
                send_at: parse_ts(row.get(2)?),
                state: OccasionState::parse(&row.get::<_, String>(3)?)
                    .unwrap_or(OccasionState::Failed),
                claimed_at: parse_ts(row.get(4)?),
            })
        })
        .optional()
        .map_err(store_err)
    }

    async fn finish_occasion(
        &self,
        user_id: &str,
        period_key: &str,
        state: OccasionState,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE occasions SET state = ?3 WHERE user_id = ?1 AND period_key = ?2 \
                 AND state = 'claimed'",
                rusqlite::params![user_id, period_key, state.as_str()],
            )
            .map_err(store_err)?;
        Ok(rows == 1)
    }

    async fn sent_count_since(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT COUNT(*) FROM occasions WHERE user_id = ?1 AND state = 'sent' \
                 AND claimed_at >= ?2",
            )
            .map_err(store_err)?;
        let count: i64 = stmt
            .query_row(rusqlite::params![user_id, cutoff.to_rfc3339()], |row| {
                row.get(0)
            })
            .map_err(store_err)?;
        Ok(count as u32)
    }

    async fn expire_overdue_claims(&self, cutoff: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE occasions SET state = 'failed' WHERE state = 'claimed' \
                 AND send_at < ?1",
                rusqlite::params![cutoff.to_rfc3339()],
            )
            .map_err(store_err)?;
        Ok(rows as u32)
    }
}
