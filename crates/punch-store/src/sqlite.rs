//! SQLite-based store implementation

use chrono::{DateTime, Local};
use punch_api::{AttendanceSession, ExceptionKind, HistoryQuery, RaisedTicket};
use punch_util::{SessionId, TicketRef, UserId};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Params,
    TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    AuditEvent, CreateOutcome, SessionStore, StoreError, StoreResult, TicketRecord, UpdateOutcome,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Attendance sessions; the full record lives in session_json,
            -- the other columns exist for indexing and filtering
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                workplace_id TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                clock_in_at INTEGER,
                clock_out_at INTEGER,
                session_json TEXT NOT NULL
            );

            -- At most one open session per user
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_open
                ON sessions(user_id) WHERE status IN ('active', 'on_break');

            CREATE INDEX IF NOT EXISTS idx_sessions_user_clock_in
                ON sessions(user_id, clock_in_at);

            -- Exception tickets raised through the approval workflow
            CREATE TABLE IF NOT EXISTS tickets (
                ticket_ref TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT,
                reason TEXT NOT NULL,
                raised_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_session ON tickets(session_id);
            -- One ticket per kind per session
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_session_kind
                ON tickets(session_id, kind) WHERE session_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_tickets_user ON tickets(user_id);

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| punch_util::now())
}

fn parse_kind(s: &str) -> StoreResult<ExceptionKind> {
    s.parse().map_err(StoreError::Serialization)
}

fn session_tickets(conn: &Connection, id: &SessionId) -> StoreResult<Vec<RaisedTicket>> {
    let mut stmt = conn.prepare(
        "SELECT ticket_ref, kind, raised_at FROM tickets WHERE session_id = ? ORDER BY rowid",
    )?;

    let rows = stmt.query_map([id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut tickets = Vec::new();
    for row in rows {
        let (ticket_ref, kind, raised_at) = row?;
        tickets.push(RaisedTicket {
            ticket_ref: TicketRef::new(ticket_ref),
            kind: parse_kind(&kind)?,
            raised_at: parse_timestamp(&raised_at),
        });
    }

    Ok(tickets)
}

/// Decode a stored session and attach its tickets
fn load_session(conn: &Connection, json: &str) -> StoreResult<AttendanceSession> {
    let mut session: AttendanceSession = serde_json::from_str(json)?;
    session.exception_tickets = session_tickets(conn, &session.id)?;
    Ok(session)
}

fn query_sessions<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> StoreResult<Vec<AttendanceSession>> {
    let mut stmt = conn.prepare(sql)?;
    let jsons = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    jsons.iter().map(|json| load_session(conn, json)).collect()
}

fn open_session_of(conn: &Connection, user_id: &UserId) -> StoreResult<Option<AttendanceSession>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT session_json FROM sessions
             WHERE user_id = ? AND status IN ('active', 'on_break')
             LIMIT 1",
            [user_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    json.map(|j| load_session(conn, &j)).transpose()
}

impl SessionStore for SqliteStore {
    fn create_if_absent(&self, session: &AttendanceSession) -> StoreResult<CreateOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = open_session_of(&tx, &session.user_id)? {
            debug!(user_id = %session.user_id, existing = %existing.id, "Open session already exists");
            return Ok(CreateOutcome::Existing(existing));
        }

        let json = serde_json::to_string(session)?;
        let inserted = tx.execute(
            r#"
            INSERT INTO sessions
                (id, user_id, workplace_id, status, version, clock_in_at, clock_out_at, session_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                session.id.to_string(),
                session.user_id.as_str(),
                session.workplace_id.as_str(),
                session.status.as_str(),
                session.version as i64,
                session.clock_in_at.map(|t| t.timestamp_millis()),
                session.clock_out_at.map(|t| t.timestamp_millis()),
                json,
            ],
        );

        match inserted {
            Ok(_) => {}
            // Another writer on the same database file won the race
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return match open_session_of(&tx, &session.user_id)? {
                    Some(existing) => Ok(CreateOutcome::Existing(existing)),
                    None => Err(StoreError::Database(format!(
                        "constraint violation inserting session {}",
                        session.id
                    ))),
                };
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        debug!(session_id = %session.id, user_id = %session.user_id, "Session created");
        Ok(CreateOutcome::Created)
    }

    fn update_versioned(
        &self,
        session: &AttendanceSession,
        expected_version: u64,
    ) -> StoreResult<UpdateOutcome> {
        let conn = self.conn()?;
        let json = serde_json::to_string(session)?;

        let changed = conn.execute(
            r#"
            UPDATE sessions
            SET status = ?, version = ?, clock_out_at = ?, session_json = ?
            WHERE id = ? AND version = ?
            "#,
            params![
                session.status.as_str(),
                session.version as i64,
                session.clock_out_at.map(|t| t.timestamp_millis()),
                json,
                session.id.to_string(),
                expected_version as i64,
            ],
        )?;

        if changed == 1 {
            debug!(session_id = %session.id, version = session.version, "Session updated");
            return Ok(UpdateOutcome::Committed);
        }

        let stored: Option<i64> = conn
            .query_row(
                "SELECT version FROM sessions WHERE id = ?",
                [session.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match stored {
            Some(v) => UpdateOutcome::Stale {
                stored_version: v as u64,
            },
            None => UpdateOutcome::Missing,
        })
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<AttendanceSession>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT session_json FROM sessions WHERE id = ?",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| load_session(&conn, &j)).transpose()
    }

    fn get_open_session(&self, user_id: &UserId) -> StoreResult<Option<AttendanceSession>> {
        let conn = self.conn()?;
        open_session_of(&conn, user_id)
    }

    fn last_completed_session(&self, user_id: &UserId) -> StoreResult<Option<AttendanceSession>> {
        let conn = self.conn()?;
        let mut sessions = query_sessions(
            &conn,
            "SELECT session_json FROM sessions
             WHERE user_id = ? AND status = 'completed'
             ORDER BY clock_out_at DESC
             LIMIT 1",
            [user_id.as_str()],
        )?;
        Ok(sessions.pop())
    }

    fn list_open_sessions(&self) -> StoreResult<Vec<AttendanceSession>> {
        let conn = self.conn()?;
        query_sessions(
            &conn,
            "SELECT session_json FROM sessions
             WHERE status IN ('active', 'on_break')
             ORDER BY clock_in_at ASC",
            [],
        )
    }

    fn history(
        &self,
        user_id: &UserId,
        query: &HistoryQuery,
    ) -> StoreResult<(Vec<AttendanceSession>, u64)> {
        let query = query.clone().normalized();
        let conn = self.conn()?;

        let mut clauses = vec!["user_id = ?"];
        let mut values = vec![Value::Text(user_id.to_string())];

        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(from) = query.from {
            clauses.push("clock_in_at >= ?");
            values.push(Value::Integer(from.timestamp_millis()));
        }
        if let Some(to) = query.to {
            clauses.push("clock_in_at <= ?");
            values.push(Value::Integer(to.timestamp_millis()));
        }

        let where_sql = clauses.join(" AND ");

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM sessions WHERE {}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(query.per_page as i64));
        values.push(Value::Integer(query.offset() as i64));

        let sessions = query_sessions(
            &conn,
            &format!(
                "SELECT session_json FROM sessions WHERE {} ORDER BY clock_in_at DESC LIMIT ? OFFSET ?",
                where_sql
            ),
            params_from_iter(values.iter()),
        )?;

        Ok((sessions, total as u64))
    }

    fn record_ticket(&self, ticket: &TicketRecord) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO tickets (ticket_ref, kind, user_id, session_id, reason, raised_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
            params![
                ticket.ticket_ref.as_str(),
                ticket.kind.as_str(),
                ticket.user_id.as_str(),
                ticket.session_id.map(|id| id.to_string()),
                ticket.reason,
                ticket.raised_at.to_rfc3339(),
            ],
        )?;

        debug!(ticket_ref = %ticket.ticket_ref, kind = %ticket.kind, "Ticket recorded");
        Ok(())
    }

    fn tickets_for_user(&self, user_id: &UserId) -> StoreResult<Vec<TicketRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT ticket_ref, kind, session_id, reason, raised_at
             FROM tickets WHERE user_id = ? ORDER BY rowid",
        )?;

        let rows = stmt.query_map([user_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut tickets = Vec::new();
        for row in rows {
            let (ticket_ref, kind, session_id, reason, raised_at) = row?;
            tickets.push(TicketRecord {
                ticket_ref: TicketRef::new(ticket_ref),
                kind: parse_kind(&kind)?,
                user_id: user_id.clone(),
                session_id: session_id.as_deref().and_then(SessionId::parse),
                reason,
                raised_at: parse_timestamp(&raised_at),
            });
        }

        Ok(tickets)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str),
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
