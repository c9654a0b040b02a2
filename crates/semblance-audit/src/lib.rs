//! Immutable append-only audit trail with SHA-256 chain hashing.
//!
//! Every request the gateway receives and every outcome it produces lands
//! here before anything else happens. Entries are cryptographically
//! chained — `chain_hash = SHA-256(prev_chain ‖ payload_hash ‖ id)`, the
//! first entry chaining against the literal `genesis` — so tampering with
//! any row breaks every row after it. The chain hash is computed inside
//! the database by an append trigger; update and delete are aborted at
//! the schema level.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use semblance_crypto::{canonical_sha256_hex, sha256_hex};
use semblance_proto::{Direction, ResponseStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wire action name; kept as text so even unknown-action frames audit.
    pub action: String,
    pub direction: Direction,
    pub status: ResponseStatus,
    pub payload_hash: String,
    pub signature: String,
    pub chain_hash: String,
    pub metadata: Value,
    pub estimated_time_saved_seconds: i64,
    pub autonomy_tier: Option<String>,
    pub approval_required: bool,
    pub approval_given: bool,
}

/// Everything the caller supplies for one appended entry; id, timestamp
/// and chain hash are filled in here.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub request_id: String,
    pub action: String,
    pub direction: Direction,
    pub status: ResponseStatus,
    pub payload: Value,
    pub signature: String,
    pub metadata: Value,
    pub estimated_time_saved_seconds: i64,
    pub autonomy_tier: Option<String>,
    pub approval_required: bool,
    pub approval_given: bool,
}

impl AuditRecord {
    pub fn new(
        request_id: &str,
        action: &str,
        direction: Direction,
        status: ResponseStatus,
        payload: &Value,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            action: action.to_string(),
            direction,
            status,
            payload: payload.clone(),
            signature: String::new(),
            metadata: Value::Object(Default::default()),
            estimated_time_saved_seconds: 0,
            autonomy_tier: None,
            approval_required: false,
            approval_given: false,
        }
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_string();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.autonomy_tier = Some(tier.to_string());
        self
    }

    pub fn with_approval(mut self, required: bool, given: bool) -> Self {
        self.approval_required = required;
        self.approval_given = given;
        self
    }

    pub fn with_time_saved(mut self, seconds: i64) -> Self {
        self.estimated_time_saved_seconds = seconds;
        self
    }
}

/// Read-only query filter.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub action: Option<String>,
    pub status: Option<ResponseStatus>,
    pub direction: Option<Direction>,
    pub request_id: Option<String>,
    pub limit: Option<usize>,
}

/// Result of a tamper check walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub entries_checked: usize,
    /// Earliest row (0-based append order) whose chain hash does not
    /// match the recomputation. Everything after it is invalid too.
    pub first_broken_index: Option<usize>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken_index.is_none()
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("corrupt audit row: {0}")]
    Corrupt(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for AuditError {
    fn from(value: rusqlite::Error) -> Self {
        AuditError::Sqlite(value.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;

// ─── Schema ──────────────────────────────────────────────────────────────────

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_trail (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    request_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    direction TEXT NOT NULL,
    status TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    signature TEXT NOT NULL DEFAULT '',
    chain_hash TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    estimated_time_saved_seconds INTEGER NOT NULL DEFAULT 0,
    autonomy_tier TEXT,
    approval_required INTEGER NOT NULL DEFAULT 0,
    approval_given INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_trail (timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_action_timestamp ON audit_trail (action, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_status ON audit_trail (status);

CREATE TRIGGER IF NOT EXISTS audit_chain_append
AFTER INSERT ON audit_trail
BEGIN
    UPDATE audit_trail
    SET chain_hash = sha256_hex(
        COALESCE(
            (SELECT chain_hash FROM audit_trail WHERE seq < NEW.seq ORDER BY seq DESC LIMIT 1),
            'genesis'
        ) || NEW.payload_hash || NEW.id)
    WHERE seq = NEW.seq;
END;

CREATE TRIGGER IF NOT EXISTS audit_no_update
BEFORE UPDATE ON audit_trail
WHEN OLD.chain_hash IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'audit entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_no_delete
BEFORE DELETE ON audit_trail
BEGIN
    SELECT RAISE(ABORT, 'audit entries cannot be deleted');
END;
";

// ─── Audit trail ─────────────────────────────────────────────────────────────

/// Gateway-owned handle to the audit database. The gateway is the sole
/// writer; core reads through the query methods only.
pub struct AuditTrail {
    conn: Mutex<Connection>,
}

impl AuditTrail {
    /// Open (or create) the audit database at `path`.
    pub fn open(path: &Path) -> AuditResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::Sqlite(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory trail, used by tests and the simulator.
    pub fn open_in_memory() -> AuditResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> AuditResult<Self> {
        register_sha256(&conn)?;
        conn.execute_batch(SCHEMA)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_trail", [], |r| r.get(0))?;
        info!(entries = count, "audit trail opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one entry and return it with its chain hash.
    pub fn append(&self, record: AuditRecord) -> AuditResult<AuditEntry> {
        let id = Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let payload_hash = canonical_sha256_hex(&record.payload);
        let metadata_text = serde_json::to_string(&record.metadata)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_trail (
                id, request_id, timestamp, action, direction, status,
                payload_hash, signature, metadata,
                estimated_time_saved_seconds, autonomy_tier,
                approval_required, approval_given
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                record.request_id,
                timestamp.to_rfc3339(),
                record.action,
                record.direction.to_string(),
                record.status.to_string(),
                payload_hash,
                record.signature,
                metadata_text,
                record.estimated_time_saved_seconds,
                record.autonomy_tier,
                record.approval_required as i64,
                record.approval_given as i64,
            ],
        )?;

        let chain_hash: String = conn.query_row(
            "SELECT chain_hash FROM audit_trail WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        info!(
            entry_id = %id,
            request_id = %record.request_id,
            action = %record.action,
            direction = %record.direction,
            status = %record.status,
            "audit entry appended"
        );

        Ok(AuditEntry {
            id,
            request_id: record.request_id,
            timestamp,
            action: record.action,
            direction: record.direction,
            status: record.status,
            payload_hash,
            signature: record.signature,
            chain_hash,
            metadata: record.metadata,
            estimated_time_saved_seconds: record.estimated_time_saved_seconds,
            autonomy_tier: record.autonomy_tier,
            approval_required: record.approval_required,
            approval_given: record.approval_given,
        })
    }

    /// Filtered read-only query, append order.
    pub fn query(&self, filter: &AuditQuery) -> AuditResult<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, request_id, timestamp, action, direction, status,
                    payload_hash, signature, chain_hash, metadata,
                    estimated_time_saved_seconds, autonomy_tier,
                    approval_required, approval_given
             FROM audit_trail WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(from) = filter.from {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(from.to_rfc3339()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND timestamp <= ?");
            args.push(Box::new(to.to_rfc3339()));
        }
        if let Some(ref action) = filter.action {
            sql.push_str(" AND action = ?");
            args.push(Box::new(action.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.to_string()));
        }
        if let Some(direction) = filter.direction {
            sql.push_str(" AND direction = ?");
            args.push(Box::new(direction.to_string()));
        }
        if let Some(ref request_id) = filter.request_id {
            sql.push_str(" AND request_id = ?");
            args.push(Box::new(request_id.clone()));
        }
        sql.push_str(" ORDER BY seq ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_entry,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn entry_by_id(&self, id: &str) -> AuditResult<Option<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, request_id, timestamp, action, direction, status,
                    payload_hash, signature, chain_hash, metadata,
                    estimated_time_saved_seconds, autonomy_tier,
                    approval_required, approval_given
             FROM audit_trail WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_entry)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    /// Entry counts per status string.
    pub fn counts_by_status(&self) -> AuditResult<HashMap<String, u64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM audit_trail GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (status, n) = row?;
            out.insert(status, n as u64);
        }
        Ok(out)
    }

    /// Entry counts per service prefix (`email`, `calendar`, ...).
    pub fn counts_by_service(&self) -> AuditResult<HashMap<String, u64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT action, COUNT(*) FROM audit_trail GROUP BY action")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out: HashMap<String, u64> = HashMap::new();
        for row in rows {
            let (action, n) = row?;
            let service = action.split('.').next().unwrap_or(&action).to_string();
            *out.entry(service).or_insert(0) += n as u64;
        }
        Ok(out)
    }

    /// Sum of estimated time saved across successful responses, seconds.
    pub fn total_time_saved_seconds(&self) -> AuditResult<i64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(estimated_time_saved_seconds), 0)
             FROM audit_trail WHERE direction = 'response' AND status = 'success'",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn len(&self) -> AuditResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM audit_trail", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Recompute the chain from the first row forward.
    ///
    /// The recomputation carries its own previous hash, so once one row
    /// breaks, every later row is reported against the honest chain — a
    /// tampered row cannot re-anchor the rows after it.
    pub fn verify_chain(&self) -> AuditResult<ChainReport> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, payload_hash, chain_hash FROM audit_trail ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut prev = "genesis".to_string();
        let mut first_broken = None;
        let mut checked = 0usize;
        for (index, row) in rows.enumerate() {
            let (id, payload_hash, chain_hash) = row?;
            let expected = sha256_hex(format!("{prev}{payload_hash}{id}").as_bytes());
            if Some(&expected) != chain_hash.as_ref() && first_broken.is_none() {
                warn!(index, entry_id = %id, "audit chain break detected");
                first_broken = Some(index);
            }
            prev = expected;
            checked = index + 1;
        }

        Ok(ChainReport {
            entries_checked: checked,
            first_broken_index: first_broken,
        })
    }

    /// The append trigger is part of the schema contract; expose its
    /// presence so it can be asserted.
    pub fn has_append_trigger(&self) -> AuditResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'trigger' AND name = 'audit_chain_append'",
            [],
            |row| row.get(0),
        )?;
        Ok(n == 1)
    }
}

fn register_sha256(conn: &Connection) -> AuditResult<()> {
    conn.create_scalar_function(
        "sha256_hex",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let input: String = ctx.get(0)?;
            Ok(sha256_hex(input.as_bytes()))
        },
    )?;
    Ok(())
}

type RowResult = Result<AuditEntry, AuditError>;

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowResult> {
    let id: String = row.get(0)?;
    let request_id: String = row.get(1)?;
    let timestamp: String = row.get(2)?;
    let action: String = row.get(3)?;
    let direction: String = row.get(4)?;
    let status: String = row.get(5)?;
    let payload_hash: String = row.get(6)?;
    let signature: String = row.get(7)?;
    let chain_hash: Option<String> = row.get(8)?;
    let metadata: String = row.get(9)?;
    let time_saved: i64 = row.get(10)?;
    let autonomy_tier: Option<String> = row.get(11)?;
    let approval_required: i64 = row.get(12)?;
    let approval_given: i64 = row.get(13)?;

    Ok((|| {
        let direction = match direction.as_str() {
            "request" => Direction::Request,
            "response" => Direction::Response,
            other => return Err(AuditError::Corrupt(format!("bad direction '{other}'"))),
        };
        let status = match status.as_str() {
            "success" => ResponseStatus::Success,
            "error" => ResponseStatus::Error,
            "rejected" => ResponseStatus::Rejected,
            "pending" => ResponseStatus::Pending,
            other => return Err(AuditError::Corrupt(format!("bad status '{other}'"))),
        };
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| AuditError::Corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let metadata: Value = serde_json::from_str(&metadata)?;

        Ok(AuditEntry {
            id,
            request_id,
            timestamp,
            action,
            direction,
            status,
            payload_hash,
            signature,
            chain_hash: chain_hash
                .ok_or_else(|| AuditError::Corrupt("missing chain hash".to_string()))?,
            metadata,
            estimated_time_saved_seconds: time_saved,
            autonomy_tier,
            approval_required: approval_required != 0,
            approval_given: approval_given != 0,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(request_id: &str, status: ResponseStatus, direction: Direction) -> AuditRecord {
        AuditRecord::new(
            request_id,
            "email.send",
            direction,
            status,
            &json!({"to": ["a@x"], "subject": "hi"}),
        )
    }

    #[test]
    fn test_append_sets_chain_hash() {
        let trail = AuditTrail::open_in_memory().expect("open");
        let entry = trail
            .append(record("req-1", ResponseStatus::Success, Direction::Request))
            .expect("append");

        let expected = sha256_hex(
            format!("genesis{}{}", entry.payload_hash, entry.id).as_bytes(),
        );
        assert_eq!(entry.chain_hash, expected);
    }

    #[test]
    fn test_chain_links_consecutive_entries() {
        let trail = AuditTrail::open_in_memory().expect("open");
        let first = trail
            .append(record("req-1", ResponseStatus::Success, Direction::Request))
            .expect("append");
        let second = trail
            .append(record("req-1", ResponseStatus::Success, Direction::Response))
            .expect("append");

        let expected = sha256_hex(
            format!("{}{}{}", first.chain_hash, second.payload_hash, second.id).as_bytes(),
        );
        assert_eq!(second.chain_hash, expected);
        assert_ne!(first.chain_hash, second.chain_hash);
    }

    #[test]
    fn test_verify_intact_chain() {
        let trail = AuditTrail::open_in_memory().expect("open");
        for i in 0..10 {
            trail
                .append(record(
                    &format!("req-{i}"),
                    ResponseStatus::Success,
                    Direction::Request,
                ))
                .expect("append");
        }
        let report = trail.verify_chain().expect("verify");
        assert!(report.is_intact());
        assert_eq!(report.entries_checked, 10);
    }

    #[test]
    fn test_update_and_delete_are_blocked() {
        let trail = AuditTrail::open_in_memory().expect("open");
        trail
            .append(record("req-1", ResponseStatus::Success, Direction::Request))
            .expect("append");

        let conn = trail.conn.lock();
        let update = conn.execute("UPDATE audit_trail SET status = 'error'", []);
        assert!(update.is_err(), "update must abort");
        let delete = conn.execute("DELETE FROM audit_trail", []);
        assert!(delete.is_err(), "delete must abort");
    }

    #[test]
    fn test_tamper_detected_at_earliest_row() {
        let trail = AuditTrail::open_in_memory().expect("open");
        let mut ids = Vec::new();
        for i in 0..5 {
            let entry = trail
                .append(record(
                    &format!("req-{i}"),
                    ResponseStatus::Success,
                    Direction::Request,
                ))
                .expect("append");
            ids.push(entry.id);
        }

        // Simulate out-of-band tampering: drop the immutability trigger
        // and flip a payload hash in row 2.
        {
            let conn = trail.conn.lock();
            conn.execute_batch("DROP TRIGGER audit_no_update;").expect("drop");
            conn.execute(
                "UPDATE audit_trail SET payload_hash = 'deadbeef' WHERE id = ?1",
                params![ids[2]],
            )
            .expect("tamper");
        }

        let report = trail.verify_chain().expect("verify");
        assert_eq!(report.first_broken_index, Some(2));
    }

    #[test]
    fn test_tamper_invalidates_later_rows_too() {
        let trail = AuditTrail::open_in_memory().expect("open");
        for i in 0..4 {
            trail
                .append(record(
                    &format!("req-{i}"),
                    ResponseStatus::Success,
                    Direction::Request,
                ))
                .expect("append");
        }

        {
            let conn = trail.conn.lock();
            conn.execute_batch("DROP TRIGGER audit_no_update;").expect("drop");
            conn.execute(
                "UPDATE audit_trail SET payload_hash = 'deadbeef' WHERE seq = 1",
                [],
            )
            .expect("tamper");
        }

        // First break is row 0; the honest recomputation does not
        // re-anchor on the tampered stored hashes.
        let report = trail.verify_chain().expect("verify");
        assert_eq!(report.first_broken_index, Some(0));
        assert_eq!(report.entries_checked, 4);
    }

    #[test]
    fn test_query_filters() {
        let trail = AuditTrail::open_in_memory().expect("open");
        trail
            .append(record("req-1", ResponseStatus::Success, Direction::Request))
            .expect("append");
        trail
            .append(record("req-1", ResponseStatus::Success, Direction::Response))
            .expect("append");
        trail
            .append(record("req-2", ResponseStatus::Rejected, Direction::Response))
            .expect("append");

        let responses = trail
            .query(&AuditQuery {
                direction: Some(Direction::Response),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(responses.len(), 2);

        let rejected = trail
            .query(&AuditQuery {
                status: Some(ResponseStatus::Rejected),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].request_id, "req-2");

        let by_request = trail
            .query(&AuditQuery {
                request_id: Some("req-1".to_string()),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(by_request.len(), 2);
    }

    #[test]
    fn test_query_time_window() {
        let trail = AuditTrail::open_in_memory().expect("open");
        trail
            .append(record("req-1", ResponseStatus::Success, Direction::Request))
            .expect("append");

        let future = Utc::now() + chrono::Duration::hours(1);
        let none = trail
            .query(&AuditQuery {
                from: Some(future),
                ..Default::default()
            })
            .expect("query");
        assert!(none.is_empty());

        let past = Utc::now() - chrono::Duration::hours(1);
        let all = trail
            .query(&AuditQuery {
                from: Some(past),
                to: Some(future),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_aggregations() {
        let trail = AuditTrail::open_in_memory().expect("open");
        trail
            .append(record("req-1", ResponseStatus::Success, Direction::Response).with_time_saved(120))
            .expect("append");
        trail
            .append(record("req-2", ResponseStatus::Success, Direction::Response).with_time_saved(60))
            .expect("append");
        trail
            .append(record("req-3", ResponseStatus::Rejected, Direction::Response).with_time_saved(999))
            .expect("append");
        trail
            .append(AuditRecord::new(
                "req-4",
                "calendar.create",
                Direction::Request,
                ResponseStatus::Success,
                &json!({}),
            ))
            .expect("append");

        assert_eq!(trail.total_time_saved_seconds().expect("sum"), 180);

        let by_status = trail.counts_by_status().expect("counts");
        assert_eq!(by_status["success"], 3);
        assert_eq!(by_status["rejected"], 1);

        let by_service = trail.counts_by_service().expect("counts");
        assert_eq!(by_service["email"], 3);
        assert_eq!(by_service["calendar"], 1);
    }

    #[test]
    fn test_append_trigger_present() {
        let trail = AuditTrail::open_in_memory().expect("open");
        assert!(trail.has_append_trigger().expect("check"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.db");
        let first_hash = {
            let trail = AuditTrail::open(&path).expect("open");
            trail
                .append(record("req-1", ResponseStatus::Success, Direction::Request))
                .expect("append")
                .chain_hash
        };

        let trail = AuditTrail::open(&path).expect("reopen");
        assert_eq!(trail.len().expect("len"), 1);
        let entries = trail.query(&AuditQuery::default()).expect("query");
        assert_eq!(entries[0].chain_hash, first_hash);

        // New entries continue the persisted chain.
        let next = trail
            .append(record("req-2", ResponseStatus::Success, Direction::Request))
            .expect("append");
        let expected =
            sha256_hex(format!("{}{}{}", first_hash, next.payload_hash, next.id).as_bytes());
        assert_eq!(next.chain_hash, expected);
    }

    #[test]
    fn test_metadata_round_trip() {
        let trail = AuditTrail::open_in_memory().expect("open");
        let entry = trail
            .append(
                record("req-1", ResponseStatus::Success, Direction::Request)
                    .with_metadata(json!({"anomalies": ["burst"], "reason": null}))
                    .with_tier("partner")
                    .with_approval(true, true),
            )
            .expect("append");

        let loaded = trail.entry_by_id(&entry.id).expect("get").expect("some");
        assert_eq!(loaded.metadata["anomalies"], json!(["burst"]));
        assert_eq!(loaded.autonomy_tier.as_deref(), Some("partner"));
        assert!(loaded.approval_required);
        assert!(loaded.approval_given);
    }
}
