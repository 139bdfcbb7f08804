//! SQLite persistence for rewind-daemon.
//!
//! This is the single-writer store backing the daemon. The schema stays
//! small: a records table keyed by the deterministic record id (so artifact
//! re-reads upsert instead of duplicating), the externally-authored alert
//! rules, and the notifications the alert engine raises.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

use rewind_core::error::{Result, RewindError};
use rewind_core::storage::{RecordStore, RuleStore};
use rewind_core::types::{AlertRule, NormalizedRecord, Notification};

#[derive(Clone)]
pub struct Db {
    path: PathBuf,
}

/// Aggregate counts over the records table, logged at startup and on demand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbStats {
    pub total_records: u64,
    pub methods: HashMap<String, u64>,
    pub status_codes: HashMap<String, u64>,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.with_connection(|conn| {
            let total_records: i64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(|err| storage_err("Failed to count records", err))?;

            let mut stats = DbStats {
                total_records: total_records.max(0) as u64,
                ..DbStats::default()
            };

            let mut stmt = conn
                .prepare("SELECT method, COUNT(*) FROM records GROUP BY method")
                .map_err(|err| storage_err("Failed to prepare method stats query", err))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|err| storage_err("Failed to read method stats", err))?;
            for row in rows {
                let (method, count) =
                    row.map_err(|err| storage_err("Failed to decode method stats row", err))?;
                stats.methods.insert(method, count.max(0) as u64);
            }

            let mut stmt = conn
                .prepare(
                    "SELECT status_code, COUNT(*) FROM records \
                     WHERE status_code IS NOT NULL GROUP BY status_code",
                )
                .map_err(|err| storage_err("Failed to prepare status stats query", err))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|err| storage_err("Failed to read status stats", err))?;
            for row in rows {
                let (status, count) =
                    row.map_err(|err| storage_err("Failed to decode status stats row", err))?;
                stats.status_codes.insert(status.to_string(), count.max(0) as u64);
            }

            Ok(stats)
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS records (
                    record_id TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    source_ip TEXT NOT NULL,
                    source_port INTEGER NOT NULL,
                    dest_ip TEXT NOT NULL,
                    dest_port INTEGER NOT NULL,
                    method TEXT NOT NULL,
                    uri TEXT NOT NULL,
                    status_code INTEGER,
                    payload TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records (timestamp);
                 CREATE INDEX IF NOT EXISTS idx_records_method ON records (method);
                 CREATE INDEX IF NOT EXISTS idx_records_status ON records (status_code);
                 CREATE TABLE IF NOT EXISTS alert_rules (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    severity TEXT NOT NULL,
                    conditions TEXT NOT NULL,
                    cooldown_minutes INTEGER NOT NULL DEFAULT 0,
                    last_triggered TEXT
                 );
                 CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    rule_id TEXT NOT NULL,
                    rule_name TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    message TEXT NOT NULL,
                    record_id TEXT NOT NULL,
                    method TEXT NOT NULL,
                    uri TEXT NOT NULL,
                    status_code INTEGER,
                    source_ip TEXT NOT NULL,
                    dest_ip TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| storage_err("Failed to initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                RewindError::Storage(format!("Failed to create daemon data dir: {}", err))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        Connection::open_with_flags(&self.path, flags)
            .map_err(|err| storage_err("Failed to open sqlite db", err))
    }
}

impl RecordStore for Db {
    fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| storage_err("Failed to begin record transaction", err))?;
            for record in records {
                let payload = serde_json::to_string(record).map_err(|err| {
                    RewindError::Storage(format!("Failed to serialize record payload: {}", err))
                })?;
                tx.execute(
                    "INSERT INTO records \
                        (record_id, timestamp, source_ip, source_port, dest_ip, dest_port, \
                         method, uri, status_code, payload) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                     ON CONFLICT(record_id) DO UPDATE SET \
                        timestamp = excluded.timestamp, \
                        status_code = excluded.status_code, \
                        payload = excluded.payload",
                    params![
                        record.record_id,
                        record.timestamp.to_rfc3339(),
                        record.source_ip,
                        record.source_port,
                        record.dest_ip,
                        record.dest_port,
                        record.request.method,
                        record.request.uri,
                        record.response.as_ref().map(|response| response.status_code),
                        payload
                    ],
                )
                .map_err(|err| storage_err("Failed to upsert record", err))?;
            }
            tx.commit()
                .map_err(|err| storage_err("Failed to commit record transaction", err))
        })
    }

    fn count_all(&self) -> Result<u64> {
        self.with_connection(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(|err| storage_err("Failed to count records", err))?;
            Ok(count.max(0) as u64)
        })
    }

    fn delete_all(&self) -> Result<u64> {
        self.with_connection(|conn| {
            let deleted = conn
                .execute("DELETE FROM records", [])
                .map_err(|err| storage_err("Failed to delete records", err))?;
            Ok(deleted as u64)
        })
    }
}

impl RuleStore for Db {
    fn list_enabled_rules(&self) -> Result<Vec<AlertRule>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, severity, conditions, cooldown_minutes, last_triggered \
                     FROM alert_rules WHERE enabled = 1",
                )
                .map_err(|err| storage_err("Failed to prepare rules query", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })
                .map_err(|err| storage_err("Failed to read rule rows", err))?;

            let mut rules = Vec::new();
            for row in rows {
                let (id, name, severity, conditions, cooldown_minutes, last_triggered) =
                    row.map_err(|err| storage_err("Failed to decode rule row", err))?;

                // A malformed rule row disables that rule, not the whole set.
                let Some(severity) = enum_from_text(&severity) else {
                    warn!(rule = %id, "Skipping rule with unknown severity");
                    continue;
                };
                let conditions = match serde_json::from_str(&conditions) {
                    Ok(conditions) => conditions,
                    Err(err) => {
                        warn!(rule = %id, error = %err, "Skipping rule with malformed conditions");
                        continue;
                    }
                };

                rules.push(AlertRule {
                    id,
                    name,
                    enabled: true,
                    severity,
                    conditions,
                    cooldown_minutes,
                    last_triggered: last_triggered.as_deref().and_then(parse_rfc3339),
                });
            }

            Ok(rules)
        })
    }

    fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE alert_rules SET last_triggered = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), rule_id],
            )
            .map_err(|err| storage_err("Failed to update rule trigger time", err))?;
            Ok(())
        })
    }

    fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO notifications \
                    (id, rule_id, rule_name, severity, message, record_id, method, uri, \
                     status_code, source_ip, dest_ip, timestamp, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    notification.id,
                    notification.rule_id,
                    notification.rule_name,
                    enum_to_text(&notification.severity),
                    notification.message,
                    notification.record_id,
                    notification.method,
                    notification.uri,
                    notification.status_code,
                    notification.source_ip,
                    notification.dest_ip,
                    notification.timestamp.to_rfc3339(),
                    enum_to_text(&notification.status),
                    notification.created_at.to_rfc3339()
                ],
            )
            .map_err(|err| storage_err("Failed to insert notification", err))?;
            Ok(())
        })
    }
}

fn storage_err(context: &str, err: rusqlite::Error) -> RewindError {
    RewindError::Storage(format!("{}: {}", context, err))
}

/// Serde-renamed enum variant as bare text (e.g. `Severity::Warning` ->
/// "warning"), matching how rule-authoring clients write these columns.
fn enum_to_text<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "unknown".to_string())
        .trim_matches('"')
        .to_string()
}

fn enum_from_text<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(&format!("\"{}\"", text)).ok()
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::types::{HttpRequest, HttpResponse, NotificationStatus, Severity};
    use tempfile::TempDir;

    fn test_db(temp: &TempDir) -> Db {
        Db::new(temp.path().join("state.db")).expect("init db")
    }

    fn record(record_id: &str, method: &str, status_code: Option<u16>) -> NormalizedRecord {
        NormalizedRecord {
            record_id: record_id.to_string(),
            timestamp: Utc::now(),
            source_ip: "10.0.0.1".to_string(),
            source_port: 5000,
            dest_ip: "10.0.0.2".to_string(),
            dest_port: 80,
            request: HttpRequest {
                method: method.to_string(),
                uri: "/".to_string(),
                version: "HTTP/1.1".to_string(),
                headers: Vec::new(),
                body: None,
            },
            response: status_code.map(|status_code| HttpResponse {
                version: "HTTP/1.1".to_string(),
                status_code,
                status_message: "OK".to_string(),
                headers: Vec::new(),
                body: None,
            }),
        }
    }

    fn insert_rule(db: &Db, id: &str, enabled: bool, conditions: &str) {
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO alert_rules (id, name, enabled, severity, conditions, cooldown_minutes) \
                 VALUES (?1, ?2, ?3, 'warning', ?4, 5)",
                params![id, format!("rule {}", id), enabled, conditions],
            )
            .map(|_| ())
            .map_err(|err| storage_err("insert test rule", err))
        })
        .expect("insert rule");
    }

    #[test]
    fn upsert_batch_is_idempotent_per_record_id() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);

        let first = vec![record("s_0", "GET", Some(200)), record("s_1", "POST", None)];
        db.upsert_batch(&first).unwrap();
        db.upsert_batch(&first).unwrap();
        assert_eq!(db.count_all().unwrap(), 2);

        // A rewrite that completes a previously response-less record updates
        // in place instead of duplicating.
        db.upsert_batch(&[record("s_1", "POST", Some(503))]).unwrap();
        assert_eq!(db.count_all().unwrap(), 2);
        let stats = db.stats().unwrap();
        assert_eq!(stats.status_codes.get("503"), Some(&1));
    }

    #[test]
    fn delete_all_reports_how_many_went_away() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);

        db.upsert_batch(&[record("a_0", "GET", Some(200)), record("a_1", "GET", Some(200))])
            .unwrap();
        assert_eq!(db.delete_all().unwrap(), 2);
        assert_eq!(db.count_all().unwrap(), 0);
        assert_eq!(db.delete_all().unwrap(), 0);
    }

    #[test]
    fn stats_aggregates_methods_and_status_codes() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);

        db.upsert_batch(&[
            record("s_0", "GET", Some(200)),
            record("s_1", "GET", Some(404)),
            record("s_2", "POST", None),
        ])
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.methods.get("GET"), Some(&2));
        assert_eq!(stats.methods.get("POST"), Some(&1));
        assert_eq!(stats.status_codes.get("200"), Some(&1));
        assert_eq!(stats.status_codes.get("404"), Some(&1));
        // Response-less records contribute no status bucket.
        assert_eq!(stats.status_codes.len(), 2);
    }

    #[test]
    fn list_enabled_rules_skips_disabled_and_malformed_rows() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);

        insert_rule(
            &db,
            "good",
            true,
            r#"[{"type": "method", "operator": "equals", "value": "POST"}]"#,
        );
        insert_rule(&db, "disabled", false, "[]");
        insert_rule(&db, "broken", true, "not json at all");

        let rules = db.list_enabled_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "good");
        assert_eq!(rules[0].cooldown_minutes, 5);
        assert_eq!(rules[0].severity, Severity::Warning);
        assert!(rules[0].last_triggered.is_none());
    }

    #[test]
    fn mark_triggered_round_trips_through_listing() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);
        insert_rule(&db, "r1", true, "[]");

        let at = Utc::now();
        db.mark_triggered("r1", at).unwrap();

        let rules = db.list_enabled_rules().unwrap();
        let last_triggered = rules[0].last_triggered.expect("trigger time stored");
        assert!((last_triggered - at).num_seconds().abs() <= 1);
    }

    #[test]
    fn notifications_persist_with_their_status() {
        let temp = TempDir::new().unwrap();
        let db = test_db(&temp);

        let notification = Notification {
            id: "n1".to_string(),
            rule_id: "r1".to_string(),
            rule_name: "Server Errors".to_string(),
            severity: Severity::Error,
            message: "Alert: Server Errors\nGET / returned 500".to_string(),
            record_id: "s_0".to_string(),
            method: "GET".to_string(),
            uri: "/".to_string(),
            status_code: Some(500),
            source_ip: "10.0.0.1".to_string(),
            dest_ip: "10.0.0.2".to_string(),
            timestamp: Utc::now(),
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        };
        db.insert_notification(&notification).unwrap();

        let (severity, status): (String, String) = db
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT severity, status FROM notifications WHERE id = 'n1'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|err| storage_err("read notification", err))
            })
            .unwrap();
        assert_eq!(severity, "error");
        assert_eq!(status, "unread");
    }
}
