//! Shared data types: the raw artifact written by the capture agent, the
//! normalized records we persist, and the alerting model.
//!
//! The raw side mirrors the agent's JSON output (camelCase, best-effort
//! contract: absent responses and unknown fields are tolerated, never errors).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─────────────────────────────────────────────────────────────────────────────
// Raw artifact (produced by the external capture agent)
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time snapshot the agent rewrites periodically. Not an event
/// stream: every observed modification replaces the whole document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCaptureDocument {
    pub session_count: u64,
    pub sessions: Vec<RawSession>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSession {
    pub session_id: String,
    pub client_ip: String,
    pub client_port: u16,
    pub server_ip: String,
    pub server_port: u16,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub transaction_count: u64,
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTransaction {
    pub request: Option<RawHttpMessage>,
    pub response: Option<RawHttpMessage>,
    pub request_time: Option<f64>,
    pub response_time: Option<f64>,
    pub duration: Option<f64>,
}

/// One side of an HTTP exchange as the agent emits it. Request and response
/// share this shape; which fields are present depends on the direction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawHttpMessage {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub version: Option<String>,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalized records (the unit of dedup and persistence)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<HttpHeader>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<HttpHeader>,
    pub body: Option<String>,
}

/// One flattened request/response pair. Never mutated after creation; the
/// `record_id` is derived deterministically from `(sessionId, index)` so
/// re-reads of the artifact dedupe against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub source_port: u16,
    pub dest_ip: String,
    pub dest_port: u16,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

impl NormalizedRecord {
    /// Synthetic identifier for the transaction at `index` within a session.
    pub fn derive_id(session_id: &str, index: usize) -> String {
        format!("{}_{}", session_id, index)
    }
}

/// Converts an agent epoch timestamp (fractional seconds) to UTC.
/// Out-of-range values fall back to the epoch rather than failing ingestion.
pub fn epoch_secs_to_utc(secs: f64) -> DateTime<Utc> {
    let millis = (secs * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Alert rules and notifications
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    StatusCode,
    StatusRange,
    ResponseTime,
    Method,
    UrlPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Regex,
}

/// One condition within a rule. `value` stays loosely typed (string or
/// number) because rules are authored externally and compared with coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    pub conditions: Vec<AlertCondition>,
    pub cooldown_minutes: i64,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
    Dismissed,
}

/// Produced when a rule matches a record. Subsequent state transitions
/// (read/dismissed) happen outside this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub record_id: String,
    pub method: String,
    pub uri: String,
    pub status_code: Option<u16>,
    pub source_ip: String,
    pub dest_ip: String,
    pub timestamp: DateTime<Utc>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_document_tolerates_missing_and_unknown_fields() {
        let json = r#"{
            "sessionCount": 1,
            "futureField": true,
            "sessions": [{
                "sessionId": "10.0.0.1:5000->10.0.0.2:80",
                "clientIp": "10.0.0.1",
                "clientPort": 5000,
                "serverIp": "10.0.0.2",
                "serverPort": 80,
                "transactions": [{
                    "request": {"method": "GET", "uri": "/", "headers": {"Host": "x"}}
                }]
            }]
        }"#;

        let doc: RawCaptureDocument = serde_json::from_str(json).expect("decode");
        assert_eq!(doc.session_count, 1);
        assert_eq!(doc.sessions.len(), 1);
        let session = &doc.sessions[0];
        assert_eq!(session.transaction_count, 0);
        assert!(session.transactions[0].response.is_none());
        let request = session.transactions[0].request.as_ref().expect("request");
        assert_eq!(request.method.as_deref(), Some("GET"));
    }

    #[test]
    fn derive_id_is_deterministic() {
        assert_eq!(
            NormalizedRecord::derive_id("10.0.0.1:5000->10.0.0.2:80", 2),
            "10.0.0.1:5000->10.0.0.2:80_2"
        );
    }

    #[test]
    fn epoch_secs_keeps_millisecond_precision() {
        let ts = epoch_secs_to_utc(1_700_000_000.250);
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn condition_round_trips_through_json() {
        let json = r#"{"type": "status_range", "operator": "equals", "value": "5xx"}"#;
        let condition: AlertCondition = serde_json::from_str(json).expect("decode");
        assert_eq!(condition.condition_type, ConditionType::StatusRange);
        assert_eq!(condition.operator, ConditionOperator::Equals);
        assert_eq!(condition.value, serde_json::json!("5xx"));
    }
}
