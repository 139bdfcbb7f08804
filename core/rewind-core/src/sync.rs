//! Incremental ingestion of the capture artifact.
//!
//! The agent rewrites its whole output file periodically, so every poll tick
//! re-reads a point-in-time snapshot. Idempotence comes from the synced-id
//! set: identifiers derived from `(sessionId, transactionIndex)` are
//! remembered for the life of the engine and skipped on re-reads. The
//! last-modified watermark is advanced only after a tick fully succeeds, so
//! a failure partway through retries the same artifact version.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::broadcast::{Broadcaster, Subscription};
use crate::storage::{ArtifactSource, RecordStore};
use crate::types::{
    epoch_secs_to_utc, HttpHeader, HttpRequest, HttpResponse, NormalizedRecord, RawCaptureDocument,
    RawHttpMessage, RawSession,
};

/// Payload of the generic "data changed" signal. One event per tick that
/// staged at least one record, regardless of how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChanged {
    pub timestamp: DateTime<Utc>,
}

/// What a single tick did; mostly useful for tests and status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still in flight; this one was skipped.
    InFlight,
    /// The artifact does not exist yet.
    NoArtifact,
    /// The artifact has not changed since the last observed modification.
    Unchanged,
    /// Decode or persistence failed; the watermark was not advanced.
    Failed,
    /// Tick completed; the artifact held no new records.
    Idle,
    /// Tick completed and persisted this many new records.
    Synced(usize),
}

struct SyncState {
    synced_ids: HashSet<String>,
    last_modified: Option<DateTime<Utc>>,
}

/// Polls the capture artifact, flattens new transactions into normalized
/// records, persists them, and fans out change signals.
pub struct SyncEngine {
    artifact_path: PathBuf,
    poll_interval: Duration,
    source: Arc<dyn ArtifactSource>,
    store: Arc<dyn RecordStore>,
    state: Mutex<SyncState>,
    tick_in_flight: AtomicBool,
    data_changed: Broadcaster<DataChanged>,
    records: Broadcaster<NormalizedRecord>,
}

impl SyncEngine {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        poll_interval: Duration,
        source: Arc<dyn ArtifactSource>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            poll_interval,
            source,
            store,
            state: Mutex::new(SyncState {
                synced_ids: HashSet::new(),
                last_modified: None,
            }),
            tick_in_flight: AtomicBool::new(false),
            data_changed: Broadcaster::new(),
            records: Broadcaster::new(),
        }
    }

    /// One poll cycle. At most one tick runs at a time; overlapping calls
    /// return [`TickOutcome::InFlight`] immediately.
    pub fn tick(&self) -> TickOutcome {
        if self.tick_in_flight.swap(true, Ordering::SeqCst) {
            return TickOutcome::InFlight;
        }
        let outcome = self.tick_inner();
        self.tick_in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    fn tick_inner(&self) -> TickOutcome {
        let Some(modified) = self.source.modified_time(&self.artifact_path) else {
            // Not created yet; expected while the agent warms up.
            return TickOutcome::NoArtifact;
        };

        {
            let state = self.lock_state();
            if state.last_modified.map(|seen| modified <= seen).unwrap_or(false) {
                return TickOutcome::Unchanged;
            }
        }

        let bytes = match self.source.read_full(&self.artifact_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read capture artifact");
                return TickOutcome::Failed;
            }
        };
        let document: RawCaptureDocument = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    path = %self.artifact_path.display(),
                    "Capture artifact malformed; will retry next tick"
                );
                return TickOutcome::Failed;
            }
        };

        let staged_count;
        let events: Vec<NormalizedRecord>;
        {
            let mut state = self.lock_state();
            let (staged, session_ids) = flatten_new_records(&document, &state.synced_ids);
            staged_count = staged.len();

            if !staged.is_empty() {
                if let Err(err) = self.store.upsert_batch(&staged) {
                    tracing::warn!(error = %err, "Failed to persist synced records");
                    return TickOutcome::Failed;
                }
                tracing::info!(count = staged.len(), "Synced new capture records");

                for record in &staged {
                    state.synced_ids.insert(record.record_id.clone());
                }
                state.synced_ids.extend(session_ids);
            }
            // Advance the watermark last, after persistence succeeded.
            state.last_modified = Some(modified);
            events = staged;
        }

        for record in &events {
            self.records.publish(record);
        }
        if staged_count > 0 {
            self.data_changed.publish(&DataChanged {
                timestamp: Utc::now(),
            });
            TickOutcome::Synced(staged_count)
        } else {
            TickOutcome::Idle
        }
    }

    /// Forgets every synced identifier and the watermark. Used after an
    /// external bulk delete of stored records so the next tick re-ingests
    /// the whole artifact.
    pub fn reset_synced_tracking(&self) {
        let mut state = self.lock_state();
        state.synced_ids.clear();
        state.last_modified = None;
        tracing::info!("Synced-id tracking reset");
    }

    /// Listener for the coarse data-changed signal.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<DataChanged>
    where
        F: Fn(&DataChanged) + Send + Sync + 'static,
    {
        self.data_changed.subscribe(listener)
    }

    /// Listener receiving every newly persisted record (the alert engine
    /// attaches here).
    pub fn subscribe_records<F>(&self, listener: F) -> Subscription<NormalizedRecord>
    where
        F: Fn(&NormalizedRecord) + Send + Sync + 'static,
    {
        self.records.subscribe(listener)
    }

    /// Blocking poll loop; ticks until `stop` is set. Meant to run on its
    /// own thread.
    pub fn run_poll_loop(&self, stop: &AtomicBool) {
        tracing::info!(
            path = %self.artifact_path.display(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting artifact poll loop"
        );
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            thread::sleep(self.poll_interval);
        }
        tracing::info!("Artifact poll loop stopped");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state.lock().expect("sync state lock poisoned")
    }
}

/// Flattens every not-yet-synced transaction with a request into a
/// normalized record, returning the records plus the parent session ids
/// that contributed them. Sessions already marked synced are skipped whole;
/// transactions lacking a request are incomplete captures and skipped.
fn flatten_new_records(
    document: &RawCaptureDocument,
    synced_ids: &HashSet<String>,
) -> (Vec<NormalizedRecord>, Vec<String>) {
    let mut staged = Vec::new();
    let mut session_ids = Vec::new();
    for session in &document.sessions {
        if session.session_id.is_empty() || synced_ids.contains(&session.session_id) {
            continue;
        }
        let before = staged.len();
        for (index, transaction) in session.transactions.iter().enumerate() {
            let Some(request) = transaction.request.as_ref() else {
                continue;
            };
            let record_id = NormalizedRecord::derive_id(&session.session_id, index);
            if synced_ids.contains(&record_id) {
                continue;
            }
            staged.push(normalize(
                session,
                record_id,
                request,
                transaction.request_time,
                transaction.response.as_ref(),
            ));
        }
        if staged.len() > before {
            session_ids.push(session.session_id.clone());
        }
    }
    (staged, session_ids)
}

fn normalize(
    session: &RawSession,
    record_id: String,
    request: &RawHttpMessage,
    request_time: Option<f64>,
    response: Option<&RawHttpMessage>,
) -> NormalizedRecord {
    let timestamp = request_time
        .or(Some(session.start_time).filter(|secs| *secs > 0.0))
        .map(epoch_secs_to_utc)
        .unwrap_or_else(Utc::now);

    NormalizedRecord {
        record_id,
        timestamp,
        source_ip: session.client_ip.clone(),
        source_port: session.client_port,
        dest_ip: session.server_ip.clone(),
        dest_port: session.server_port,
        request: HttpRequest {
            method: request.method.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            uri: request.uri.clone().unwrap_or_else(|| "/".to_string()),
            version: request.version.clone().unwrap_or_default(),
            headers: flatten_headers(request),
            body: request.body.clone(),
        },
        response: response.map(|message| HttpResponse {
            version: message.version.clone().unwrap_or_default(),
            status_code: message.status_code.unwrap_or(0),
            status_message: message.status_message.clone().unwrap_or_default(),
            headers: flatten_headers(message),
            body: message.body.clone(),
        }),
    }
}

/// The agent emits headers as a JSON object; flatten into an ordered
/// name/value list (BTreeMap iteration keeps the order deterministic).
fn flatten_headers(message: &RawHttpMessage) -> Vec<HttpHeader> {
    message
        .headers
        .iter()
        .map(|(name, value)| HttpHeader {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}
