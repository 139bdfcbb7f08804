//! # rewind-core
//!
//! Core library for Rewind: capture-agent lifecycle control and realtime
//! ingestion of the traffic artifact the agent writes.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Long-running loops are plain threads
//!   the embedding binary owns; everything else is call-and-return.
//! - **Storage-agnostic**: Persistence and rule access go through the traits
//!   in [`storage`]; the daemon injects SQLite, tests inject fakes.
//! - **Lossy fan-out**: Cross-component signals ride [`broadcast::Broadcaster`].
//!   Listeners attached late miss earlier events by design; durable state
//!   lives in the record store, not in the event stream.
//! - **Graceful degradation**: A missing artifact, a malformed rewrite, or a
//!   transient store failure leaves the engines idle-and-retrying, never dead.

// Public modules
pub mod alerts;
pub mod broadcast;
pub mod error;
pub mod storage;
pub mod supervisor;
pub mod sync;
pub mod types;

// Re-export commonly used items at crate root
pub use alerts::AlertEngine;
pub use broadcast::{Broadcaster, Subscription};
pub use error::{Result, RewindError};
pub use storage::{ArtifactSource, FsArtifactSource, RecordStore, RuleStore};
pub use supervisor::{
    CaptureState, CaptureStatus, CaptureSupervisor, ProcessHandle, ProcessLauncher,
    SupervisorConfig, SystemProcessLauncher,
};
pub use sync::{DataChanged, SyncEngine, TickOutcome};
pub use types::{
    AlertCondition, AlertRule, ConditionOperator, ConditionType, HttpHeader, HttpRequest,
    HttpResponse, NormalizedRecord, Notification, NotificationStatus, RawCaptureDocument,
    Severity,
};
