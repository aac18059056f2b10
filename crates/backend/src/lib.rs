//! Backend collaborator traits and wire types for the Questline engine.
//!
//! The engine talks to three remote systems — the progress backend, the
//! reward backend, and the external completion sink — plus a durable
//! submission ledger guarding the sink's at-most-once semantics. Each is
//! an opaque trait here; `http` provides the JSON-over-HTTP production
//! implementation and `memory` an in-process ledger.

mod error;
pub mod http;
mod memory;
mod record;
mod traits;

pub use error::BackendError;
pub use http::{HttpBackend, HttpBackendConfig};
pub use memory::MemorySubmissionLedger;
pub use record::{
    CompletionRecord, CompletionStatus, RewardAvailability, RewardDescriptor, RewardKind,
};
pub use traits::{CompletionSink, ProgressBackend, RewardBackend, SubmissionLedger};
