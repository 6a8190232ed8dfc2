//! Core domain logic for PetNote.
//! This crate is the single source of truth for pet, note and alarm invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use model::alarm::{AlarmDelay, AlarmPayload, AlarmRecord, AlarmStatus, DelayUnit};
pub use model::now_epoch_ms;
pub use model::pet::{Note, NoteId, Pet, PetId, PetValidationError};
pub use notify::{LogNotifier, Notifier};
pub use repo::snapshot_repo::{
    SnapshotDecodeError, SnapshotStore, SqliteSnapshotStore, StoreError, StoreResult,
};
pub use scheduler::{
    AlarmScheduler, DeferredExecutor, SchedulingError, TaskHandle, TaskId, TimerExecutor,
    TimerExecutorConfig,
};
pub use service::pet_service::{
    AddedNote, AlarmOutcome, NoteKind, PetService, PetServiceError, RehydrateReport,
    SubscriptionId,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
