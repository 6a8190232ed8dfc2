//! Domain model for pets, their notes and alarm metadata.
//!
//! # Responsibility
//! - Define canonical data structures used by the pet service and the store.
//! - Own field-level validation so every write path shares the same rules.
//!
//! # Invariants
//! - Every pet and note is identified by a stable, non-nil UUID.
//! - Notes are ordered newest-first inside their owning pet.
//! - `Note::is_alarm` is true exactly when `Note::alarm` is present.

pub mod alarm;
pub mod pet;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
