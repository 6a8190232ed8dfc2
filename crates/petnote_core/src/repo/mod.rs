//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the whole-document snapshot contract consumed by services.
//! - Isolate SQLite and JSON envelope details from business orchestration.
//!
//! # Invariants
//! - There is no partial or delta persistence; every save is a full snapshot.
//! - Persisted documents carry an explicit format version.

pub mod snapshot_repo;
