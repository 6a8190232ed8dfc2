//! Snapshot store contracts and SQLite key-value implementation.
//!
//! # Responsibility
//! - Persist the complete pet collection as one versioned JSON document.
//! - Decode stored documents, migrating the legacy unversioned layout.
//!
//! # Invariants
//! - `save` replaces the slot value in a single statement; readers see the
//!   previous or the new document, never a mix.
//! - `load` never fails on absent, malformed, unknown-version or invalid
//!   documents; it falls back to an empty collection and logs a warning.
//! - Only database transport failures surface from `load`.
//! - `save` refuses collections that `load` would reject.

use crate::db::DbError;
use crate::model::now_epoch_ms;
use crate::model::pet::{validate_snapshot, Pet, PetValidationError};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Format version written into every snapshot envelope.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
/// Slot key used when the host does not configure one.
pub const DEFAULT_SNAPSHOT_KEY: &str = "pets.snapshot";

const SLOT_TABLE: &str = "kv_slots";

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure while writing or reading the snapshot slot.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialize(serde_json::Error),
    /// The collection would not survive a reload; nothing was written.
    Invalid(PetValidationError),
    MissingRequiredTable(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialize(err) => write!(f, "failed to serialize snapshot: {err}"),
            Self::Invalid(err) => write!(f, "refusing to save invalid snapshot: {err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "snapshot store requires table `{table}`")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Invalid(err) => Some(err),
            Self::MissingRequiredTable(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Reason a stored document was rejected during decode.
#[derive(Debug)]
pub enum SnapshotDecodeError {
    Malformed(serde_json::Error),
    MissingVersion,
    UnsupportedVersion(u64),
    Invalid(PetValidationError),
}

impl Display for SnapshotDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed snapshot document: {err}"),
            Self::MissingVersion => write!(f, "snapshot envelope has no format_version"),
            Self::UnsupportedVersion(version) => write!(
                f,
                "snapshot format_version {version} is not supported (latest {SNAPSHOT_FORMAT_VERSION})"
            ),
            Self::Invalid(err) => write!(f, "snapshot violates model invariants: {err}"),
        }
    }
}

impl Error for SnapshotDecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Malformed(err) => Some(err),
            Self::Invalid(err) => Some(err),
            Self::MissingVersion | Self::UnsupportedVersion(_) => None,
        }
    }
}

/// Whole-document persistence of the pet collection.
pub trait SnapshotStore {
    /// Overwrites the stored snapshot with `pets`.
    fn save(&self, pets: &[Pet]) -> StoreResult<()>;
    /// Reads the stored snapshot, or an empty collection when none is usable.
    fn load(&self) -> StoreResult<Vec<Pet>>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for &S {
    fn save(&self, pets: &[Pet]) -> StoreResult<()> {
        (**self).save(pets)
    }

    fn load(&self) -> StoreResult<Vec<Pet>> {
        (**self).load()
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format_version: u32,
    saved_at_ms: i64,
    pets: &'a [Pet],
}

#[derive(Deserialize)]
struct EnvelopeIn {
    pets: Vec<Pet>,
}

/// Serializes `pets` into a versioned envelope.
pub fn encode_snapshot(pets: &[Pet], saved_at_ms: i64) -> serde_json::Result<String> {
    serde_json::to_string(&EnvelopeOut {
        format_version: SNAPSHOT_FORMAT_VERSION,
        saved_at_ms,
        pets,
    })
}

/// Decodes a stored document.
///
/// A bare JSON array is the legacy unversioned layout and is migrated to the
/// current version in memory.
pub fn decode_snapshot(blob: &str) -> Result<Vec<Pet>, SnapshotDecodeError> {
    let document: Value = serde_json::from_str(blob).map_err(SnapshotDecodeError::Malformed)?;

    let pets = if document.is_array() {
        serde_json::from_value::<Vec<Pet>>(document).map_err(SnapshotDecodeError::Malformed)?
    } else {
        let version = document
            .get("format_version")
            .and_then(Value::as_u64)
            .ok_or(SnapshotDecodeError::MissingVersion)?;
        if version != u64::from(SNAPSHOT_FORMAT_VERSION) {
            return Err(SnapshotDecodeError::UnsupportedVersion(version));
        }
        serde_json::from_value::<EnvelopeIn>(document)
            .map_err(SnapshotDecodeError::Malformed)?
            .pets
    };

    validate_snapshot(&pets).map_err(SnapshotDecodeError::Invalid)?;
    Ok(pets)
}

/// SQLite-backed snapshot store writing one row of `kv_slots`.
pub struct SqliteSnapshotStore<'conn> {
    conn: &'conn Connection,
    key: String,
}

impl<'conn> SqliteSnapshotStore<'conn> {
    /// Constructs a store over the default slot of a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        Self::with_key(conn, DEFAULT_SNAPSHOT_KEY)
    }

    /// Constructs a store over a caller-chosen slot key.
    pub fn with_key(conn: &'conn Connection, key: impl Into<String>) -> StoreResult<Self> {
        ensure_slot_table(conn)?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SnapshotStore for SqliteSnapshotStore<'_> {
    fn save(&self, pets: &[Pet]) -> StoreResult<()> {
        let started_at = Instant::now();
        if let Err(err) = validate_snapshot(pets) {
            error!(
                "event=snapshot_save module=repo status=error pets={} error_code=invalid_snapshot error={}",
                pets.len(),
                err
            );
            return Err(StoreError::Invalid(err));
        }
        let saved_at_ms = now_epoch_ms();
        let blob = encode_snapshot(pets, saved_at_ms)?;

        let written = self.conn.execute(
            "INSERT INTO kv_slots (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![self.key.as_str(), blob.as_str(), saved_at_ms],
        );

        match written {
            Ok(_) => {
                info!(
                    "event=snapshot_save module=repo status=ok pets={} bytes={} duration_ms={}",
                    pets.len(),
                    blob.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=snapshot_save module=repo status=error pets={} error={}",
                    pets.len(),
                    err
                );
                Err(err.into())
            }
        }
    }

    fn load(&self) -> StoreResult<Vec<Pet>> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM kv_slots WHERE key = ?1;",
                [self.key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(blob) = blob else {
            info!("event=snapshot_load module=repo status=ok source=empty pets=0");
            return Ok(Vec::new());
        };

        match decode_snapshot(&blob) {
            Ok(pets) => {
                info!(
                    "event=snapshot_load module=repo status=ok source=slot pets={}",
                    pets.len()
                );
                Ok(pets)
            }
            Err(err) => {
                warn!(
                    "event=snapshot_load module=repo status=fallback source=slot bytes={} reason={}",
                    blob.len(),
                    err
                );
                Ok(Vec::new())
            }
        }
    }
}

fn ensure_slot_table(conn: &Connection) -> StoreResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [SLOT_TABLE],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(StoreError::MissingRequiredTable(SLOT_TABLE))
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_snapshot, encode_snapshot, SnapshotDecodeError};
    use crate::model::pet::{Note, Pet};

    #[test]
    fn encoded_envelope_carries_format_version() {
        let pet = Pet::new("Rex", None).expect("valid pet");
        let blob = encode_snapshot(&[pet], 42).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&blob).expect("json");
        assert_eq!(value["format_version"], 1);
        assert_eq!(value["saved_at_ms"], 42);
        assert_eq!(value["pets"][0]["name"], "Rex");
    }

    #[test]
    fn decode_rejects_future_version() {
        let err = decode_snapshot(r#"{"format_version": 7, "pets": []}"#)
            .expect_err("future version must be rejected");
        assert!(matches!(err, SnapshotDecodeError::UnsupportedVersion(7)));
    }

    #[test]
    fn decode_rejects_missing_version() {
        let err = decode_snapshot(r#"{"pets": []}"#).expect_err("missing version");
        assert!(matches!(err, SnapshotDecodeError::MissingVersion));
    }

    #[test]
    fn decode_migrates_bare_array_layout() {
        let mut pet = Pet::new("Mia", None).expect("valid pet");
        pet.push_note(Note::plain("walked", 1_000).expect("valid note"))
            .expect("push");
        let legacy = serde_json::to_string(&vec![pet.clone()]).expect("legacy json");

        let decoded = decode_snapshot(&legacy).expect("legacy layout should decode");
        assert_eq!(decoded, vec![pet]);
    }
}
