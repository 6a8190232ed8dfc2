//! Pet and note domain model.
//!
//! # Responsibility
//! - Define the records that make up a snapshot.
//! - Derive note labels (timestamp tag or alarm delay description).
//! - Validate single records and whole snapshots.
//!
//! # Invariants
//! - Pet names are trimmed with internal whitespace collapsed.
//! - Note ids are unique inside their owning pet.
//! - New notes are inserted at the head of the note list.

use crate::model::alarm::{AlarmDelay, AlarmRecord, AlarmStatus};
use chrono::{Local, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const TIMESTAMP_LABEL_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Stable identifier of a pet.
pub type PetId = Uuid;
/// Stable identifier of a note, unique within its pet.
pub type NoteId = Uuid;

/// Validation failures for pets, notes and snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PetValidationError {
    BlankName,
    BlankText,
    NonPositiveDelay,
    NilId,
    DuplicatePetId(PetId),
    DuplicateNoteId { pet_id: PetId, note_id: NoteId },
    /// `is_alarm` disagrees with the presence of alarm metadata.
    AlarmMismatch(NoteId),
}

impl Display for PetValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "pet name must not be blank"),
            Self::BlankText => write!(f, "note text must not be blank"),
            Self::NonPositiveDelay => write!(f, "alarm delay must be a positive amount"),
            Self::NilId => write!(f, "id must not be nil"),
            Self::DuplicatePetId(id) => write!(f, "duplicate pet id: {id}"),
            Self::DuplicateNoteId { pet_id, note_id } => {
                write!(f, "duplicate note id {note_id} in pet {pet_id}")
            }
            Self::AlarmMismatch(id) => {
                write!(f, "note {id} has inconsistent alarm flag and metadata")
            }
        }
    }
}

impl Error for PetValidationError {}

/// Tracked pet owning an ordered list of notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    pub id: PetId,
    pub name: String,
    /// Opaque reference to a photo resource owned by the host.
    pub photo_ref: Option<String>,
    /// Newest first.
    pub notes: Vec<Note>,
}

impl Pet {
    /// Creates a pet with a generated id.
    pub fn new(
        name: impl AsRef<str>,
        photo_ref: Option<String>,
    ) -> Result<Self, PetValidationError> {
        Self::with_id(Uuid::new_v4(), name, photo_ref)
    }

    /// Creates a pet with a caller-provided id.
    pub fn with_id(
        id: PetId,
        name: impl AsRef<str>,
        photo_ref: Option<String>,
    ) -> Result<Self, PetValidationError> {
        if id.is_nil() {
            return Err(PetValidationError::NilId);
        }
        let name = normalize_name(name.as_ref()).ok_or(PetValidationError::BlankName)?;
        Ok(Self {
            id,
            name,
            photo_ref: photo_ref.filter(|value| !value.trim().is_empty()),
            notes: Vec::new(),
        })
    }

    pub fn note(&self, note_id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == note_id)
    }

    pub(crate) fn note_mut(&mut self, note_id: NoteId) -> Option<&mut Note> {
        self.notes.iter_mut().find(|note| note.id == note_id)
    }

    /// Inserts a note at the head of the list.
    pub fn push_note(&mut self, note: Note) -> Result<(), PetValidationError> {
        if self.note(note.id).is_some() {
            return Err(PetValidationError::DuplicateNoteId {
                pet_id: self.id,
                note_id: note.id,
            });
        }
        self.notes.insert(0, note);
        Ok(())
    }

    /// Removes a note, returning it when present.
    pub fn remove_note(&mut self, note_id: NoteId) -> Option<Note> {
        let index = self.notes.iter().position(|note| note.id == note_id)?;
        Some(self.notes.remove(index))
    }

    pub fn validate(&self) -> Result<(), PetValidationError> {
        if self.id.is_nil() {
            return Err(PetValidationError::NilId);
        }
        if self.name.trim().is_empty() {
            return Err(PetValidationError::BlankName);
        }

        let mut seen = HashSet::with_capacity(self.notes.len());
        for note in &self.notes {
            note.validate()?;
            if !seen.insert(note.id) {
                return Err(PetValidationError::DuplicateNoteId {
                    pet_id: self.id,
                    note_id: note.id,
                });
            }
        }
        Ok(())
    }
}

/// Logged message attached to a pet, optionally carrying an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub text: String,
    /// Timestamp tag for plain notes, delay description for alarms.
    pub label: String,
    pub is_alarm: bool,
    /// Unix epoch milliseconds.
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<AlarmRecord>,
}

impl Note {
    /// Creates a plain log entry labelled with its creation time.
    pub fn plain(text: impl Into<String>, created_at_ms: i64) -> Result<Self, PetValidationError> {
        let text = non_blank_text(text.into())?;
        Ok(Self {
            id: Uuid::new_v4(),
            text,
            label: timestamp_label(created_at_ms),
            is_alarm: false,
            created_at_ms,
            alarm: None,
        })
    }

    /// Creates an alarm note whose deadline counts from `created_at_ms`.
    ///
    /// The alarm starts as `NotScheduled` until the executor accepts it.
    pub fn alarm(
        text: impl Into<String>,
        delay: AlarmDelay,
        created_at_ms: i64,
    ) -> Result<Self, PetValidationError> {
        let text = non_blank_text(text.into())?;
        delay.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            text,
            label: delay.label(),
            is_alarm: true,
            created_at_ms,
            alarm: Some(AlarmRecord {
                delay,
                fire_at_ms: delay.deadline_from(created_at_ms),
                status: AlarmStatus::NotScheduled,
            }),
        })
    }

    /// Records the executor-confirmed deadline.
    pub(crate) fn mark_scheduled(&mut self, fire_at_ms: i64) {
        if let Some(alarm) = self.alarm.as_mut() {
            alarm.fire_at_ms = fire_at_ms;
            alarm.status = AlarmStatus::Scheduled;
        }
    }

    pub fn validate(&self) -> Result<(), PetValidationError> {
        if self.id.is_nil() {
            return Err(PetValidationError::NilId);
        }
        if self.text.trim().is_empty() {
            return Err(PetValidationError::BlankText);
        }
        match (&self.alarm, self.is_alarm) {
            (Some(alarm), true) => alarm.delay.validate(),
            (None, false) => Ok(()),
            _ => Err(PetValidationError::AlarmMismatch(self.id)),
        }
    }
}

/// Validates a whole snapshot: every record plus pet id uniqueness.
pub fn validate_snapshot(pets: &[Pet]) -> Result<(), PetValidationError> {
    let mut seen = HashSet::with_capacity(pets.len());
    for pet in pets {
        pet.validate()?;
        if !seen.insert(pet.id) {
            return Err(PetValidationError::DuplicatePetId(pet.id));
        }
    }
    Ok(())
}

/// Trims a display name and collapses whitespace runs.
///
/// Returns `None` for blank input.
pub fn normalize_name(name: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(name.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

fn non_blank_text(text: String) -> Result<String, PetValidationError> {
    if text.trim().is_empty() {
        Err(PetValidationError::BlankText)
    } else {
        Ok(text)
    }
}

fn timestamp_label(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(moment) => moment.format(TIMESTAMP_LABEL_FORMAT).to_string(),
        None => epoch_ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_name, timestamp_label};

    #[test]
    fn normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  Rex \t the\n dog ").as_deref(), Some("Rex the dog"));
        assert_eq!(normalize_name(" \n\t "), None);
    }

    #[test]
    fn timestamp_label_has_day_month_year_shape() {
        let label = timestamp_label(1_700_000_000_000);
        let parts: Vec<&str> = label.split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].split('/').count(), 3);
        assert_eq!(parts[1].split(':').count(), 2);
    }
}
