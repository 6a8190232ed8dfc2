//! Pet use-case service: the in-memory source of truth.
//!
//! # Responsibility
//! - Own the pet collection and apply the four mutating use-cases.
//! - Persist a full snapshot as the final step of every applied mutation.
//! - Hand alarm notes to the scheduler and record whether it accepted them.
//! - Publish a read-only projection to subscribers after each mutation.
//!
//! # Invariants
//! - Validation failures change nothing and never reach the store.
//! - Unknown pet or note ids are no-ops without a save.
//! - A failed save keeps the in-memory mutation; `flush` retries it.
//! - Removing pets or notes never cancels already-enqueued alarms.
//! - A note's alarm is handed to the executor at most once per service.

use crate::model::alarm::{AlarmDelay, AlarmPayload, AlarmStatus};
use crate::model::now_epoch_ms;
use crate::model::pet::{Note, NoteId, Pet, PetId, PetValidationError};
use crate::repo::snapshot_repo::{SnapshotStore, StoreError};
use crate::scheduler::{AlarmScheduler, DeferredExecutor, SchedulingError, TaskHandle};
use log::{error, info};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Service error for pet use-cases.
#[derive(Debug)]
pub enum PetServiceError {
    /// Input rejected before any state change.
    Validation(PetValidationError),
    /// The mutation was applied in memory but the snapshot was not saved.
    Persistence(StoreError),
}

impl Display for PetServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "snapshot not saved, retry with flush: {err}"),
        }
    }
}

impl Error for PetServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Persistence(err) => Some(err),
        }
    }
}

impl From<PetValidationError> for PetServiceError {
    fn from(value: PetValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for PetServiceError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}

/// What kind of note to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Plain,
    Alarm(AlarmDelay),
}

/// Scheduling result attached to a freshly added note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmOutcome {
    NotAlarm,
    Scheduled(TaskHandle),
    /// The note was kept and marked `not_scheduled`.
    NotScheduled(SchedulingError),
}

/// Result of a successful `add_note`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedNote {
    pub pet_id: PetId,
    pub note: Note,
    pub alarm: AlarmOutcome,
}

/// Counts produced by `rehydrate_alarms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrateReport {
    pub requeued: usize,
    /// Alarms this service had already handed to the executor.
    pub already_armed: usize,
    pub skipped_past_due: usize,
    pub failed: usize,
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&[Pet])>;

/// Pet service facade over a snapshot store and an alarm executor.
pub struct PetService<S: SnapshotStore, E: DeferredExecutor> {
    store: S,
    scheduler: AlarmScheduler<E>,
    pets: Vec<Pet>,
    /// Notes whose alarm was accepted by the executor in this process.
    armed: HashSet<NoteId>,
    unsaved: bool,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<S: SnapshotStore, E: DeferredExecutor> PetService<S, E> {
    /// Loads the persisted snapshot and builds the service around it.
    ///
    /// # Errors
    /// - Returns `Persistence` only for store transport failures; absent or
    ///   unreadable snapshots start empty.
    pub fn open(store: S, scheduler: AlarmScheduler<E>) -> Result<Self, PetServiceError> {
        let pets = store.load()?;
        info!(
            "event=service_open module=service status=ok pets={}",
            pets.len()
        );
        Ok(Self {
            store,
            scheduler,
            pets,
            armed: HashSet::new(),
            unsaved: false,
            listeners: Vec::new(),
            next_subscription: 0,
        })
    }

    /// Read-only projection, in insertion order.
    pub fn pets(&self) -> &[Pet] {
        &self.pets
    }

    pub fn pet(&self, pet_id: PetId) -> Option<&Pet> {
        self.pets.iter().find(|pet| pet.id == pet_id)
    }

    pub fn scheduler(&self) -> &AlarmScheduler<E> {
        &self.scheduler
    }

    /// Whether the latest mutation is still waiting for a successful save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    /// Creates a pet from a non-blank name.
    pub fn add_pet(
        &mut self,
        name: impl AsRef<str>,
        photo_ref: Option<String>,
    ) -> Result<Pet, PetServiceError> {
        let pet = Pet::new(name, photo_ref)?;
        self.pets.push(pet.clone());
        info!(
            "event=pet_add module=service status=ok pet_id={} has_photo={}",
            pet.id,
            pet.photo_ref.is_some()
        );
        self.commit()?;
        Ok(pet)
    }

    /// Removes a pet with all its notes. Unknown ids are a no-op.
    pub fn remove_pet(&mut self, pet_id: PetId) -> Result<(), PetServiceError> {
        let Some(index) = self.pets.iter().position(|pet| pet.id == pet_id) else {
            info!("event=pet_remove module=service status=noop pet_id={pet_id}");
            return Ok(());
        };
        let removed = self.pets.remove(index);
        info!(
            "event=pet_remove module=service status=ok pet_id={} notes={}",
            pet_id,
            removed.notes.len()
        );
        self.commit()
    }

    /// Adds a note at the head of a pet's note list.
    ///
    /// Returns `Ok(None)` without saving when `pet_id` is unknown. For alarm
    /// notes the scheduler is called before the save; a refused alarm keeps
    /// the note and reports `AlarmOutcome::NotScheduled`.
    pub fn add_note(
        &mut self,
        pet_id: PetId,
        text: impl Into<String>,
        kind: NoteKind,
    ) -> Result<Option<AddedNote>, PetServiceError> {
        let created_at_ms = now_epoch_ms();
        let note = match kind {
            NoteKind::Plain => Note::plain(text, created_at_ms)?,
            NoteKind::Alarm(delay) => Note::alarm(text, delay, created_at_ms)?,
        };
        let mut added = note.clone();

        let Some(pet) = self.pets.iter_mut().find(|pet| pet.id == pet_id) else {
            info!("event=note_add module=service status=noop pet_id={pet_id}");
            return Ok(None);
        };
        pet.push_note(note)?;

        let alarm = match kind {
            NoteKind::Plain => AlarmOutcome::NotAlarm,
            NoteKind::Alarm(delay) => {
                let payload = AlarmPayload {
                    pet_name: pet.name.clone(),
                    note_text: added.text.clone(),
                };
                match self.scheduler.enqueue(delay, payload) {
                    Ok(handle) => {
                        self.armed.insert(added.id);
                        added.mark_scheduled(handle.fire_at_ms);
                        if let Some(stored) = pet.note_mut(added.id) {
                            stored.mark_scheduled(handle.fire_at_ms);
                        }
                        AlarmOutcome::Scheduled(handle)
                    }
                    Err(err) => AlarmOutcome::NotScheduled(err),
                }
            }
        };

        info!(
            "event=note_add module=service status=ok pet_id={} note_id={} is_alarm={} scheduled={}",
            pet_id,
            added.id,
            added.is_alarm,
            matches!(alarm, AlarmOutcome::Scheduled(_))
        );
        self.commit()?;

        Ok(Some(AddedNote {
            pet_id,
            note: added,
            alarm,
        }))
    }

    /// Removes one note. Unknown pet or note ids are a no-op.
    ///
    /// An alarm already handed to the executor still fires.
    pub fn remove_note(&mut self, pet_id: PetId, note_id: NoteId) -> Result<(), PetServiceError> {
        let removed = self
            .pets
            .iter_mut()
            .find(|pet| pet.id == pet_id)
            .and_then(|pet| pet.remove_note(note_id));

        let Some(removed) = removed else {
            info!(
                "event=note_remove module=service status=noop pet_id={pet_id} note_id={note_id}"
            );
            return Ok(());
        };
        info!(
            "event=note_remove module=service status=ok pet_id={} note_id={} was_alarm={}",
            pet_id, note_id, removed.is_alarm
        );
        self.commit()
    }

    /// Retries saving the current snapshot.
    pub fn flush(&mut self) -> Result<(), PetServiceError> {
        self.save_snapshot()
    }

    /// Re-arms persisted alarms whose deadline lies after `now_ms`.
    ///
    /// Alarms that were never scheduled stay untouched. Alarms already armed
    /// by this service are not queued twice. Past-due alarms are skipped
    /// rather than fired late, since they may already have fired in an
    /// earlier process.
    pub fn rehydrate_alarms(&mut self, now_ms: i64) -> RehydrateReport {
        let mut report = RehydrateReport::default();

        for pet in &self.pets {
            for note in &pet.notes {
                let Some(alarm) = note.alarm.as_ref() else {
                    continue;
                };
                if alarm.status != AlarmStatus::Scheduled {
                    continue;
                }
                if self.armed.contains(&note.id) {
                    report.already_armed += 1;
                    continue;
                }
                if alarm.fire_at_ms <= now_ms {
                    report.skipped_past_due += 1;
                    continue;
                }

                let remaining_ms = u64::try_from(alarm.fire_at_ms - now_ms).unwrap_or(0);
                let payload = AlarmPayload {
                    pet_name: pet.name.clone(),
                    note_text: note.text.clone(),
                };
                match self
                    .scheduler
                    .enqueue_after(Duration::from_millis(remaining_ms), payload)
                {
                    Ok(_) => {
                        self.armed.insert(note.id);
                        report.requeued += 1;
                    }
                    Err(_) => report.failed += 1,
                }
            }
        }

        info!(
            "event=alarm_rehydrate module=service status=ok requeued={} already_armed={} skipped_past_due={} failed={}",
            report.requeued, report.already_armed, report.skipped_past_due, report.failed
        );
        report
    }

    /// Registers a listener receiving the projection after each mutation.
    pub fn subscribe(&mut self, listener: impl Fn(&[Pet]) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns whether a listener was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(current, _)| *current != id);
        self.listeners.len() != before
    }

    fn commit(&mut self) -> Result<(), PetServiceError> {
        self.publish();
        self.save_snapshot()
    }

    fn save_snapshot(&mut self) -> Result<(), PetServiceError> {
        match self.store.save(&self.pets) {
            Ok(()) => {
                self.unsaved = false;
                Ok(())
            }
            Err(err) => {
                self.unsaved = true;
                error!(
                    "event=snapshot_commit module=service status=error pets={} error={}",
                    self.pets.len(),
                    err
                );
                Err(err.into())
            }
        }
    }

    fn publish(&self) {
        for (_, listener) in &self.listeners {
            listener(&self.pets);
        }
    }
}
