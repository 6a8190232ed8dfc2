//! Alarm scheduling over a pluggable deferred-execution facility.
//!
//! # Responsibility
//! - Normalize alarm delays to minutes before handing them to an executor.
//! - Define the `DeferredExecutor` capability hosts implement with their
//!   native timer or task-queue primitive.
//!
//! # Invariants
//! - Each accepted task triggers at most one notifier call.
//! - `enqueue` never blocks on the deadline.
//! - Payloads crossing the executor boundary are plain owned data.

mod timer;

pub use timer::{TimerExecutor, TimerExecutorConfig};

use crate::model::alarm::{AlarmDelay, AlarmPayload};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one accepted task.
pub type TaskId = Uuid;

/// Receipt for an accepted task.
///
/// Cancellation is not offered; `id` is kept so it can be added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub delay: Duration,
    /// Wall-clock deadline, Unix epoch milliseconds.
    pub fire_at_ms: i64,
}

impl TaskHandle {
    pub fn delay_minutes(&self) -> u64 {
        self.delay.as_secs() / 60
    }
}

/// The executor refused a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    CapacityExhausted { limit: usize },
    ShutDown,
    DelayOutOfRange(Duration),
}

impl Display for SchedulingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExhausted { limit } => {
                write!(f, "alarm queue is full ({limit} pending)")
            }
            Self::ShutDown => write!(f, "alarm executor has shut down"),
            Self::DelayOutOfRange(delay) => {
                write!(f, "alarm delay of {}s cannot be scheduled", delay.as_secs())
            }
        }
    }
}

impl Error for SchedulingError {}

/// Host-provided facility running a payload after a delay.
pub trait DeferredExecutor {
    fn schedule(
        &self,
        after: Duration,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError>;
}

impl<E: DeferredExecutor + ?Sized> DeferredExecutor for Arc<E> {
    fn schedule(
        &self,
        after: Duration,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError> {
        (**self).schedule(after, payload)
    }
}

impl<E: DeferredExecutor + ?Sized> DeferredExecutor for &E {
    fn schedule(
        &self,
        after: Duration,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError> {
        (**self).schedule(after, payload)
    }
}

/// Converts alarm delays into executor tasks.
pub struct AlarmScheduler<E: DeferredExecutor> {
    executor: E,
}

impl<E: DeferredExecutor> AlarmScheduler<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Enqueues `payload` to fire once `delay` has elapsed.
    pub fn enqueue(
        &self,
        delay: AlarmDelay,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError> {
        let after = delay.as_duration();
        if after.is_zero() {
            return Err(SchedulingError::DelayOutOfRange(after));
        }
        self.enqueue_after(after, payload)
    }

    /// Enqueues `payload` after an already-normalized duration.
    ///
    /// Used when re-arming persisted alarms with their remaining time.
    pub fn enqueue_after(
        &self,
        after: Duration,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError> {
        match self.executor.schedule(after, payload) {
            Ok(handle) => {
                info!(
                    "event=alarm_enqueue module=scheduler status=ok task_id={} delay_minutes={} fire_at_ms={}",
                    handle.id,
                    handle.delay_minutes(),
                    handle.fire_at_ms
                );
                Ok(handle)
            }
            Err(err) => {
                warn!(
                    "event=alarm_enqueue module=scheduler status=error delay_secs={} error={}",
                    after.as_secs(),
                    err
                );
                Err(err)
            }
        }
    }
}
