//! In-process deferred executor backed by a dedicated tokio runtime.
//!
//! # Responsibility
//! - Run one sleeping task per accepted alarm on a private runtime.
//! - Hand each due alarm to the notifier.
//!
//! # Invariants
//! - Each accepted task calls the notifier at most once.
//! - Tasks still sleeping at shutdown are discarded, not fired.
//! - A panicking notifier affects only its own task.
//! - The executor must not be dropped from inside an async context.

use super::{DeferredExecutor, SchedulingError, TaskHandle};
use crate::model::alarm::AlarmPayload;
use crate::model::now_epoch_ms;
use crate::notify::Notifier;
use log::{error, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use uuid::Uuid;

const DEFAULT_MAX_PENDING: usize = 1024;
const WORKER_THREAD_NAME: &str = "petnote-timer";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tuning knobs for `TimerExecutor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExecutorConfig {
    /// Upper bound of queued, not yet fired tasks.
    pub max_pending: usize,
}

impl Default for TimerExecutorConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

struct Shared {
    /// One permit per accepted task, released when the task ends.
    permits: Arc<Semaphore>,
    idle: Notify,
    notifier: Arc<dyn Notifier>,
    max_pending: usize,
}

impl Shared {
    fn pending(&self) -> usize {
        self.max_pending
            .saturating_sub(self.permits.available_permits())
    }

    /// Resolves once no task holds a permit, or with `false` when `stop`
    /// turns true first.
    async fn settled(&self, stop: Option<&watch::Receiver<bool>>) -> bool {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return true;
            }
            if stop.is_some_and(|stop| *stop.borrow()) {
                return false;
            }
            notified.await;
        }
    }
}

/// Releases the task permit, then wakes idle waiters.
struct InFlight {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.permit.take();
        self.shared.idle.notify_waiters();
    }
}

/// Deferred executor running alarms on a private tokio runtime.
///
/// Work survives only as long as the executor (and its process) does.
pub struct TimerExecutor {
    shared: Arc<Shared>,
    stop: watch::Sender<bool>,
    handle: Handle,
    runtime: Option<Runtime>,
    config: TimerExecutorConfig,
}

impl TimerExecutor {
    /// Builds the runtime and its timer thread.
    ///
    /// # Errors
    /// - Returns the OS error when the runtime cannot be built.
    pub fn start(
        notifier: Arc<dyn Notifier>,
        config: TimerExecutorConfig,
    ) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(WORKER_THREAD_NAME)
            .enable_time()
            .build()?;
        let (stop, _) = watch::channel(false);
        let max_pending = config.max_pending.min(Semaphore::MAX_PERMITS);

        info!(
            "event=timer_start module=scheduler status=ok max_pending={}",
            config.max_pending
        );
        Ok(Self {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(max_pending)),
                idle: Notify::new(),
                notifier,
                max_pending,
            }),
            stop,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            config,
        })
    }

    pub fn config(&self) -> TimerExecutorConfig {
        self.config
    }

    /// Number of accepted tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Blocks until every accepted task has finished.
    ///
    /// Returns `false` when `timeout` elapsed first or the executor shut down
    /// with work still queued.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let stop = self.stop.subscribe();
        let shared = Arc::clone(&self.shared);
        self.handle.block_on(async move {
            let settled = shared.settled(Some(&stop));
            match timeout {
                None => settled.await,
                Some(limit) => tokio::time::timeout(limit, settled)
                    .await
                    .unwrap_or(false),
            }
        })
    }

    /// Stops accepting work and discards unfired tasks.
    ///
    /// Returns the number of discarded tasks. Idempotent.
    pub fn shutdown(&self) -> usize {
        if self.stop.send_replace(true) {
            return 0;
        }
        self.shared.permits.close();
        let discarded = self.shared.pending();
        self.shared.idle.notify_waiters();

        let shared = Arc::clone(&self.shared);
        let drained = self.handle.block_on(async move {
            tokio::time::timeout(SHUTDOWN_GRACE, shared.settled(None))
                .await
                .is_ok()
        });
        if drained {
            info!("event=timer_stop module=scheduler status=ok discarded={discarded}");
        } else {
            warn!(
                "event=timer_stop module=scheduler status=timeout discarded={discarded} still_running={}",
                self.shared.pending()
            );
        }
        discarded
    }
}

impl DeferredExecutor for TimerExecutor {
    fn schedule(
        &self,
        after: Duration,
        payload: AlarmPayload,
    ) -> Result<TaskHandle, SchedulingError> {
        let after_ms =
            i64::try_from(after.as_millis()).map_err(|_| SchedulingError::DelayOutOfRange(after))?;
        let fire_at_ms = now_epoch_ms()
            .checked_add(after_ms)
            .ok_or(SchedulingError::DelayOutOfRange(after))?;

        let permit = Arc::clone(&self.shared.permits)
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::NoPermits => SchedulingError::CapacityExhausted {
                    limit: self.config.max_pending,
                },
                TryAcquireError::Closed => SchedulingError::ShutDown,
            })?;

        let id = Uuid::new_v4();
        let in_flight = InFlight {
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
        };
        let mut stop = self.stop.subscribe();
        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    fire(in_flight.shared.notifier.as_ref(), id, &payload);
                }
                _ = stop.wait_for(|stopped| *stopped) => {}
            }
            drop(in_flight);
        });

        Ok(TaskHandle {
            id,
            delay: after,
            fire_at_ms,
        })
    }
}

impl Drop for TimerExecutor {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn fire(notifier: &dyn Notifier, id: Uuid, payload: &AlarmPayload) {
    let presented = catch_unwind(AssertUnwindSafe(|| {
        notifier.present(payload.pet_name.as_str(), payload.note_text.as_str());
    }));
    match presented {
        Ok(()) => info!("event=alarm_fire module=scheduler status=ok task_id={id}"),
        Err(_) => error!(
            "event=alarm_fire module=scheduler status=error task_id={id} error_code=notifier_panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerExecutor, TimerExecutorConfig};
    use crate::model::alarm::AlarmPayload;
    use crate::notify::Notifier;
    use crate::scheduler::{DeferredExecutor, SchedulingError};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        alerts: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for Recorder {
        fn present(&self, title: &str, body: &str) {
            self.alerts
                .lock()
                .expect("recorder lock")
                .push((title.to_string(), body.to_string()));
        }
    }

    fn payload(name: &str, text: &str) -> AlarmPayload {
        AlarmPayload {
            pet_name: name.to_string(),
            note_text: text.to_string(),
        }
    }

    #[test]
    fn fires_each_task_exactly_once() {
        let recorder = Arc::new(Recorder::default());
        let executor =
            TimerExecutor::start(recorder.clone(), TimerExecutorConfig::default()).expect("start");

        executor
            .schedule(Duration::from_millis(300), payload("Rex", "late"))
            .expect("schedule late");
        executor
            .schedule(Duration::from_millis(10), payload("Mia", "early"))
            .expect("schedule early");
        assert_eq!(executor.pending(), 2);

        assert!(executor.wait_idle(Some(Duration::from_secs(10))));
        let mut alerts = recorder.alerts.lock().expect("recorder lock").clone();
        alerts.sort();
        assert_eq!(
            alerts,
            vec![
                ("Mia".to_string(), "early".to_string()),
                ("Rex".to_string(), "late".to_string()),
            ]
        );
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn wait_idle_times_out_while_work_is_queued() {
        let recorder = Arc::new(Recorder::default());
        let executor =
            TimerExecutor::start(recorder.clone(), TimerExecutorConfig::default()).expect("start");
        executor
            .schedule(Duration::from_secs(3600), payload("Rex", "later"))
            .expect("schedule");

        assert!(!executor.wait_idle(Some(Duration::from_millis(50))));
        assert_eq!(executor.pending(), 1);
        assert!(recorder.alerts.lock().expect("recorder lock").is_empty());
    }

    #[test]
    fn rejects_work_over_capacity() {
        let recorder = Arc::new(Recorder::default());
        let executor = TimerExecutor::start(recorder, TimerExecutorConfig { max_pending: 1 })
            .expect("start");

        executor
            .schedule(Duration::from_secs(3600), payload("Rex", "one"))
            .expect("first fits");
        let err = executor
            .schedule(Duration::from_secs(3600), payload("Rex", "two"))
            .expect_err("second exceeds capacity");
        assert_eq!(err, SchedulingError::CapacityExhausted { limit: 1 });
    }

    #[test]
    fn shutdown_discards_pending_and_rejects_new_work() {
        let recorder = Arc::new(Recorder::default());
        let executor =
            TimerExecutor::start(recorder.clone(), TimerExecutorConfig::default()).expect("start");
        executor
            .schedule(Duration::from_secs(3600), payload("Rex", "never"))
            .expect("schedule");

        assert_eq!(executor.shutdown(), 1);
        assert_eq!(executor.shutdown(), 0);
        assert_eq!(executor.pending(), 0);
        let err = executor
            .schedule(Duration::from_millis(1), payload("Rex", "after"))
            .expect_err("shut down executor must refuse work");
        assert_eq!(err, SchedulingError::ShutDown);
        assert!(executor.wait_idle(Some(Duration::from_millis(10))));
        assert!(recorder.alerts.lock().expect("recorder lock").is_empty());
    }

    #[test]
    fn panicking_notifier_does_not_stop_later_tasks() {
        let calls = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&calls);
        let notifier = move |_: &str, body: &str| {
            *counter.lock().expect("counter lock") += 1;
            if body == "boom" {
                panic!("notifier failure");
            }
        };
        let executor = TimerExecutor::start(Arc::new(notifier), TimerExecutorConfig::default())
            .expect("start");

        executor
            .schedule(Duration::from_millis(5), payload("Rex", "boom"))
            .expect("schedule boom");
        executor
            .schedule(Duration::from_millis(200), payload("Rex", "fine"))
            .expect("schedule fine");

        assert!(executor.wait_idle(Some(Duration::from_secs(10))));
        assert_eq!(*calls.lock().expect("counter lock"), 2);
    }
}
