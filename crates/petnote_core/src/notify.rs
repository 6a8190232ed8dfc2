//! Notifier contract for user-visible alarm alerts.
//!
//! # Responsibility
//! - Describe the single call the scheduler makes when an alarm is due.
//! - Provide a logging-backed notifier for hosts without a native surface.
//!
//! # Invariants
//! - `present` is fire-and-forget; display failures are never propagated.
//! - One call surfaces one alert; duplicates are not filtered.

use log::info;

/// Host surface able to present one alert.
pub trait Notifier: Send + Sync {
    /// Presents a single alert with `title` and `body`.
    fn present(&self, title: &str, body: &str);
}

/// Notifier that records alerts as log events.
///
/// Alert content is user text, so only lengths are logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn present(&self, title: &str, body: &str) {
        info!(
            "event=alarm_present module=notify status=ok title_chars={} body_chars={}",
            title.chars().count(),
            body.chars().count()
        );
    }
}

impl<F> Notifier for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn present(&self, title: &str, body: &str) {
        self(title, body)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogNotifier, Notifier};
    use std::sync::Mutex;

    #[test]
    fn closures_act_as_notifiers() {
        let seen = Mutex::new(Vec::new());
        let notifier = |title: &str, body: &str| {
            seen.lock()
                .expect("seen lock")
                .push(format!("{title}/{body}"));
        };
        notifier.present("Rex", "Vaccine");
        notifier.present("Rex", "Vaccine");

        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec!["Rex/Vaccine".to_string(), "Rex/Vaccine".to_string()]
        );
    }

    #[test]
    fn log_notifier_accepts_any_text() {
        let notifier: &dyn Notifier = &LogNotifier;
        notifier.present("", "multi\nline body");
    }
}
