//! Alarm delay, persisted alarm record and cross-thread payload.
//!
//! # Invariants
//! - Delay amounts are strictly positive.
//! - Every delay normalizes to whole minutes before scheduling.
//! - `AlarmPayload` is plain owned data and never references the model.

use crate::model::pet::PetValidationError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;
const MILLIS_PER_MINUTE: i64 = 60 * 1000;

/// Unit of a relative alarm delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    /// Number of minutes in one unit.
    pub fn minutes_per_unit(self) -> u64 {
        match self {
            Self::Minutes => 1,
            Self::Hours => MINUTES_PER_HOUR,
            Self::Days => MINUTES_PER_DAY,
        }
    }

    /// Stable string id used by the snapshot format and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }

    fn noun(self, amount: u32) -> &'static str {
        match (self, amount) {
            (Self::Minutes, 1) => "minute",
            (Self::Hours, 1) => "hour",
            (Self::Days, 1) => "day",
            (unit, _) => unit.as_str(),
        }
    }
}

impl Display for DelayUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown delay unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDelayUnitError(pub String);

impl Display for ParseDelayUnitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported delay unit `{}`; expected minutes|hours|days",
            self.0
        )
    }
}

impl Error for ParseDelayUnitError {}

impl FromStr for DelayUnit {
    type Err = ParseDelayUnitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "m" | "min" | "minute" | "minutes" => Ok(Self::Minutes),
            "h" | "hour" | "hours" => Ok(Self::Hours),
            "d" | "day" | "days" => Ok(Self::Days),
            other => Err(ParseDelayUnitError(other.to_string())),
        }
    }
}

/// Relative delay after which an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmDelay {
    pub amount: u32,
    pub unit: DelayUnit,
}

impl AlarmDelay {
    /// Creates a delay, rejecting a zero amount.
    pub fn new(amount: u32, unit: DelayUnit) -> Result<Self, PetValidationError> {
        let delay = Self { amount, unit };
        delay.validate()?;
        Ok(delay)
    }

    pub fn validate(&self) -> Result<(), PetValidationError> {
        if self.amount == 0 {
            return Err(PetValidationError::NonPositiveDelay);
        }
        Ok(())
    }

    /// Delay normalized to minutes.
    pub fn total_minutes(&self) -> u64 {
        u64::from(self.amount) * self.unit.minutes_per_unit()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.total_minutes() * 60)
    }

    /// Deadline in epoch milliseconds when counted from `from_ms`.
    pub fn deadline_from(&self, from_ms: i64) -> i64 {
        let minutes = i64::try_from(self.total_minutes()).unwrap_or(i64::MAX);
        from_ms.saturating_add(minutes.saturating_mul(MILLIS_PER_MINUTE))
    }

    /// Display label shown in place of a timestamp for alarm notes.
    pub fn label(&self) -> String {
        format!("Alarm in {} {}", self.amount, self.unit.noun(self.amount))
    }
}

/// Whether the deferred executor accepted the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmStatus {
    Scheduled,
    NotScheduled,
}

/// Alarm metadata persisted with its note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub delay: AlarmDelay,
    /// Absolute deadline, Unix epoch milliseconds.
    pub fire_at_ms: i64,
    pub status: AlarmStatus,
}

/// Data handed across the deferred-execution boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmPayload {
    pub pet_name: String,
    pub note_text: String,
}

#[cfg(test)]
mod tests {
    use super::{AlarmDelay, DelayUnit};
    use crate::model::pet::PetValidationError;
    use std::time::Duration;

    #[test]
    fn units_normalize_to_minutes() {
        assert_eq!(AlarmDelay::new(5, DelayUnit::Minutes).unwrap().total_minutes(), 5);
        assert_eq!(AlarmDelay::new(2, DelayUnit::Hours).unwrap().total_minutes(), 120);
        assert_eq!(AlarmDelay::new(1, DelayUnit::Days).unwrap().total_minutes(), 1440);
        assert_eq!(
            AlarmDelay::new(3, DelayUnit::Days).unwrap().as_duration(),
            Duration::from_secs(3 * 1440 * 60)
        );
    }

    #[test]
    fn zero_amount_is_rejected() {
        assert_eq!(
            AlarmDelay::new(0, DelayUnit::Hours).unwrap_err(),
            PetValidationError::NonPositiveDelay
        );
    }

    #[test]
    fn label_uses_singular_for_one() {
        assert_eq!(AlarmDelay::new(1, DelayUnit::Days).unwrap().label(), "Alarm in 1 day");
        assert_eq!(
            AlarmDelay::new(2, DelayUnit::Hours).unwrap().label(),
            "Alarm in 2 hours"
        );
    }

    #[test]
    fn parses_unit_aliases() {
        assert_eq!("Hours".parse::<DelayUnit>().unwrap(), DelayUnit::Hours);
        assert_eq!(" d ".parse::<DelayUnit>().unwrap(), DelayUnit::Days);
        assert_eq!("min".parse::<DelayUnit>().unwrap(), DelayUnit::Minutes);
        assert!("weeks".parse::<DelayUnit>().is_err());
    }

    #[test]
    fn deadline_is_offset_by_whole_minutes() {
        let delay = AlarmDelay::new(2, DelayUnit::Hours).unwrap();
        assert_eq!(delay.deadline_from(1_000), 1_000 + 120 * 60 * 1000);
    }
}
