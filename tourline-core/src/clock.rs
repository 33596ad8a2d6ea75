use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

use crate::error::BookingError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Wall-clock rules of the operating business.
///
/// Slot dates and departure labels are local to one fixed timezone,
/// independent of where the caller sits.
#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    tz: Tz,
}

impl BusinessCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn from_name(name: &str) -> Result<Self, BookingError> {
        let tz: Tz = name
            .parse()
            .map_err(|_| BookingError::Validation(format!("unknown timezone: {}", name)))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Absolute departure instant of a slot.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// non-existent ones (DST spring-forward gap) are rejected.
    pub fn departure_instant(&self, date: NaiveDate, time: &str) -> Result<DateTime<Utc>, BookingError> {
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| BookingError::Validation(format!("invalid time label: {}", time)))?;
        let local = NaiveDateTime::new(date, time);
        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(BookingError::Validation(format!(
                "{} {} does not exist in {}",
                date, time, self.tz
            ))),
        }
    }

    /// The business-local calendar date at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }
}
