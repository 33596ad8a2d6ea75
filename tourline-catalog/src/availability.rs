use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use tourline_core::package::occupancy_units;
use tourline_core::repository::{BlackoutRegistry, SlotRepository};
use tourline_core::slot::normalize_time_label;
use tourline_core::{
    BookingError, BookingResult, BusinessCalendar, Clock, CutoffPolicy, GuestCount, PackageRef, RejectionReason,
    SlotKey,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub package: PackageRef,
    pub date: NaiveDate,
    pub time: String,
    pub guests: GuestCount,
}

impl AvailabilityQuery {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.package, self.date)
    }
}

/// Verdict of one availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    /// Free units on the entry; zero when no entry was reached.
    pub available_capacity: u32,
    /// Units the party would consume (1 for private departures).
    pub requested_units: u32,
    /// Effective minimum party size, when an entry was found.
    pub minimum_occupancy: Option<u32>,
    pub reason: Option<RejectionReason>,
}

impl Availability {
    fn rejected(reason: RejectionReason) -> Self {
        Self {
            available: false,
            available_capacity: 0,
            requested_units: 0,
            minimum_occupancy: None,
            reason: Some(reason),
        }
    }

    /// Turns a rejection into the matching domain error.
    pub fn ensure(self, party_size: u32) -> BookingResult<Self> {
        match self.reason {
            None => Ok(self),
            Some(RejectionReason::Blackout) => Err(BookingError::Blackout),
            Some(RejectionReason::Cutoff) => Err(BookingError::Cutoff),
            Some(RejectionReason::NoSlot) => Err(BookingError::NoSlot),
            Some(RejectionReason::InsufficientCapacity) => Err(BookingError::InsufficientCapacity {
                requested: self.requested_units,
                available: self.available_capacity,
            }),
            Some(RejectionReason::MinimumOccupancyNotMet) => Err(BookingError::MinimumOccupancyNotMet {
                required: self.minimum_occupancy.unwrap_or(1),
                requested: party_size,
            }),
        }
    }
}

/// Read-only gate in front of every booking path that consumes capacity.
pub struct AvailabilityEngine {
    slots: Arc<dyn SlotRepository>,
    blackouts: Arc<dyn BlackoutRegistry>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
}

impl AvailabilityEngine {
    pub fn new(
        slots: Arc<dyn SlotRepository>,
        blackouts: Arc<dyn BlackoutRegistry>,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            slots,
            blackouts,
            clock,
            calendar,
        }
    }

    /// Checks, in order: blackout, cutoff, slot existence, capacity, minimum
    /// occupancy. The first failing rule decides the reason. `9:00` and
    /// `09:00:00` address the same `09:00` entry.
    pub async fn check(&self, query: &AvailabilityQuery, cutoff: CutoffPolicy) -> BookingResult<Availability> {
        if self
            .blackouts
            .is_blacked_out(query.date, query.package.package_type)
            .await?
        {
            debug!("{} on {} rejected: blackout", query.package, query.date);
            return Ok(Availability::rejected(RejectionReason::Blackout));
        }

        let time = normalize_time_label(&query.time)?;
        let departure = self.calendar.departure_instant(query.date, &time)?;
        if departure - cutoff.lead() <= self.clock.now() {
            debug!("{} {} {} rejected: past cutoff", query.package, query.date, time);
            return Ok(Availability::rejected(RejectionReason::Cutoff));
        }

        let document = match self.slots.get_document(&query.slot_key()).await? {
            Some(doc) => doc,
            None => return Ok(Availability::rejected(RejectionReason::NoSlot)),
        };
        let entry = match document.entry(&time) {
            Some(entry) => entry,
            None => return Ok(Availability::rejected(RejectionReason::NoSlot)),
        };

        let requested_units = occupancy_units(document.category, &query.guests);
        let minimum = entry.current_minimum(document.category);
        let mut verdict = Availability {
            available: true,
            available_capacity: entry.available(),
            requested_units,
            minimum_occupancy: Some(minimum),
            reason: None,
        };

        if verdict.available_capacity < requested_units {
            verdict.available = false;
            verdict.reason = Some(RejectionReason::InsufficientCapacity);
        } else if query.guests.total() < minimum {
            verdict.available = false;
            verdict.reason = Some(RejectionReason::MinimumOccupancyNotMet);
        }
        Ok(verdict)
    }

    /// `check` followed by `Availability::ensure`.
    pub async fn require(&self, query: &AvailabilityQuery, cutoff: CutoffPolicy) -> BookingResult<Availability> {
        self.check(query, cutoff).await?.ensure(query.guests.total())
    }
}
