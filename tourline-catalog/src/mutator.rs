use std::sync::Arc;
use tracing::{debug, warn};

use tourline_core::repository::SlotRepository;
use tourline_core::{BookingError, BookingResult, Direction, IncrementOutcome, SlotKey};

/// The only writer of slot booked-counts.
///
/// Every change is a single conditional update on one entry in the store, so
/// concurrent callers are linearized per entry without in-process locks.
#[derive(Clone)]
pub struct SlotMutator {
    slots: Arc<dyn SlotRepository>,
}

impl SlotMutator {
    pub fn new(slots: Arc<dyn SlotRepository>) -> Self {
        Self { slots }
    }

    /// Applies `delta` units to one entry and returns the new booked-count.
    ///
    /// `Add` is refused with `InsufficientCapacity` when it would overshoot
    /// capacity and nothing is written. `Subtract` floors at zero.
    pub async fn update_booking(
        &self,
        key: &SlotKey,
        time: &str,
        delta: u32,
        direction: Direction,
    ) -> BookingResult<u32> {
        match direction {
            Direction::Add => match self.slots.try_increment(key, time, delta).await? {
                IncrementOutcome::Applied { booked_count, capacity } => {
                    debug!(
                        "Slot {} {} {}: +{} -> {}/{}",
                        key.package(),
                        key.date,
                        time,
                        delta,
                        booked_count,
                        capacity
                    );
                    Ok(booked_count)
                }
                IncrementOutcome::Insufficient { available } => Err(BookingError::InsufficientCapacity {
                    requested: delta,
                    available,
                }),
                IncrementOutcome::Missing => Err(BookingError::NoSlot),
            },
            Direction::Subtract => match self.slots.decrement_floored(key, time, delta).await? {
                Some(booked_count) => {
                    debug!("Slot {} {} {}: -{} -> {}", key.package(), key.date, time, delta, booked_count);
                    Ok(booked_count)
                }
                None => {
                    warn!("Release of {} units on missing slot {} {} {}", delta, key.package(), key.date, time);
                    Err(BookingError::NoSlot)
                }
            },
        }
    }

    /// Moves an entry from `from_units` to `to_units` for one booking.
    pub async fn resize(&self, key: &SlotKey, time: &str, from_units: u32, to_units: u32) -> BookingResult<()> {
        if to_units > from_units {
            self.update_booking(key, time, to_units - from_units, Direction::Add).await?;
        } else if from_units > to_units {
            self.update_booking(key, time, from_units - to_units, Direction::Subtract).await?;
        }
        Ok(())
    }
}
