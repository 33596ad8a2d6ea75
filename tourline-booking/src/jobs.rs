//! Maintenance jobs run from trigger messages.
//!
//! Jobs hold no state between runs. Whatever sends a `JobTrigger` decides
//! when they run: the interval ticker in the API binary, an admin endpoint,
//! or a test calling `run_job` directly.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tourline_catalog::extend_horizon;
use tourline_core::{BookingResult, PackageRef};

use crate::services::BookingServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobTrigger {
    /// Extend the slot horizon of every active package.
    SlotHorizon,
    /// Extend one package, e.g. right after it was created.
    PackageHorizon { package: PackageRef },
    /// Move confirmed bookings whose date has passed to completed.
    CompletionSweep,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HorizonReport {
    pub packages: usize,
    pub entries_created: usize,
    pub failed: Vec<PackageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    SlotHorizon(HorizonReport),
    CompletionSweep { completed: u64 },
}

pub struct JobRunner {
    services: BookingServices,
}

impl JobRunner {
    pub fn new(services: BookingServices) -> Self {
        Self { services }
    }

    pub async fn run_job(&self, trigger: JobTrigger) -> BookingResult<JobReport> {
        match trigger {
            JobTrigger::SlotHorizon => {
                let packages = self.services.catalog.list_active_packages().await?;
                Ok(JobReport::SlotHorizon(self.extend_all(packages).await))
            }
            JobTrigger::PackageHorizon { package } => {
                let packages = self
                    .services
                    .catalog
                    .get_package(&package)
                    .await?
                    .filter(|p| p.is_active)
                    .into_iter()
                    .collect();
                Ok(JobReport::SlotHorizon(self.extend_all(packages).await))
            }
            JobTrigger::CompletionSweep => {
                let today = self.services.settings.calendar.local_date(self.services.clock.now());
                let completed = self.services.bookings.complete_elapsed(today).await?;
                info!("Completion sweep moved {} bookings dated before {} to completed", completed, today);
                Ok(JobReport::CompletionSweep { completed })
            }
        }
    }

    /// Runs triggers until every sender is dropped.
    pub async fn run(self, mut triggers: mpsc::Receiver<JobTrigger>) {
        info!("Job runner started");
        while let Some(trigger) = triggers.recv().await {
            match self.run_job(trigger).await {
                Ok(report) => info!("Job {:?} finished: {:?}", trigger, report),
                Err(e) => error!("Job {:?} failed: {}", trigger, e),
            }
        }
        info!("Job runner stopped, trigger channel closed");
    }

    /// One package failing never stops the others.
    async fn extend_all(&self, packages: Vec<tourline_core::Package>) -> HorizonReport {
        let today = self.services.settings.calendar.local_date(self.services.clock.now());
        let horizon_days = self.services.settings.slot_horizon_days;
        let mut report = HorizonReport {
            packages: packages.len(),
            ..HorizonReport::default()
        };

        for package in &packages {
            match extend_horizon(self.services.slots.as_ref(), package, today, horizon_days).await {
                Ok(created) => report.entries_created += created,
                Err(e) => {
                    warn!("Slot horizon for {} not extended: {}", package.reference(), e);
                    report.failed.push(package.reference());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tourline_core::{Booking, BookingSource, BookingStatus, GuestCount, PackageCategory, PaymentRecord};
    use uuid::Uuid;

    use crate::test_support::{contact, trip_date, Harness};

    fn booking(h: &Harness, date: chrono::NaiveDate, status: BookingStatus) -> Booking {
        let pkg = h.package(PackageCategory::Private, 4, 1);
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            package: pkg.reference(),
            date,
            time: "09:00".to_string(),
            guests: GuestCount::new(2, 0),
            occupancy: 1,
            contact: contact(),
            payment: PaymentRecord::pending(5_000, "EUR"),
            status,
            source: BookingSource::Direct,
            capacity_committed: true,
            created_at: now,
            updated_at: now,
        };
        h.store.put_booking(booking.clone());
        booking
    }

    #[tokio::test]
    async fn test_horizon_job_fills_window_and_is_idempotent() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 12, 2);
        let runner = JobRunner::new(h.services.clone());

        let first = runner.run_job(JobTrigger::SlotHorizon).await.unwrap();
        let second = runner.run_job(JobTrigger::SlotHorizon).await.unwrap();

        match first {
            JobReport::SlotHorizon(report) => {
                assert_eq!(report.packages, 1);
                assert!(report.entries_created > 0);
                assert!(report.failed.is_empty());
            }
            other => panic!("unexpected report {:?}", other),
        }
        assert_eq!(
            second,
            JobReport::SlotHorizon(HorizonReport {
                packages: 1,
                entries_created: 0,
                failed: vec![],
            })
        );
        // 2030-05-01 through 2030-07-30, one document per day
        assert_eq!(h.store.slot_document_count(&pkg.reference()), 91);
    }

    #[tokio::test]
    async fn test_horizon_job_keeps_booked_counts() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 12, 1);
        let key = tourline_core::SlotKey::new(pkg.reference(), trip_date());
        h.services
            .mutator()
            .update_booking(&key, "09:00", 5, tourline_core::Direction::Add)
            .await
            .unwrap();

        JobRunner::new(h.services.clone())
            .run_job(JobTrigger::PackageHorizon {
                package: pkg.reference(),
            })
            .await
            .unwrap();

        assert_eq!(h.booked(&pkg), 5);
    }

    #[tokio::test]
    async fn test_completion_sweep_completes_only_elapsed_confirmed() {
        let h = Harness::new();
        let yesterday = chrono::NaiveDate::from_ymd_opt(2030, 4, 30).unwrap();
        let today = chrono::NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();
        let elapsed = booking(&h, yesterday, BookingStatus::Confirmed);
        let running_today = booking(&h, today, BookingStatus::Confirmed);
        let unpaid = booking(&h, yesterday, BookingStatus::Pending);
        let upcoming = booking(&h, today + Duration::days(5), BookingStatus::Confirmed);

        let report = JobRunner::new(h.services.clone())
            .run_job(JobTrigger::CompletionSweep)
            .await
            .unwrap();

        assert_eq!(report, JobReport::CompletionSweep { completed: 1 });
        let status = |id| {
            h.store
                .bookings()
                .into_iter()
                .find(|b| b.id == id)
                .map(|b| b.status)
        };
        assert_eq!(status(elapsed.id), Some(BookingStatus::Completed));
        assert_eq!(status(running_today.id), Some(BookingStatus::Confirmed));
        assert_eq!(status(unpaid.id), Some(BookingStatus::Pending));
        assert_eq!(status(upcoming.id), Some(BookingStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_runner_drains_channel_and_stops() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 12, 1);
        let (tx, rx) = mpsc::channel(4);
        tx.send(JobTrigger::SlotHorizon).await.unwrap();
        drop(tx);

        JobRunner::new(h.services.clone()).run(rx).await;

        assert!(h.store.slot_document_count(&pkg.reference()) > 1);
    }
}
