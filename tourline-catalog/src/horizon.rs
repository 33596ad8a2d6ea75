use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use tourline_core::repository::SlotRepository;
use tourline_core::slot::normalize_time_label;
use tourline_core::{Package, SlotDocument, SlotEntry, SlotKey, StoreResult};

/// Builds one slot document per date in `from..=through` from the package's
/// departure times. Invalid labels are skipped.
pub fn generate_slot_documents(package: &Package, from: NaiveDate, through: NaiveDate) -> Vec<SlotDocument> {
    let mut times: Vec<String> = package
        .departure_times
        .iter()
        .filter_map(|label| match normalize_time_label(label) {
            Ok(time) => Some(time),
            Err(_) => {
                warn!("Package {} has invalid departure time {:?}", package.reference(), label);
                None
            }
        })
        .collect();
    times.sort();
    times.dedup();

    if times.is_empty() {
        return Vec::new();
    }

    from.iter_days()
        .take_while(|date| *date <= through)
        .map(|date| SlotDocument {
            key: SlotKey::new(package.reference(), date),
            category: package.category,
            slots: times
                .iter()
                .map(|time| SlotEntry::new(time.clone(), package.slot_capacity, package.min_person))
                .collect(),
        })
        .collect()
}

/// Tops a package's slots up to `today + horizon_days`.
///
/// Nothing happens while the furthest generated date already reaches the
/// horizon. Otherwise the whole window is regenerated with insert-if-absent,
/// so booked counts on existing entries are never touched. Returns the number
/// of entries created.
pub async fn extend_horizon(
    slots: &dyn SlotRepository,
    package: &Package,
    today: NaiveDate,
    horizon_days: u32,
) -> StoreResult<usize> {
    let through = today
        .checked_add_days(Days::new(u64::from(horizon_days)))
        .unwrap_or(NaiveDate::MAX);

    if let Some(latest) = slots.latest_date(&package.reference()).await? {
        if latest >= through {
            return Ok(0);
        }
    }

    let documents = generate_slot_documents(package, today, through);
    let created = slots.insert_missing(&documents).await?;
    if created > 0 {
        info!("Generated {} slot entries for {} through {}", created, package.reference(), through);
    }
    Ok(created)
}
