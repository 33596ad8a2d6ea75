use chrono::Duration;

use crate::clock::BusinessCalendar;

/// Which departure cutoff an entry point applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffPolicy {
    /// Bookable until the departure instant.
    Departure,
    /// Bookable until `hours` before departure (public self-service flow).
    LeadTime { hours: u32 },
}

impl CutoffPolicy {
    pub fn lead(&self) -> Duration {
        match self {
            CutoffPolicy::Departure => Duration::zero(),
            CutoffPolicy::LeadTime { hours } => Duration::hours(i64::from(*hours)),
        }
    }
}

/// Domain settings shared by the booking core crates.
#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub calendar: BusinessCalendar,
    pub public_lead_time_hours: u32,
    pub processing_fee_percent: f64,
    pub slot_horizon_days: u32,
    /// Tag written to processor metadata; orphan scans only look at matching payments.
    pub platform_tag: String,
    pub currency: String,
    pub max_store_retries: usize,
    pub initial_backoff_ms: u64,
    pub orphan_scan_limit: usize,
}

impl BookingSettings {
    pub fn public_cutoff(&self) -> CutoffPolicy {
        CutoffPolicy::LeadTime {
            hours: self.public_lead_time_hours,
        }
    }

    /// Amount charged for an item including the processing fee, in minor units.
    pub fn charge_with_fee(&self, amount_cents: i64) -> i64 {
        let fee = (amount_cents as f64 * self.processing_fee_percent / 100.0).round() as i64;
        amount_cents + fee
    }
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            calendar: BusinessCalendar::new(chrono_tz::Europe::Istanbul),
            public_lead_time_hours: 12,
            processing_fee_percent: 3.0,
            slot_horizon_days: 90,
            platform_tag: "tourline".to_string(),
            currency: "EUR".to_string(),
            max_store_retries: 3,
            initial_backoff_ms: 100,
            orphan_scan_limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_with_fee_rounds_to_cents() {
        let settings = BookingSettings::default();
        assert_eq!(settings.charge_with_fee(10_000), 10_300);
        assert_eq!(settings.charge_with_fee(333), 343);
    }

    #[test]
    fn test_cutoff_lead() {
        assert_eq!(CutoffPolicy::Departure.lead(), Duration::zero());
        assert_eq!(CutoffPolicy::LeadTime { hours: 6 }.lead(), Duration::hours(6));
    }
}
