pub mod availability;
pub mod horizon;
pub mod mutator;

pub use availability::{Availability, AvailabilityEngine, AvailabilityQuery};
pub use horizon::{extend_horizon, generate_slot_documents};
pub use mutator::SlotMutator;
