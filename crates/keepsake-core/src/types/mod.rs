//! Domain types shared across Keepsake crates.

mod entry;
mod occasion;
mod user;

pub use entry::Entry;
pub use occasion::{OccasionClaim, OccasionState, TickSummary};
pub use user::{Entitlement, User, MAX_WEEKLY_QUOTA};
