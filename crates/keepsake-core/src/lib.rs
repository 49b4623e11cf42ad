//! # Keepsake Core
//!
//! Core types, traits, errors, and configuration shared by every
//! Keepsake crate. The delivery engine, stores, and channels all talk
//! through the seams defined here.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::KeepsakeConfig;
pub use error::{KeepsakeError, Result};
pub use traits::{DeliveryReceipt, EntryStore, MarkSent, OccasionStore, Transport, UserStore};
pub use types::{Entitlement, Entry, OccasionClaim, OccasionState, TickSummary, User};
