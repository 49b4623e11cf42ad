//! # Keepsake Scheduler
//!
//! The delivery engine: once per tick, decide which users are owed a
//! send today, claim each (user, day) occasion exactly once, pick an
//! entry, dispatch over the transport, and record the outcome.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval)
//!   └── DispatchCoordinator::run_tick
//!         ├── expire stale claims from elapsed windows
//!         └── per user (bounded concurrent stream):
//!               ├── window::compute_send_instant  — random instant in quiet window
//!               ├── OccasionStore::claim_occasion — create-if-absent, one winner
//!               ├── eligibility::is_eligible      — re-checked at dispatch time
//!               ├── selector::pick_entry          — unsent-first random choice
//!               └── Transport::send               — bounded retries + backoff
//! ```
//!
//! Opt-out signals arrive independently of ticks through the
//! [`OptOutReconciler`] and take effect at the next eligibility check,
//! including for occasions already claimed.

pub mod dispatch;
pub mod eligibility;
pub mod engine;
pub mod optout;
pub mod selector;
pub mod window;

pub use dispatch::DispatchCoordinator;
pub use engine::SchedulerEngine;
pub use optout::OptOutReconciler;
