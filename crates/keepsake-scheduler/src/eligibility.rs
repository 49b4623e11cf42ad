//! Eligibility gate: opt-out, entitlement, and weekly quota.

use chrono::{DateTime, Utc};
use keepsake_core::types::User;

/// Number of days in the trailing quota window.
pub const QUOTA_WINDOW_DAYS: i64 = 7;

/// May this user receive a send right now?
///
/// True iff the user has not opted out, is entitled (subscribed or
/// inside an unexpired trial), and has sent fewer than `weekly_quota`
/// messages in the trailing 7 days. Re-evaluated at dispatch time, not
/// only at claim time, because any of the three inputs can change in
/// between.
pub fn is_eligible(user: &User, sent_in_window: u32, now: DateTime<Utc>) -> bool {
    !user.opted_out
        && user.entitlement.allows(now)
        && sent_in_window < u32::from(user.weekly_quota)
}
