//! User profile and entitlement types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the per-user weekly send quota.
pub const MAX_WEEKLY_QUOTA: u8 = 20;

/// Subscription entitlement mirror, maintained by the external
/// entitlement reconciliation process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entitlement {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// True if the user may receive sends at all: subscribed, or still
    /// inside an unexpired trial.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        self.active || self.trial_ends_at.is_some_and(|t| now < t)
    }
}

/// A Keepsake user: destination phone number, quiet-window preferences,
/// quota, and delivery gating state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Destination phone number in E.164 form.
    pub phone: String,
    /// IANA timezone identifier, e.g. "America/Chicago".
    pub timezone: String,
    /// Maximum sends in any trailing 7-day window, 0..=20.
    pub weekly_quota: u8,
    /// First hour of the local quiet window, 0..=23.
    pub window_start_hour: u8,
    /// Last hour of the local quiet window, 0..=23. Must be >= start.
    pub window_end_hour: u8,
    pub opted_out: bool,
    pub entitlement: Entitlement,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(phone: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phone: phone.into(),
            timezone: timezone.into(),
            weekly_quota: 7,
            window_start_hour: 9,
            window_end_hour: 21,
            opted_out: false,
            entitlement: Entitlement::default(),
            created_at: Utc::now(),
        }
    }

    /// Quiet-window sanity check. Wraparound past midnight is not
    /// supported: start must be <= end within one calendar day.
    pub fn window_is_valid(&self) -> bool {
        self.window_start_hour <= self.window_end_hour
            && self.window_end_hour < 24
            && self.weekly_quota <= MAX_WEEKLY_QUOTA
    }
}
