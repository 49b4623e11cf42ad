//! Occasion claims and tick accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted state of one (user, period) delivery occasion.
///
/// `Claimed` is the only non-terminal state; a dispatch in flight keeps
/// the row `Claimed` so a crashed tick is resumable. `Dispatching`
/// exists only in memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OccasionState {
    Claimed,
    Sent,
    Skipped,
    Failed,
}

impl OccasionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OccasionState::Claimed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OccasionState::Claimed => "claimed",
            OccasionState::Sent => "sent",
            OccasionState::Skipped => "skipped",
            OccasionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claimed" => Some(OccasionState::Claimed),
            "sent" => Some(OccasionState::Sent),
            "skipped" => Some(OccasionState::Skipped),
            "failed" => Some(OccasionState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OccasionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single allowed delivery slot for one user within one period.
///
/// Keyed by `(user_id, period_key)`; the store guarantees exactly one
/// successful claim per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccasionClaim {
    pub user_id: String,
    /// Local calendar date in the user's timezone, "YYYY-MM-DD".
    pub period_key: String,
    /// The randomized instant inside the quiet window at which the
    /// send becomes due.
    pub send_at: DateTime<Utc>,
    pub state: OccasionState,
    pub claimed_at: DateTime<Utc>,
}

impl OccasionClaim {
    pub fn new(
        user_id: impl Into<String>,
        period_key: impl Into<String>,
        send_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            period_key: period_key.into(),
            send_at,
            state: OccasionState::Claimed,
            claimed_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == OccasionState::Claimed && self.send_at <= now
    }
}

/// Per-tick outcome counts, returned from the scheduler entry point for
/// operator visibility.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickSummary {
    /// Users examined this tick.
    pub examined: usize,
    /// New occasion claims created.
    pub claimed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TickSummary {
    pub fn absorb(&mut self, other: TickSummary) {
        self.examined += other.examined;
        self.claimed += other.claimed;
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for TickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "examined={} claimed={} sent={} skipped={} failed={}",
            self.examined, self.claimed, self.sent, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            OccasionState::Claimed,
            OccasionState::Sent,
            OccasionState::Skipped,
            OccasionState::Failed,
        ] {
            assert_eq!(OccasionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OccasionState::parse("dispatching"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OccasionState::Claimed.is_terminal());
        assert!(OccasionState::Sent.is_terminal());
        assert!(OccasionState::Skipped.is_terminal());
        assert!(OccasionState::Failed.is_terminal());
    }

    #[test]
    fn test_claim_due() {
        let now = Utc::now();
        let claim = OccasionClaim::new("u1", "2026-08-28", now - chrono::Duration::minutes(1), now);
        assert!(claim.is_due(now));

        let future = OccasionClaim::new("u1", "2026-08-28", now + chrono::Duration::hours(2), now);
        assert!(!future.is_due(now));
    }

    #[test]
    fn test_summary_absorb() {
        let mut total = TickSummary::default();
        total.absorb(TickSummary {
            examined: 2,
            claimed: 1,
            sent: 1,
            skipped: 0,
            failed: 0,
        });
        total.absorb(TickSummary {
            examined: 1,
            claimed: 0,
            sent: 0,
            skipped: 1,
            failed: 0,
        });
        assert_eq!(total.examined, 3);
        assert_eq!(total.sent, 1);
        assert_eq!(total.skipped, 1);
    }
}
