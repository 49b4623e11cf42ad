//! Dispatch coordinator: the per-(user, period) claim/dispatch/ack
//! state machine, driven once per scheduler tick.
//!
//! State per (user, period): NoOccasion → Claimed → Dispatching →
//! Sent | Skipped | Failed. Only `Claimed` is persisted as
//! non-terminal; a tick that dies mid-dispatch leaves the row claimed
//! and a later tick resumes it. Exclusivity comes from the store's
//! create-if-absent claim write, not from locks held across the tick.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use keepsake_core::config::SchedulerConfig;
use keepsake_core::error::{KeepsakeError, Result};
use keepsake_core::traits::{DeliveryReceipt, EntryStore, OccasionStore, Transport, UserStore};
use keepsake_core::types::{OccasionClaim, OccasionState, TickSummary, User};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::eligibility::{is_eligible, QUOTA_WINDOW_DAYS};
use crate::optout::OptOutReconciler;
use crate::selector::pick_entry;
use crate::window;

/// Orchestrates one scheduler tick: claim due occasions, select
/// entries, dispatch over the transport, and record outcomes.
pub struct DispatchCoordinator {
    users: Arc<dyn UserStore>,
    entries: Arc<dyn EntryStore>,
    occasions: Arc<dyn OccasionStore>,
    transport: Arc<dyn Transport>,
    reconciler: OptOutReconciler,
    config: SchedulerConfig,
    /// Fixed base seed for deterministic tests; entropy-seeded when
    /// absent.
    rng_seed: Option<u64>,
    /// Users with a dispatch in flight, so overlapping tick
    /// invocations in this process never race past the claim step.
    in_flight: Mutex<HashSet<String>>,
    /// Start offset of the next batch window into the user list.
    batch_cursor: AtomicUsize,
}

impl DispatchCoordinator {
    pub fn new(
        users: Arc<dyn UserStore>,
        entries: Arc<dyn EntryStore>,
        occasions: Arc<dyn OccasionStore>,
        transport: Arc<dyn Transport>,
        config: SchedulerConfig,
    ) -> Self {
        let reconciler = OptOutReconciler::new(Arc::clone(&users));
        Self {
            users,
            entries,
            occasions,
            transport,
            reconciler,
            config,
            rng_seed: None,
            in_flight: Mutex::new(HashSet::new()),
            batch_cursor: AtomicUsize::new(0),
        }
    }

    /// Fix the randomness source so tests can assert exact instants
    /// and selections.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Run one scheduler tick. Failures are absorbed and reported in
    /// the summary; this never propagates an error to the trigger.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        // Claims whose window elapsed a full period ago can never be
        // delivered; same-day windows are closed per user below.
        match self
            .occasions
            .expire_overdue_claims(now - Duration::days(1))
            .await
        {
            Ok(0) => {}
            Ok(expired) => {
                summary.failed += expired as usize;
                tracing::warn!(expired, "abandoned claims from elapsed windows");
            }
            Err(e) => tracing::error!(error = %e, "failed to expire overdue claims"),
        }

        let mut users = match self.users.list_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "cannot list users, skipping tick");
                return summary;
            }
        };
        // Bounded work per tick. The batch window rotates through the
        // user list across ticks, so users past the first batch are
        // still examined within len / batch ticks regardless of what
        // state the head of the list is in.
        let batch = self.config.max_batch_size.max(1);
        if users.len() > batch {
            let start = self.batch_cursor.fetch_add(batch, Ordering::Relaxed) % users.len();
            users.rotate_left(start);
            users.truncate(batch);
        }

        let timeout = std::time::Duration::from_secs(self.config.dispatch_timeout_secs);
        // Skip users an overlapping tick invocation already owns.
        let users: Vec<User> = users
            .into_iter()
            .filter(|user| self.begin_user(&user.id))
            .collect();

        let outcomes: Vec<(String, _)> = stream::iter(users)
            .map(|user| async move {
                let outcome =
                    tokio::time::timeout(timeout, self.process_user(&user, now)).await;
                self.end_user(&user.id);
                (user.id.clone(), outcome)
            })
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .collect()
            .await;

        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(Ok(delta)) => summary.absorb(delta),
                Ok(Err(e)) => {
                    summary.examined += 1;
                    summary.failed += 1;
                    tracing::error!(user_id, error = %e, "dispatch failed, occasion retries next tick");
                }
                Err(_) => {
                    summary.examined += 1;
                    summary.failed += 1;
                    tracing::warn!(user_id, "dispatch timed out, occasion retries next tick");
                }
            }
        }

        tracing::debug!(%summary, "tick complete");
        summary
    }

    /// Decide and execute this user's occasion for the current period.
    async fn process_user(&self, user: &User, now: DateTime<Utc>) -> Result<TickSummary> {
        let mut delta = TickSummary {
            examined: 1,
            ..TickSummary::default()
        };

        if !user.window_is_valid() {
            tracing::warn!(
                user_id = %user.id,
                start = user.window_start_hour,
                end = user.window_end_hour,
                "invalid quiet window, user skipped"
            );
            return Ok(delta);
        }
        let tz = match window::user_timezone(user) {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "user skipped");
                return Ok(delta);
            }
        };
        let date = window::local_date(tz, now);
        let period_key = window::period_key(date);

        let claim = match self.occasions.load_claim(&user.id, &period_key).await? {
            Some(claim) if claim.state.is_terminal() => return Ok(delta),
            Some(claim) => claim,
            None => match self.try_claim(user, date, &period_key, now, &mut delta).await? {
                Some(claim) => claim,
                None => return Ok(delta),
            },
        };

        if !claim.is_due(now) {
            return Ok(delta);
        }

        // Still claimed but the window has closed: abandon, never send
        // outside the window or into the next period.
        if now > window::window_close(user, date)? {
            if self
                .occasions
                .finish_occasion(&user.id, &period_key, OccasionState::Failed)
                .await?
            {
                delta.failed += 1;
                tracing::warn!(user_id = %user.id, period_key, "window elapsed before delivery, occasion abandoned");
            }
            return Ok(delta);
        }

        self.dispatch(user, &period_key, now, &mut delta).await?;
        Ok(delta)
    }

    /// NoOccasion → Claimed. The conditional claim write picks exactly
    /// one winner per (user, period); losers no-op.
    async fn try_claim(
        &self,
        user: &User,
        date: NaiveDate,
        period_key: &str,
        now: DateTime<Utc>,
        delta: &mut TickSummary,
    ) -> Result<Option<OccasionClaim>> {
        let cutoff = now - Duration::days(QUOTA_WINDOW_DAYS);
        let sent_in_window = self.occasions.sent_count_since(&user.id, cutoff).await?;
        if !is_eligible(user, sent_in_window, now) {
            return Ok(None);
        }

        let mut rng = self.rng_for(&user.id);
        let send_at = window::compute_send_instant(user, date, &mut rng)?;
        let claim = OccasionClaim::new(user.id.clone(), period_key, send_at, now);

        if !self.occasions.claim_occasion(&claim).await? {
            // Lost to a concurrent tick; the winner owns this occasion.
            return Ok(None);
        }
        delta.claimed += 1;

        if send_at < now {
            // The drawn instant is already behind us. The occasion is
            // missed, not sent late; the next period gets a fresh one.
            self.occasions
                .finish_occasion(&user.id, period_key, OccasionState::Skipped)
                .await?;
            delta.skipped += 1;
            tracing::debug!(user_id = %user.id, %send_at, "drawn instant already passed, occasion missed");
            return Ok(None);
        }

        tracing::debug!(user_id = %user.id, period_key, %send_at, "occasion claimed");
        Ok(Some(claim))
    }

    /// Claimed → Dispatching → terminal. Eligibility is re-validated
    /// here because opt-out or entitlement may have changed since the
    /// claim.
    async fn dispatch(
        &self,
        user: &User,
        period_key: &str,
        now: DateTime<Utc>,
        delta: &mut TickSummary,
    ) -> Result<()> {
        let skip = |reason: &str| {
            tracing::debug!(user_id = %user.id, period_key, reason, "occasion skipped");
        };

        let Some(mut fresh) = self.users.get_user(&user.id).await? else {
            self.finish(user, period_key, OccasionState::Skipped).await?;
            delta.skipped += 1;
            skip("user no longer exists");
            return Ok(());
        };
        fresh.entitlement = self.users.entitlement_snapshot(&user.id).await?;
        let cutoff = now - Duration::days(QUOTA_WINDOW_DAYS);
        let sent_in_window = self.occasions.sent_count_since(&user.id, cutoff).await?;
        if !is_eligible(&fresh, sent_in_window, now) {
            self.finish(user, period_key, OccasionState::Skipped).await?;
            delta.skipped += 1;
            skip("no longer eligible at dispatch time");
            return Ok(());
        }

        let entries = self.entries.list_entries(&user.id).await?;
        let mut rng = self.rng_for(&user.id);
        let Some(entry) = pick_entry(&entries, &mut rng) else {
            self.finish(user, period_key, OccasionState::Skipped).await?;
            delta.skipped += 1;
            skip("no entries to send");
            return Ok(());
        };

        match self.send_with_retry(&fresh.phone, &entry.body).await {
            Ok(receipt) => {
                // The provider accepted the message; record both sides.
                // mark_sent is idempotent, so a crash between these two
                // writes is safe to replay.
                if let Err(e) = self
                    .entries
                    .mark_sent(&entry.id, self.transport.name(), now)
                    .await
                {
                    tracing::error!(
                        user_id = %user.id,
                        entry_id = %entry.id,
                        error = %e,
                        "delivered but entry state update failed"
                    );
                }
                self.finish(user, period_key, OccasionState::Sent).await?;
                delta.sent += 1;
                tracing::info!(
                    user_id = %user.id,
                    entry_id = %entry.id,
                    message_id = %receipt.message_id,
                    "entry delivered"
                );
            }
            Err(KeepsakeError::RecipientOptedOut(detail)) => {
                tracing::warn!(user_id = %user.id, detail, "provider reports recipient opted out");
                self.reconciler.report_opt_out(&user.id).await?;
                self.finish(user, period_key, OccasionState::Skipped).await?;
                delta.skipped += 1;
            }
            Err(KeepsakeError::Undeliverable(detail)) => {
                tracing::error!(user_id = %user.id, detail, "recipient permanently undeliverable");
                self.finish(user, period_key, OccasionState::Skipped).await?;
                delta.skipped += 1;
            }
            Err(e) => {
                // Leave the occasion claimed so a later tick retries
                // while the window is still open.
                tracing::warn!(user_id = %user.id, error = %e, "send attempts exhausted, retrying next tick");
                delta.failed += 1;
            }
        }
        Ok(())
    }

    async fn finish(&self, user: &User, period_key: &str, state: OccasionState) -> Result<bool> {
        self.occasions
            .finish_occasion(&user.id, period_key, state)
            .await
    }

    /// Bounded transport retries with doubling backoff, all within the
    /// current tick invocation.
    async fn send_with_retry(&self, destination: &str, body: &str) -> Result<DeliveryReceipt> {
        let attempts = self.config.send_attempts.max(1);
        let mut backoff = std::time::Duration::from_millis(self.config.retry_backoff_ms);
        for attempt in 1..=attempts {
            match self.transport.send(destination, body).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::debug!(attempt, error = %e, "retryable send failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        Err(KeepsakeError::transport("send attempts exhausted"))
    }

    fn rng_for(&self, user_id: &str) -> StdRng {
        match self.rng_seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                user_id.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_entropy(),
        }
    }

    fn begin_user(&self, user_id: &str) -> bool {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.insert(user_id.to_string()),
            Err(_) => false,
        }
    }

    fn end_user(&self, user_id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(user_id);
        }
    }
}
