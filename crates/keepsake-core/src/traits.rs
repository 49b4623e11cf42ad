//! Trait seams for the external collaborators: stores and transport.
//!
//! The delivery engine only ever talks to these traits, so tests can
//! swap in in-memory fakes and production wires in the sqlite store
//! and the SMS gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Entitlement, Entry, OccasionClaim, OccasionState, User};

/// Outcome of `mark_sent`. A retry after a partial failure must see
/// `AlreadySent`, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSent {
    Updated,
    AlreadySent,
}

/// Provider acknowledgement for a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Read/write access to a user's saved entries.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>>;

    async fn add_entry(&self, entry: &Entry) -> Result<()>;

    /// Mark an entry delivered: sets `sent`, `sent_at`, `delivered_via`
    /// and clears `scheduled_for` in one conditional write. Idempotent.
    async fn mark_sent(
        &self,
        entry_id: &str,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<MarkSent>;
}

/// User profiles, opt-out flag, and the entitlement mirror.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>>;

    async fn add_user(&self, user: &User) -> Result<()>;

    async fn set_opt_out(&self, user_id: &str, opted_out: bool) -> Result<()>;

    /// Fresh entitlement read, re-checked at dispatch time because the
    /// snapshot can change between claim and send.
    async fn entitlement_snapshot(&self, user_id: &str) -> Result<Entitlement>;
}

/// Occasion-claim records: the at-most-once ledger per (user, period).
#[async_trait]
pub trait OccasionStore: Send + Sync {
    /// Conditional create-if-absent. Returns `true` if this caller won
    /// the claim; `false` if a claim for the key already exists.
    async fn claim_occasion(&self, claim: &OccasionClaim) -> Result<bool>;

    async fn load_claim(&self, user_id: &str, period_key: &str) -> Result<Option<OccasionClaim>>;

    /// Compare-and-set from `Claimed` into a terminal state. Returns
    /// `false` if the occasion was already terminal.
    async fn finish_occasion(
        &self,
        user_id: &str,
        period_key: &str,
        state: OccasionState,
    ) -> Result<bool>;

    /// Occasions in state `sent` claimed after `cutoff`, for quota
    /// accounting over the trailing window.
    async fn sent_count_since(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<u32>;

    /// Mark still-`claimed` occasions whose send instant predates
    /// `cutoff` as `failed`: their window has fully elapsed and they
    /// must never leak into a later period. Returns the number expired.
    async fn expire_overdue_claims(&self, cutoff: DateTime<Utc>) -> Result<u32>;
}

/// Outbound message transport (SMS gateway).
///
/// Errors are typed through `KeepsakeError`: `RecipientOptedOut` is
/// never retried and routes to the opt-out reconciler,
/// `RetryableProvider` is retried with backoff, `Undeliverable` is
/// permanent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel tag recorded on delivered entries, e.g. "sms".
    fn name(&self) -> &str;

    async fn send(&self, destination: &str, body: &str) -> Result<DeliveryReceipt>;
}
