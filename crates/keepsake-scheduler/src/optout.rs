//! Opt-out reconciler: flips the user's opt-out flag on transport
//! signals, independently of the scheduler tick.

use std::sync::Arc;

use keepsake_core::error::Result;
use keepsake_core::traits::UserStore;

/// Applies opt-out and resubscribe signals from the transport's
/// inbound channel (STOP/START replies or provider callbacks).
///
/// The flag is written through immediately, so an in-flight dispatch
/// sees it at its eligibility re-validation step.
pub struct OptOutReconciler {
    users: Arc<dyn UserStore>,
}

impl OptOutReconciler {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn report_opt_out(&self, user_id: &str) -> Result<()> {
        self.users.set_opt_out(user_id, true).await?;
        tracing::info!(user_id, "user opted out, deliveries suppressed");
        Ok(())
    }

    /// Re-enables scheduling from the next tick onward. Missed
    /// occasions are not resent retroactively.
    pub async fn report_resubscribe(&self, user_id: &str) -> Result<()> {
        self.users.set_opt_out(user_id, false).await?;
        tracing::info!(user_id, "user resubscribed, deliveries resume");
        Ok(())
    }
}
