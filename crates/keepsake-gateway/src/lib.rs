//! # Keepsake Gateway
//!
//! Small HTTP surface for the pieces that must be reachable from
//! outside the process: the SMS provider's inbound webhook (STOP and
//! START replies), a manual tick trigger, and a health probe.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use keepsake_channels::inbound::{parse_inbound, InboundSignal};
use keepsake_core::error::Result;
use keepsake_core::traits::UserStore;
use keepsake_core::types::TickSummary;
use keepsake_scheduler::{DispatchCoordinator, OptOutReconciler};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DispatchCoordinator>,
    pub reconciler: Arc<OptOutReconciler>,
    pub users: Arc<dyn UserStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tick", post(run_tick))
        .route("/webhook/sms", post(inbound_sms))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, "gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Manual scheduler trigger, for cron-style external schedulers and
/// operators.
async fn run_tick(State(state): State<AppState>) -> Json<TickSummary> {
    let summary = state.coordinator.run_tick(chrono::Utc::now()).await;
    Json(summary)
}

/// Provider inbound-SMS webhook. Only STOP/START keywords matter here;
/// everything else is acknowledged and ignored.
async fn inbound_sms(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<serde_json::Value>) {
    let sms = match parse_inbound(&body) {
        Ok(sms) => sms,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed inbound webhook");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            );
        }
    };

    let signal = sms.signal();
    let user = match state.users.find_by_phone(&sms.from).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed for inbound webhook");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "lookup failed" })),
            );
        }
    };
    let Some(user) = user else {
        // Unknown senders are acknowledged so the provider stops
        // retrying; nothing to reconcile.
        return (
            StatusCode::OK,
            Json(serde_json::json!({ "handled": false })),
        );
    };

    let outcome = match signal {
        InboundSignal::OptOut => state.reconciler.report_opt_out(&user.id).await,
        InboundSignal::Resubscribe => state.reconciler.report_resubscribe(&user.id).await,
        InboundSignal::Other => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({ "handled": false })),
            );
        }
    };

    match outcome {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "handled": true, "signal": signal })),
        ),
        Err(e) => {
            tracing::error!(error = %e, user_id = %user.id, "failed to apply inbound signal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "reconcile failed" })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use keepsake_core::config::SchedulerConfig;
    use keepsake_core::traits::{DeliveryReceipt, EntryStore, OccasionStore, Transport};
    use keepsake_core::types::User;
    use keepsake_store::SqliteStore;
    use tower::ServiceExt;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn name(&self) -> &str {
            "sms"
        }

        async fn send(&self, _destination: &str, _body: &str) -> Result<DeliveryReceipt> {
            Ok(DeliveryReceipt {
                message_id: "m1".into(),
            })
        }
    }

    fn test_state() -> (Arc<SqliteStore>, AppState) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let coordinator = Arc::new(DispatchCoordinator::new(
            store.clone() as Arc<dyn UserStore>,
            store.clone() as Arc<dyn EntryStore>,
            store.clone() as Arc<dyn OccasionStore>,
            Arc::new(NullTransport),
            SchedulerConfig::default(),
        ));
        let reconciler = Arc::new(OptOutReconciler::new(store.clone() as Arc<dyn UserStore>));
        let state = AppState {
            coordinator,
            reconciler,
            users: store.clone() as Arc<dyn UserStore>,
        };
        (store, state)
    }

    fn webhook_request(payload: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/sms")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_store, state) = test_state();
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stop_reply_sets_opt_out() {
        let (store, state) = test_state();
        let user = User::new("+15551230000", "UTC");
        store.add_user(&user).await.unwrap();

        let response = router(state)
            .oneshot(webhook_request(
                r#"{"from":"+15551230000","body":"STOP"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.get_user(&user.id).await.unwrap().unwrap().opted_out);
    }

    #[tokio::test]
    async fn test_start_reply_clears_opt_out() {
        let (store, state) = test_state();
        let mut user = User::new("+15551230000", "UTC");
        user.opted_out = true;
        store.add_user(&user).await.unwrap();

        let response = router(state)
            .oneshot(webhook_request(
                r#"{"from":"+15551230000","body":"START"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!store.get_user(&user.id).await.unwrap().unwrap().opted_out);
    }

    #[tokio::test]
    async fn test_unknown_sender_is_acknowledged() {
        let (_store, state) = test_state();
        let response = router(state)
            .oneshot(webhook_request(r#"{"from":"+19990000000","body":"STOP"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_webhook_rejected() {
        let (_store, state) = test_state();
        let response = router(state)
            .oneshot(webhook_request("not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_tick_returns_summary() {
        let (_store, state) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tick")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let summary: TickSummary = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(summary.examined, 0);
    }
}
