//! HTTP invocation surface.
//!
//! | Method | Path                | Purpose                                  |
//! |--------|---------------------|------------------------------------------|
//! | POST   | `/notify`           | Deliver one notification                 |
//! | POST   | `/subscriptions`    | Register a browser subscription          |
//! | DELETE | `/subscriptions`    | Forget a subscription by endpoint        |
//! | GET    | `/vapid-public-key` | Key browsers pass to `pushManager.subscribe` |
//! | GET    | `/health`           | Liveness                                 |
//!
//! Bodies are read as raw bytes and parsed here so malformed JSON gets the
//! same 400 shape as a missing field.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::notifications::dispatch::Dispatcher;
use crate::notifications::payload::{NotifyRequest, NotifyResponse, RegisterRequest, RequestError};
use crate::notifications::push::SubscriberStore;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn SubscriberStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// `store` must be the same store the dispatcher reads from.
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<dyn SubscriberStore>) -> Self {
        Self { dispatcher, store }
    }
}

/// Body of `DELETE /subscriptions`.
#[derive(Debug, Deserialize)]
struct UnregisterRequest {
    endpoint: String,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Internal server error" })),
    )
        .into_response()
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notify", post(notify))
        .route("/subscriptions", post(register).delete(unregister))
        .route("/vapid-public-key", get(vapid_public_key))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr()?;
    log::info!("[Server] Listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    log::info!("[Server] Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("[Server] Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("[Server] Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    log::info!("[Server] Shutdown requested");
}

async fn notify(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<NotifyResponse>) {
    let (filter, payload) = match NotifyRequest::parse(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("[Server] Rejected notify request: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(NotifyResponse::failure(e.to_string())),
            );
        }
    };

    match state.dispatcher.send(&filter, &payload).await {
        Ok(report) => (StatusCode::OK, Json(report.into())),
        Err(e) => {
            log::error!("[Server] Notify failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NotifyResponse::failure("Internal server error")),
            )
        }
    }
}

async fn register(State(state): State<AppState>, body: Bytes) -> Response {
    let subscription = match RegisterRequest::parse(&body) {
        Ok(subscription) => subscription,
        Err(e) => {
            log::warn!("[Server] Rejected subscription: {e}");
            return e.into_response();
        }
    };

    let user_id = subscription.user_id.clone();
    if let Err(e) = state.store.upsert(subscription).await {
        log::error!("[Server] Failed to store subscription: {e:#}");
        return internal_error();
    }

    log::info!("[Server] Registered push subscription for user {user_id}");
    (StatusCode::CREATED, Json(json!({ "success": true }))).into_response()
}

async fn unregister(State(state): State<AppState>, body: Bytes) -> Response {
    let request: UnregisterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return RequestError::from(e).into_response(),
    };

    match state.store.remove_endpoint(&request.endpoint).await {
        Ok(true) => {
            log::info!("[Server] Removed push subscription");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Subscription not found" })),
        )
            .into_response(),
        Err(e) => {
            log::error!("[Server] Failed to remove subscription: {e:#}");
            internal_error()
        }
    }
}

async fn vapid_public_key(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "public_key": state.dispatcher.vapid_keys().public_key_base64url() }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
