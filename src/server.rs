//! HTTP webhook event source.
//!
//! The repository (or a broker bridge in front of it) delivers each change
//! notification as a `POST` to a named queue. The request is held open
//! until the service has handled the event, so the HTTP status is the
//! acknowledgment: a sender that sees anything other than `200` should
//! redeliver.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/queues/{queue}` | Deliver one change notification |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Malformed change notification" } }
//! ```
//!
//! | Code | Status | Meaning |
//! |------|--------|---------|
//! | `bad_request` | 400 | The body is not a change notification; do not redeliver |
//! | `not_found` | 404 | No such queue |
//! | `handler_failed` | 500 | Handling failed; the index is unchanged |
//! | `unavailable` | 503 | The service is stopping or stopped |
//!
//! A successful delivery answers with the [`Outcome`], e.g.
//! `{"outcome": "indexed", "id": "L2Zjcm..."}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::events::{decode_notification, Delivery, EventSource};
use crate::router::Outcome;

#[derive(Clone)]
struct AppState {
    queue: Arc<str>,
    deliveries: mpsc::Sender<Delivery>,
}

/// Event source fed by `POST /queues/{queue}`.
///
/// Deliveries are handed over one at a time; a request waits until the
/// previous one has been taken by the service.
pub struct WebhookSource {
    addr: SocketAddr,
    queue: String,
    deliveries: mpsc::Receiver<Delivery>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl WebhookSource {
    /// Bind `addr` and start accepting deliveries for `queue`.
    pub async fn bind(addr: &str, queue: impl Into<String>) -> Result<Self> {
        let queue = queue.into();
        let (tx, rx) = mpsc::channel(1);
        let state = AppState {
            queue: Arc::from(queue.as_str()),
            deliveries: tx,
        };

        let app = Router::new()
            .route("/queues/{queue}", post(handle_delivery))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let task = tokio::spawn(async move { server.await });

        tracing::info!(%addr, queue = %queue, "Webhook listening");

        Ok(Self {
            addr,
            queue,
            deliveries: rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl EventSource for WebhookSource {
    fn describe(&self) -> String {
        format!("webhook:http://{}/queues/{}", self.addr, self.queue)
    }

    async fn recv(&mut self) -> Result<Option<Delivery>> {
        Ok(self.deliveries.recv().await)
    }

    /// Refuse further deliveries, answer queued ones with `503` and stop the
    /// listener once open requests have completed.
    async fn close(&mut self) -> Result<()> {
        self.deliveries.close();
        while let Ok(pending) = self.deliveries.try_recv() {
            // Dropping the ack makes the waiting request answer `unavailable`.
            drop(pending);
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .context("Webhook server task panicked")?
                .context("Webhook server failed")?;
            tracing::info!(addr = %self.addr, "Webhook closed");
        }
        Ok(())
    }
}

/// `POST /queues/{queue}`: hand one notification to the service and wait
/// for its outcome.
async fn handle_delivery(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    body: String,
) -> Result<Json<Outcome>, AppError> {
    if queue != *state.queue {
        return Err(not_found(format!("unknown queue: {}", queue)));
    }

    let event = decode_notification(&body).map_err(|e| bad_request(format!("{:#}", e)))?;

    let (ack_tx, ack_rx) = oneshot::channel();
    state
        .deliveries
        .send(Delivery::with_ack(event, ack_tx))
        .await
        .map_err(|_| unavailable("sync service is not accepting events"))?;

    match ack_rx.await {
        Ok(Ok(outcome)) => Ok(Json(outcome)),
        Ok(Err(message)) => Err(handler_failed(message)),
        Err(_) => Err(unavailable("sync service stopped before handling the event")),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn handler_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "handler_failed".to_string(),
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable".to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use serde_json::{json, Value};

    fn notification(uri: &str) -> String {
        json!({
            "id": uri,
            "type": ["http://oapass.org/ns/pass#Grant"],
            "wasGeneratedBy": { "type": ["http://fedora.info/definitions/v4/event#ResourceDeletion"] }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let mut source = WebhookSource::bind("127.0.0.1:0", "repository").await.unwrap();
        let url = format!("http://{}/health", source.local_addr());

        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");

        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unknown_queue_and_bad_body() {
        let mut source = WebhookSource::bind("127.0.0.1:0", "repository").await.unwrap();
        let base = format!("http://{}", source.local_addr());
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/queues/other", base))
            .body(notification("http://h/x"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("{}/queues/repository", base))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");

        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_waits_for_ack() {
        let mut source = WebhookSource::bind("127.0.0.1:0", "repository").await.unwrap();
        let url = format!("http://{}/queues/repository", source.local_addr());

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(url)
                .body(notification("http://h/fcrepo/a"))
                .send()
                .await
                .unwrap()
        });

        let delivery = source.recv().await.unwrap().unwrap();
        assert_eq!(delivery.event().action(), Action::Deleted);
        delivery.settle(Err("index unreachable".to_string()));

        let resp = request.await.unwrap();
        assert_eq!(resp.status(), 500);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "handler_failed");
        assert_eq!(body["error"]["message"], "index unreachable");

        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_answers_pending_delivery_unavailable() {
        let mut source = WebhookSource::bind("127.0.0.1:0", "repository").await.unwrap();
        let url = format!("http://{}/queues/repository", source.local_addr());

        let request = tokio::spawn(async move {
            reqwest::Client::new()
                .post(url)
                .body(notification("http://h/fcrepo/a"))
                .send()
                .await
                .unwrap()
        });

        // Wait until the request has been queued.
        while source.deliveries.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        source.close().await.unwrap();
        let resp = request.await.unwrap();
        assert_eq!(resp.status(), 503);
    }
}
