//! Service lifecycle: startup, the consume loop, and shutdown.
//!
//! [`SyncService::start`] builds the shared HTTP client, bootstraps the
//! index (fatal on failure) and wires the gateways into an
//! [`EventRouter`]. Once it returns the service is running; [`run`]
//! consumes an [`EventSource`] one delivery at a time and [`stop`] moves
//! the service to its terminal stopped state.
//!
//! Shutdown is only observed between deliveries, so an event that is being
//! handled always runs to completion before its acknowledgment is settled.
//! Dropping the router releases the connection pool once the last in-flight
//! handler lets go of it.
//!
//! [`run`]: SyncService::run
//! [`stop`]: SyncService::stop

use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::Config;
use crate::error::ServiceError;
use crate::events::{Delivery, EventSource};
use crate::index::{DocumentIndex, ElasticIndex};
use crate::models::ChangeEvent;
use crate::repository::{Credentials, HttpRepository, ResourceFetcher};
use crate::router::{EventRouter, Outcome};
use crate::schema::IndexSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
}

/// Counts of what a [`SyncService::run`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub received: u64,
    pub indexed: u64,
    pub deleted: u64,
    pub tombstoned: u64,
    pub ignored: u64,
    pub failed: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Ignored => self.ignored += 1,
            Outcome::Indexed { .. } => self.indexed += 1,
            Outcome::Tombstoned => self.tombstoned += 1,
            Outcome::Deleted { .. } => self.deleted += 1,
        }
    }
}

/// Build the HTTP client shared by both gateways.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!("index-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Keeps the search index in step with repository change events.
pub struct SyncService<F = HttpRepository, I = ElasticIndex> {
    router: RwLock<Option<Arc<EventRouter<F, I>>>>,
}

impl SyncService<HttpRepository, ElasticIndex> {
    /// Construct the gateways and bootstrap the index.
    ///
    /// # Errors
    ///
    /// Any bootstrap failure. The service never reaches the running state
    /// against a schema it could not establish.
    pub async fn start(config: &Config) -> Result<Self> {
        let client = build_http_client(config)?;

        let index = ElasticIndex::connect(client.clone(), &config.index.url, &config.schema_source())
            .await
            .context("Index bootstrap failed")?;

        let repository = HttpRepository::new(
            client,
            Credentials::new(&config.repository.user, &config.repository.password),
        );

        tracing::info!(index = %index.root(), type_prefix = %config.events.allowed_type_prefix, "Sync service started");

        let router = EventRouter::new(
            config.events.allowed_type_prefix.clone(),
            index.schema(),
            repository,
            index,
        );
        Ok(Self::with_router(router))
    }
}

impl<F, I> SyncService<F, I>
where
    F: ResourceFetcher,
    I: DocumentIndex,
{
    /// A running service over an already-wired router.
    pub fn with_router(router: EventRouter<F, I>) -> Self {
        Self {
            router: RwLock::new(Some(Arc::new(router))),
        }
    }

    pub fn state(&self) -> ServiceState {
        match *self.router.read().unwrap_or_else(PoisonError::into_inner) {
            Some(_) => ServiceState::Running,
            None => ServiceState::Stopped,
        }
    }

    /// The index schema, while running.
    pub fn schema(&self) -> Option<Arc<IndexSchema>> {
        self.current().map(|router| router.schema())
    }

    fn current(&self) -> Option<Arc<EventRouter<F, I>>> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle a single event.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotRunning`] after [`stop`](Self::stop); otherwise
    /// whatever the router propagates.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<Outcome> {
        let router = self.current().ok_or(ServiceError::NotRunning)?;
        router.route(event).await
    }

    /// Consume `source` until it is exhausted, `shutdown` resolves, or the
    /// service is stopped. The subscription is closed on every exit path.
    pub async fn run<S, Sh>(&self, source: &mut S, shutdown: Sh) -> Result<RunSummary>
    where
        S: EventSource + ?Sized,
        Sh: Future<Output = ()>,
    {
        tracing::info!(source = %source.describe(), "Started listening");

        let result = self.consume(source, shutdown).await;
        let closed = source.close().await;

        let summary = result?;
        closed.with_context(|| format!("Failed to close {}", source.describe()))?;

        tracing::info!(
            received = summary.received,
            indexed = summary.indexed,
            deleted = summary.deleted,
            tombstoned = summary.tombstoned,
            ignored = summary.ignored,
            failed = summary.failed,
            "Stopped listening"
        );
        Ok(summary)
    }

    async fn consume<S, Sh>(&self, source: &mut S, shutdown: Sh) -> Result<RunSummary>
    where
        S: EventSource + ?Sized,
        Sh: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();

        while self.state() == ServiceState::Running {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                next = source.recv() => next?,
            };

            let Some(delivery) = next else {
                tracing::info!("Event source exhausted");
                break;
            };

            summary.received += 1;
            self.dispatch(delivery, &mut summary).await;
        }

        Ok(summary)
    }

    async fn dispatch(&self, delivery: Delivery, summary: &mut RunSummary) {
        match self.handle(delivery.event()).await {
            Ok(outcome) => {
                summary.record(&outcome);
                delivery.settle(Ok(outcome));
            }
            Err(e) => {
                summary.failed += 1;
                let message = format!("{:#}", e);
                tracing::error!(uri = delivery.event().resource_uri(), error = %message, "Failed to handle event");
                delivery.settle(Err(message));
            }
        }
    }

    /// Move to the terminal stopped state.
    ///
    /// Handlers already in flight keep their router and finish; later calls
    /// to [`handle`](Self::handle) are refused.
    pub fn stop(&self) {
        let previous = self
            .router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::info!("Sync service stopped");
        }
    }
}
