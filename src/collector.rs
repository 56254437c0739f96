use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::record::{RouterSnapshot, Stamper, StatsRecord};
use crate::router::{RouterClient, RouterError};
use crate::store::{DataStore, StoreError};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub service_name: Arc<String>,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub max_consecutive_auth_failures: Option<u32>,
}

impl CollectorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            service_name: Arc::new(config.service_name.clone()),
            interval: config.collection_interval(),
            request_timeout: config.request_timeout(),
            max_consecutive_auth_failures: config.max_consecutive_auth_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Polling,
    Sleeping,
    Stopped,
}

#[derive(Debug)]
pub enum TickOutcome {
    Recorded(DateTime<Utc>),
    AcquisitionFailed(RouterError),
    StoreFailed(StoreError),
}

impl TickOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, TickOutcome::Recorded(_))
    }
}

/// Polls the router on a fixed pause and appends one record per successful
/// tick.
///
/// The pause starts when a tick has finished, so two ticks never start closer
/// together than `interval` plus the time the earlier tick took. A failed tick
/// writes nothing and still waits the full interval before the next attempt.
pub struct Collector {
    router: Arc<dyn RouterClient>,
    store: Arc<dyn DataStore>,
    metrics: Arc<Metrics>,
    settings: CollectorSettings,
    stamper: Stamper,
    state: CollectorState,
    ticks: u64,
    consecutive_auth_failures: u32,
}

impl Collector {
    pub fn new(
        router: Arc<dyn RouterClient>,
        store: Arc<dyn DataStore>,
        metrics: Arc<Metrics>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            router,
            store,
            metrics,
            settings,
            stamper: Stamper::new(),
            state: CollectorState::Idle,
            ticks: 0,
            consecutive_auth_failures: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Shutdown interrupts the router calls and the pause between ticks, never
    /// a store write. Returns an error only when authentication failures hit
    /// the configured escalation limit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            service = %self.settings.service_name,
            interval_seconds = self.settings.interval.as_secs_f64(),
            store = %self.store.describe(),
            "collection loop starting"
        );
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            self.state = CollectorState::Polling;
            let acquired = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
                acquired = self.acquire() => acquired,
            };
            self.settle(acquired).await;

            if let Some(limit) = self.settings.max_consecutive_auth_failures {
                if self.consecutive_auth_failures >= limit {
                    tracing::error!(
                        service = %self.settings.service_name,
                        failures = self.consecutive_auth_failures,
                        "giving up after repeated authentication failures"
                    );
                    break Err(anyhow::anyhow!(
                        "router rejected credentials {} times in a row",
                        self.consecutive_auth_failures
                    ));
                }
            }

            self.state = CollectorState::Sleeping;
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break Ok(()),
                _ = sleep(self.settings.interval) => {}
            }
        };
        self.state = CollectorState::Stopped;
        tracing::info!(
            service = %self.settings.service_name,
            ticks = self.ticks,
            "collection loop stopped"
        );
        result
    }

    /// Polls once and stores the result, without waiting afterwards.
    pub async fn tick(&mut self) -> TickOutcome {
        self.state = CollectorState::Polling;
        let acquired = self.acquire().await;
        let outcome = self.settle(acquired).await;
        self.state = CollectorState::Idle;
        outcome
    }

    /// Fetches every section of a snapshot, then logs out. Any failing call
    /// fails the whole acquisition.
    ///
    /// `request_timeout` bounds the four section calls together, not each one.
    /// Logout gets its own `request_timeout` afterwards.
    pub async fn acquire(&self) -> Result<RouterSnapshot, RouterError> {
        let limit = self.settings.request_timeout;
        let fetched = match timeout(limit, self.fetch_snapshot()).await {
            Ok(fetched) => fetched,
            Err(_) => Err(RouterError::Timeout(limit)),
        };
        let logout = match timeout(limit, self.router.logout()).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::Timeout(limit)),
        };
        if let Err(err) = logout {
            tracing::warn!(
                service = %self.settings.service_name,
                error = %err,
                "router logout failed"
            );
        }
        fetched
    }

    async fn fetch_snapshot(&self) -> Result<RouterSnapshot, RouterError> {
        let firmware = self.router.firmware().await?;
        let status = self.router.status().await?;
        let ipv4_status = self.router.ipv4_status().await?;
        let clients = self.router.clients().await?;
        Ok(RouterSnapshot {
            firmware,
            status,
            ipv4_status,
            clients,
        })
    }

    async fn settle(&mut self, acquired: Result<RouterSnapshot, RouterError>) -> TickOutcome {
        self.ticks += 1;
        self.metrics.record_tick();
        let snapshot = match acquired {
            Ok(snapshot) => {
                self.consecutive_auth_failures = 0;
                snapshot
            }
            Err(err) => {
                let authentication = err.is_authentication();
                if authentication {
                    self.consecutive_auth_failures += 1;
                }
                self.metrics.record_acquisition_error(authentication);
                tracing::warn!(
                    service = %self.settings.service_name,
                    tick = self.ticks,
                    error_class = err.class(),
                    error = %err,
                    "router poll failed, skipping tick"
                );
                return TickOutcome::AcquisitionFailed(err);
            }
        };

        let record = StatsRecord::new(self.stamper.next(), snapshot);
        match self.store.write(&record).await {
            Ok(()) => {
                self.metrics.record_written();
                tracing::info!(
                    service = %self.settings.service_name,
                    tick = self.ticks,
                    connected_devices = record.connected_devices(),
                    timestamp = %record.timestamp(),
                    "router stats recorded"
                );
                TickOutcome::Recorded(record.timestamp())
            }
            Err(err) => {
                self.metrics.record_store_error();
                tracing::error!(
                    service = %self.settings.service_name,
                    tick = self.ticks,
                    store = %self.store.describe(),
                    error = %err,
                    "store write failed, record dropped"
                );
                TickOutcome::StoreFailed(err)
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
