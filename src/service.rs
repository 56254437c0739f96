use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::{signal, sync::watch};

use crate::collector::{Collector, CollectorSettings, TickOutcome};
use crate::config::AppConfig;
use crate::metrics::{self, Metrics};
use crate::router::{HttpRouterClient, RouterClient};
use crate::simulator::SimulatedRouter;
use crate::store::{self, DataStore};

/// Which router the service talks to.
pub enum RouterSource {
    Http,
    Simulated,
    Custom(Arc<dyn RouterClient>),
}

pub struct Service {
    config: AppConfig,
    source: RouterSource,
}

impl Service {
    pub fn new(config: AppConfig, source: RouterSource) -> Self {
        Self { config, source }
    }

    /// Collects until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let name = self.config.service_name.clone();
        self.run_until(async move {
            match wait_for_signal().await {
                Ok(received) => tracing::info!(
                    service = %name,
                    signal = received,
                    "signal received, requesting shutdown"
                ),
                Err(err) => tracing::error!(
                    service = %name,
                    error = %err,
                    "signal handling failed, shutting down"
                ),
            }
        })
        .await
    }

    /// Collects until `stop` completes. The store is closed exactly once on
    /// every path out of here, including a collector error.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service_name = Arc::new(self.config.service_name.clone());
        let store = store::open_store(&self.config)
            .await
            .context("prepare data store")?;
        let router = match self.router() {
            Ok(router) => router,
            Err(err) => {
                close_store(&service_name, store.as_ref()).await;
                return Err(err);
            }
        };
        let metrics = Arc::new(Metrics::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health_handle = tokio::spawn(metrics::monitor_health(
            service_name.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
            self.config.idle_threshold(),
        ));
        let stop_handle = {
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                stop.await;
                shutdown_tx.send(true).ok();
            })
        };

        let mut collector = Collector::new(
            router,
            store.clone(),
            metrics,
            CollectorSettings::from_config(&self.config),
        );
        let collector_result = collector.run(shutdown_rx).await;

        shutdown_tx.send(true).ok();
        stop_handle.abort();
        let health_result = health_handle.await;
        close_store(&service_name, store.as_ref()).await;

        collector_result?;
        health_result.context("health monitor panicked")??;
        Ok(())
    }

    /// Polls a single time, then closes the store. Fails when nothing was
    /// recorded.
    pub async fn run_once(self) -> Result<()> {
        let service_name = Arc::new(self.config.service_name.clone());
        let store = store::open_store(&self.config)
            .await
            .context("prepare data store")?;
        let outcome = match self.router() {
            Ok(router) => {
                let mut collector = Collector::new(
                    router,
                    store.clone(),
                    Arc::new(Metrics::new()),
                    CollectorSettings::from_config(&self.config),
                );
                Ok(collector.tick().await)
            }
            Err(err) => Err(err),
        };
        close_store(&service_name, store.as_ref()).await;

        match outcome? {
            TickOutcome::Recorded(timestamp) => {
                tracing::info!(service = %service_name, %timestamp, "single poll recorded");
                Ok(())
            }
            TickOutcome::AcquisitionFailed(err) => bail!("router poll failed: {err}"),
            TickOutcome::StoreFailed(err) => bail!("store write failed: {err}"),
        }
    }

    fn router(&self) -> Result<Arc<dyn RouterClient>> {
        Ok(match &self.source {
            RouterSource::Http => {
                let password = self.config.router_password.clone().unwrap_or_default();
                let client = HttpRouterClient::new(
                    &self.config.router_address,
                    self.config.router_username.clone(),
                    password,
                    self.config.request_timeout(),
                )
                .context("build router client")?;
                tracing::info!(
                    service = %self.config.service_name,
                    router = %client.base_url(),
                    "polling router over http"
                );
                Arc::new(client)
            }
            RouterSource::Simulated => {
                tracing::info!(service = %self.config.service_name, "polling simulated router");
                Arc::new(SimulatedRouter::new())
            }
            RouterSource::Custom(router) => router.clone(),
        })
    }
}

async fn close_store(service_name: &str, store: &dyn DataStore) {
    match store.close().await {
        Ok(()) => tracing::info!(
            service = %service_name,
            store = %store.describe(),
            "data store closed"
        ),
        Err(err) => tracing::error!(
            service = %service_name,
            store = %store.describe(),
            error = %err,
            "failed to close data store"
        ),
    }
}

async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut terminate =
            unix_signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res.context("listen for ctrl-c")?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("listen for ctrl-c")?;
        Ok("ctrl-c")
    }
}
