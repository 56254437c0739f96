use anyhow::Result;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;

/// In-process counters the heartbeat reports on. Nothing here is exported.
pub struct Metrics {
    ticks: AtomicU64,
    records: AtomicU64,
    acquisition_errors: AtomicU64,
    auth_errors: AtomicU64,
    store_errors: AtomicU64,
    last_record: Mutex<Option<Instant>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            records: AtomicU64::new(0),
            acquisition_errors: AtomicU64::new(0),
            auth_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            last_record: Mutex::new(None),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_record.lock() {
            *guard = Some(Instant::now());
        }
    }

    /// Counts a failed acquisition; authentication failures are also counted
    /// on their own.
    pub fn record_acquisition_error(&self, authentication: bool) {
        self.acquisition_errors.fetch_add(1, Ordering::Relaxed);
        if authentication {
            self.auth_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_record_age = self.last_record.lock().ok().and_then(|guard| {
            guard.map(|instant| Instant::now().saturating_duration_since(instant))
        });
        HealthSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            acquisition_errors: self.acquisition_errors.load(Ordering::Relaxed),
            auth_errors: self.auth_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            last_record_age,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub ticks: u64,
    pub records: u64,
    pub acquisition_errors: u64,
    pub auth_errors: u64,
    pub store_errors: u64,
    pub last_record_age: Option<Duration>,
}

impl HealthSnapshot {
    /// True when records have stopped arriving for longer than `threshold`.
    /// A run that has not written anything yet is idle once it has ticked.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        match self.last_record_age {
            Some(age) => age > threshold,
            None => self.ticks > 0,
        }
    }
}

pub async fn monitor_health(
    service_name: Arc<String>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
    idle_threshold: Duration,
) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(60));
    // first tick fires immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let snapshot = metrics.snapshot();
                tracing::info!(
                    service = %service_name,
                    ticks = snapshot.ticks,
                    records = snapshot.records,
                    acquisition_errors = snapshot.acquisition_errors,
                    auth_errors = snapshot.auth_errors,
                    store_errors = snapshot.store_errors,
                    "health heartbeat"
                );
                if snapshot.is_idle(idle_threshold) {
                    tracing::warn!(
                        service = %service_name,
                        idle_seconds = ?snapshot.last_record_age.map(|age| age.as_secs_f64()),
                        "no record written in the last {} seconds",
                        idle_threshold.as_secs()
                    );
                }
            }
        }
    }
    Ok(())
}
