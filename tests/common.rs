#![allow(dead_code)]

use async_trait::async_trait;
use router_stats::record::Section;
use router_stats::{DataStore, RouterClient, RouterError, StatsRecord, StoreError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::subscriber::DefaultGuard;

type Script = Box<dyn Fn(usize) -> Option<RouterError> + Send + Sync>;

/// Router double that fails on the ticks its script picks and remembers when
/// every tick started (tokio clock, so paused-time tests can compare them).
pub struct ScriptedRouter {
    script: Script,
    work: Duration,
    tick: AtomicUsize,
    logouts: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl ScriptedRouter {
    pub fn healthy() -> Self {
        Self::with_script(|_| None)
    }

    /// `script(tick)` is consulted from `status()`; ticks count from 1.
    pub fn with_script<F>(script: F) -> Self
    where
        F: Fn(usize) -> Option<RouterError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            work: Duration::ZERO,
            tick: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    /// Makes every `firmware()` call take `work` on the tokio clock.
    pub fn taking(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn tick_starts(&self) -> Vec<Instant> {
        self.starts.lock().expect("starts lock").clone()
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouterClient for ScriptedRouter {
    async fn firmware(&self) -> Result<Section, RouterError> {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        self.starts.lock().expect("starts lock").push(Instant::now());
        if !self.work.is_zero() {
            sleep(self.work).await;
        }
        Ok(section(json!({"version": format!("1.0.{tick}"), "hardware": "test-rig"})))
    }

    async fn status(&self) -> Result<Section, RouterError> {
        let tick = self.tick.load(Ordering::SeqCst);
        match (self.script)(tick) {
            Some(err) => Err(err),
            None => Ok(section(json!({"online": true, "tick": tick}))),
        }
    }

    async fn ipv4_status(&self) -> Result<Section, RouterError> {
        Ok(section(json!({"wan_ipv4_ipaddr": "203.0.113.9"})))
    }

    async fn clients(&self) -> Result<Vec<Section>, RouterError> {
        Ok(vec![
            section(json!({"macaddr": "AA-BB-CC-DD-EE-01", "hostname": "laptop"})),
            section(json!({"macaddr": "AA-BB-CC-DD-EE-02", "hostname": "phone"})),
        ])
    }

    async fn logout(&self) -> Result<(), RouterError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose writes always fail, as if the disk had filled up.
#[derive(Default)]
pub struct FullDiskStore {
    attempts: AtomicUsize,
}

impl FullDiskStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for FullDiskStore {
    fn describe(&self) -> String {
        "full-disk".to_string()
    }

    async fn write(&self, _record: &StatsRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io {
            context: "failed to write record".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "No space left on device"),
        })
    }

    async fn read_all(&self) -> Result<Vec<StatsRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn section(value: Value) -> Section {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Collects formatted log output for the current thread while the returned
/// guard is alive.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().expect("log buffer lock");
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("log buffer lock")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
