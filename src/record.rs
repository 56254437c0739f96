use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// JSON object as returned by the router for a single status section.
pub type Section = Map<String, Value>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("line is not a valid stats record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connected_devices is {declared} but {actual} clients were recorded")]
    ClientCountMismatch { declared: usize, actual: usize },
}

/// Everything fetched from the router during one tick, before it is stamped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouterSnapshot {
    pub firmware: Section,
    pub status: Section,
    pub ipv4_status: Section,
    pub clients: Vec<Section>,
}

/// One polled reading, persisted as a single self-contained JSON line.
///
/// Fields are private so a record cannot change after it has been built;
/// `connected_devices` is always derived from `clients`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    timestamp: DateTime<Utc>,
    firmware: Section,
    status: Section,
    ipv4_status: Section,
    connected_devices: usize,
    clients: Vec<Section>,
}

impl StatsRecord {
    pub fn new(timestamp: DateTime<Utc>, snapshot: RouterSnapshot) -> Self {
        let RouterSnapshot {
            firmware,
            status,
            ipv4_status,
            clients,
        } = snapshot;
        Self {
            timestamp,
            firmware,
            status,
            ipv4_status,
            connected_devices: clients.len(),
            clients,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn firmware(&self) -> &Section {
        &self.firmware
    }

    pub fn status(&self) -> &Section {
        &self.status
    }

    pub fn ipv4_status(&self) -> &Section {
        &self.ipv4_status
    }

    pub fn connected_devices(&self) -> usize {
        self.connected_devices
    }

    pub fn clients(&self) -> &[Section] {
        &self.clients
    }

    pub fn to_persistence_line(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one stored line, rejecting records whose client count disagrees
    /// with `connected_devices`.
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n');
        let record: Self = serde_json::from_str(trimmed)?;
        if record.connected_devices != record.clients.len() {
            return Err(RecordError::ClientCountMismatch {
                declared: record.connected_devices,
                actual: record.clients.len(),
            });
        }
        Ok(record)
    }
}

/// Hands out strictly increasing UTC timestamps even when the wall clock
/// stalls or steps backwards between two calls.
#[derive(Debug, Default)]
pub struct Stamper {
    last: Option<DateTime<Utc>>,
}

impl Stamper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> DateTime<Utc> {
        self.next_from(Utc::now())
    }

    fn next_from(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}
