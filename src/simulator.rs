use crate::record::Section;
use crate::router::{RouterClient, RouterError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// In-process stand-in for a router, used for dry runs without hardware.
///
/// Each poll (counted on `firmware`) shifts the client list so successive
/// records differ.
pub struct SimulatedRouter {
    started: Instant,
    polls: AtomicU64,
}

impl SimulatedRouter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            polls: AtomicU64::new(0),
        }
    }

    fn current_poll(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouterClient for SimulatedRouter {
    async fn firmware(&self) -> Result<Section, RouterError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        object(json!({
            "hardware_version": "Archer AX55 v1.0",
            "model": "Archer AX55",
            "firmware_version": "1.1.2 Build 20230322 rel.63024(5553)",
        }))
    }

    async fn status(&self) -> Result<Section, RouterError> {
        object(json!({
            "wan_ipv4_uptime": self.started.elapsed().as_secs(),
            "conn_type": "dhcp",
            "internet_connected": true,
            "cpu_usage": 0.05 * ((self.current_poll() % 10) as f64),
            "mem_usage": 0.42,
        }))
    }

    async fn ipv4_status(&self) -> Result<Section, RouterError> {
        object(json!({
            "wan_macaddr": "50-91-E3-00-00-01",
            "wan_ipv4_ipaddr": "198.51.100.23",
            "wan_ipv4_gateway": "198.51.100.1",
            "lan_ipv4_ipaddr": "192.168.0.1",
            "lan_ipv4_netmask": "255.255.255.0",
        }))
    }

    async fn clients(&self) -> Result<Vec<Section>, RouterError> {
        let count = 2 + self.current_poll() % 4;
        (0..count)
            .map(|i| {
                let wire_type = if i % 2 == 0 { "wireless" } else { "wired" };
                object(json!({
                    "hostname": format!("device-{i}"),
                    "macaddr": format!("AA-BB-CC-DD-EE-{i:02X}"),
                    "ipaddr": format!("192.168.0.{}", 100 + i),
                    "wire_type": wire_type,
                }))
            })
            .collect()
    }
}

fn object(value: Value) -> Result<Section, RouterError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RouterError::Malformed("simulated section is not an object".into())),
    }
}
