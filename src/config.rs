use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => bail!("datastore must be 'memory' or 'file', got '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_directory: Option<String>,
    #[serde(default)]
    pub router_address: String,
    #[serde(default = "default_router_username")]
    pub router_username: String,
    #[serde(default, skip_serializing)]
    pub router_password: Option<String>,
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_seconds: u64,
    /// Limit for fetching a whole snapshot, all section calls together.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_datastore")]
    pub datastore: StoreKind,
    #[serde(default = "default_data_file_path")]
    pub data_file_path: String,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_seconds: u64,
    #[serde(default)]
    pub max_consecutive_auth_failures: Option<u32>,
}

fn default_service_name() -> String {
    "router-stats".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_router_username() -> String {
    "admin".to_string()
}

fn default_collection_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_datastore() -> StoreKind {
    StoreKind::File
}

fn default_data_file_path() -> String {
    "./data/router_stats.jsonl".to_string()
}

fn default_idle_threshold_secs() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_directory: None,
            router_address: String::new(),
            router_username: default_router_username(),
            router_password: None,
            collection_interval_seconds: default_collection_interval_secs(),
            request_timeout_seconds: default_request_timeout_secs(),
            datastore: default_datastore(),
            data_file_path: default_data_file_path(),
            idle_threshold_seconds: default_idle_threshold_secs(),
            max_consecutive_auth_failures: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> &'static str {
        "config/router-stats.toml"
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read configuration from {}", path_ref.display()))?;
        Self::from_toml_str(&raw).with_context(|| {
            format!("failed to parse configuration from {}", path_ref.display())
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        if config.service_name.trim().is_empty() {
            config.service_name = default_service_name();
        }
        Ok(config)
    }

    /// Overlays `ROUTER_IP`, `ROUTER_USERNAME`, `ROUTER_PASSWORD`,
    /// `COLLECTION_INTERVAL`, `DATASTORE_TYPE` and `DATA_FILE_PATH`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(address) = get("ROUTER_IP") {
            self.router_address = address;
        }
        if let Some(username) = get("ROUTER_USERNAME") {
            self.router_username = username;
        }
        if let Some(password) = get("ROUTER_PASSWORD") {
            self.router_password = Some(password);
        }
        if let Some(interval) = get("COLLECTION_INTERVAL") {
            self.collection_interval_seconds = interval
                .trim()
                .parse()
                .with_context(|| {
                    format!("COLLECTION_INTERVAL '{interval}' is not a whole number of seconds")
                })?;
        }
        if let Some(kind) = get("DATASTORE_TYPE") {
            self.datastore = kind.parse()?;
        }
        if let Some(path) = get("DATA_FILE_PATH") {
            self.data_file_path = path;
        }
        Ok(())
    }

    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Checks the settings needed before the collector may start. Router
    /// credentials are only required when talking to a real router.
    pub fn validate(&self, require_router: bool) -> Result<()> {
        if self.collection_interval_seconds == 0 {
            bail!("collection_interval_seconds must be a positive number of seconds");
        }
        if self.request_timeout_seconds == 0 {
            bail!("request_timeout_seconds must be a positive number of seconds");
        }
        if self.datastore == StoreKind::File && self.data_file_path.trim().is_empty() {
            bail!("data_file_path must be set when datastore = \"file\"");
        }
        if self.max_consecutive_auth_failures == Some(0) {
            bail!("max_consecutive_auth_failures must be at least 1 when set");
        }
        if require_router {
            if self.router_address.trim().is_empty() {
                bail!("router_address is required (set it in the config file or ROUTER_IP)");
            }
            if self
                .router_password
                .as_deref()
                .map_or(true, |password| password.is_empty())
            {
                bail!("router password is required (set ROUTER_PASSWORD)");
            }
        }
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_seconds)
    }

    pub fn example_toml() -> &'static str {
        r#"service_name = "router-stats"
log_level = "info"
# log_directory = "./logs"
router_address = "192.168.0.1"
router_username = "admin"
# router_password is read from ROUTER_PASSWORD
collection_interval_seconds = 60
# covers all section requests of one poll together
request_timeout_seconds = 10
datastore = "file"
data_file_path = "./data/router_stats.jsonl"
idle_threshold_seconds = 300
# max_consecutive_auth_failures = 10
"#
    }
}
