use std::path::Path;
use std::time::Duration;

use btleplug::api::BDAddr;
use mac_address::MacAddress;
use serde_derive::Deserialize;

use crate::discovery::SCAN_TIMEOUT;
use crate::lighthouse::DEFAULT_RETRIES;

pub const DEFAULT_CONFIG_FILE: &str = "lighthouse.toml";

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub scan: Option<ScanConfig>,
    pub power: Option<PowerConfig>,
    pub devices: Option<Vec<KnownLighthouse>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PowerConfig {
    pub retries: Option<u32>,
    pub attempt_timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct KnownLighthouse {
    pub address: MacAddress,
    pub name: Option<String>,
}

impl KnownLighthouse {
    pub fn bd_addr(&self) -> BDAddr {
        BDAddr::from(self.address.bytes())
    }
}

impl AppConfig {
    /// Reads `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !required && !path.exists() {
            return Ok(AppConfig::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::de::from_str(&contents)?)
    }

    pub fn scan_timeout(&self) -> Duration {
        self.scan
            .as_ref()
            .and_then(|s| s.timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(SCAN_TIMEOUT)
    }

    pub fn retries(&self) -> u32 {
        self.power
            .as_ref()
            .and_then(|p| p.retries)
            .unwrap_or(DEFAULT_RETRIES)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.power
            .as_ref()
            .and_then(|p| p.attempt_timeout_seconds)
            .map(Duration::from_secs)
    }

    pub fn known_addresses(&self) -> Vec<BDAddr> {
        self.devices
            .iter()
            .flatten()
            .map(KnownLighthouse::bd_addr)
            .collect()
    }
}
