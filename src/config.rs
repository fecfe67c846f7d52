// config.rs

use std::net;

use anyhow::bail;
use askama::Template;
use crc::{CRC_32_ISCSI, Crc};
use log::*;
use serde::{Deserialize, Serialize};

pub const NVS_BUF_SIZE: usize = 256;

const DEFAULT_API_PORT: u16 = 80;
const DEFAULT_TICK_INTERVAL_MS: u64 = 3000;
const DEFAULT_JOIN_RETRIES: u32 = 10;
const DEFAULT_MDNS_NAME: &str = "esp32telem";
const DEFAULT_LOG_PATH: &str = "/sdcard/readings.jsonl";

/// SSID advertised while the device waits to be provisioned. Open network,
/// fixed name so the operator can find it.
pub const PROVISION_SSID: &str = "esp32telem-setup";

/// Everything the device persists apart from the Wi-Fi credentials,
/// which are stored as two separate values (see [`SettingsStore`]).
#[derive(Clone, Debug, Serialize, Deserialize, Template)]
#[template(path = "index.html.ask", escape = "html")]
pub struct DeviceConfig {
    pub port: u16,
    pub interval_ms: u64,
    pub join_retries: u32,
    pub mdns_name: String,
    pub log_path: String,

    pub v4dhcp: bool,
    pub v4addr: net::Ipv4Addr,
    pub v4mask: u8,
    pub v4gw: net::Ipv4Addr,
    pub dns1: net::Ipv4Addr,
    pub dns2: net::Ipv4Addr,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: option_env!("API_PORT")
                .unwrap_or("-")
                .parse()
                .unwrap_or(DEFAULT_API_PORT),
            interval_ms: DEFAULT_TICK_INTERVAL_MS,
            join_retries: DEFAULT_JOIN_RETRIES,
            mdns_name: DEFAULT_MDNS_NAME.into(),
            log_path: DEFAULT_LOG_PATH.into(),

            v4dhcp: true,
            v4addr: net::Ipv4Addr::new(0, 0, 0, 0),
            v4mask: 0,
            v4gw: net::Ipv4Addr::new(0, 0, 0, 0),
            dns1: net::Ipv4Addr::new(0, 0, 0, 0),
            dns2: net::Ipv4Addr::new(0, 0, 0, 0),
        }
    }
}

impl DeviceConfig {
    /// Decode a persisted config blob, rejecting anything with a bad CRC.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        match postcard::from_bytes_crc32::<DeviceConfig>(b, digest) {
            Ok(c) => Some(c),
            Err(e) => {
                error!("Cannot parse persisted config: {e:?}");
                None
            }
        }
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = [0u8; NVS_BUF_SIZE];
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        match postcard::to_slice_crc32(self, &mut buf, digest) {
            Ok(used) => Ok(used.to_vec()),
            Err(e) => {
                bail!("Cannot encode config to buffer: {e:?}");
            }
        }
    }
}

/// Wi-Fi credentials: read once at boot, written only by the
/// provisioning handler. Empty fields mean "not yet provisioned".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    pub pass: String,
}

impl Credentials {
    pub fn is_provisioned(&self) -> bool {
        !self.ssid.is_empty() && !self.pass.is_empty()
    }
}

/// Persisted settings access. On the device this is NVS: the config as
/// one CRC-checked blob and the credentials as two independent string
/// keys. Hosts get [`MemSettings`].
pub trait SettingsStore: Send + Sync {
    fn load_config(&mut self) -> Option<DeviceConfig>;
    fn save_config(&mut self, config: &DeviceConfig) -> anyhow::Result<()>;
    fn load_credentials(&mut self) -> anyhow::Result<Credentials>;
    fn save_credentials(&mut self, creds: &Credentials) -> anyhow::Result<()>;
}

/// In-memory store backing the host build and the test suite.
#[derive(Debug, Default)]
pub struct MemSettings {
    config: Option<Vec<u8>>,
    ssid: String,
    pass: String,
}

impl SettingsStore for MemSettings {
    fn load_config(&mut self) -> Option<DeviceConfig> {
        self.config.as_deref().and_then(DeviceConfig::from_bytes)
    }

    fn save_config(&mut self, config: &DeviceConfig) -> anyhow::Result<()> {
        self.config = Some(config.to_bytes()?);
        Ok(())
    }

    fn load_credentials(&mut self) -> anyhow::Result<Credentials> {
        Ok(Credentials {
            ssid: self.ssid.clone(),
            pass: self.pass.clone(),
        })
    }

    fn save_credentials(&mut self, creds: &Credentials) -> anyhow::Result<()> {
        self.ssid = creds.ssid.clone();
        self.pass = creds.pass.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_blob_round_trips() {
        let mut config = DeviceConfig::default();
        config.port = 8080;
        config.interval_ms = 1500;
        config.mdns_name = "lab-sensor".into();

        let bytes = config.to_bytes().unwrap();
        assert!(bytes.len() <= NVS_BUF_SIZE);

        let back = DeviceConfig::from_bytes(&bytes).unwrap();
        assert_eq!(back.port, 8080);
        assert_eq!(back.interval_ms, 1500);
        assert_eq!(back.mdns_name, "lab-sensor");
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        let mut bytes = DeviceConfig::default().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(DeviceConfig::from_bytes(&bytes).is_none());
        assert!(DeviceConfig::from_bytes(&[]).is_none());
    }

    #[test]
    fn empty_credentials_are_unprovisioned() {
        assert!(!Credentials::default().is_provisioned());
        let half = Credentials {
            ssid: "net".into(),
            pass: String::new(),
        };
        assert!(!half.is_provisioned());
        let full = Credentials {
            ssid: "net".into(),
            pass: "secret".into(),
        };
        assert!(full.is_provisioned());
    }

    #[test]
    fn mem_settings_keeps_values_separate() {
        let mut store = MemSettings::default();
        assert!(store.load_config().is_none());
        assert!(!store.load_credentials().unwrap().is_provisioned());

        store
            .save_credentials(&Credentials {
                ssid: "net".into(),
                pass: "secret".into(),
            })
            .unwrap();
        store.save_config(&DeviceConfig::default()).unwrap();

        let creds = store.load_credentials().unwrap();
        assert_eq!(creds.ssid, "net");
        assert_eq!(creds.pass, "secret");
        assert!(store.load_config().is_some());
    }
}

// EOF
