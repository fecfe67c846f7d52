// netsvc.rs

use anyhow::bail;
use esp_idf_svc::{
    mdns::EspMdns,
    nvs::{EspNvs, NvsDefault},
    sntp::{EspSntp, SyncStatus},
};
use log::*;

use crate::*;

const CONFIG_KEY: &str = "cfg";
const SSID_KEY: &str = "wifi_ssid";
const PASS_KEY: &str = "wifi_pass";

const STR_BUF_SIZE: usize = 96;

/// NVS-backed settings: the config as one CRC-checked blob, the
/// credentials as two independent string keys.
pub struct NvsSettings {
    nvs: EspNvs<NvsDefault>,
}

unsafe impl Send for NvsSettings {}
unsafe impl Sync for NvsSettings {}

impl NvsSettings {
    pub fn new(nvs: EspNvs<NvsDefault>) -> Self {
        Self { nvs }
    }

    fn read_str(&mut self, key: &str) -> anyhow::Result<String> {
        let mut buf = [0u8; STR_BUF_SIZE];
        match self.nvs.get_str(key, &mut buf)? {
            Some(s) => Ok(s.trim_end_matches('\0').to_string()),
            None => Ok(String::new()),
        }
    }
}

impl SettingsStore for NvsSettings {
    fn load_config(&mut self) -> Option<DeviceConfig> {
        let mut buf = [0u8; NVS_BUF_SIZE];
        match self.nvs.get_raw(CONFIG_KEY, &mut buf) {
            Ok(Some(b)) => {
                info!("Got {sz} bytes from nvs. Parsing config...", sz = b.len());
                DeviceConfig::from_bytes(b)
            }
            Ok(None) => {
                error!("Nvs config key not found");
                None
            }
            Err(e) => {
                error!("Nvs read error {e:?}");
                None
            }
        }
    }

    fn save_config(&mut self, config: &DeviceConfig) -> anyhow::Result<()> {
        let bytes = config.to_bytes()?;
        info!("Encoded config to {sz} bytes. Saving to nvs...", sz = bytes.len());
        self.nvs.set_raw(CONFIG_KEY, &bytes)?;
        Ok(())
    }

    fn load_credentials(&mut self) -> anyhow::Result<Credentials> {
        Ok(Credentials {
            ssid: self.read_str(SSID_KEY)?,
            pass: self.read_str(PASS_KEY)?,
        })
    }

    fn save_credentials(&mut self, creds: &Credentials) -> anyhow::Result<()> {
        self.nvs.set_str(SSID_KEY, &creds.ssid)?;
        self.nvs.set_str(PASS_KEY, &creds.pass)?;
        Ok(())
    }
}

/// SNTP-backed clock sync. The service is created on the first attempt
/// and each attempt after that is a status poll.
#[derive(Default)]
pub struct SntpTimeSync {
    sntp: Option<EspSntp<'static>>,
}

impl SntpTimeSync {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSync for SntpTimeSync {
    fn attempt(&mut self) -> anyhow::Result<()> {
        if self.sntp.is_none() {
            self.sntp = Some(EspSntp::new_default()?);
        }
        let Some(sntp) = self.sntp.as_ref() else {
            bail!("SNTP service unavailable");
        };
        match sntp.get_sync_status() {
            SyncStatus::Completed => Ok(()),
            other => bail!("SNTP not synchronized yet: {other:?}"),
        }
    }
}

/// mDNS advertisement; the daemon must stay alive for as long as the
/// name should resolve.
#[derive(Default)]
pub struct MdnsDiscovery {
    mdns: Option<EspMdns>,
}

impl MdnsDiscovery {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Discovery for MdnsDiscovery {
    fn announce(&mut self, name: &str, port: u16) -> anyhow::Result<()> {
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(name)?;
        mdns.add_service(Some(name), "_http", "_tcp", port, &[])?;
        info!("mDNS announcing {name}.local port {port}");
        self.mdns = Some(mdns);
        Ok(())
    }
}

// EOF
