// wifi.rs

use std::net::Ipv4Addr;

use anyhow::anyhow;
use embedded_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration,
};
use esp_idf_svc::{
    ipv4,
    netif::{self, EspNetif},
    wifi::{EspWifi, WifiDriver},
};
use log::*;

use crate::*;

/// Station-join and provisioning-AP control over the ESP Wi-Fi stack.
/// Join progress is observed by polling, matching the bootstrap loop.
pub struct EspNetworkControl<'a> {
    wifi: EspWifi<'a>,
    myid: String,
}

impl<'a> EspNetworkControl<'a> {
    pub fn new(wifidriver: WifiDriver<'a>, config: &DeviceConfig) -> anyhow::Result<Self> {
        let ipv4_config = if config.v4dhcp {
            ipv4::ClientConfiguration::DHCP(ipv4::DHCPClientSettings::default())
        } else {
            ipv4::ClientConfiguration::Fixed(ipv4::ClientSettings {
                ip: config.v4addr,
                subnet: ipv4::Subnet {
                    gateway: config.v4gw,
                    mask: ipv4::Mask(config.v4mask),
                },
                dns: None,
                secondary_dns: None,
            })
        };

        let net_if = EspNetif::new_with_conf(&netif::NetifConfiguration {
            ip_configuration: ipv4::Configuration::Client(ipv4_config),
            ..netif::NetifConfiguration::wifi_default_client()
        })?;

        let mac = net_if.get_mac()?;
        let myid = format!(
            "esp32telem-{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5],
        );

        let wifi = EspWifi::wrap_all(wifidriver, net_if, EspNetif::new(netif::NetifStack::Ap)?)?;
        Ok(Self { wifi, myid })
    }

    pub fn myid(&self) -> &str {
        &self.myid
    }

    pub fn ip_addr(&self) -> Option<Ipv4Addr> {
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }
}

impl NetworkControl for EspNetworkControl<'_> {
    fn start_join(&mut self, creds: &Credentials) -> anyhow::Result<()> {
        info!("WiFi setting credentials...");
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: creds
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("SSID too long"))?,
                password: creds
                    .pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("secret too long"))?,
                ..Default::default()
            }))?;

        info!("WiFi driver starting...");
        self.wifi.start()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_joined(&mut self) -> anyhow::Result<bool> {
        if !self.wifi.is_connected()? {
            return Ok(false);
        }
        // associated is not joined; wait for an address as well
        let ip_info = self.wifi.sta_netif().get_ip_info()?;
        Ok(!ip_info.ip.is_unspecified())
    }

    fn start_access_point(&mut self) -> anyhow::Result<()> {
        let _ = self.wifi.disconnect();
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: PROVISION_SSID
                    .try_into()
                    .map_err(|_| anyhow!("AP SSID too long"))?,
                auth_method: AuthMethod::None,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        info!("Access point {PROVISION_SSID:?} up");
        Ok(())
    }
}

// EOF
