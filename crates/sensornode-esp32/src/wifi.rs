//! WiFi radio for ESP32.
//!
//! Wraps `BlockingWifi` so the connectivity manager can scan, join and run
//! the configuration access point. Station and access point modes are
//! exclusive; switching reconfigures the driver.

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, peripheral},
    wifi::{
        AccessPointConfiguration, AccessPointInfo, AuthMethod, BlockingWifi, ClientConfiguration,
        Configuration, EspWifi,
    },
};
use log::{info, warn};
use sensornode_controller::{Radio, RadioError};
use sensornode_core::{Credential, ScanResult, SecurityMode};

fn radio_error(context: &str, e: impl std::fmt::Debug) -> RadioError {
    RadioError(format!("{}: {:?}", context, e))
}

fn security_mode(auth: Option<AuthMethod>) -> SecurityMode {
    match auth {
        Some(AuthMethod::None) => SecurityMode::Open,
        Some(AuthMethod::WEP) => SecurityMode::Wep,
        Some(AuthMethod::WPA) => SecurityMode::WpaPersonal,
        Some(AuthMethod::WPA2Personal) => SecurityMode::Wpa2Personal,
        Some(AuthMethod::WPAWPA2Personal) => SecurityMode::WpaWpa2Personal,
        Some(AuthMethod::WPA3Personal) | Some(AuthMethod::WPA2WPA3Personal) => {
            SecurityMode::Wpa3Personal
        }
        Some(AuthMethod::WPA2Enterprise) => SecurityMode::Wpa2Enterprise,
        _ => SecurityMode::Unknown,
    }
}

fn scan_result(ap: AccessPointInfo) -> ScanResult {
    ScanResult {
        ssid: ap.ssid.to_string(),
        signal_strength: ap.signal_strength,
        channel: ap.channel,
        security_mode: security_mode(ap.auth_method),
    }
}

pub struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
    /// Channel of each network seen in the last scan, used to speed up joins.
    channels: Vec<(String, u8)>,
}

impl EspRadio {
    pub fn new(
        modem: impl peripheral::Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi,
            channels: Vec::new(),
        })
    }

    fn ensure_started(&mut self) -> Result<(), RadioError> {
        let started = self
            .wifi
            .is_started()
            .map_err(|e| radio_error("state query failed", e))?;
        if !started {
            self.wifi
                .start()
                .map_err(|e| radio_error("start failed", e))?;
        }
        Ok(())
    }
}

impl Radio for EspRadio {
    fn activate_station(&mut self) -> Result<(), RadioError> {
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(|e| radio_error("station configuration failed", e))?;
        self.ensure_started()
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        info!("Scanning for WiFi networks...");
        let found: Vec<ScanResult> = self
            .wifi
            .scan()
            .map_err(|e| radio_error("scan failed", e))?
            .into_iter()
            .map(scan_result)
            .collect();
        self.channels = found
            .iter()
            .map(|ap| (ap.ssid.clone(), ap.channel))
            .collect();
        Ok(found)
    }

    fn join(&mut self, credential: &Credential) -> Result<(), RadioError> {
        let auth_method = if credential.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let channel = self
            .channels
            .iter()
            .find(|(ssid, _)| *ssid == credential.ssid)
            .map(|(_, channel)| *channel);

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credential
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError("SSID too long (max 32 chars)".to_string()))?,
                password: credential
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError("password too long (max 64 chars)".to_string()))?,
                channel,
                auth_method,
                ..Default::default()
            }))
            .map_err(|e| radio_error("station configuration failed", e))?;

        info!("Connecting to '{}'...", credential.ssid);
        self.wifi
            .connect()
            .map_err(|e| radio_error("connect failed", e))?;

        info!("Waiting for DHCP lease...");
        self.wifi
            .wait_netif_up()
            .map_err(|e| radio_error("no DHCP lease", e))?;

        if let Ok(ip_info) = self.wifi.wifi().sta_netif().get_ip_info() {
            info!("  IP address: {}", ip_info.ip);
            info!("  Gateway:    {}", ip_info.subnet.gateway);
        }
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn leave(&mut self) -> Result<(), RadioError> {
        if self.is_connected() {
            self.wifi
                .disconnect()
                .map_err(|e| radio_error("disconnect failed", e))?;
        }
        Ok(())
    }

    fn deactivate_station(&mut self) -> Result<(), RadioError> {
        self.wifi.stop().map_err(|e| radio_error("stop failed", e))
    }

    fn start_access_point(&mut self, name: &str, password: &str) -> Result<(), RadioError> {
        let auth_method = if password.is_empty() {
            warn!("Access point '{}' is open", name);
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: name
                    .try_into()
                    .map_err(|_| RadioError("access point name too long".to_string()))?,
                password: password
                    .try_into()
                    .map_err(|_| RadioError("access point password too long".to_string()))?,
                auth_method,
                channel: 1,
                ..Default::default()
            }))
            .map_err(|e| radio_error("access point configuration failed", e))?;
        self.ensure_started()?;
        self.wifi
            .wait_netif_up()
            .map_err(|e| radio_error("access point interface down", e))?;

        if let Ok(ip_info) = self.wifi.wifi().ap_netif().get_ip_info() {
            info!("Access point '{}' up at {}", name, ip_info.ip);
        }
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        self.wifi.stop().map_err(|e| radio_error("stop failed", e))
    }
}
