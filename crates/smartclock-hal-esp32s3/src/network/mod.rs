//! esp-radio backed station/access-point control.
//!
//! Station addressing comes from the embassy-net DHCP stack; the access point
//! runs on its own stack with a fixed address.

use alloc::string::{String, ToString};
use core::net::Ipv4Addr;

use embassy_net::{Config, DhcpConfig, Ipv4Cidr, Stack, StaticConfigV4};
use esp_hal::time::Instant;
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, ScanConfig, WifiController,
    WifiError,
};
use log::{info, warn};
use smartclock_core::connectivity::{
    Association, DHCP_HOSTNAME, LinkStatus, MAX_SCAN_RESULTS, ScanEntry, ScanResults, Ssid,
    WifiCredentials, WifiRadio,
};

/// Address of the device on its own access point.
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_PREFIX_LEN: u8 = 24;

/// DHCP on the station interface, announcing the device hostname.
pub fn station_config() -> Config {
    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = DHCP_HOSTNAME.try_into().ok();
    Config::dhcpv4(dhcp)
}

/// Fixed address on the access-point interface. Clients configure themselves.
pub fn access_point_config() -> Config {
    Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(AP_ADDRESS, AP_PREFIX_LEN),
        gateway: Some(AP_ADDRESS),
        dns_servers: Default::default(),
    })
}

pub struct EspWifiRadio<'d> {
    controller: WifiController<'d>,
    station: Stack<'d>,
    client: Option<ClientConfig>,
    access_point: Option<AccessPointConfig>,
    /// Start of the join in progress.
    joining_since: Option<Instant>,
}

impl<'d> EspWifiRadio<'d> {
    pub fn new(controller: WifiController<'d>, station: Stack<'d>) -> Self {
        Self {
            controller,
            station,
            client: None,
            access_point: None,
            joining_since: None,
        }
    }

    /// Pushes the wanted station/AP combination to the driver. The station
    /// half stays configured while the AP runs so scans keep working.
    fn apply(&mut self) -> Result<(), WifiError> {
        let mode = match (&self.client, &self.access_point) {
            (client, Some(ap)) => {
                ModeConfig::ApSta(client.clone().unwrap_or_default(), ap.clone())
            }
            (Some(client), None) => ModeConfig::Client(client.clone()),
            (None, None) => {
                if self.controller.is_started().unwrap_or(false) {
                    self.controller.stop()?;
                }
                return Ok(());
            }
        };

        self.controller.set_config(&mode)?;
        if !self.controller.is_started().unwrap_or(false) {
            self.controller.start()?;
        }
        Ok(())
    }
}

impl WifiRadio for EspWifiRadio<'_> {
    type Error = WifiError;

    fn begin_connect(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        let mut client = ClientConfig::default()
            .with_ssid(credentials.ssid.as_str().to_string())
            .with_password(credentials.password.as_str().to_string());
        if credentials.is_open() {
            client = client.with_auth_method(AuthMethod::None);
        }
        self.client = Some(client);
        self.apply()?;
        self.controller.connect()?;
        self.joining_since = Some(Instant::now());
        Ok(())
    }

    fn link_status(&mut self) -> LinkStatus {
        let association = match self.controller.is_connected() {
            Ok(true) => Association::Associated,
            Ok(false) => Association::Pending,
            Err(WifiError::Disconnected) => Association::Dropped,
            Err(err) => {
                warn!("wifi: association state unavailable: {:?}", err);
                Association::Pending
            }
        };
        let lease = self
            .station
            .config_v4()
            .map(|config| config.address.address());
        let attempt_age_ms = self
            .joining_since
            .map(|since| since.elapsed().as_millis());

        let status = LinkStatus::classify(association, lease, attempt_age_ms);
        match status {
            LinkStatus::Up(_) => self.joining_since = None,
            LinkStatus::Failed => {
                info!("wifi: driver dropped the join attempt");
                self.joining_since = None;
            }
            LinkStatus::Down | LinkStatus::Connecting => {}
        }
        status
    }

    fn disconnect(&mut self) {
        self.joining_since = None;
        if matches!(self.controller.is_connected(), Ok(true)) {
            if let Err(err) = self.controller.disconnect() {
                warn!("wifi: disconnect failed: {:?}", err);
            }
        }
        self.client = None;
        if let Err(err) = self.apply() {
            warn!("wifi: reconfigure after disconnect failed: {:?}", err);
        }
    }

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<Ipv4Addr, Self::Error> {
        let ap = AccessPointConfig::default()
            .with_ssid(String::from(ssid))
            .with_password(String::from(password))
            .with_auth_method(AuthMethod::Wpa2Personal);
        self.access_point = Some(ap);
        if let Err(err) = self.apply() {
            self.access_point = None;
            return Err(err);
        }
        Ok(AP_ADDRESS)
    }

    fn stop_access_point(&mut self) {
        if self.access_point.take().is_none() {
            return;
        }
        if let Err(err) = self.apply() {
            warn!("wifi: stopping access point failed: {:?}", err);
        }
    }

    fn power_cycle(&mut self) -> Result<(), Self::Error> {
        info!("wifi: power cycling radio");
        self.joining_since = None;
        if self.controller.is_started().unwrap_or(false) {
            self.controller.stop()?;
        }
        self.apply()
    }

    fn scan(&mut self, out: &mut ScanResults) -> Result<(), Self::Error> {
        if self.client.is_none() && self.access_point.is_none() {
            self.client = Some(ClientConfig::default());
            self.apply()?;
        }

        let found = self
            .controller
            .scan_with_config(ScanConfig::default().with_max(MAX_SCAN_RESULTS))?;
        out.clear();
        for ap in found.iter().take(MAX_SCAN_RESULTS) {
            let mut ssid = Ssid::new();
            for ch in ap.ssid.chars() {
                if ssid.push(ch).is_err() {
                    break;
                }
            }
            let _ = out.push(ScanEntry {
                ssid,
                signal_dbm: ap.signal_strength,
                is_open: matches!(ap.auth_method, Some(AuthMethod::None)),
            });
        }
        Ok(())
    }
}
