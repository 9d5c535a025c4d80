//! Station and access point management.
//!
//! The `ConnectivityManager` is the single owner of the radio. It turns a set
//! of saved credentials into a live station link, ranking visible networks by
//! signal strength, and separately runs the access point used during
//! interactive configuration. At most one station link and one access point
//! exist at a time; asking for a second one is an error.

use crate::error::{ConnectivityError, RadioError};
use sensornode_core::{Credential, ScanResult};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Radio driver operations needed by the manager.
pub trait Radio: Send {
    /// Power up the station interface.
    fn activate_station(&mut self) -> Result<(), RadioError>;

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError>;

    /// Issue a join request. Completion is observed through `is_connected`.
    fn join(&mut self, credential: &Credential) -> Result<(), RadioError>;

    fn is_connected(&mut self) -> bool;

    fn leave(&mut self) -> Result<(), RadioError>;

    fn deactivate_station(&mut self) -> Result<(), RadioError>;

    fn start_access_point(&mut self, name: &str, password: &str) -> Result<(), RadioError>;

    fn stop_access_point(&mut self) -> Result<(), RadioError>;
}

#[derive(Debug, Clone)]
pub struct ConnectivitySettings {
    /// Delay between two connected-state polls after a join.
    pub join_poll_interval: Duration,
    /// Number of polls before a join is given up.
    pub join_poll_attempts: u32,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            join_poll_interval: Duration::from_secs(1),
            join_poll_attempts: 10,
        }
    }
}

/// A network worth a join attempt, in ranked order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub ssid: &'a str,
    pub signal_strength: i8,
    pub credential: &'a Credential,
}

/// The live station link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationLink {
    pub ssid: String,
    pub signal_strength: i8,
}

/// Rank saved credentials against a scan.
///
/// Visible networks are sorted by signal strength, strongest first, keeping
/// scan order on ties. Networks without a saved credential are dropped; a
/// network with several saved credentials contributes them all, in saved
/// order. An ssid seen more than once in the scan is ranked at its strongest
/// sighting.
pub fn rank_candidates<'a>(
    scan: &'a [ScanResult],
    credentials: &'a [Credential],
) -> Vec<Candidate<'a>> {
    let mut visible: Vec<&ScanResult> = scan.iter().collect();
    visible.sort_by_key(|network| Reverse(network.signal_strength));

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for network in visible {
        if !seen.insert(network.ssid.as_str()) {
            continue;
        }
        for credential in credentials.iter().filter(|c| c.ssid == network.ssid) {
            candidates.push(Candidate {
                ssid: &network.ssid,
                signal_strength: network.signal_strength,
                credential,
            });
        }
    }
    candidates
}

pub struct ConnectivityManager {
    radio: Box<dyn Radio>,
    settings: ConnectivitySettings,
    station_powered: bool,
    station: Option<StationLink>,
    access_point: Option<String>,
}

impl ConnectivityManager {
    pub fn new(radio: Box<dyn Radio>, settings: ConnectivitySettings) -> Self {
        Self {
            radio,
            settings,
            station_powered: false,
            station: None,
            access_point: None,
        }
    }

    pub fn station(&self) -> Option<&StationLink> {
        self.station.as_ref()
    }

    /// Name of the running access point, if any.
    pub fn access_point(&self) -> Option<&str> {
        self.access_point.as_deref()
    }

    /// Start broadcasting the configuration access point.
    pub fn configure_access_point(
        &mut self,
        name: &str,
        password: &str,
    ) -> Result<(), ConnectivityError> {
        if self.access_point.is_some() {
            return Err(ConnectivityError::AccessPointActive);
        }
        self.radio.start_access_point(name, password)?;
        info!("Access point '{}' started", name);
        self.access_point = Some(name.to_string());
        Ok(())
    }

    /// Stop the access point. Safe to call when none is running.
    pub fn disable_access_point(&mut self) {
        if let Some(name) = self.access_point.take() {
            match self.radio.stop_access_point() {
                Ok(()) => info!("Access point '{}' stopped", name),
                Err(e) => warn!("Failed to stop access point '{}': {}", name, e),
            }
        }
    }

    /// Join the strongest reachable network among `credentials`.
    ///
    /// Fails with `NoReachableNetwork` once every candidate has been tried;
    /// the radio is powered down again in that case.
    pub fn connect_station(
        &mut self,
        credentials: &[Credential],
    ) -> Result<StationLink, ConnectivityError> {
        if self.station.is_some() {
            return Err(ConnectivityError::StationActive);
        }
        if credentials.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }

        self.radio.activate_station()?;
        self.station_powered = true;

        let scan = match self.radio.scan() {
            Ok(scan) => scan,
            Err(e) => {
                self.release_station();
                return Err(e.into());
            }
        };
        debug!("Scan found {} networks", scan.len());

        let candidates = rank_candidates(&scan, credentials);
        let mut attempted = 0;
        for candidate in &candidates {
            attempted += 1;
            info!(
                ssid = %candidate.ssid,
                rssi = candidate.signal_strength,
                attempt = attempted,
                "Joining network"
            );

            if let Err(e) = self.radio.join(candidate.credential) {
                warn!("Join request for '{}' failed: {}", candidate.ssid, e);
                continue;
            }
            if self.wait_connected() {
                let link = StationLink {
                    ssid: candidate.ssid.to_string(),
                    signal_strength: candidate.signal_strength,
                };
                info!("Connected to '{}'", link.ssid);
                self.station = Some(link.clone());
                return Ok(link);
            }

            warn!("Timed out joining '{}'", candidate.ssid);
            if let Err(e) = self.radio.leave() {
                debug!("Leave after failed join: {}", e);
            }
        }

        self.release_station();
        Err(ConnectivityError::NoReachableNetwork { attempted })
    }

    /// Drop the station link and power down the station interface.
    ///
    /// Idempotent; safe to call when not connected.
    pub fn disconnect_station(&mut self) {
        if let Some(link) = &self.station {
            info!("Disconnecting from '{}'", link.ssid);
        }
        self.release_station();
    }

    fn wait_connected(&mut self) -> bool {
        for poll in 0..self.settings.join_poll_attempts {
            if self.radio.is_connected() {
                return true;
            }
            if poll + 1 < self.settings.join_poll_attempts {
                thread::sleep(self.settings.join_poll_interval);
            }
        }
        false
    }

    fn release_station(&mut self) {
        if self.station.take().is_some() {
            if let Err(e) = self.radio.leave() {
                warn!("Failed to leave network: {}", e);
            }
        }
        if self.station_powered {
            self.station_powered = false;
            if let Err(e) = self.radio.deactivate_station() {
                warn!("Failed to power down station: {}", e);
            }
        }
    }
}
