//! Typed operations on ZTE C300/C600 OLTs.
//!
//! Interfaces may be given bare (`1/2/3`, `1/2/3:4`) or with their family
//! prefix (`gpon-onu_1/2/3:4`); each operation formats them for the family
//! of the session it runs on.

use std::sync::Arc;

use log::{debug, info};

use crate::device::{DeviceKind, base_interface, split_onu_interface};
use crate::error::ConnectError;
use crate::parse::{self, EthPortStatus, OnuDetail, UnconfiguredOnu};
use crate::session::{BatchOptions, BatchReport, DeviceSession};
use crate::templates::{Action, TemplateParams};

const INTERFACE_PREFIXES: [&str; 4] = ["gpon-onu_", "gpon_onu-", "gpon-olt_", "gpon_olt-"];

/// Strips any GPON interface prefix, leaving `1/2/3` or `1/2/3:4`.
pub fn bare_address(interface: &str) -> &str {
    let interface = interface.trim();
    INTERFACE_PREFIXES
        .iter()
        .find_map(|prefix| interface.strip_prefix(prefix))
        .unwrap_or(interface)
}

/// An OLT reached through a logged-in session.
#[derive(Clone)]
pub struct Olt {
    session: Arc<DeviceSession>,
}

impl Olt {
    pub fn new(session: Arc<DeviceSession>) -> Result<Self, ConnectError> {
        if session.family().kind() != DeviceKind::Olt {
            return Err(ConnectError::UnsupportedAction {
                action: "olt operations".to_string(),
                family: session.family().to_string(),
            });
        }
        Ok(Self { session })
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    fn onu_interface(&self, interface: &str) -> String {
        self.session.family().onu_interface(bare_address(interface))
    }

    fn olt_interface(&self, interface: &str) -> String {
        let base = base_interface(bare_address(interface));
        self.session.family().olt_interface(base)
    }

    async fn show(&self, action: Action, interface: Option<String>) -> Result<String, ConnectError> {
        let mut params = TemplateParams::new();
        if let Some(interface) = interface {
            params = params.with("interface", interface);
        }
        Ok(self.session.run(action, &params).await?.cleaned)
    }

    async fn maintain(&self, action: Action, params: TemplateParams) -> Result<BatchReport, ConnectError> {
        let commands = self
            .session
            .profile()
            .commands(self.session.family(), action, &params)?;
        let report = self
            .session
            .run_batch(action.as_str(), &commands, &BatchOptions::unchecked())
            .await;
        if report.completed {
            info!("{} {} done", self.session.host(), action);
        }
        Ok(report)
    }

    pub async fn onu_detail(&self, interface: &str) -> Result<OnuDetail, ConnectError> {
        let output = self
            .show(Action::DetailOnu, Some(self.onu_interface(interface)))
            .await?;
        Ok(parse::parse_onu_detail(&output))
    }

    /// Downstream receive power of one ONU.
    pub async fn onu_attenuation(&self, interface: &str) -> Result<String, ConnectError> {
        let output = self
            .show(Action::OnuAttenuation, Some(self.onu_interface(interface)))
            .await?;
        Ok(parse::parse_onu_attenuation(&output))
    }

    /// State table of every ONU on a PON port.
    pub async fn port_state(&self, interface: &str) -> Result<String, ConnectError> {
        self.show(Action::PortState, Some(self.olt_interface(interface)))
            .await
    }

    /// Card inventory of the chassis.
    pub async fn olt_state(&self) -> Result<String, ConnectError> {
        self.show(Action::OltState, None).await
    }

    /// Receive power of every ONU on a PON port.
    pub async fn port_attenuation(&self, interface: &str) -> Result<String, ConnectError> {
        self.show(Action::PortAttenuation, Some(self.olt_interface(interface)))
            .await
    }

    pub async fn running_config(&self, interface: &str) -> Result<String, ConnectError> {
        self.show(Action::RunningConfig, Some(self.olt_interface(interface)))
            .await
    }

    pub async fn onu_running_config(&self, interface: &str) -> Result<String, ConnectError> {
        self.show(Action::OnuRunningConfig, Some(self.onu_interface(interface)))
            .await
    }

    pub async fn eth_ports(&self, interface: &str) -> Result<Vec<EthPortStatus>, ConnectError> {
        let output = self
            .show(Action::EthPorts, Some(self.onu_interface(interface)))
            .await?;
        Ok(parse::parse_eth_ports(&output))
    }

    pub async fn onu_ip_host(&self, interface: &str) -> Result<String, ConnectError> {
        let output = self
            .show(Action::OnuIpHost, Some(self.onu_interface(interface)))
            .await?;
        Ok(parse::parse_onu_ip_host(&output))
    }

    /// DBA utilisation of a PON port formatted as `"X%"`.
    pub async fn onu_dba(&self, interface: &str) -> Result<String, ConnectError> {
        let output = self
            .show(Action::DbaBandwidth, Some(self.olt_interface(interface)))
            .await?;
        Ok(parse::parse_dba_percentage(&output))
    }

    /// DBA utilisation of a PON port in percent.
    pub async fn dba_rate(&self, interface: &str) -> Result<f64, ConnectError> {
        let interface = self.olt_interface(interface);
        let output = self
            .show(Action::DbaBandwidth, Some(interface.clone()))
            .await?;
        let rate = parse::parse_dba_rate(&output, &interface);
        debug!("{} DBA rate of {}: {}%", self.session.host(), interface, rate);
        Ok(rate)
    }

    /// Status and description of an uplink interface, e.g. `gei_1/19/3`.
    pub async fn uplink_monitoring(&self, interface: &str) -> Result<String, ConnectError> {
        let output = self
            .show(Action::UplinkMonitoring, Some(interface.trim().to_string()))
            .await?;
        Ok(parse::parse_uplink_monitoring(&output))
    }

    /// Optical diagnostics of an uplink transceiver.
    pub async fn optical_diagnostics(&self, interface: &str) -> Result<String, ConnectError> {
        let output = self
            .show(Action::OpticalDiagnostics, Some(interface.trim().to_string()))
            .await?;
        Ok(parse::parse_optical_diagnostics(&output))
    }

    /// ONUs that announced themselves but have no configuration yet.
    pub async fn unconfigured_onus(&self) -> Result<Vec<UnconfiguredOnu>, ConnectError> {
        let output = self.show(Action::UnconfiguredOnus, None).await?;
        let onus = parse::parse_unconfigured_onus(self.session.family(), &output);
        info!("{} found {} unconfigured ONUs", self.session.host(), onus.len());
        Ok(onus)
    }

    /// Smallest free ONU id on a PON port.
    pub async fn next_onu_id(&self, interface: &str) -> Result<u32, ConnectError> {
        let interface = self.olt_interface(interface);
        let output = self.show(Action::PortState, Some(interface.clone())).await?;
        let active = parse::parse_active_onu_ids(self.session.family(), &output);
        let id = parse::next_available_onu_id(&active, &interface)?;
        debug!("{} next free ONU id on {}: {}", self.session.host(), interface, id);
        Ok(id)
    }

    pub async fn reboot_onu(&self, interface: &str) -> Result<BatchReport, ConnectError> {
        let params = TemplateParams::new().with("interface", self.onu_interface(interface));
        self.maintain(Action::Reboot, params).await
    }

    /// Removes an ONU (`1/2/3:4`) from its PON port.
    pub async fn delete_onu(&self, interface: &str) -> Result<BatchReport, ConnectError> {
        let (base, onu_id) = split_onu_interface(bare_address(interface))?;
        let params = TemplateParams::new()
            .with("interface", self.olt_interface(base))
            .with("onu_id", onu_id);
        self.maintain(Action::DeleteOnu, params).await
    }

    /// Re-registers an ONU under a new serial number.
    pub async fn change_sn(&self, interface: &str, sn: &str) -> Result<BatchReport, ConnectError> {
        let params = TemplateParams::new()
            .with("interface", self.onu_interface(interface))
            .with("sn", sn.trim());
        self.maintain(Action::ChangeSn, params).await
    }
}
