//! Provisioning of a new ONU on an OLT.
//!
//! The workflow finds the ONU in the unconfigured list by serial number,
//! allocates the next free ONU id on its port, picks bandwidth profiles from
//! the port's DBA load, asks a [`CommandRenderer`] for the configuration
//! commands and runs them as a paced batch. Every stage is logged into the
//! returned [`ProvisioningReport`]; a failure never unwinds what was applied.

use std::fmt;

use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Inventory;
use crate::device::DeviceFamily;
use crate::error::{ConnectError, ErrorKind};
use crate::olt::Olt;
use crate::session::{BatchOptions, BatchReport};

/// DBA load above which the upstream profile switches to the burst variant.
pub const DBA_BURST_THRESHOLD: f64 = 75.0;

/// Number of ethernet ports configured on every ONU.
pub const ETH_PORTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Customer {
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub pppoe_user: String,
    #[serde(default)]
    pub pppoe_password: String,
}

/// What to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProvisioningRequest {
    pub sn: String,
    pub customer: Customer,
    /// Package name, e.g. `20M`.
    pub package: String,
    pub modem_type: String,
    /// Lock flag per ethernet port; one value applies to every port.
    #[serde(default)]
    pub eth_locks: Vec<bool>,
}

/// Values handed to the command renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProvisioningContext {
    pub family: DeviceFamily,
    pub interface_olt: String,
    pub interface_onu: String,
    pub pon_slot: String,
    pub pon_port: String,
    pub onu_id: u32,
    pub sn: String,
    pub customer: Customer,
    pub vlan: String,
    pub dba_rate: f64,
    pub up_profile: String,
    pub down_profile: String,
    pub modem_profile: String,
    pub eth_locks: Vec<bool>,
}

/// Turns a provisioning context into OLT commands.
///
/// Implemented for closures, so a template engine can be plugged in as
/// `|ctx: &ProvisioningContext| engine.render(ctx)`.
pub trait CommandRenderer: Send + Sync {
    fn render(&self, context: &ProvisioningContext) -> anyhow::Result<Vec<String>>;
}

impl<F> CommandRenderer for F
where
    F: Fn(&ProvisioningContext) -> anyhow::Result<Vec<String>> + Send + Sync,
{
    fn render(&self, context: &ProvisioningContext) -> anyhow::Result<Vec<String>> {
        self(context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    LocateOnu,
    PrepareInterface,
    AllocateOnuId,
    CheckDba,
    PrepareProfiles,
    RenderCommands,
    ExecuteCommands,
    Done,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProvisioningStage::LocateOnu => "locating unconfigured ONU",
            ProvisioningStage::PrepareInterface => "preparing interfaces",
            ProvisioningStage::AllocateOnuId => "allocating ONU id",
            ProvisioningStage::CheckDba => "checking DBA rate",
            ProvisioningStage::PrepareProfiles => "preparing profiles",
            ProvisioningStage::RenderCommands => "rendering configuration",
            ProvisioningStage::ExecuteCommands => "executing configuration",
            ProvisioningStage::Done => "done",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Success,
    Error,
}

/// Outcome of [`apply_configuration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProvisioningReport {
    pub status: ProvisioningStatus,
    /// Stage reached; the failing one on error.
    pub stage: ProvisioningStage,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
    pub sn: String,
    pub customer_name: String,
    pub pppoe_user: String,
    /// ONU interface, `-` when provisioning did not get that far.
    pub location: String,
    /// `UP-<profile> / DOWN-<profile>`, or `-`.
    pub profile: String,
    pub context: Option<ProvisioningContext>,
    pub batch: Option<BatchReport>,
    /// `STEP > `, `INFO < `, `CMD > `, `LOG < `, `ERROR < ` lines.
    pub log: Vec<String>,
    /// Human readable summary box.
    pub summary: String,
}

impl ProvisioningReport {
    pub fn is_success(&self) -> bool {
        self.status == ProvisioningStatus::Success
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        self.error_kind.map(ErrorKind::http_status).unwrap_or(200)
    }
}

/// Upstream and downstream profile names for a base profile and DBA load.
pub fn bandwidth_profiles(base: &str, dba_rate: f64) -> (String, String) {
    let suffix = if dba_rate > DBA_BURST_THRESHOLD {
        "-MBW"
    } else {
        "-FIX"
    };
    (format!("{base}{suffix}"), base.replace("MB", "M"))
}

/// Expands the lock flags to exactly one per ethernet port.
///
/// A single flag applies to every port; missing flags mean unlocked.
pub fn normalize_eth_locks(locks: &[bool]) -> Vec<bool> {
    match locks {
        [single] => vec![*single; ETH_PORTS],
        _ => {
            let mut locks = locks.to_vec();
            locks.resize(ETH_PORTS, false);
            locks
        }
    }
}

struct Progress {
    stage: ProvisioningStage,
    log: Vec<String>,
    context: Option<ProvisioningContext>,
    batch: Option<BatchReport>,
}

impl Progress {
    fn enter(&mut self, stage: ProvisioningStage) {
        self.stage = stage;
        self.log.push(format!("STEP > {stage}..."));
    }

    fn info(&mut self, text: String) {
        self.log.push(format!("INFO < {text}"));
    }
}

/// Provisions the ONU with serial number `request.sn` on `olt`.
///
/// Never returns an error: failures are described by the report, including
/// the stage they happened in and, for the final batch, exactly which
/// commands were applied.
pub async fn apply_configuration<R>(
    olt: &Olt,
    vlan: &str,
    inventory: &Inventory,
    request: &ProvisioningRequest,
    renderer: &R,
) -> ProvisioningReport
where
    R: CommandRenderer + ?Sized,
{
    let mut progress = Progress {
        stage: ProvisioningStage::LocateOnu,
        log: Vec::new(),
        context: None,
        batch: None,
    };

    let outcome = provision(olt, vlan, inventory, request, renderer, &mut progress).await;
    let host = olt.session().host();

    match outcome {
        Ok(()) => {
            progress.stage = ProvisioningStage::Done;
            progress.log.push("STEP > configuration finished".to_string());
            info!("{} provisioned {}", host, request.sn);
            let (location, profile) = progress
                .context
                .as_ref()
                .map(|c| {
                    (
                        c.interface_onu.clone(),
                        format!("UP-{} / DOWN-{}", c.up_profile, c.down_profile),
                    )
                })
                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
            let summary = summary_box(
                "CONFIGURATION SUCCEEDED",
                &[
                    ("Serial number", request.sn.as_str()),
                    ("Customer id", request.customer.pppoe_user.as_str()),
                    ("Customer name", request.customer.name.as_str()),
                    ("OLT and ONU", location.as_str()),
                    ("Profile", profile.as_str()),
                ],
            );
            ProvisioningReport {
                status: ProvisioningStatus::Success,
                stage: ProvisioningStage::Done,
                message: "configuration succeeded".to_string(),
                error_kind: None,
                sn: request.sn.clone(),
                customer_name: request.customer.name.clone(),
                pppoe_user: request.customer.pppoe_user.clone(),
                location,
                profile,
                context: progress.context,
                batch: progress.batch,
                log: progress.log,
                summary,
            }
        }
        Err(err) => {
            let kind = err.kind();
            warn!(
                "{} provisioning {} failed while {}: {}",
                host, request.sn, progress.stage, err
            );
            progress.log.push(format!("ERROR < {err}"));
            let error_type = match kind {
                ErrorKind::Lookup => "ONU not found",
                ErrorKind::Connection | ErrorKind::Timeout => "connection / timeout",
                ErrorKind::Capacity => "PON port full",
                ErrorKind::Internal => "internal",
            };
            let stage = progress.stage.to_string();
            let detail = err.to_string();
            let summary = summary_box(
                "CONFIGURATION FAILED",
                &[
                    ("Error type", error_type),
                    ("Stage", stage.as_str()),
                    ("Serial number", request.sn.as_str()),
                    ("Detail", detail.as_str()),
                ],
            );
            ProvisioningReport {
                status: ProvisioningStatus::Error,
                stage: progress.stage,
                message: format!("failed while {}: {}", progress.stage, err),
                error_kind: Some(kind),
                sn: request.sn.clone(),
                customer_name: request.customer.name.clone(),
                pppoe_user: request.customer.pppoe_user.clone(),
                location: "-".to_string(),
                profile: "-".to_string(),
                context: progress.context,
                batch: progress.batch,
                log: progress.log,
                summary,
            }
        }
    }
}

async fn provision<R>(
    olt: &Olt,
    vlan: &str,
    inventory: &Inventory,
    request: &ProvisioningRequest,
    renderer: &R,
    progress: &mut Progress,
) -> Result<(), ConnectError>
where
    R: CommandRenderer + ?Sized,
{
    let family = olt.session().family();
    let sn = request.sn.trim();

    progress.enter(ProvisioningStage::LocateOnu);
    let onu = olt
        .unconfigured_onus()
        .await?
        .into_iter()
        .find(|onu| onu.sn == sn)
        .ok_or_else(|| {
            ConnectError::NotFound(format!(
                "ONU with SN '{sn}' is not in the unconfigured list; check that it is plugged in and not configured yet"
            ))
        })?;
    progress.info(format!(
        "ONU found: slot {}, port {}",
        onu.pon_slot, onu.pon_port
    ));

    progress.stage = ProvisioningStage::PrepareInterface;
    let interface_olt = onu.pon_interface(family);
    progress.info(format!("Base interface: {interface_olt}"));

    progress.enter(ProvisioningStage::AllocateOnuId);
    let onu_id = olt.next_onu_id(&interface_olt).await?;
    progress.info(format!("Free ONU id: {onu_id}"));

    progress.enter(ProvisioningStage::CheckDba);
    let dba_rate = olt.dba_rate(&interface_olt).await?;
    progress.info(format!("DBA rate: {dba_rate}%"));

    progress.stage = ProvisioningStage::PrepareProfiles;
    let base = inventory.package_profile(&request.package)?;
    let (up_profile, down_profile) = bandwidth_profiles(base, dba_rate);
    progress.info(format!("Profiles: UP-{up_profile} / DOWN-{down_profile}"));

    let context = ProvisioningContext {
        family,
        interface_onu: family.onu_interface_at(&onu.pon_slot, &onu.pon_port, onu_id),
        interface_olt,
        pon_slot: onu.pon_slot,
        pon_port: onu.pon_port,
        onu_id,
        sn: sn.to_string(),
        customer: request.customer.clone(),
        vlan: vlan.to_string(),
        dba_rate,
        up_profile,
        down_profile,
        modem_profile: inventory.modem_profile(&request.modem_type).to_string(),
        eth_locks: normalize_eth_locks(&request.eth_locks),
    };
    progress.context = Some(context.clone());

    progress.enter(ProvisioningStage::RenderCommands);
    let commands: Vec<String> = renderer
        .render(&context)?
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    progress.info(format!("Rendered {} commands", commands.len()));

    progress.enter(ProvisioningStage::ExecuteCommands);
    let batch = olt
        .session()
        .run_batch(&format!("provision {sn}"), &commands, &BatchOptions::default())
        .await;
    progress.log.extend(batch.log.iter().cloned());
    progress.batch = Some(batch.clone());
    batch.into_result().map(|_| ())
}

fn summary_box(title: &str, rows: &[(&str, &str)]) -> String {
    let rule = "=".repeat(57);
    let mut lines = vec![rule.clone(), format!("{title:^57}"), rule.clone()];
    for (label, value) in rows {
        lines.push(format!("  {label:<19}: {value}"));
    }
    lines.push(rule);
    lines.join("\n")
}
