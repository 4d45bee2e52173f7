//! Command templates and the process-wide dialect profile.
//!
//! Every (family, action) pair the engine can run is listed here. The table is
//! checked once when a [`DialectProfile`] is built, so a missing combination is
//! a startup error rather than a surprise on the first request.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{DBA_COMMAND_TIMEOUT, DEFAULT_COMMAND_TIMEOUT};
use crate::device::{CompiledFamily, DeviceFamily, DeviceKind, FamilyProfile};
use crate::error::ConnectError;

/// Operations the engine knows how to run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Reboot,
    DeleteOnu,
    ChangeSn,
    DetailOnu,
    OnuAttenuation,
    PortState,
    PortAttenuation,
    RunningConfig,
    OnuRunningConfig,
    OnuIpHost,
    EthPorts,
    DbaBandwidth,
    UnconfiguredOnus,
    OltState,
    UplinkMonitoring,
    OpticalDiagnostics,
    InterfaceDescription,
    InterfaceStatus,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::Reboot,
        Action::DeleteOnu,
        Action::ChangeSn,
        Action::DetailOnu,
        Action::OnuAttenuation,
        Action::PortState,
        Action::PortAttenuation,
        Action::RunningConfig,
        Action::OnuRunningConfig,
        Action::OnuIpHost,
        Action::EthPorts,
        Action::DbaBandwidth,
        Action::UnconfiguredOnus,
        Action::OltState,
        Action::UplinkMonitoring,
        Action::OpticalDiagnostics,
        Action::InterfaceDescription,
        Action::InterfaceStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Reboot => "reboot",
            Action::DeleteOnu => "delete_onu",
            Action::ChangeSn => "change_sn",
            Action::DetailOnu => "detail_onu",
            Action::OnuAttenuation => "onu_attenuation",
            Action::PortState => "port_state",
            Action::PortAttenuation => "port_attenuation",
            Action::RunningConfig => "running_config",
            Action::OnuRunningConfig => "onu_running_config",
            Action::OnuIpHost => "onu_ip_host",
            Action::EthPorts => "eth_ports",
            Action::DbaBandwidth => "dba_bandwidth",
            Action::UnconfiguredOnus => "unconfigured_onus",
            Action::OltState => "olt_state",
            Action::UplinkMonitoring => "uplink_monitoring",
            Action::OpticalDiagnostics => "optical_diagnostics",
            Action::InterfaceDescription => "interface_description",
            Action::InterfaceStatus => "interface_status",
        }
    }

    /// Device kind this action applies to.
    pub fn kind(self) -> DeviceKind {
        match self {
            Action::InterfaceDescription | Action::InterfaceStatus => DeviceKind::Switch,
            _ => DeviceKind::Olt,
        }
    }

    /// Config actions run after the family's configuration-mode prefix.
    pub fn requires_config_mode(self) -> bool {
        matches!(self, Action::Reboot | Action::DeleteOnu | Action::ChangeSn)
    }

    pub fn timeout(self) -> Duration {
        match self {
            Action::DbaBandwidth => DBA_COMMAND_TIMEOUT,
            _ => DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn supports(self, family: DeviceFamily) -> bool {
        self.kind() == family.kind()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in command list of a (family, action) pair.
fn builtin_commands(action: Action, family: DeviceFamily) -> Option<&'static [&'static str]> {
    use DeviceFamily::*;

    let commands: &'static [&'static str] = match (action, family) {
        (Action::Reboot, C300 | C600) => &["pon-onu-mng {interface}", "reboot", "exit"],
        (Action::DeleteOnu, C300 | C600) => {
            &["interface {interface}", "no onu {onu_id}", "exit", "exit"]
        }
        (Action::ChangeSn, C300 | C600) => {
            &["interface {interface}", "registration-method sn {sn}", "exit"]
        }
        (Action::DetailOnu, C300 | C600) => &["show gpon onu detail {interface}"],
        (Action::OnuAttenuation, C300 | C600) => &["show pon power attenuation {interface}"],
        (Action::PortState, C300 | C600) => &["show gpon onu state {interface}"],
        (Action::PortAttenuation, C300 | C600) => &["show pon power onu-rx {interface}"],
        (Action::RunningConfig, C300 | C600) => &["show running-config interface {interface}"],
        (Action::OnuRunningConfig, C300) => &["show onu running-config {interface}"],
        (Action::OnuRunningConfig, C600) => &["show onu running-config-interface {interface}"],
        (Action::OnuIpHost, C300 | C600) => &["show gpon remote-onu ip-host {interface}"],
        (Action::EthPorts, C300 | C600) => &["show gpon remote-onu interface eth {interface}"],
        (Action::DbaBandwidth, C300 | C600) => &["show pon bandwidth dba interface {interface}"],
        (Action::UnconfiguredOnus, C300) => &["show gpon onu uncfg"],
        (Action::UnconfiguredOnus, C600) => &["show pon onu uncfg"],
        (Action::OltState, C300 | C600) => &["show card"],
        (Action::UplinkMonitoring, C300 | C600) => &["show interface {interface}"],
        (Action::OpticalDiagnostics, C300 | C600) => &["show optical-module-info {interface}"],
        (Action::InterfaceDescription, Huawei) => &["display interface description"],
        (Action::InterfaceDescription, Cisco | Ruijie) => &["show interface description"],
        (Action::InterfaceStatus, Huawei) => &["display interface {interface}"],
        (Action::InterfaceStatus, Cisco | Ruijie) => &["show interface {interface}"],
        _ => return None,
    };
    Some(commands)
}

/// Values substituted into `{placeholder}` slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateParams(BTreeMap<String, String>);

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one value, builder style.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}") {
    Ok(re) => re,
    Err(err) => panic!("invalid PLACEHOLDER regex: {err}"),
});

/// Names of the placeholders used by a template.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Fills every `{placeholder}` of `template` from `params`.
pub fn render(template: &str, params: &TemplateParams) -> Result<String, ConnectError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = params
            .get(name.as_str())
            .ok_or_else(|| ConnectError::MissingParameter {
                template: template.to_string(),
                param: name.as_str().to_string(),
            })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Serializable form of the dialect table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DialectDefinition {
    pub families: BTreeMap<DeviceFamily, FamilyProfile>,
    pub commands: BTreeMap<Action, BTreeMap<DeviceFamily, Vec<String>>>,
}

impl DialectDefinition {
    /// The production dialects.
    pub fn builtin() -> Self {
        let families = DeviceFamily::ALL
            .into_iter()
            .map(|f| (f, FamilyProfile::builtin(f)))
            .collect();
        let mut commands: BTreeMap<Action, BTreeMap<DeviceFamily, Vec<String>>> = BTreeMap::new();
        for action in Action::ALL {
            for family in DeviceFamily::ALL {
                if let Some(list) = builtin_commands(action, family) {
                    commands
                        .entry(action)
                        .or_default()
                        .insert(family, list.iter().map(|s| s.to_string()).collect());
                }
            }
        }
        Self { families, commands }
    }
}

/// Summary row of the action catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionMetadata {
    pub action: Action,
    pub kind: DeviceKind,
    pub config_mode: bool,
    pub timeout_secs: u64,
    pub placeholders: Vec<String>,
    pub families: Vec<DeviceFamily>,
}

/// Immutable dialect table shared by every session.
#[derive(Debug, Clone)]
pub struct DialectProfile {
    definition: DialectDefinition,
    compiled: HashMap<DeviceFamily, Arc<CompiledFamily>>,
}

impl DialectProfile {
    /// Validates a definition and compiles its patterns.
    ///
    /// Fails when a family lacks a profile, when an action applicable to a
    /// family lacks commands, or when a command list is empty.
    pub fn new(definition: DialectDefinition) -> Result<Self, ConnectError> {
        let mut compiled = HashMap::new();
        for family in DeviceFamily::ALL {
            let profile = definition.families.get(&family).ok_or_else(|| {
                ConnectError::InvalidDialect(format!("no profile for family {family}"))
            })?;
            let family_compiled = profile
                .compile()
                .map_err(|e| ConnectError::InvalidDialect(format!("{family}: {e}")))?;
            compiled.insert(family, Arc::new(family_compiled));

            for action in Action::ALL.into_iter().filter(|a| a.supports(family)) {
                let list = definition
                    .commands
                    .get(&action)
                    .and_then(|by_family| by_family.get(&family));
                match list {
                    Some(list) if !list.is_empty() => {}
                    _ => {
                        return Err(ConnectError::InvalidDialect(format!(
                            "no commands for action {action} on {family}"
                        )));
                    }
                }
            }
        }
        Ok(Self {
            definition,
            compiled,
        })
    }

    /// Built-in production dialects.
    pub fn builtin() -> Result<Self, ConnectError> {
        Self::new(DialectDefinition::builtin())
    }

    /// Loads and validates a dialect table from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        let definition: DialectDefinition = serde_json::from_str(json)?;
        Self::new(definition)
    }

    pub fn to_json(&self) -> Result<String, ConnectError> {
        Ok(serde_json::to_string_pretty(&self.definition)?)
    }

    pub fn definition(&self) -> &DialectDefinition {
        &self.definition
    }

    /// Compiled prompts and login script of a family.
    pub fn family(&self, family: DeviceFamily) -> Result<Arc<CompiledFamily>, ConnectError> {
        self.compiled
            .get(&family)
            .cloned()
            .ok_or_else(|| ConnectError::InvalidDialect(format!("no profile for family {family}")))
    }

    /// Raw templates of a (family, action) pair.
    pub fn templates(&self, family: DeviceFamily, action: Action) -> Result<&[String], ConnectError> {
        self.definition
            .commands
            .get(&action)
            .and_then(|by_family| by_family.get(&family))
            .map(Vec::as_slice)
            .ok_or_else(|| ConnectError::UnsupportedAction {
                action: action.to_string(),
                family: family.to_string(),
            })
    }

    /// Rendered command list for an action, config prefix included.
    pub fn commands(
        &self,
        family: DeviceFamily,
        action: Action,
        params: &TemplateParams,
    ) -> Result<Vec<String>, ConnectError> {
        let templates = self.templates(family, action)?;
        let mut commands = Vec::with_capacity(templates.len() + 1);
        if action.requires_config_mode() {
            commands.extend(self.family(family)?.config_prefix.iter().cloned());
        }
        for template in templates {
            commands.push(render(template, params)?);
        }
        Ok(commands)
    }

    /// Catalog of every action with the families that implement it.
    pub fn catalog(&self) -> Vec<ActionMetadata> {
        Action::ALL
            .into_iter()
            .map(|action| {
                let by_family = self.definition.commands.get(&action);
                let families = by_family
                    .map(|m| m.keys().copied().collect())
                    .unwrap_or_default();
                let mut names = Vec::new();
                if let Some(m) = by_family {
                    for template in m.values().flatten() {
                        for name in placeholders(template) {
                            if !names.contains(&name) {
                                names.push(name);
                            }
                        }
                    }
                }
                ActionMetadata {
                    action,
                    kind: action.kind(),
                    config_mode: action.requires_config_mode(),
                    timeout_secs: action.timeout().as_secs(),
                    placeholders: names,
                    families,
                }
            })
            .collect()
    }

    /// Catalog as pretty JSON.
    pub fn catalog_json(&self) -> Result<String, ConnectError> {
        Ok(serde_json::to_string_pretty(&self.catalog())?)
    }
}
