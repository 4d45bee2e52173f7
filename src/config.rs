//! Telnet timing constants, session/pool options and the site inventory.
//!
//! The constants mirror what the production OLTs and switches tolerate: slow
//! CPUs that need a pause between configuration commands, and idle timers that
//! drop a Telnet session after roughly a minute of silence.

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::DeviceFamily;
use crate::error::ConnectError;
use crate::session::SessionRecordLevel;

/// Telnet port every device listens on.
pub const TELNET_PORT: u16 = 23;

/// Bound on establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on a single read (login step or command).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

/// Bandwidth/DBA listings are computed on the OLT CPU and answer slowly.
pub const DBA_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the keepalive task wakes up.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Idle time after which a keepalive newline is sent.
pub const KEEPALIVE_IDLE_THRESHOLD: Duration = Duration::from_secs(50);

/// Bound on the device answering a keepalive newline with its prompt.
pub const KEEPALIVE_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between the steps of a configuration sequence.
pub const COMMAND_PACING: Duration = Duration::from_millis(300);

/// Ruijie switches drop input typed before the banner has settled.
pub const RUIJIE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Highest ONU id a GPON port accepts.
pub const MAX_ONU_ID: u32 = 128;

/// Attempts made by [`crate::session::ConnectionPool::with_retry`].
pub const RETRY_ATTEMPTS: usize = 2;

/// Pause between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Keystroke that advances a device pager.
pub const PAGER_CONTINUE: &str = " ";

/// Per-session timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub port: u16,
    pub connect_timeout: Duration,
    /// Timeout for each login step.
    pub login_timeout: Duration,
    pub command_timeout: Duration,
    /// Pause between batch steps unless the batch sets its own.
    pub pacing: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            port: TELNET_PORT,
            connect_timeout: CONNECT_TIMEOUT,
            login_timeout: DEFAULT_COMMAND_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            pacing: COMMAND_PACING,
        }
    }
}

/// Pool sizing and keepalive supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_sessions: u64,
    /// Entries not handed out for this long are evicted.
    pub idle_eviction: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_idle_threshold: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    /// Recording level of every session the pool creates.
    pub record_level: SessionRecordLevel,
    pub session: SessionOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            idle_eviction: Duration::from_secs(30 * 60),
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_idle_threshold: KEEPALIVE_IDLE_THRESHOLD,
            retry_attempts: RETRY_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            record_level: SessionRecordLevel::default(),
            session: SessionOptions::default(),
        }
    }
}

/// One OLT site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OltSite {
    pub ip: String,
    pub vlan: String,
    /// C600 chassis (otherwise C300).
    #[serde(default)]
    pub c600: bool,
}

impl OltSite {
    pub fn family(&self) -> DeviceFamily {
        if self.c600 {
            DeviceFamily::C600
        } else {
            DeviceFamily::C300
        }
    }
}

/// One switch location; the full address depends on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SwitchSite {
    pub ip_octet: u8,
    /// The COLO switch at this location is a Huawei (otherwise Cisco).
    #[serde(default)]
    pub colo_huawei: bool,
}

/// Resolved switch address and dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SwitchTarget {
    pub ip: String,
    pub family: DeviceFamily,
}

/// Static site tables: OLTs, switches, bandwidth packages and modem profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Inventory {
    pub olts: BTreeMap<String, OltSite>,
    #[serde(default)]
    pub olt_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchSite>,
    /// Network name (ATN, COLO) to the first three octets.
    #[serde(default)]
    pub network_prefixes: BTreeMap<String, String>,
    /// Package name (10M) to the base profile name (10MB). Keys are upper case.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
    /// Modem model (upper case) to OLT ONU type profile. Unknown models use `ALL`.
    #[serde(default)]
    pub modem_profiles: BTreeMap<String, String>,
}

const BUILTIN_OLTS: &[(&str, &str, &str, bool)] = &[
    ("BOYOLANGU", "192.168.12.1", "901", false),
    ("BEJI", "192.168.12.5", "903", false),
    ("DURENAN", "192.168.12.6", "911", false),
    ("KALIDAWIR", "192.168.12.7", "902", false),
    ("KAUMAN", "192.168.12.4", "920", false),
    ("KEDIRI", "192.168.12.8", "905", false),
    ("CAMPUR BARU", "192.168.12.9", "911", true),
    ("BLITAR", "192.168.12.2", "904", false),
    ("GANDUSARI", "192.168.12.3", "906", false),
];

const BUILTIN_SWITCHES: &[(&str, u8)] = &[
    ("BOYOLANGU", 1),
    ("BEJI", 9),
    ("DURENAN", 5),
    ("KALIDAWIR", 3),
    ("KAUMAN", 4),
    ("KEDIRI", 8),
    ("CAMPUR BARU", 15),
    ("BLITAR", 2),
    ("GANDUSARI", 11),
];

const BUILTIN_PACKAGES: &[&str] = &[
    "10M", "15M", "20M", "25M", "30M", "35M", "40M", "50M", "75M", "100M",
];

/// Fallback ONU type profile for modems without a dedicated one.
pub const DEFAULT_MODEM_PROFILE: &str = "ALL";

impl Inventory {
    /// The production site tables.
    pub fn builtin() -> Self {
        let olts = BUILTIN_OLTS
            .iter()
            .map(|(name, ip, vlan, c600)| {
                (
                    name.to_string(),
                    OltSite {
                        ip: ip.to_string(),
                        vlan: vlan.to_string(),
                        c600: *c600,
                    },
                )
            })
            .collect();

        let mut olt_aliases = BTreeMap::new();
        olt_aliases.insert("CAMPURDARAT".to_string(), "CAMPUR BARU".to_string());

        let switches = BUILTIN_SWITCHES
            .iter()
            .map(|(name, octet)| {
                (
                    name.to_string(),
                    SwitchSite {
                        ip_octet: *octet,
                        colo_huawei: false,
                    },
                )
            })
            .collect();

        let mut network_prefixes = BTreeMap::new();
        network_prefixes.insert("ATN".to_string(), "10.254.252".to_string());
        network_prefixes.insert("COLO".to_string(), "10.254.254".to_string());

        let packages = BUILTIN_PACKAGES
            .iter()
            .map(|p| (p.to_string(), format!("{p}B")))
            .collect();

        let mut modem_profiles = BTreeMap::new();
        modem_profiles.insert("F670L".to_string(), "ZTEG-F670".to_string());
        modem_profiles.insert("F609".to_string(), "ZTEG-F609".to_string());

        Self {
            olts,
            olt_aliases,
            switches,
            network_prefixes,
            packages,
            modem_profiles,
        }
    }

    /// Loads an inventory from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves an OLT by name or alias, case-insensitively.
    ///
    /// Returns the canonical site name with the site.
    pub fn resolve_olt(&self, name: &str) -> Result<(&str, &OltSite), ConnectError> {
        let upper = name.trim().to_ascii_uppercase();
        let canonical = self
            .olt_aliases
            .get(&upper)
            .map(String::as_str)
            .unwrap_or(upper.as_str());
        self.olts
            .get_key_value(canonical)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConnectError::NotFound(format!("olt '{name}'")))
    }

    /// Resolves a switch from a network name (ATN, COLO) and a location.
    ///
    /// ATN switches are always Huawei; COLO switches are Cisco unless the
    /// location says otherwise.
    pub fn resolve_switch(
        &self,
        network: &str,
        location: &str,
    ) -> Result<SwitchTarget, ConnectError> {
        let network = network.trim().to_ascii_uppercase();
        let location = location.trim().to_ascii_uppercase();
        let prefix = self
            .network_prefixes
            .get(&network)
            .ok_or_else(|| ConnectError::NotFound(format!("network '{network}'")))?;
        let site = self
            .switches
            .get(&location)
            .ok_or_else(|| ConnectError::NotFound(format!("switch location '{location}'")))?;

        let family = if network == "ATN" || site.colo_huawei {
            DeviceFamily::Huawei
        } else {
            DeviceFamily::Cisco
        };
        Ok(SwitchTarget {
            ip: format!("{prefix}.{}", site.ip_octet),
            family,
        })
    }

    /// Base bandwidth profile for a package name.
    pub fn package_profile(&self, package: &str) -> Result<&str, ConnectError> {
        self.packages
            .get(&package.trim().to_ascii_uppercase())
            .map(String::as_str)
            .ok_or_else(|| ConnectError::UnknownPackage(package.to_string()))
    }

    /// ONU type profile for a modem model.
    pub fn modem_profile(&self, modem: &str) -> &str {
        self.modem_profiles
            .get(&modem.trim().to_ascii_uppercase())
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODEM_PROFILE)
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::{Inventory, OltSite};
    use crate::device::DeviceFamily;
    use crate::error::ErrorKind;

    #[test]
    fn resolve_olt_follows_aliases_case_insensitively() {
        let inventory = Inventory::builtin();
        let (name, site) = inventory.resolve_olt("campurdarat").expect("alias");
        assert_eq!(name, "CAMPUR BARU");
        assert_eq!(site.ip, "192.168.12.9");
        assert_eq!(site.family(), DeviceFamily::C600);

        let (_, kauman) = inventory.resolve_olt("Kauman").expect("direct name");
        assert_eq!(kauman.vlan, "920");
        assert_eq!(kauman.family(), DeviceFamily::C300);
    }

    #[test]
    fn unknown_olt_is_lookup_error() {
        let err = Inventory::builtin()
            .resolve_olt("NOWHERE")
            .expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn atn_switches_are_huawei_and_colo_defaults_to_cisco() {
        let inventory = Inventory::builtin();
        let atn = inventory.resolve_switch("atn", "beji").expect("atn");
        assert_eq!(atn.ip, "10.254.252.9");
        assert_eq!(atn.family, DeviceFamily::Huawei);

        let colo = inventory.resolve_switch("COLO", "CAMPUR BARU").expect("colo");
        assert_eq!(colo.ip, "10.254.254.15");
        assert_eq!(colo.family, DeviceFamily::Cisco);
    }

    #[test]
    fn packages_and_modems_resolve() {
        let inventory = Inventory::builtin();
        assert_eq!(inventory.package_profile("50M").expect("package"), "50MB");
        assert_eq!(inventory.package_profile(" 20m ").expect("package"), "20MB");
        assert!(inventory.package_profile("999M").is_err());
        assert_eq!(inventory.modem_profile("f670l"), "ZTEG-F670");
        assert_eq!(inventory.modem_profile("C-DATA"), "ALL");
    }

    #[test]
    fn inventory_loads_from_json_with_defaults() {
        let json = r#"{"olts": {"LAB": {"ip": "10.0.0.1", "vlan": "100"}}}"#;
        let inventory = Inventory::from_json(json).expect("parse");
        assert_eq!(
            inventory.olts.get("LAB"),
            Some(&OltSite {
                ip: "10.0.0.1".to_string(),
                vlan: "100".to_string(),
                c600: false,
            })
        );
        assert!(inventory.packages.is_empty());
    }
}
