//! Extraction of structured facts from cleaned OLT output.
//!
//! Every parser here is total: malformed lines are skipped and a missing
//! value falls back to a documented default. Only [`next_available_onu_id`]
//! can fail, and only because a full PON port is a real condition the caller
//! has to handle.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::MAX_ONU_ID;
use crate::device::DeviceFamily;
use crate::error::ConnectError;

fn lazy_regex(pattern: &str, name: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid {name} regex: {err}"),
    }
}

static C600_PON_LOCATION: Lazy<Regex> =
    Lazy::new(|| lazy_regex(r"1/(\d+)/(\d+)", "C600_PON_LOCATION"));

static DBA_LINE: Lazy<Regex> =
    Lazy::new(|| lazy_regex(r"(?m)gpon[_-]olt[_-]\S+.*\s+([\d.]+)\s*$", "DBA_LINE"));

static ETH_PORT: Lazy<Regex> = Lazy::new(|| {
    lazy_regex(
        r"(?s)Interface\s+:\s+(eth_\d+/\d+).*?Speed status\s+:\s+(\S+).*?Admin status\s+:\s+(\S+)",
        "ETH_PORT",
    )
});

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| lazy_regex(r"(\d+)", "FIRST_NUMBER"));

static DETAIL_KV: Lazy<Regex> =
    Lazy::new(|| lazy_regex(r"^\s*([^:]+?):\s+(.*?)\s*$", "DETAIL_KV"));

static DETAIL_LOG: Lazy<Regex> = Lazy::new(|| {
    lazy_regex(
        r"^\s*(\d+)\s+([\d-]{10}\s[\d:]{8})\s+([\d-]{10}\s[\d:]{8})\s*(.*)$",
        "DETAIL_LOG",
    )
});

static IP_HOST: Lazy<Regex> =
    Lazy::new(|| lazy_regex(r"(?m)^\s*Current IP address:\s+(\S+)", "IP_HOST"));

static ATTENUATION: Lazy<Regex> = Lazy::new(|| {
    lazy_regex(
        r"(?m)^\s*down\s+.*\s+(Rx:[-.\d]+\(dbm\))",
        "ATTENUATION",
    )
});

/// An ONU seen on a PON port but not yet configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnconfiguredOnu {
    pub sn: String,
    pub pon_slot: String,
    pub pon_port: String,
}

impl UnconfiguredOnu {
    /// PON interface the ONU is attached to.
    pub fn pon_interface(&self, family: DeviceFamily) -> String {
        family.pon_interface(&self.pon_slot, &self.pon_port)
    }
}

/// Reads the unconfigured-ONU listing of a family.
pub fn parse_unconfigured_onus(family: DeviceFamily, text: &str) -> Vec<UnconfiguredOnu> {
    text.trim()
        .lines()
        .filter_map(|line| match family {
            DeviceFamily::C600 if line.contains("GPON") => parse_c600_uncfg_line(line),
            DeviceFamily::C300 if line.contains("unknown") => parse_c300_uncfg_line(line),
            _ => None,
        })
        .collect()
}

// gpon_olt-1/3/1     ZTEGC8D12345     GPON
fn parse_c600_uncfg_line(line: &str) -> Option<UnconfiguredOnu> {
    let mut parts = line.split_whitespace();
    let interface = parts.next()?;
    let sn = parts.next()?;
    let caps = C600_PON_LOCATION.captures(interface)?;
    let onu = UnconfiguredOnu {
        sn: sn.to_string(),
        pon_port: caps.get(1)?.as_str().to_string(),
        pon_slot: caps.get(2)?.as_str().to_string(),
    };
    Some(onu)
}

// The C300 pads columns with runs of spaces whose width depends on the port
// number, so the serial number column moves by one field for ports >= 10.
fn parse_c300_uncfg_line(line: &str) -> Option<UnconfiguredOnu> {
    let fields_text = line.replace("        ", " ").replace(' ', ";");
    let fields: Vec<&str> = fields_text.split(';').collect();
    let location: Vec<&str> = fields.first()?.split('/').collect();
    let port = location.get(2)?.split(':').next()?;
    let port_number: u32 = port.parse().ok()?;
    let sn = if port_number >= 10 {
        fields.get(1)?
    } else {
        fields.get(2)?
    };
    let slot = location.get(1)?;
    if sn.is_empty() || slot.is_empty() || port.is_empty() {
        return None;
    }
    Some(UnconfiguredOnu {
        sn: sn.to_string(),
        pon_slot: slot.to_string(),
        pon_port: port.to_string(),
    })
}

/// Ids of the ONUs registered on a port, from its state table.
pub fn parse_active_onu_ids(family: DeviceFamily, text: &str) -> Vec<u32> {
    let marker = match family {
        DeviceFamily::C600 => "enable",
        _ => "1(GPON)",
    };
    text.lines()
        .filter(|line| line.contains(marker))
        .filter_map(|line| {
            let first = line.split_whitespace().next()?;
            first.rsplit(':').next()?.parse().ok()
        })
        .collect()
}

/// Smallest free ONU id on a port.
pub fn next_available_onu_id(active: &[u32], interface: &str) -> Result<u32, ConnectError> {
    let mut ids: Vec<u32> = active.iter().copied().filter(|id| *id > 0).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut candidate = 1;
    for id in ids {
        if id != candidate {
            break;
        }
        candidate += 1;
    }

    if candidate > MAX_ONU_ID {
        return Err(ConnectError::CapacityExhausted {
            interface: interface.to_string(),
            limit: MAX_ONU_ID,
        });
    }
    Ok(candidate)
}

/// DBA utilisation of `interface` in percent, `0.0` when absent.
pub fn parse_dba_rate(text: &str, interface: &str) -> f64 {
    let escaped = regex::escape(interface);
    let strict = Regex::new(&format!(
        r"(?i){escaped}\s+\S*GPON\S*\s+\d+\s+\d+\s+([\d.]+)"
    ));
    let loose = Regex::new(&format!(r"(?m){escaped}\s+.*?([\d.]+)\s*$"));

    for re in [strict, loose].into_iter().flatten() {
        if let Some(rate) = re
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            return rate;
        }
    }
    0.0
}

/// DBA utilisation of the GPON channel as `"X%"`.
///
/// XG-PON capable ports list the XG channel first, so the second matching
/// line is preferred.
pub fn parse_dba_percentage(text: &str) -> String {
    let rates: Vec<&str> = DBA_LINE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    match rates.as_slice() {
        [_, second, ..] => format!("{second}%"),
        [first] => format!("{first}%"),
        [] => "0.0%".to_string(),
    }
}

/// State of one ONU ethernet port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EthPortStatus {
    pub interface: String,
    pub is_unlocked: bool,
    pub speed_status: String,
    /// A cable is connected and negotiated.
    pub lan_detected: bool,
    pub speed_mbps: Option<u32>,
}

pub fn parse_eth_ports(text: &str) -> Vec<EthPortStatus> {
    ETH_PORT
        .captures_iter(text)
        .map(|caps| {
            let speed_status = caps[2].to_string();
            let speed = speed_status.to_ascii_lowercase();
            let lan_detected = speed.contains("full-") || speed.contains("half-");
            let speed_mbps = if lan_detected {
                FIRST_NUMBER
                    .captures(&speed_status)
                    .and_then(|c| c[1].parse().ok())
            } else {
                None
            };
            EthPortStatus {
                interface: caps[1].to_string(),
                is_unlocked: caps[3].eq_ignore_ascii_case("unlock"),
                speed_status,
                lan_detected,
                speed_mbps,
            }
        })
        .collect()
}

/// True when the admin status of `interface` is `unlock`.
pub fn parse_interface_admin_status(text: &str, interface: &str) -> bool {
    let pattern = format!(
        r"(?s)Interface\s+:\s+({}).*?Admin status\s+:\s+(\S+)",
        regex::escape(interface)
    );
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(text).map(|caps| caps[2].eq_ignore_ascii_case("unlock")))
        .unwrap_or(false)
}

/// Selected fields of an ONU detail dump plus its two latest session logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OnuDetail {
    #[serde(rename = "type")]
    pub onu_type: Option<String>,
    pub phase_state: Option<String>,
    pub serial_number: Option<String>,
    pub onu_distance: Option<String>,
    pub online_duration: Option<String>,
    pub modem_logs: String,
}

pub fn parse_onu_detail(text: &str) -> OnuDetail {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut logs = Vec::new();

    for line in text.lines() {
        if DETAIL_LOG.is_match(line) {
            logs.push(line);
            continue;
        }
        if let Some(caps) = DETAIL_KV.captures(line) {
            let value = caps[2].trim();
            if !value.is_empty() {
                fields.insert(caps[1].trim().to_string(), value.to_string());
            }
        }
    }

    let start = logs.len().saturating_sub(2);
    OnuDetail {
        onu_type: fields.remove("Type"),
        phase_state: fields.remove("Phase state"),
        serial_number: fields.remove("Serial number"),
        onu_distance: fields.remove("ONU Distance"),
        online_duration: fields.remove("Online Duration"),
        modem_logs: logs[start..].join("\n"),
    }
}

/// First assigned WAN address of an ONU, `"0.0.0.0"` when none.
pub fn parse_onu_ip_host(text: &str) -> String {
    IP_HOST
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|ip| ip != "0.0.0.0" && ip != "N/A")
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

/// Downstream receive power, e.g. `"Rx:-24.317(dbm)"`, or `"N/A"`.
pub fn parse_onu_attenuation(text: &str) -> String {
    ATTENUATION
        .captures(text)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Status and description lines of an uplink interface.
pub fn parse_uplink_monitoring(text: &str) -> String {
    text.trim()
        .lines()
        .take(2)
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The `Diagnostic-info` block of an optical module dump.
pub fn parse_optical_diagnostics(text: &str) -> String {
    let mut section = Vec::new();
    let mut inside = false;
    for line in text.trim().lines() {
        let line = line.trim();
        if line.starts_with("Diagnostic-info") {
            inside = true;
            section.push(line);
            continue;
        }
        if !inside {
            continue;
        }
        // Next section header, e.g. "Alarm-thresh:".
        if line.ends_with(':')
            && !["RxPower", "TxBias", "Temperature"]
                .iter()
                .any(|p| line.starts_with(p))
        {
            break;
        }
        if !line.is_empty() {
            section.push(line);
        }
    }
    section.join("\n")
}
