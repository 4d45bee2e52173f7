//! Device families and their CLI dialects.
//!
//! A dialect is everything the session engine needs to know about a vendor CLI
//! apart from the command table: how the login conversation goes, which text
//! marks a ready shell, and which pager markers must be answered with a
//! keystroke.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::RUIJIE_SETTLE_DELAY;
use crate::error::ConnectError;

/// Supported device families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// ZTE C300 OLT.
    C300,
    /// ZTE C600 OLT.
    C600,
    /// Huawei VRP switch.
    Huawei,
    /// Cisco IOS switch.
    Cisco,
    /// Ruijie switch.
    Ruijie,
}

/// Whether a family is an OLT or a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Olt,
    Switch,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 5] = [
        DeviceFamily::C300,
        DeviceFamily::C600,
        DeviceFamily::Huawei,
        DeviceFamily::Cisco,
        DeviceFamily::Ruijie,
    ];

    pub fn kind(self) -> DeviceKind {
        match self {
            DeviceFamily::C300 | DeviceFamily::C600 => DeviceKind::Olt,
            DeviceFamily::Huawei | DeviceFamily::Cisco | DeviceFamily::Ruijie => {
                DeviceKind::Switch
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::C300 => "c300",
            DeviceFamily::C600 => "c600",
            DeviceFamily::Huawei => "huawei",
            DeviceFamily::Cisco => "cisco",
            DeviceFamily::Ruijie => "ruijie",
        }
    }

    /// Parses a family name, case-insensitively.
    pub fn by_name(name: &str) -> Result<DeviceFamily, ConnectError> {
        let lower = name.trim().to_ascii_lowercase();
        DeviceFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| ConnectError::NotFound(format!("device family '{name}'")))
    }

    /// Prefixes a bare PON port (`1/2/3`) with the OLT interface name.
    ///
    /// Names already starting with `gpon` and switch interfaces are returned as is.
    pub fn olt_interface(self, interface: &str) -> String {
        match self {
            _ if interface.starts_with("gpon") => interface.to_string(),
            DeviceFamily::C300 => format!("gpon-olt_{interface}"),
            DeviceFamily::C600 => format!("gpon_olt-{interface}"),
            _ => interface.to_string(),
        }
    }

    /// Prefixes a bare ONU address (`1/2/3:4`) with the ONU interface name.
    pub fn onu_interface(self, interface: &str) -> String {
        match self {
            _ if interface.starts_with("gpon") => interface.to_string(),
            DeviceFamily::C300 => format!("gpon-onu_{interface}"),
            DeviceFamily::C600 => format!("gpon_onu-{interface}"),
            _ => interface.to_string(),
        }
    }

    /// PON interface for a slot/port pair as listed by the unconfigured-ONU table.
    ///
    /// The C600 swaps slot and port in its interface numbering.
    pub fn pon_interface(self, slot: &str, port: &str) -> String {
        match self {
            DeviceFamily::C600 => format!("gpon_olt-1/{port}/{slot}"),
            _ => format!("gpon-olt_1/{slot}/{port}"),
        }
    }

    /// ONU interface for a slot/port pair and an ONU id.
    pub fn onu_interface_at(self, slot: &str, port: &str, onu_id: u32) -> String {
        match self {
            DeviceFamily::C600 => format!("gpon_onu-1/{port}/{slot}:{onu_id}"),
            _ => format!("gpon-onu_1/{slot}/{port}:{onu_id}"),
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits `1/1/1:5` into `("1/1/1", 5)`.
pub fn split_onu_interface(interface: &str) -> Result<(&str, u32), ConnectError> {
    let (base, id) = interface
        .rsplit_once(':')
        .ok_or_else(|| ConnectError::InvalidInterface(interface.to_string()))?;
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|_| ConnectError::InvalidInterface(interface.to_string()))?;
    // `gpon-onu_1/1/1:5` keeps its prefix in the base; strip only the id.
    Ok((base, id))
}

/// Drops the `:id` suffix of an ONU address, if any.
pub fn base_interface(interface: &str) -> &str {
    interface
        .split_once(':')
        .map(|(base, _)| base)
        .unwrap_or(interface)
}

/// Named states of a login conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    AwaitingUserPrompt,
    AwaitingPasswordPrompt,
    AwaitingPasswordChangeDecision,
    AwaitingEnablePrompt,
    AwaitingShellPrompt,
    Ready,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::AwaitingUserPrompt => "awaiting_user_prompt",
            LoginState::AwaitingPasswordPrompt => "awaiting_password_prompt",
            LoginState::AwaitingPasswordChangeDecision => "awaiting_password_change_decision",
            LoginState::AwaitingEnablePrompt => "awaiting_enable_prompt",
            LoginState::AwaitingShellPrompt => "awaiting_shell_prompt",
            LoginState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Text typed in answer to a login prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginInput {
    Username,
    Password,
    Literal(String),
}

/// A question that may interrupt the wait for the shell prompt.
///
/// Every marker must be present (case-insensitive) before the answer is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Deflection {
    pub markers: Vec<String>,
    pub answer: String,
}

/// One step of a login conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LoginStep {
    /// Wait before reading anything.
    Settle { millis: u64 },
    /// Wait for any of the substrings (case-insensitive), then type `send`.
    Expect {
        state: LoginState,
        any_of: Vec<String>,
        send: LoginInput,
    },
    /// Wait for the prompt regex, answering the deflection if it shows up.
    AwaitPrompt {
        pattern: String,
        #[serde(default)]
        deflect: Option<Deflection>,
    },
}

/// Prompts, pager markers and login script of one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FamilyProfile {
    pub login: Vec<LoginStep>,
    /// Regex matched against the whole accumulated output; marks command completion.
    pub shell_prompt: String,
    pub pagination: Vec<String>,
    /// Commands run once right after login.
    #[serde(default)]
    pub post_login: Vec<String>,
    /// Commands that enter configuration mode before config actions.
    #[serde(default)]
    pub config_prefix: Vec<String>,
}

pub const OLT_PROMPT: &str = r"(.+[>#])\s*$";
pub const SWITCH_PROMPT: &str = r"[>#\]]\s*$";
pub const HUAWEI_LOGIN_PROMPT: &str = r"<.+>\s*$";

const OLT_PAGINATION: &[&str] = &["--More--"];
const SWITCH_PAGINATION: &[&str] = &["---- More ----", "--More--", "-- More --", "---More---"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn expect(state: LoginState, any_of: &[&str], send: LoginInput) -> LoginStep {
    LoginStep::Expect {
        state,
        any_of: strings(any_of),
        send,
    }
}

fn await_prompt(pattern: &str) -> LoginStep {
    LoginStep::AwaitPrompt {
        pattern: pattern.to_string(),
        deflect: None,
    }
}

impl FamilyProfile {
    /// Built-in dialect of a family.
    pub fn builtin(family: DeviceFamily) -> FamilyProfile {
        match family {
            DeviceFamily::C300 | DeviceFamily::C600 => FamilyProfile {
                login: vec![
                    expect(
                        LoginState::AwaitingUserPrompt,
                        &["Username:"],
                        LoginInput::Username,
                    ),
                    expect(
                        LoginState::AwaitingPasswordPrompt,
                        &["Password:"],
                        LoginInput::Password,
                    ),
                    await_prompt(OLT_PROMPT),
                ],
                shell_prompt: OLT_PROMPT.to_string(),
                pagination: strings(OLT_PAGINATION),
                post_login: vec!["terminal length 0".to_string()],
                config_prefix: vec!["configure terminal".to_string()],
            },
            DeviceFamily::Huawei => FamilyProfile {
                login: vec![
                    expect(
                        LoginState::AwaitingUserPrompt,
                        &["username"],
                        LoginInput::Username,
                    ),
                    expect(
                        LoginState::AwaitingPasswordPrompt,
                        &["password"],
                        LoginInput::Password,
                    ),
                    LoginStep::AwaitPrompt {
                        pattern: HUAWEI_LOGIN_PROMPT.to_string(),
                        deflect: Some(Deflection {
                            markers: strings(&["change now", "y/n"]),
                            answer: "n".to_string(),
                        }),
                    },
                ],
                shell_prompt: SWITCH_PROMPT.to_string(),
                pagination: strings(SWITCH_PAGINATION),
                post_login: Vec::new(),
                config_prefix: vec!["system-view".to_string()],
            },
            DeviceFamily::Cisco => FamilyProfile {
                login: vec![
                    expect(
                        LoginState::AwaitingUserPrompt,
                        &["login:", "username:"],
                        LoginInput::Username,
                    ),
                    expect(
                        LoginState::AwaitingPasswordPrompt,
                        &["password:"],
                        LoginInput::Password,
                    ),
                    await_prompt(SWITCH_PROMPT),
                ],
                shell_prompt: SWITCH_PROMPT.to_string(),
                pagination: strings(SWITCH_PAGINATION),
                post_login: Vec::new(),
                config_prefix: vec!["configure terminal".to_string()],
            },
            // The first Password prompt wants the username; the real password
            // goes to the enable prompt.
            DeviceFamily::Ruijie => FamilyProfile {
                login: vec![
                    LoginStep::Settle {
                        millis: RUIJIE_SETTLE_DELAY.as_millis() as u64,
                    },
                    expect(
                        LoginState::AwaitingUserPrompt,
                        &["password:"],
                        LoginInput::Username,
                    ),
                    expect(
                        LoginState::AwaitingEnablePrompt,
                        &[">"],
                        LoginInput::Literal("en".to_string()),
                    ),
                    expect(
                        LoginState::AwaitingPasswordPrompt,
                        &["password:"],
                        LoginInput::Password,
                    ),
                    await_prompt(SWITCH_PROMPT),
                ],
                shell_prompt: SWITCH_PROMPT.to_string(),
                pagination: strings(SWITCH_PAGINATION),
                post_login: Vec::new(),
                config_prefix: vec!["configure terminal".to_string()],
            },
        }
    }

    /// Checks the profile and compiles its patterns.
    pub fn compile(&self) -> Result<CompiledFamily, ConnectError> {
        let shell_prompt = compile_prompt(&self.shell_prompt)?;
        let mut login = Vec::with_capacity(self.login.len());
        let mut reaches_prompt = false;
        for step in &self.login {
            login.push(match step {
                LoginStep::Settle { millis } => CompiledLoginStep::Settle(Duration::from_millis(*millis)),
                LoginStep::Expect {
                    state,
                    any_of,
                    send,
                } => {
                    if any_of.is_empty() {
                        return Err(ConnectError::InvalidDialect(format!(
                            "login step {state} expects nothing"
                        )));
                    }
                    CompiledLoginStep::Expect {
                        state: *state,
                        any_of: any_of.iter().map(|s| s.to_ascii_lowercase()).collect(),
                        send: send.clone(),
                    }
                }
                LoginStep::AwaitPrompt { pattern, deflect } => {
                    reaches_prompt = true;
                    CompiledLoginStep::AwaitPrompt {
                        pattern: compile_prompt(pattern)?,
                        deflect: deflect.as_ref().map(|d| Deflection {
                            markers: d.markers.iter().map(|m| m.to_ascii_lowercase()).collect(),
                            answer: d.answer.clone(),
                        }),
                    }
                }
            });
        }
        if !reaches_prompt {
            return Err(ConnectError::InvalidDialect(
                "login script never waits for a shell prompt".to_string(),
            ));
        }
        if self.pagination.iter().any(|m| m.is_empty()) {
            return Err(ConnectError::InvalidDialect(
                "empty pagination marker".to_string(),
            ));
        }
        Ok(CompiledFamily {
            login,
            shell_prompt,
            pagination: self.pagination.clone(),
            post_login: self.post_login.clone(),
            config_prefix: self.config_prefix.clone(),
        })
    }
}

fn compile_prompt(pattern: &str) -> Result<Regex, ConnectError> {
    Regex::new(pattern)
        .map_err(|e| ConnectError::InvalidDialect(format!("bad prompt regex {pattern}: {e}")))
}

/// Login step with its patterns compiled and lowercased.
#[derive(Debug, Clone)]
pub enum CompiledLoginStep {
    Settle(Duration),
    Expect {
        state: LoginState,
        any_of: Vec<String>,
        send: LoginInput,
    },
    AwaitPrompt {
        pattern: Regex,
        deflect: Option<Deflection>,
    },
}

/// Ready-to-use dialect of one family.
#[derive(Debug, Clone)]
pub struct CompiledFamily {
    pub login: Vec<CompiledLoginStep>,
    pub shell_prompt: Regex,
    pub pagination: Vec<String>,
    pub post_login: Vec<String>,
    pub config_prefix: Vec<String>,
}

/// Case-insensitive substring test over the accumulated output.
pub fn contains_any(haystack: &str, lowered_needles: &[String]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    lowered_needles.iter().any(|n| lower.contains(n.as_str()))
}

/// Leading carriage returns and backspace runs left by pager erasure.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
