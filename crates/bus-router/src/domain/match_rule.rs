//! # Match Rules
//!
//! D-Bus style rules (`type='signal',interface='org.example',member='Ping'`)
//! registered by endpoints that want broadcast traffic.
//!
//! | Key           | Matches                                   |
//! |---------------|-------------------------------------------|
//! | `type`        | `signal`, `method_call`, `method_return`, `error` |
//! | `sender`      | Sender unique name                        |
//! | `interface`   | Interface name                            |
//! | `member`      | Member name                               |
//! | `path`        | Object path                               |
//! | `destination` | Destination name                          |
//! | `sessionless` | `t` or `f`                                |
//! | `arg0`        | First argument when it is a string        |

use std::fmt;
use std::str::FromStr;

use bus_types::{BusError, Message, MessageType, MsgArg};

/// Parsed match rule. Absent keys match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub msg_type: Option<MessageType>,
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
    pub destination: Option<String>,
    pub sessionless: Option<bool>,
    pub arg0: Option<String>,
}

impl MatchRule {
    /// Rule matching every signal of one interface.
    #[must_use]
    pub fn signals_of(interface: &str) -> Self {
        Self {
            msg_type: Some(MessageType::Signal),
            interface: Some(interface.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_match(&self, msg: &Message) -> bool {
        fn field_ok(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }

        if self.msg_type.is_some_and(|t| t != msg.msg_type) {
            return false;
        }
        if self.sessionless.is_some_and(|s| s != msg.is_sessionless()) {
            return false;
        }
        if let Some(arg0) = &self.arg0 {
            if msg.arg(0).and_then(MsgArg::as_str) != Some(arg0.as_str()) {
                return false;
            }
        }
        field_ok(&self.sender, &msg.sender)
            && field_ok(&self.interface, &msg.interface)
            && field_ok(&self.member, &msg.member)
            && field_ok(&self.path, &msg.object_path)
            && field_ok(&self.destination, &msg.destination)
    }
}

impl FromStr for MatchRule {
    type Err = BusError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut rule = Self::default();
        for (key, value) in split_pairs(text)? {
            match key.as_str() {
                "type" => rule.msg_type = Some(parse_type(&value)?),
                "sender" => rule.sender = Some(value),
                "interface" => rule.interface = Some(value),
                "member" => rule.member = Some(value),
                "path" => rule.path = Some(value),
                "destination" => rule.destination = Some(value),
                "sessionless" => {
                    rule.sessionless = Some(match value.as_str() {
                        "t" | "true" => true,
                        "f" | "false" => false,
                        _ => return Err(BusError::InvalidMatchRule(format!("sessionless='{value}'"))),
                    })
                }
                "arg0" => rule.arg0 = Some(value),
                other => return Err(BusError::InvalidMatchRule(format!("unknown key '{other}'"))),
            }
        }
        Ok(rule)
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(t) = self.msg_type {
            parts.push(format!("type='{}'", type_name(t)));
        }
        let strings = [
            ("sender", &self.sender),
            ("interface", &self.interface),
            ("member", &self.member),
            ("path", &self.path),
            ("destination", &self.destination),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                parts.push(format!("{key}='{value}'"));
            }
        }
        if let Some(s) = self.sessionless {
            parts.push(format!("sessionless='{}'", if s { "t" } else { "f" }));
        }
        if let Some(arg0) = &self.arg0 {
            parts.push(format!("arg0='{arg0}'"));
        }
        f.write_str(&parts.join(","))
    }
}

fn type_name(t: MessageType) -> &'static str {
    match t {
        MessageType::Signal => "signal",
        MessageType::MethodCall => "method_call",
        MessageType::MethodReturn => "method_return",
        MessageType::Error => "error",
    }
}

fn parse_type(value: &str) -> Result<MessageType, BusError> {
    match value {
        "signal" => Ok(MessageType::Signal),
        "method_call" => Ok(MessageType::MethodCall),
        "method_return" => Ok(MessageType::MethodReturn),
        "error" => Ok(MessageType::Error),
        other => Err(BusError::InvalidMatchRule(format!("type='{other}'"))),
    }
}

// Values are single-quoted and may contain commas.
fn split_pairs(text: &str) -> Result<Vec<(String, String)>, BusError> {
    let mut pairs = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| BusError::InvalidMatchRule(rest.to_string()))?;
        let key = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let body = after
            .strip_prefix('\'')
            .ok_or_else(|| BusError::InvalidMatchRule(format!("unquoted value for '{key}'")))?;
        let close = body
            .find('\'')
            .ok_or_else(|| BusError::InvalidMatchRule(format!("unterminated value for '{key}'")))?;
        pairs.push((key, body[..close].to_string()));
        rest = body[close + 1..].trim_start();
        if let Some(stripped) = rest.strip_prefix(',') {
            rest = stripped.trim_start();
        } else if !rest.is_empty() {
            return Err(BusError::InvalidMatchRule(rest.to_string()));
        }
    }
    Ok(pairs)
}
