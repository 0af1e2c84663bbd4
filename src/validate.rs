//! Syntactic and security checks for the two caller-supplied scan fields.
//!
//! Targets are matched against an allowlist of shapes (hostname, IPv4
//! address, IPv4 CIDR). Flags are walked token by token: the values of `-p`,
//! `--top-ports` and `--script` get dedicated grammars, every other token
//! must look like a flag and carry no shell metacharacters.
use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::ValidationError;

/// Flags used when a request does not specify any.
pub const DEFAULT_FLAGS: &str = "-T4 -p 1-1000";

/// Characters that must never reach the scanner, even inside a flag body.
const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '>', '<', '`'];

const MAX_LABEL_LEN: usize = 63;

/// A scan target that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Hostname(String),
    Address(Ipv4Addr),
    Network(Ipv4Net),
}

impl Target {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        let invalid = || ValidationError::InvalidTarget(input.to_string());

        if let Some((addr, prefix)) = input.split_once('/') {
            let addr = parse_ipv4(addr).ok_or_else(invalid)?;
            let prefix = parse_prefix(prefix).ok_or_else(invalid)?;
            let net = Ipv4Net::new(addr, prefix).map_err(|_| invalid())?;
            return Ok(Target::Network(net));
        }
        if let Some(addr) = parse_ipv4(input) {
            return Ok(Target::Address(addr));
        }
        if is_hostname(input) {
            return Ok(Target::Hostname(input.to_string()));
        }
        Err(invalid())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Hostname(h) => f.write_str(h),
            Target::Address(a) => write!(f, "{a}"),
            Target::Network(n) => write!(f, "{n}"),
        }
    }
}

/// Ordered flag tokens that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFlags {
    tokens: Vec<String>,
}

impl ScanFlags {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let mut tokens = Vec::new();
        let mut expecting: Option<(Expect, &str)> = None;

        for token in input.split_whitespace() {
            if let Some((expect, _)) = expecting.take() {
                expect.check(token)?;
                tokens.push(token.to_string());
                continue;
            }
            if !token.starts_with('-') {
                return Err(ValidationError::UnexpectedArgument(token.to_string()));
            }
            if token.contains(FORBIDDEN_CHARS) {
                return Err(ValidationError::ForbiddenCharacter(token.to_string()));
            }
            if let Some((expect, value)) = Expect::glued(token) {
                expect.check(value)?;
                tokens.push(token.to_string());
                continue;
            }
            expecting = Expect::after(token).map(|e| (e, token));
            tokens.push(token.to_string());
        }

        // A trailing selector would make nmap consume the target as its value.
        if let Some((_, flag)) = expecting {
            return Err(ValidationError::MissingValue(flag.to_string()));
        }
        if tokens.is_empty() {
            return Err(ValidationError::EmptyFlags);
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl fmt::Display for ScanFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Flags whose next token is a structured value.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Ports,
    TopPorts,
    Scripts,
}

impl Expect {
    fn after(flag: &str) -> Option<Self> {
        match flag {
            "-p" => Some(Expect::Ports),
            "--top-ports" => Some(Expect::TopPorts),
            "--script" => Some(Expect::Scripts),
            _ => None,
        }
    }

    /// Selector and value in one token: `--script=vuln`, `--top-ports=10`, `-p80`.
    ///
    /// Any single-dash token starting with `-p` counts as a port selector, the
    /// way nmap's option parser reads it.
    fn glued(token: &str) -> Option<(Self, &str)> {
        if let Some(long) = token.strip_prefix("--") {
            let (name, value) = long.split_once('=')?;
            return match name {
                "top-ports" => Some((Expect::TopPorts, value)),
                "script" => Some((Expect::Scripts, value)),
                _ => None,
            };
        }
        let value = token.strip_prefix("-p")?;
        (!value.is_empty()).then_some((Expect::Ports, value))
    }

    fn check(self, value: &str) -> Result<(), ValidationError> {
        let ok = match self {
            Expect::Ports => is_port_spec(value),
            Expect::TopPorts => is_top_ports(value),
            Expect::Scripts => is_script_spec(value),
        };
        if ok {
            return Ok(());
        }
        let value = value.to_string();
        Err(match self {
            Expect::Ports => ValidationError::InvalidPortSpec(value),
            Expect::TopPorts => ValidationError::InvalidTopPorts(value),
            Expect::Scripts => ValidationError::InvalidScriptSpec(value),
        })
    }
}

/// Returns true if `target` is a hostname, an IPv4 address or an IPv4 CIDR.
pub fn validate_target(target: &str) -> bool {
    Target::parse(target).is_ok()
}

/// Returns true if every token of `flags` is an allowed nmap flag or value.
pub fn validate_flags(flags: &str) -> bool {
    ScanFlags::parse(flags).is_ok()
}

fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !is_digits(part) {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

fn parse_prefix(s: &str) -> Option<u8> {
    if s.is_empty() || s.len() > 2 || !is_digits(s) {
        return None;
    }
    s.parse::<u8>().ok().filter(|p| *p <= 32)
}

fn is_hostname(s: &str) -> bool {
    s.split('.').all(is_label)
}

fn is_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Comma-separated ports (`80`) and inclusive ranges (`1-1000`).
fn is_port_spec(s: &str) -> bool {
    s.split(',').all(|item| match item.split_once('-') {
        Some((a, b)) => matches!((parse_port_str(a), parse_port_str(b)), (Some(a), Some(b)) if a <= b),
        None => parse_port_str(item).is_some(),
    })
}

fn is_top_ports(s: &str) -> bool {
    is_digits(s) && s.parse::<u32>().is_ok_and(|n| n <= u32::from(u16::MAX))
}

fn is_script_spec(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ','))
}

fn parse_port_str(s: &str) -> Option<u16> {
    if !is_digits(s) {
        return None;
    }
    let val: u32 = s.parse().ok()?;
    if val == 0 || val > 65535 {
        return None;
    }
    Some(val as u16)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
