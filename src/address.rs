//! Mailbox parsing for the `From` header and envelope address helpers.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    // RFC 5322 atext, plus any non-ASCII character (RFC 6532)
    static ref DOT_ATOM_RE: Regex =
        Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~\-[^\x00-\x7F]]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~\-[^\x00-\x7F]]+)*$")
            .unwrap();
    static ref QUOTED_LOCAL_RE: Regex = Regex::new(r#"^"(?:[^"\\\r\n]|\\.)*"$"#).unwrap();
    static ref DOMAIN_LITERAL_RE: Regex = Regex::new(r"^\[[^\[\]\\\r\n]*\]$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("no address")]
    Empty,
    #[error("unbalanced angle brackets in {0:?}")]
    UnbalancedAngle(String),
    #[error("missing @ in address {0:?}")]
    MissingAt(String),
    #[error("invalid local part in {0:?}")]
    InvalidLocalPart(String),
    #[error("invalid domain in {0:?}")]
    InvalidDomain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub display_name: Option<String>,
    /// `local@domain`
    pub address: String,
}

impl Mailbox {
    /// Everything after the last `@` of the address.
    pub fn domain(&self) -> &str {
        domain_of(&self.address)
    }
}

pub fn domain_of(address: &str) -> &str {
    address.rsplit('@').next().unwrap_or(address)
}

fn validate_addr_spec(spec: &str) -> Result<String, AddressError> {
    let (local, domain) = spec
        .rsplit_once('@')
        .ok_or_else(|| AddressError::MissingAt(spec.to_string()))?;
    if !(DOT_ATOM_RE.is_match(local) || QUOTED_LOCAL_RE.is_match(local)) {
        return Err(AddressError::InvalidLocalPart(spec.to_string()));
    }
    if !(DOT_ATOM_RE.is_match(domain) || DOMAIN_LITERAL_RE.is_match(domain)) {
        return Err(AddressError::InvalidDomain(spec.to_string()));
    }
    Ok(spec.to_string())
}

fn unquote_display_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let name = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .map(|n| n.replace("\\\"", "\"").replace("\\\\", "\\"))
        .unwrap_or_else(|| name.to_string());
    Some(name)
}

/// Parses a single mailbox such as `Alice <alice@example.org>` or
/// `alice@example.org`.
pub fn parse_mailbox(value: &str) -> Result<Mailbox, AddressError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AddressError::Empty);
    }

    if let Some(open) = value.rfind('<') {
        let inner = value[open + 1..]
            .strip_suffix('>')
            .ok_or_else(|| AddressError::UnbalancedAngle(value.to_string()))?;
        let address = validate_addr_spec(inner.trim())?;
        return Ok(Mailbox {
            display_name: unquote_display_name(&value[..open]),
            address,
        });
    }
    if value.contains('>') {
        return Err(AddressError::UnbalancedAngle(value.to_string()));
    }

    Ok(Mailbox {
        display_name: None,
        address: validate_addr_spec(value)?,
    })
}

/// Strips the angle brackets the MTA puts around envelope addresses.
/// The null sender `<>` becomes the empty string.
pub fn envelope_address(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .unwrap_or(raw)
        .trim()
        .to_string()
}
