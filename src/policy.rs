//! Mandatory encryption policy.
//!
//! Mail leaving the sender's domain must be a PGP/MIME encrypted message
//! unless it is a Secure-Join handshake request or one of the parties is
//! on a passthrough list.

use crate::address::{parse_mailbox, AddressError};
use crate::config::PolicyConfig;
use crate::mime::MimeError;
use crate::pgp_mime::is_valid_encrypted_message;
use crate::transaction::MailTransaction;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const SECURE_JOIN_REQUESTS: [&str; 2] = ["vc-request", "vg-request"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// `From` header address differs from the envelope sender
    SenderMismatch { header: String, envelope: String },
    /// Recipient is not of the form `local@domain`
    MalformedRecipient(String),
    /// Unencrypted mail to another domain
    UnencryptedOutgoing { recipient: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SenderMismatch { header, envelope } => {
                write!(f, "From header {header} does not match envelope sender {envelope}")
            }
            RejectReason::MalformedRecipient(recipient) => {
                write!(f, "malformed recipient {recipient}")
            }
            RejectReason::UnencryptedOutgoing { recipient } => {
                write!(f, "unencrypted mail to {recipient}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Failures that are not policy verdicts. The transaction should be
/// deferred rather than accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unreadable MIME structure: {0}")]
    Mime(#[from] MimeError),
    #[error("unparseable From header: {0}")]
    From(#[from] AddressError),
}

fn is_secure_join_request(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        SECURE_JOIN_REQUESTS
            .iter()
            .any(|request| v.eq_ignore_ascii_case(request))
    })
}

pub struct PolicyEngine {
    config: Arc<PolicyConfig>,
}

impl PolicyEngine {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    pub fn decide(&self, tx: &MailTransaction) -> Result<Verdict, PolicyError> {
        decide(tx, &self.config)
    }
}

/// Decides whether a completed transaction may be delivered.
///
/// The first recipient that violates the policy decides the verdict for
/// the whole transaction.
pub fn decide(tx: &MailTransaction, config: &PolicyConfig) -> Result<Verdict, PolicyError> {
    if config.passthrough_senders.contains(&tx.mail_from) {
        log::debug!("Passthrough sender {}", tx.mail_from);
        return Ok(Verdict::Accept);
    }

    let mail_encrypted = is_valid_encrypted_message(
        &config.encrypted_subjects,
        tx.subject.as_deref().unwrap_or_default(),
        tx.content_type.as_deref().unwrap_or_default(),
        &tx.body,
    )?;

    let mime_from = parse_mailbox(tx.mime_from.as_deref().unwrap_or_default())?;
    if !mime_from.address.eq_ignore_ascii_case(&tx.mail_from) {
        return Ok(Verdict::Reject(RejectReason::SenderMismatch {
            header: mime_from.address,
            envelope: tx.mail_from.clone(),
        }));
    }
    let mime_from_domain = mime_from.domain();

    for recipient in &tx.rcpt_tos {
        if *recipient == tx.mail_from {
            continue;
        }
        if config.passthrough_recipients.contains(recipient) {
            log::debug!("Passthrough recipient {recipient}");
            continue;
        }

        let parts: Vec<&str> = recipient.split('@').collect();
        let [_, recipient_domain] = parts.as_slice() else {
            return Ok(Verdict::Reject(RejectReason::MalformedRecipient(
                recipient.clone(),
            )));
        };

        let is_outgoing = *recipient_domain != mime_from_domain;
        if is_outgoing && !mail_encrypted && !is_secure_join_request(tx.secure_join.as_deref())
        {
            return Ok(Verdict::Reject(RejectReason::UnencryptedOutgoing {
                recipient: recipient.clone(),
            }));
        }
    }

    Ok(Verdict::Accept)
}
