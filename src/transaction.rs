//! Per-session transaction state driven by milter events.

use crate::address::envelope_address;
use crate::message::Message;
use crate::policy::{PolicyEngine, Verdict};
use std::sync::Arc;

/// Everything the policy needs from one SMTP transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailTransaction {
    pub mail_from: String,
    pub rcpt_tos: Vec<String>,
    pub mime_from: Option<String>,
    pub secure_join: Option<String>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl MailTransaction {
    pub fn new(mail_from: String) -> Self {
        MailTransaction {
            mail_from,
            ..Default::default()
        }
    }

    pub fn add_recipient(&mut self, rcpt: String) {
        self.rcpt_tos.push(rcpt);
    }

    /// Stores the headers the policy looks at. A repeated header replaces
    /// the earlier value.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let slot = if name.eq_ignore_ascii_case("From") {
            &mut self.mime_from
        } else if name.eq_ignore_ascii_case("Subject") {
            &mut self.subject
        } else if name.eq_ignore_ascii_case("Content-Type") {
            &mut self.content_type
        } else if name.eq_ignore_ascii_case("Secure-Join") {
            &mut self.secure_join
        } else {
            return;
        };
        *slot = Some(value.trim().to_string());
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MailFrom(String),
    RcptTo(String),
    Header { name: String, value: String },
    EndOfHeaders,
    BodyChunk(Vec<u8>),
    EndOfBody,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Continue,
    Accept,
    Reject,
    TempFail,
}

// sendmail's MILTER_CHUNK_SIZE
const BODY_CHUNK_SIZE: usize = 65535;

/// One milter connection. Holds at most one open transaction; a new
/// `MailFrom` always starts from a clean record.
pub struct Session {
    engine: Arc<PolicyEngine>,
    transaction: Option<MailTransaction>,
}

impl Session {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Session {
            engine,
            transaction: None,
        }
    }

    pub fn transaction(&self) -> Option<&MailTransaction> {
        self.transaction.as_ref()
    }

    pub fn handle(&mut self, event: Event) -> Reply {
        match event {
            Event::MailFrom(raw) => {
                if self.transaction.is_some() {
                    log::debug!("Discarding unfinished transaction");
                }
                let mail_from = envelope_address(&raw);
                log::debug!("MAIL FROM: {mail_from}");
                self.transaction = Some(MailTransaction::new(mail_from));
                Reply::Continue
            }
            Event::RcptTo(raw) => self.with_transaction("RCPT TO", |tx| {
                let rcpt = envelope_address(&raw);
                log::debug!("RCPT TO: {rcpt}");
                tx.add_recipient(rcpt);
            }),
            Event::Header { name, value } => {
                self.with_transaction("header", |tx| tx.set_header(&name, &value))
            }
            Event::EndOfHeaders => self.with_transaction("end of headers", |_| {}),
            Event::BodyChunk(chunk) => {
                self.with_transaction("body chunk", |tx| tx.append_body(&chunk))
            }
            Event::EndOfBody => {
                let Some(tx) = self.transaction.take() else {
                    log::warn!("End of message without an open transaction");
                    return Reply::TempFail;
                };
                self.decide(&tx)
            }
            Event::Abort => {
                if self.transaction.take().is_some() {
                    log::debug!("Transaction aborted");
                }
                Reply::Continue
            }
        }
    }

    /// Streams a parsed message through the session the way the MTA
    /// would and returns the final reply. Stops early if any step does
    /// not answer `Continue`.
    pub fn replay(&mut self, mail_from: &str, rcpt_tos: &[String], message: &Message) -> Reply {
        let mut events = vec![Event::MailFrom(format!("<{mail_from}>"))];
        events.extend(rcpt_tos.iter().map(|r| Event::RcptTo(format!("<{r}>"))));
        events.extend(message.headers.iter().map(|(name, value)| Event::Header {
            name: name.clone(),
            value: value.clone(),
        }));
        events.push(Event::EndOfHeaders);
        for chunk in message.body.chunks(BODY_CHUNK_SIZE) {
            events.push(Event::BodyChunk(chunk.to_vec()));
        }

        for event in events {
            let reply = self.handle(event);
            if reply != Reply::Continue {
                self.handle(Event::Abort);
                return reply;
            }
        }
        self.handle(Event::EndOfBody)
    }

    fn with_transaction<F>(&mut self, what: &str, f: F) -> Reply
    where
        F: FnOnce(&mut MailTransaction),
    {
        match self.transaction.as_mut() {
            Some(tx) => {
                f(tx);
                Reply::Continue
            }
            None => {
                log::warn!("Received {what} without an open transaction");
                Reply::TempFail
            }
        }
    }

    fn decide(&self, tx: &MailTransaction) -> Reply {
        match self.engine.decide(tx) {
            Ok(Verdict::Accept) => {
                log::info!(
                    "Accepted message from {} to {}",
                    tx.mail_from,
                    tx.rcpt_tos.join(", ")
                );
                Reply::Accept
            }
            Ok(Verdict::Reject(reason)) => {
                log::info!("Rejected message from {}: {}", tx.mail_from, reason);
                Reply::Reject
            }
            Err(e) => {
                log::warn!("Deferring message from {}: {}", tx.mail_from, e);
                Reply::TempFail
            }
        }
    }
}
