pub mod address;
pub mod config;
pub mod listener;
pub mod message;
pub mod milter;
pub mod mime;
pub mod openpgp;
pub mod pgp_mime;
pub mod policy;
pub mod transaction;

#[cfg(test)]
mod test_util;

pub use config::{Config, PolicyConfig};
pub use listener::{ListenUri, MilterListener};
pub use message::Message;
pub use milter::Milter;
pub use policy::{PolicyEngine, PolicyError, RejectReason, Verdict};
pub use transaction::{Event, MailTransaction, Reply, Session};
