use crate::listener::{ListenUri, ListenUriError};
use crate::pgp_mime::DEFAULT_ENCRYPTED_SUBJECTS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/chatmail-milter.json";
pub const DEFAULT_MILTER_LISTEN: &str = "unix:///tmp/mandatory-encryption-milter.sock";

/// Persisted chatmail server configuration.
///
/// Only the passthrough lists, the subject allow-list and the listener
/// are used by the milter; the limits and privacy contacts are carried for
/// the other services sharing this file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub mail_fully_qualified_domain_name: String,
    pub max_emails_per_minute_per_user: u32,
    #[serde(rename = "MaxMailboxSizeMB")]
    pub max_mailbox_size_mb: u64,
    #[serde(rename = "MaxMessageSizeB")]
    pub max_message_size_b: u64,
    pub delete_mails_after_days: u32,
    pub delete_inactive_users_after_days: u32,
    pub username_min_length: u32,
    pub username_max_length: u32,
    pub password_min_length: u32,
    pub passthrough_senders_list: Vec<String>,
    pub passthrough_recipients_list: Vec<String>,
    pub privacy_contact_postal_address: String,
    pub privacy_contact_email_address: String,
    pub privacy_data_officer_postal_address: String,
    pub privacy_supervisor_postal_address: String,
    pub milter_listen: String,
    pub encrypted_subjects: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::new("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Json,
        }
    }
}

impl Config {
    pub fn new(fqdn: &str) -> Self {
        Config {
            mail_fully_qualified_domain_name: fqdn.to_string(),
            max_emails_per_minute_per_user: 30,
            max_mailbox_size_mb: 100,
            max_message_size_b: 31_457_280,
            delete_mails_after_days: 20,
            delete_inactive_users_after_days: 90,
            username_min_length: 9,
            username_max_length: 9,
            password_min_length: 9,
            passthrough_senders_list: vec![],
            passthrough_recipients_list: vec!["xstore@testrun.org".to_string()],
            privacy_contact_postal_address: String::new(),
            privacy_contact_email_address: String::new(),
            privacy_data_officer_postal_address: String::new(),
            privacy_supervisor_postal_address: String::new(),
            milter_listen: DEFAULT_MILTER_LISTEN.to_string(),
            encrypted_subjects: DEFAULT_ENCRYPTED_SUBJECTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = match ConfigFormat::for_path(path) {
            ConfigFormat::Json => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
        };
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::for_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overrides the listener address, refusing one that does not parse.
    pub fn set_milter_listen(&mut self, uri: &str) -> Result<(), ListenUriError> {
        ListenUri::parse(uri)?;
        self.milter_listen = uri.to_string();
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mail_fully_qualified_domain_name.trim().is_empty() {
            anyhow::bail!("MailFullyQualifiedDomainName must not be empty");
        }
        ListenUri::parse(&self.milter_listen)?;
        if self.encrypted_subjects.is_empty() {
            log::warn!("EncryptedSubjects is empty, no message will count as encrypted");
        }
        Ok(())
    }
}

/// The part of the configuration the encryption policy reads. Built once
/// at startup and shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub passthrough_senders: HashSet<String>,
    pub passthrough_recipients: HashSet<String>,
    pub encrypted_subjects: HashSet<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            passthrough_senders: HashSet::new(),
            passthrough_recipients: HashSet::new(),
            encrypted_subjects: DEFAULT_ENCRYPTED_SUBJECTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl From<&Config> for PolicyConfig {
    fn from(config: &Config) -> Self {
        PolicyConfig {
            passthrough_senders: config.passthrough_senders_list.iter().cloned().collect(),
            passthrough_recipients: config.passthrough_recipients_list.iter().cloned().collect(),
            encrypted_subjects: config.encrypted_subjects.iter().cloned().collect(),
        }
    }
}
