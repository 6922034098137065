use crate::address::parse_mailbox;
use crate::mime::{header_value, read_header_block, Headers, MimeError};

/// A raw RFC 5322 message split into its header fields and body.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Message {
    pub fn parse(raw: &[u8]) -> Result<Self, MimeError> {
        let (headers, body_at) = read_header_block(raw, 0)?;
        Ok(Message {
            headers,
            body: raw[body_at..].to_vec(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Addresses listed in an address header such as `To`, skipping
    /// entries that do not parse.
    pub fn addresses(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .filter_map(|entry| match parse_mailbox(entry) {
                Ok(mailbox) => Some(mailbox.address),
                Err(e) => {
                    log::debug!("Skipping {name} entry {entry:?}: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let raw = b"From: Alice <a@chat.example>\r\n\
                    To: b@chat.example, Carol <c@other.example>\r\n\
                    Subject: ...\r\n\
                    \r\n\
                    Hello\r\n";
        let message = Message::parse(raw).unwrap();
        assert_eq!(message.header("from"), Some("Alice <a@chat.example>"));
        assert_eq!(message.header("SUBJECT"), Some("..."));
        assert_eq!(message.body, b"Hello\r\n");
        assert_eq!(
            message.addresses("To"),
            vec!["b@chat.example".to_string(), "c@other.example".to_string()]
        );
    }

    #[test]
    fn test_message_without_body_separator() {
        assert_eq!(
            Message::parse(b"Subject: x\r\n").unwrap_err(),
            MimeError::TruncatedHeaders
        );
    }
}
