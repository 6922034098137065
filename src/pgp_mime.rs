//! PGP/MIME envelope check for chat messages.

use crate::mime::{parse_media_type, MimeError, Multipart, Part};
use crate::openpgp::is_valid_encrypted_payload;
use std::collections::HashSet;

/// Subjects the chat client puts on encrypted messages.
pub const DEFAULT_ENCRYPTED_SUBJECTS: &[&str] = &["...", "[...]", "Encrypted Message"];

const CONTROL_CONTENT_TYPE: &str = "application/pgp-encrypted";
const PAYLOAD_CONTENT_TYPE: &str = "application/octet-stream";

fn is_control_part(part: &Part) -> bool {
    if part.header("Content-Type") != Some(CONTROL_CONTENT_TYPE) {
        log::debug!("First part is not {CONTROL_CONTENT_TYPE}");
        return false;
    }
    let version = String::from_utf8_lossy(part.body());
    if version.trim() != "Version: 1" {
        log::debug!("Control part has unexpected body {:?}", version.trim());
        return false;
    }
    true
}

fn is_payload_part(part: &Part) -> bool {
    let content_type = part.header("Content-Type").unwrap_or_default();
    if !content_type.starts_with(PAYLOAD_CONTENT_TYPE) {
        log::debug!("Second part has content type {content_type:?}");
        return false;
    }
    match std::str::from_utf8(part.body()) {
        Ok(armored) => is_valid_encrypted_payload(armored),
        Err(_) => {
            log::debug!("Encrypted part is not text");
            false
        }
    }
}

/// Decides whether a message is a well-formed PGP/MIME encrypted chat
/// message.
///
/// Returns `Ok(false)` for anything that is not shaped like one. An error
/// is returned only when the multipart body itself cannot be read.
pub fn is_valid_encrypted_message(
    subjects: &HashSet<String>,
    subject: &str,
    content_type: &str,
    body: &[u8],
) -> Result<bool, MimeError> {
    if !subjects.contains(subject) {
        log::debug!("Subject {subject:?} is not a known encrypted subject");
        return Ok(false);
    }

    let media_type = match parse_media_type(content_type) {
        Ok(media_type) => media_type,
        Err(e) => {
            log::debug!("Unparseable content type {content_type:?}: {e}");
            return Ok(false);
        }
    };
    if media_type.essence != "multipart/encrypted" {
        return Ok(false);
    }
    let boundary = match media_type.param("boundary") {
        Some(boundary) if !boundary.is_empty() => boundary,
        _ => {
            log::debug!("multipart/encrypted without boundary");
            return Ok(false);
        }
    };

    let mut reader = Multipart::new(body, boundary);
    let mut parts_count = 0;
    while let Some(headers) = reader.next_headers()? {
        // any third part fails, whether or not it is terminated
        if parts_count >= 2 {
            log::debug!("multipart/encrypted with more than two parts");
            return Ok(false);
        }
        let part = Part::new(headers, reader.read_body()?);
        let valid = if parts_count == 0 {
            is_control_part(&part)
        } else {
            is_payload_part(&part)
        };
        if !valid {
            return Ok(false);
        }
        parts_count += 1;
    }

    Ok(parts_count == 2)
}
