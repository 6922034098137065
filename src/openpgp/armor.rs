use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, GeneralPurpose},
    Engine as _,
};
use thiserror::Error;

use super::packet::{check_encrypted_packets, FramingError};

const HEADER: &str = "-----BEGIN PGP MESSAGE-----\n\n";
const FOOTER: &str = "-----END PGP MESSAGE-----\n\n";

// Padding is required, non-zero trailing bits are tolerated.
const ARMOR_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error)]
pub enum ArmorError {
    #[error("missing armor header line")]
    MissingHeader,
    #[error("missing armor footer line")]
    MissingFooter,
    #[error("checksum line precedes the armor header")]
    MisplacedChecksum,
    #[error("armored payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Strips the armor from a single PGP message block and returns the
/// decoded binary payload.
///
/// Line endings may be CRLF or LF. A trailing CRC-24 line, located by the
/// last `=` in the block, is cut off and never verified.
pub fn dearmor(armored: &str) -> Result<Vec<u8>, ArmorError> {
    let text = armored.replace("\r\n", "\n");
    if !text.starts_with(HEADER) {
        return Err(ArmorError::MissingHeader);
    }
    if !text.ends_with(FOOTER) {
        return Err(ArmorError::MissingFooter);
    }

    let start = HEADER.len();
    let end = match text.rfind('=') {
        Some(checksum) => checksum,
        None => text.len() - FOOTER.len(),
    };
    if end < start {
        return Err(ArmorError::MisplacedChecksum);
    }

    let encoded: String = text[start..end]
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    Ok(ARMOR_BASE64.decode(encoded)?)
}

/// Checks an armored block and the packet framing of its payload.
pub fn check_armored_payload(armored: &str) -> Result<(), ArmorError> {
    let payload = dearmor(armored)?;
    check_encrypted_packets(&payload)?;
    Ok(())
}

/// True when `armored` is exactly one armored PGP message whose payload
/// frames as an encrypted message.
pub fn is_valid_encrypted_payload(armored: &str) -> bool {
    match check_armored_payload(armored) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Armored payload rejected: {e}");
            false
        }
    }
}
