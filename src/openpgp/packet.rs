//! OpenPGP packet framing check.
//!
//! Only the framing of the packet stream is inspected, never the packet
//! contents. The accepted shape is zero or more encrypted session key
//! packets followed by exactly one SEIPD packet that ends the buffer.
//!
//! Every tag byte must have both high bits set. Lengths use the one, two
//! and five octet encodings; partial body lengths are refused.

use thiserror::Error;

/// Public-Key Encrypted Session Key packet
pub const TAG_PKESK: u8 = 1;
/// Symmetric-Key Encrypted Session Key packet
pub const TAG_SKESK: u8 = 3;
/// Symmetrically Encrypted and Integrity Protected Data packet
pub const TAG_SEIPD: u8 = 18;

const TAG_MARKER: u8 = 0xC0;
const TAG_MASK: u8 = 0x3F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    pub tag: u8,
    pub body_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("empty packet stream")]
    Empty,
    #[error("no packet header at offset {offset}")]
    MissingHeader { offset: usize },
    #[error("bad tag byte {byte:#04x} at offset {offset}")]
    BadTagByte { offset: usize, byte: u8 },
    #[error("partial body length {byte:#04x} at offset {offset}")]
    PartialBodyLength { offset: usize, byte: u8 },
    #[error("length field at offset {offset} runs past the end of the stream")]
    TruncatedLength { offset: usize },
    #[error("packet body of {length} bytes at offset {offset} runs past the end of the stream")]
    TruncatedBody { offset: usize, length: usize },
    #[error("packet type {tag} is not allowed before the final packet")]
    UnexpectedPacket { tag: u8 },
    #[error("final packet has type {tag}, expected SEIPD")]
    FinalPacketNotSeipd { tag: u8 },
}

/// Reads one packet header at `offset`.
///
/// Returns the packet record and the offset of its body.
fn read_header(payload: &[u8], offset: usize) -> Result<(PacketRecord, usize), FramingError> {
    let byte = *payload
        .get(offset)
        .ok_or(FramingError::MissingHeader { offset })?;
    if byte & TAG_MARKER != TAG_MARKER {
        return Err(FramingError::BadTagByte { offset, byte });
    }
    let tag = byte & TAG_MASK;

    let len_at = offset + 1;
    let first = *payload
        .get(len_at)
        .ok_or(FramingError::TruncatedLength { offset: len_at })?;

    let (body_length, body_at) = match first {
        0..=191 => (first as usize, len_at + 1),
        192..=223 => {
            let second = *payload
                .get(len_at + 1)
                .ok_or(FramingError::TruncatedLength { offset: len_at })?;
            let length = (((first as usize) - 192) << 8) + second as usize + 192;
            (length, len_at + 2)
        }
        255 => {
            let field = payload
                .get(len_at + 1..len_at + 5)
                .ok_or(FramingError::TruncatedLength { offset: len_at })?;
            let length = u32::from_be_bytes([field[0], field[1], field[2], field[3]]);
            (length as usize, len_at + 5)
        }
        _ => {
            return Err(FramingError::PartialBodyLength {
                offset: len_at,
                byte: first,
            })
        }
    };

    Ok((PacketRecord { tag, body_length }, body_at))
}

/// Walks the packet stream and returns the records seen, failing on the
/// first framing violation.
pub fn check_encrypted_packets(payload: &[u8]) -> Result<Vec<PacketRecord>, FramingError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let (record, body_at) = read_header(payload, offset)?;
        let end = body_at
            .checked_add(record.body_length)
            .filter(|end| *end <= payload.len())
            .ok_or(FramingError::TruncatedBody {
                offset: body_at,
                length: record.body_length,
            })?;
        records.push(record);

        if end == payload.len() {
            if record.tag == TAG_SEIPD {
                return Ok(records);
            }
            return Err(FramingError::FinalPacketNotSeipd { tag: record.tag });
        }
        if record.tag != TAG_PKESK && record.tag != TAG_SKESK {
            return Err(FramingError::UnexpectedPacket { tag: record.tag });
        }
        offset = end;
    }

    Err(FramingError::Empty)
}

/// True when `payload` is a run of session key packets terminated by a
/// single SEIPD packet.
pub fn is_encrypted_openpgp_payload(payload: &[u8]) -> bool {
    match check_encrypted_packets(payload) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("OpenPGP framing rejected: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: u8, body: &[u8]) -> Vec<u8> {
        assert!(body.len() < 192);
        let mut out = vec![0xC0 | tag, body.len() as u8];
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_single_seipd_packet() {
        let stream = packet(TAG_SEIPD, b"\x01ciphertext");
        assert!(is_encrypted_openpgp_payload(&stream));

        let mut trailing = stream.clone();
        trailing.push(0);
        assert!(!is_encrypted_openpgp_payload(&trailing));
    }

    #[test]
    fn test_session_keys_before_seipd() {
        let mut stream = packet(TAG_PKESK, &[0x03; 12]);
        stream.extend(packet(TAG_SKESK, &[0x04; 7]));
        stream.extend(packet(TAG_PKESK, &[0x03; 12]));
        stream.extend(packet(TAG_SEIPD, &[0x01; 40]));

        let records = check_encrypted_packets(&stream).unwrap();
        let tags: Vec<u8> = records.iter().map(|r| r.tag).collect();
        assert_eq!(tags, vec![1, 3, 1, 18]);
        assert_eq!(records[3].body_length, 40);
    }

    #[test]
    fn test_read_header_past_end() {
        assert_eq!(
            read_header(&[], 0),
            Err(FramingError::MissingHeader { offset: 0 })
        );
        assert_eq!(
            read_header(&[0xD2, 0x00], 2),
            Err(FramingError::MissingHeader { offset: 2 })
        );
        assert_eq!(
            read_header(&[0xD2, 0x00], 0),
            Ok((PacketRecord { tag: TAG_SEIPD, body_length: 0 }, 2))
        );
    }

    #[test]
    fn test_empty_stream_rejected() {
        assert_eq!(check_encrypted_packets(&[]), Err(FramingError::Empty));
    }

    #[test]
    fn test_bad_tag_byte_rejected() {
        // every leading byte whose top two bits are not 11
        for byte in 0u8..0xC0 {
            let stream = [byte, 0x00];
            assert!(
                !is_encrypted_openpgp_payload(&stream),
                "accepted leading byte {byte:#04x}"
            );
        }
        // RFC 4880 old-style header for a type 9 packet (10 1001 00)
        let stream = [0xA4, 0x02, 0x01, 0x00];
        assert_eq!(
            check_encrypted_packets(&stream),
            Err(FramingError::BadTagByte { offset: 0, byte: 0xA4 })
        );
    }

    #[test]
    fn test_literal_data_rejected() {
        let stream = packet(11, b"b\x00\x00\x00\x00\x00hello");
        assert_eq!(
            check_encrypted_packets(&stream),
            Err(FramingError::FinalPacketNotSeipd { tag: 11 })
        );
    }

    #[test]
    fn test_unexpected_packet_before_seipd() {
        let mut stream = packet(11, b"plain");
        stream.extend(packet(TAG_SEIPD, &[0x01; 8]));
        assert_eq!(
            check_encrypted_packets(&stream),
            Err(FramingError::UnexpectedPacket { tag: 11 })
        );
    }

    #[test]
    fn test_two_byte_length() {
        // 200 = ((192 - 192) << 8) + 8 + 192
        let mut stream = vec![0xC0 | TAG_SEIPD, 192, 8];
        stream.extend(vec![0x01; 200]);
        assert!(is_encrypted_openpgp_payload(&stream));

        stream.pop();
        assert!(matches!(
            check_encrypted_packets(&stream),
            Err(FramingError::TruncatedBody { length: 200, .. })
        ));
    }

    #[test]
    fn test_four_byte_length() {
        let mut stream = vec![0xC0 | TAG_SEIPD, 255, 0, 0, 1, 0];
        stream.extend(vec![0x01; 256]);
        assert!(is_encrypted_openpgp_payload(&stream));
    }

    #[test]
    fn test_truncated_length_fields() {
        // tag byte with no length byte at all
        assert_eq!(
            check_encrypted_packets(&[0xC0 | TAG_SEIPD]),
            Err(FramingError::TruncatedLength { offset: 1 })
        );
        // two-byte length missing its second byte
        assert_eq!(
            check_encrypted_packets(&[0xC0 | TAG_SEIPD, 200]),
            Err(FramingError::TruncatedLength { offset: 1 })
        );
        // four-byte length with only three bytes present
        assert_eq!(
            check_encrypted_packets(&[0xC0 | TAG_SEIPD, 255, 0, 0, 0]),
            Err(FramingError::TruncatedLength { offset: 1 })
        );
        // truncated header after a valid session key packet
        let mut stream = packet(TAG_PKESK, &[0x03; 4]);
        stream.extend([0xC0 | TAG_SEIPD, 255, 0]);
        assert!(!is_encrypted_openpgp_payload(&stream));
    }

    #[test]
    fn test_huge_declared_length_does_not_overflow() {
        let stream = [0xC0 | TAG_SEIPD, 255, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert!(matches!(
            check_encrypted_packets(&stream),
            Err(FramingError::TruncatedBody { .. })
        ));
    }

    #[test]
    fn test_partial_body_length_rejected() {
        for byte in 224u8..=254 {
            let stream = [0xC0 | TAG_SEIPD, byte, 0, 0, 0, 0];
            assert!(matches!(
                check_encrypted_packets(&stream),
                Err(FramingError::PartialBodyLength { .. })
            ));
        }
    }
}
