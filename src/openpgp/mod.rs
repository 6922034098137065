//! Structural checks for OpenPGP encrypted payloads.

pub mod armor;
pub mod packet;

pub use armor::{check_armored_payload, dearmor, is_valid_encrypted_payload, ArmorError};
pub use packet::{
    check_encrypted_packets, is_encrypted_openpgp_payload, FramingError, PacketRecord,
};
