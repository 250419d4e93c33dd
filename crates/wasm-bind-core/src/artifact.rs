//! Envelope around serialized modules.
//!
//! Engine-produced module blobs are machine code; loading one built by a
//! different engine build, or a damaged one, must be refused before the
//! engine sees it. Every artifact therefore starts with a fixed header:
//!
//! ```text
//! offset  size  field
//! 0       8     magic  b"WBNDMOD\0"
//! 8       2     format version (u16, little-endian)
//! 10      8     engine compatibility fingerprint (u64, little-endian)
//! 18      8     payload checksum (u64, little-endian)
//! 26      ..    payload
//! ```
//!
//! The checksum detects accidental corruption only. Anyone can build a valid
//! envelope around arbitrary bytes, so artifacts must come from a trusted
//! source.
//!
//! Both the fingerprint and the checksum are computed with `DefaultHasher`,
//! whose output may change between Rust releases. Artifacts written by a host
//! built with one toolchain may be refused by a host built with another;
//! regenerate them after upgrading.

use std::hash::{DefaultHasher, Hash, Hasher};

use byteorder::{ByteOrder, LittleEndian};
use wasm_bind_common::BindError;

/// Leading bytes of every artifact.
pub const MAGIC: &[u8; 8] = b"WBNDMOD\0";

/// Current envelope format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the envelope header in bytes.
pub const HEADER_LEN: usize = 26;

/// Wrap an engine payload in an artifact envelope.
pub fn encode(fingerprint: u64, payload: &[u8]) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    header[..8].copy_from_slice(MAGIC);
    LittleEndian::write_u16(&mut header[8..10], FORMAT_VERSION);
    LittleEndian::write_u64(&mut header[10..18], fingerprint);
    LittleEndian::write_u64(&mut header[18..26], checksum(payload));

    let mut artifact = Vec::with_capacity(HEADER_LEN + payload.len());
    artifact.extend_from_slice(&header);
    artifact.extend_from_slice(payload);
    artifact
}

/// Check the envelope and return the payload.
///
/// # Errors
///
/// Returns `Deserialize` if the artifact is truncated, is not an artifact,
/// uses another format version, was built by an incompatible engine, or
/// fails the checksum.
pub fn decode(artifact: &[u8], fingerprint: u64) -> Result<&[u8], BindError> {
    if artifact.len() < HEADER_LEN {
        return Err(BindError::deserialize(format!(
            "artifact too small ({} bytes)",
            artifact.len()
        )));
    }

    if &artifact[..8] != MAGIC {
        return Err(BindError::deserialize("not a serialized module (bad magic)"));
    }

    let version = LittleEndian::read_u16(&artifact[8..10]);
    if version != FORMAT_VERSION {
        return Err(BindError::deserialize(format!(
            "unsupported artifact format version {version} (expected {FORMAT_VERSION})"
        )));
    }

    if LittleEndian::read_u64(&artifact[10..18]) != fingerprint {
        return Err(BindError::deserialize(
            "artifact was produced by an incompatible engine build",
        ));
    }

    let payload = &artifact[HEADER_LEN..];
    if LittleEndian::read_u64(&artifact[18..26]) != checksum(payload) {
        return Err(BindError::deserialize("artifact checksum mismatch"));
    }

    Ok(payload)
}

fn checksum(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}
