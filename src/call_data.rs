//! Smart-contract call data framing
//!
//! Deposits carry an optional call payload. On the wire it is framed as:
//!
//! ```text
//! | marker (1 byte) | length (4 bytes, big-endian) | payload (length bytes) |
//! ```
//!
//! `0x00` marks a deposit without data and is sent alone; `0x01` is followed by the
//! length prefix and the raw payload.

use crate::errors::BridgeError;

/// Protocol marker for a deposit without call data
pub const MISSING_DATA_MARKER: u8 = 0x00;
/// Protocol marker for a deposit carrying call data
pub const DATA_PRESENT_MARKER: u8 = 0x01;

const LENGTH_PREFIX_LEN: usize = 4;
const HEADER_LEN: usize = 1 + LENGTH_PREFIX_LEN;

/// Frames `raw` as `0x01 || be_u32(len) || raw`.
///
/// Only the degenerate inputs (empty, or the single missing-data marker) are returned
/// unchanged. Payloads longer than `u32::MAX` bytes cannot be framed.
pub fn encode_call_data(raw: &[u8]) -> Result<Vec<u8>, BridgeError> {
    if raw.is_empty() || raw == [MISSING_DATA_MARKER] {
        return Ok(raw.to_vec());
    }

    let len = u32::try_from(raw.len()).map_err(|_| {
        BridgeError::InvalidCallData(format!(
            "payload of {} bytes exceeds the length prefix",
            raw.len()
        ))
    })?;

    let mut encoded = Vec::with_capacity(HEADER_LEN + raw.len());
    encoded.push(DATA_PRESENT_MARKER);
    encoded.extend_from_slice(&len.to_be_bytes());
    encoded.extend_from_slice(raw);
    Ok(encoded)
}

/// Unwraps a framed buffer. Returns `None` for a deposit without data.
pub fn decode_call_data(buf: &[u8]) -> Result<Option<Vec<u8>>, BridgeError> {
    if buf.is_empty() || buf == [MISSING_DATA_MARKER] {
        return Ok(None);
    }
    if buf[0] != DATA_PRESENT_MARKER {
        return Err(BridgeError::InvalidCallData(format!(
            "unknown marker 0x{:02x}",
            buf[0]
        )));
    }
    if buf.len() < HEADER_LEN {
        return Err(BridgeError::InvalidCallData(format!(
            "buffer too short for length prefix: {} bytes",
            buf.len()
        )));
    }

    let declared = declared_len(buf);
    let actual = buf.len() - HEADER_LEN;
    if declared != actual {
        return Err(BridgeError::InvalidCallData(format!(
            "length prefix {} does not match payload length {}",
            declared, actual
        )));
    }

    Ok(Some(buf[HEADER_LEN..].to_vec()))
}

fn declared_len(buf: &[u8]) -> usize {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&buf[1..HEADER_LEN]);
    u32::from_be_bytes(prefix) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frames_payload() {
        let encoded = encode_call_data(b"abc").unwrap();
        assert_eq!(encoded, vec![0x01, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_degenerate_inputs_pass_through() {
        assert_eq!(encode_call_data(&[]).unwrap(), Vec::<u8>::new());
        assert_eq!(
            encode_call_data(&[MISSING_DATA_MARKER]).unwrap(),
            vec![MISSING_DATA_MARKER]
        );
    }

    #[test]
    fn test_framed_looking_payload_is_framed_again() {
        // marker 0x01 followed by a length prefix matching the rest is still raw user data
        let raw = [DATA_PRESENT_MARKER, 0, 0, 0, 0];
        let encoded = encode_call_data(&raw).unwrap();
        assert_eq!(encoded, vec![1, 0, 0, 0, 5, 1, 0, 0, 0, 0]);
        assert_eq!(decode_call_data(&encoded).unwrap(), Some(raw.to_vec()));

        let raw = [DATA_PRESENT_MARKER, 0, 0, 0, 2, 0xab, 0xcd];
        let encoded = encode_call_data(&raw).unwrap();
        assert_eq!(decode_call_data(&encoded).unwrap(), Some(raw.to_vec()));
    }

    #[test]
    fn test_decode_recovers_payload() {
        let encoded = encode_call_data(b"payload").unwrap();
        assert_eq!(decode_call_data(&encoded).unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn test_decode_missing_data() {
        assert_eq!(decode_call_data(&[]).unwrap(), None);
        assert_eq!(decode_call_data(&[MISSING_DATA_MARKER]).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_bad_buffers() {
        assert!(decode_call_data(&[0x07, 1, 2]).is_err());
        assert!(decode_call_data(&[DATA_PRESENT_MARKER, 0, 0]).is_err());
        assert!(decode_call_data(&[DATA_PRESENT_MARKER, 0, 0, 0, 9, 1]).is_err());
    }

    #[test]
    fn test_single_present_marker_byte_is_framed() {
        // a lone 0x01 is a real one-byte payload, not a header
        assert_eq!(
            encode_call_data(&[DATA_PRESENT_MARKER]).unwrap(),
            vec![1, 0, 0, 0, 1, 1]
        );
    }
}
