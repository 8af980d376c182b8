//! Control-socket wire framing
//!
//! Envelopes are length-delimited JSON: a 4-byte big-endian payload length
//! followed by that many bytes of UTF-8 JSON. Replies use the same framing
//! in the other direction.

use std::io::{Read, Write};

use serde_json::Value;

use crate::error::{ControlError, ControlResult};

/// Upper bound on a single envelope, to keep a bad peer from ballooning
/// memory.
pub const MAX_ENVELOPE_BYTES: usize = 1 << 20;

/// Write one length-prefixed JSON envelope.
pub fn write_envelope<W: Write>(writer: &mut W, value: &Value) -> ControlResult<()> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_ENVELOPE_BYTES {
        return Err(ControlError::EnvelopeTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame and parse it. An I/O error (including
/// EOF mid-frame) is fatal for the connection; a parse error is not, the
/// frame has been consumed and the caller can reply and keep reading.
pub fn read_envelope<R: Read>(reader: &mut R) -> ControlResult<Value> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_ENVELOPE_BYTES {
        return Err(ControlError::EnvelopeTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_round_trip() {
        let mut buf = Vec::new();
        let envelope = json!({"action": "getState", "params": {}});
        write_envelope(&mut buf, &envelope).unwrap();
        let read = read_envelope(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, envelope);
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_envelope(&mut buf, &json!({})).unwrap();
        assert_eq!(&buf[..4], &2u32.to_be_bytes());
        assert_eq!(&buf[4..], b"{}");
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let mut buf = Vec::new();
        write_envelope(&mut buf, &json!({"action": "stop", "params": {}})).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(read_envelope(&mut Cursor::new(buf)), Err(ControlError::Io(_))));
    }

    #[test]
    fn test_oversize_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_ENVELOPE_BYTES as u32 + 1).to_be_bytes());
        assert!(matches!(
            read_envelope(&mut Cursor::new(buf)),
            Err(ControlError::EnvelopeTooLarge(_))
        ));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"!!!!");
        assert!(matches!(read_envelope(&mut Cursor::new(buf)), Err(ControlError::Parse(_))));
    }
}
