use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use zvt_core::{Error, Result, constants::*};

use crate::commands::CommandCode;

/// One unit on the wire: an APDU or a control frame.
///
/// # Wire Format
///
/// ```text
/// APDU (short)     CLASS INSTR LEN          PAYLOAD[LEN]
/// APDU (extended)  CLASS INSTR FF  LEN_LO LEN_HI PAYLOAD[LEN]
/// ACK              80 00
/// NACK             84 00 REASON
/// ```
///
/// Payloads of up to 254 bytes use the single length byte. Longer payloads
/// (up to 65535) use the `FF` marker followed by a little-endian `u16`.
/// ACK and NACK are recognised before generic APDU decoding, so an APDU can
/// never carry `80 00` or `84 00` as its class/instruction.
///
/// # Example
///
/// ```
/// use zvt_protocol::{Frame, CommandCode};
///
/// let frame = Frame::apdu(CommandCode::Diagnosis, Vec::new());
/// assert_eq!(frame.encode().unwrap().as_ref(), &[0x06, 0x70, 0x00]);
///
/// let decoded = zvt_protocol::decode_frame(&[0x80, 0x00]).unwrap();
/// assert_eq!(decoded, Frame::Ack);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack {
        reason: u8,
    },
    Apdu {
        class: u8,
        instruction: u8,
        payload: Bytes,
    },
}

impl Frame {
    /// APDU for a known command.
    pub fn apdu(command: CommandCode, payload: impl Into<Bytes>) -> Self {
        let [class, instruction] = command.as_bytes();
        Frame::Apdu {
            class,
            instruction,
            payload: payload.into(),
        }
    }

    pub fn nack(reason: u8) -> Self {
        Frame::Nack { reason }
    }

    /// Command of an APDU, if the class/instruction pair is known.
    pub fn command_code(&self) -> Option<CommandCode> {
        match self {
            Frame::Apdu {
                class, instruction, ..
            } => CommandCode::from_bytes(*class, *instruction),
            _ => None,
        }
    }

    /// Payload of an APDU; empty for control frames.
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Apdu { payload, .. } => payload,
            _ => &[],
        }
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        matches!(self, Frame::Ack)
    }

    /// ACK or NACK.
    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ack | Frame::Nack { .. })
    }

    /// Number of bytes [`Frame::encode`] produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Ack => ACK_CODE.len(),
            Frame::Nack { .. } => NACK_FRAME_LEN,
            Frame::Apdu { payload, .. } => header_len(payload.len()) + payload.len(),
        }
    }

    /// Append the wire form of this frame to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the payload exceeds 65535 bytes or
    /// an APDU uses a reserved control code.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Frame::Ack => dst.put_slice(&ACK_CODE),
            Frame::Nack { reason } => {
                dst.put_slice(&NACK_CODE);
                dst.put_u8(*reason);
            }
            Frame::Apdu {
                class,
                instruction,
                payload,
            } => {
                if [*class, *instruction] == ACK_CODE || [*class, *instruction] == NACK_CODE {
                    return Err(Error::protocol(format!(
                        "{class:02X} {instruction:02X} is reserved for control frames"
                    )));
                }
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(Error::protocol(format!(
                        "payload of {} bytes exceeds the maximum of {}",
                        payload.len(),
                        MAX_PAYLOAD_LEN
                    )));
                }
                dst.reserve(header_len(payload.len()) + payload.len());
                dst.put_u8(*class);
                dst.put_u8(*instruction);
                if payload.len() <= MAX_SHORT_PAYLOAD_LEN {
                    dst.put_u8(payload.len() as u8);
                } else {
                    dst.put_u8(EXTENDED_LENGTH_MARKER);
                    dst.put_u16_le(payload.len() as u16);
                }
                dst.put_slice(payload);
            }
        }
        Ok(())
    }

    /// Wire form of this frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Ack => write!(f, "ACK"),
            Frame::Nack { reason } => write!(f, "NACK(0x{reason:02X})"),
            Frame::Apdu {
                class,
                instruction,
                payload,
            } => match CommandCode::from_bytes(*class, *instruction) {
                Some(code) => write!(f, "{:?} [{} bytes]", code, payload.len()),
                None => write!(
                    f,
                    "APDU {class:02X} {instruction:02X} [{} bytes]",
                    payload.len()
                ),
            },
        }
    }
}

fn header_len(payload_len: usize) -> usize {
    if payload_len <= MAX_SHORT_PAYLOAD_LEN {
        COMMAND_LEN + 1
    } else {
        EXTENDED_HEADER_LEN
    }
}

/// Encode an APDU from its raw parts.
pub fn encode_frame(class: u8, instruction: u8, payload: &[u8]) -> Result<Bytes> {
    Frame::Apdu {
        class,
        instruction,
        payload: Bytes::copy_from_slice(payload),
    }
    .encode()
}

/// Total length of the frame at the start of `buf`, once enough header
/// bytes are buffered to know it.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < COMMAND_LEN {
        return None;
    }
    let code = [buf[0], buf[1]];
    if code == ACK_CODE {
        return Some(ACK_CODE.len());
    }
    if code == NACK_CODE {
        return Some(NACK_FRAME_LEN);
    }

    let marker = *buf.get(COMMAND_LEN)?;
    if marker != EXTENDED_LENGTH_MARKER {
        return Some(COMMAND_LEN + 1 + marker as usize);
    }
    if buf.len() < EXTENDED_HEADER_LEN {
        return None;
    }
    let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
    Some(EXTENDED_HEADER_LEN + len)
}

/// Decode the frame at the start of `buf`.
///
/// Returns `Ok(None)` while the frame is incomplete, otherwise the frame and
/// the number of bytes it occupied.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    let Some(total) = frame_len(buf) else {
        return Ok(None);
    };
    if buf.len() < total {
        return Ok(None);
    }

    let code = [buf[0], buf[1]];
    let frame = if code == ACK_CODE {
        Frame::Ack
    } else if code == NACK_CODE {
        Frame::Nack { reason: buf[2] }
    } else {
        let start = if buf[2] == EXTENDED_LENGTH_MARKER {
            EXTENDED_HEADER_LEN
        } else {
            COMMAND_LEN + 1
        };
        Frame::Apdu {
            class: buf[0],
            instruction: buf[1],
            payload: Bytes::copy_from_slice(&buf[start..total]),
        }
    };
    Ok(Some((frame, total)))
}

/// Decode exactly one frame from a complete buffer.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the buffer ends before the frame does
/// ("malformed frame") or holds bytes after it.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    match try_decode(bytes)? {
        None => Err(Error::malformed_frame(bytes)),
        Some((frame, used)) if used == bytes.len() => Ok(frame),
        Some((_, used)) => Err(Error::protocol_with_raw(
            format!("{} trailing bytes after frame", bytes.len() - used),
            bytes,
        )),
    }
}

/// Upper-case hex dump with spaces, used in log output.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_encode_short_payload() {
        let frame = Frame::apdu(CommandCode::Authorization, vec![0x04, 0, 0, 0, 0, 0x12, 0x34]);
        let encoded = frame.encode().unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0x06, 0x01, 0x07, 0x04, 0, 0, 0, 0, 0x12, 0x34]
        );
        assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    #[rstest]
    #[case(0, 3)]
    #[case(254, 257)]
    #[case(255, 260)]
    #[case(65535, 65540)]
    fn test_length_forms(#[case] payload_len: usize, #[case] encoded_len: usize) {
        let frame = Frame::apdu(CommandCode::PrintLine, vec![0x41; payload_len]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), encoded_len);
        assert_eq!(frame.encoded_len(), encoded_len);
        assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_extended_length_is_little_endian() {
        let frame = Frame::apdu(CommandCode::PrintLine, vec![0u8; 300]);
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..5], &[0x06, 0xD1, 0xFF, 0x2C, 0x01]);
    }

    #[test]
    fn test_payload_too_large() {
        let frame = Frame::apdu(CommandCode::PrintLine, vec![0u8; 65536]);
        assert!(matches!(frame.encode(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::Ack.encode().unwrap().as_ref(), &[0x80, 0x00]);
        assert_eq!(Frame::nack(0x83).encode().unwrap().as_ref(), &[0x84, 0x00, 0x83]);
        assert_eq!(decode_frame(&[0x80, 0x00]).unwrap(), Frame::Ack);
        assert_eq!(
            decode_frame(&[0x84, 0x00, 0x6B]).unwrap(),
            Frame::Nack { reason: 0x6B }
        );
    }

    #[test]
    fn test_ack_with_trailing_byte_is_rejected() {
        assert!(decode_frame(&[0x80, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_reserved_codes_cannot_be_apdus() {
        assert!(encode_frame(0x80, 0x00, &[]).is_err());
        assert!(encode_frame(0x84, 0x00, &[0x01]).is_err());
    }

    #[rstest]
    #[case(&[0x06])]
    #[case(&[0x06, 0x01])]
    #[case(&[0x06, 0x01, 0x05, 0x00])]
    #[case(&[0x06, 0xD1, 0xFF, 0x2C])]
    #[case(&[0x84, 0x00])]
    fn test_truncated_input_is_malformed(#[case] bytes: &[u8]) {
        let err = decode_frame(bytes).unwrap_err();
        assert!(err.to_string().contains("malformed frame"));
        assert_eq!(err.raw(), bytes);
    }

    #[test]
    fn test_try_decode_reports_consumed_bytes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x80, 0x00]);
        buf.extend_from_slice(&[0x06, 0x70, 0x00]);

        let (first, used) = try_decode(&buf).unwrap().unwrap();
        assert_eq!(first, Frame::Ack);
        assert_eq!(used, 2);

        let (second, used) = try_decode(&buf[2..]).unwrap().unwrap();
        assert_eq!(second.command_code(), Some(CommandCode::Diagnosis));
        assert_eq!(used, 3);
    }

    #[test]
    fn test_unknown_command_still_decodes() {
        let frame = decode_frame(&[0x08, 0x99, 0x01, 0xAA]).unwrap();
        assert_eq!(frame.command_code(), None);
        assert_eq!(frame.payload(), &[0xAA]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Frame::Ack.to_string(), "ACK");
        assert_eq!(Frame::nack(0x9A).to_string(), "NACK(0x9A)");
        assert_eq!(
            Frame::apdu(CommandCode::Completion, vec![0x27, 0x00]).to_string(),
            "Completion [2 bytes]"
        );
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x06, 0x0F, 0x00]), "06 0F 00");
        assert_eq!(to_hex(&[]), "");
    }
}
