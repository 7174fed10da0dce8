//! Tokio codec for ZVT frames.
//!
//! `ZvtCodec` implements [`Decoder`] and [`Encoder<Frame>`] so both peers can
//! wrap a socket in [`tokio_util::codec::Framed`] and exchange [`Frame`]s.
//!
//! ```text
//! TCP Stream -> Decoder -> Frame (ACK / NACK / APDU)
//! Frame -> Encoder -> TCP Stream
//! ```
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use zvt_protocol::{CommandCode, Frame, ZvtCodec};
//!
//! # async fn example() -> zvt_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:20007").await?;
//! let mut framed = Framed::new(stream, ZvtCodec::new());
//!
//! framed.send(Frame::apdu(CommandCode::Diagnosis, Vec::new())).await?;
//! if let Some(Ok(frame)) = framed.next().await {
//!     println!("Received: {frame}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Frame Size Limit
//!
//! The extended length form allows payloads of up to 65535 bytes. A codec
//! built with [`ZvtCodec::with_max_frame_size`] rejects larger announced
//! frames as soon as the header is buffered, before the payload arrives.
//!
//! # End of Stream
//!
//! If the peer closes the connection while a frame is partially buffered,
//! `decode_eof` fails with a "malformed frame" [`Error::Protocol`] carrying
//! the buffered bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;
use zvt_core::{Error, Result, constants::EXTENDED_HEADER_LEN, constants::MAX_PAYLOAD_LEN};

use crate::frame::{Frame, frame_len, to_hex, try_decode};

/// Default maximum frame size: the largest frame the length encoding allows.
pub const DEFAULT_MAX_FRAME_SIZE: usize = EXTENDED_HEADER_LEN + MAX_PAYLOAD_LEN;

#[derive(Debug, Clone)]
pub struct ZvtCodec {
    /// Frames whose total encoded size exceeds this are rejected.
    max_frame_size: usize,
}

impl ZvtCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size.
    ///
    /// ```
    /// use zvt_protocol::ZvtCodec;
    ///
    /// let codec = ZvtCodec::with_max_frame_size(1024);
    /// assert_eq!(codec.max_frame_size(), 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(Error::protocol(format!(
                "frame of {size} bytes exceeds the limit of {}",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

impl Default for ZvtCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ZvtCodec {
    type Item = Frame;
    type Error = Error;

    /// Decode one frame from the buffered bytes.
    ///
    /// - `Ok(Some(frame))`: a frame was decoded and its bytes consumed
    /// - `Ok(None)`: more bytes are needed
    /// - `Err(_)`: the announced frame exceeds the size limit
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(total) = frame_len(&src[..]) else {
            return Ok(None);
        };
        self.check_size(total)?;

        match try_decode(&src[..])? {
            Some((frame, used)) => {
                trace!(bytes = %to_hex(&src[..used]), "decoded {frame}");
                src.advance(used);
                Ok(Some(frame))
            }
            None => {
                src.reserve(total - src.len());
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let err = Error::malformed_frame(&src[..]);
                src.clear();
                Err(err)
            }
        }
    }
}

impl Encoder<Frame> for ZvtCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        self.check_size(item.encoded_len())?;
        let start = dst.len();
        item.encode_into(dst)?;
        trace!(bytes = %to_hex(&dst[start..]), "encoded {item}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandCode;

    #[test]
    fn test_codec_default() {
        let codec = ZvtCodec::default();
        assert_eq!(codec.max_frame_size(), 65540);
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut codec = ZvtCodec::new();
        let mut buffer = BytesMut::from(&[0x06, 0x01, 0x02, 0x27][..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), 4);

        buffer.extend_from_slice(&[0x00]);
        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.payload(), &[0x27, 0x00]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_ack_before_apdu() {
        let mut codec = ZvtCodec::new();
        let mut buffer = BytesMut::from(&[0x80, 0x00, 0x84, 0x00, 0x9A, 0x06, 0x70, 0x00][..]);

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Frame::Ack));
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(Frame::Nack { reason: 0x9A })
        );
        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.command_code(), Some(CommandCode::Diagnosis));
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = ZvtCodec::with_max_frame_size(16);
        // Extended header announcing 300 bytes.
        let mut buffer = BytesMut::from(&[0x06, 0xD1, 0xFF, 0x2C, 0x01][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_decode_eof_with_partial_frame() {
        let mut codec = ZvtCodec::new();
        let mut buffer = BytesMut::from(&[0x06, 0x01, 0x07, 0x04][..]);
        let err = codec.decode_eof(&mut buffer).unwrap_err();
        assert!(err.to_string().contains("malformed frame"));
        assert_eq!(err.raw(), &[0x06, 0x01, 0x07, 0x04]);
    }

    #[test]
    fn test_decode_eof_clean() {
        let mut codec = ZvtCodec::new();
        let mut buffer = BytesMut::new();
        assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_encode() {
        let mut codec = ZvtCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(Frame::Ack, &mut buffer).unwrap();
        codec
            .encode(Frame::apdu(CommandCode::Abort, Vec::new()), &mut buffer)
            .unwrap();
        assert_eq!(buffer.as_ref(), &[0x80, 0x00, 0x06, 0xB0, 0x00]);
    }

    #[test]
    fn test_encode_respects_limit() {
        let mut codec = ZvtCodec::with_max_frame_size(8);
        let mut buffer = BytesMut::new();
        let frame = Frame::apdu(CommandCode::PrintLine, vec![0x41; 10]);
        assert!(codec.encode(frame, &mut buffer).is_err());
        assert!(buffer.is_empty());
    }
}
