//! Wire protocol for the ZVT ECR interface.
//!
//! Layers, leaf first:
//! - [`bcd`]: packed BCD numbers used inside payload fields
//! - [`frame`]: APDU and ACK/NACK framing with the variable-length header
//! - [`bmp`]: tagged payload fields (BMPs)
//! - [`messages`]: typed ECR requests and terminal responses
//! - [`codec`]: `tokio_util` codec for `Framed` streams
//! - [`handshake`]: send/acknowledge turn-taking shared by both peers

pub mod bcd;
pub mod bmp;
pub mod builder;
pub mod codec;
pub mod commands;
pub mod frame;
pub mod handshake;
pub mod messages;

pub use bmp::{Field, FieldLayout, FieldSet, FieldValue, UnknownField, decode_field, encode_field};
pub use builder::PayloadBuilder;
pub use codec::ZvtCodec;
pub use commands::CommandCode;
pub use frame::{Frame, decode_frame, encode_frame};
pub use handshake::{AckOutcome, FrameTransport, GroupReport, ResponseStep};
pub use messages::{EcrRequest, TerminalMessage};
