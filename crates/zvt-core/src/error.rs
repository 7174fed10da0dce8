use thiserror::Error;

use crate::types::CardData;

/// Failure taxonomy shared by the codec, the client and the simulator.
///
/// Every variant renders a human readable message. Variants that originate
/// from bytes on the wire keep those bytes in `raw` for diagnosis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The socket could not be established or was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response arrived within the configured window.
    #[error("Timeout after {duration_ms}ms: {message}")]
    Timeout { message: String, duration_ms: u64 },

    /// Malformed frame, unexpected control sequence or invalid field.
    #[error("Protocol error: {message}")]
    Protocol { message: String, raw: Vec<u8> },

    /// The terminal reported a non-zero result code on a non-payment command.
    #[error("Terminal error 0x{result_code:02X}: {message}")]
    Terminal {
        result_code: u8,
        message: String,
        raw: Vec<u8>,
    },

    /// A payment command completed with a non-zero result code.
    #[error("Transaction declined (0x{result_code:02X}): {message}")]
    TransactionDeclined {
        result_code: u8,
        message: String,
        card: Option<CardData>,
        raw: Vec<u8>,
    },

    /// A transaction command was issued before a successful registration.
    #[error("Terminal is not registered")]
    NotRegistered,
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>, duration_ms: u64) -> Self {
        Error::Timeout {
            message: message.into(),
            duration_ms,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
            raw: Vec::new(),
        }
    }

    pub fn protocol_with_raw(message: impl Into<String>, raw: &[u8]) -> Self {
        Error::Protocol {
            message: message.into(),
            raw: raw.to_vec(),
        }
    }

    /// Stream ended or was cut in the middle of a frame.
    pub fn malformed_frame(raw: &[u8]) -> Self {
        Error::protocol_with_raw(
            format!("malformed frame: stream closed after {} bytes", raw.len()),
            raw,
        )
    }

    /// Result code reported by the terminal, if this error carries one.
    pub fn result_code(&self) -> Option<u8> {
        match self {
            Error::Terminal { result_code, .. } | Error::TransactionDeclined { result_code, .. } => {
                Some(*result_code)
            }
            _ => None,
        }
    }

    /// Raw protocol bytes attached to this error (empty if none).
    pub fn raw(&self) -> &[u8] {
        match self {
            Error::Protocol { raw, .. }
            | Error::Terminal { raw, .. }
            | Error::TransactionDeclined { raw, .. } => raw,
            _ => &[],
        }
    }

    /// Whether the error invalidates the transport it occurred on.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Timeout { .. } | Error::Protocol { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
