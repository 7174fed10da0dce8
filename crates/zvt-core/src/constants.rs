//! Core constants for the ZVT ECR interface.
//!
//! Every exchange on the wire is an APDU:
//!
//! ```text
//! +-------+-------+--------+-----------------+
//! | CLASS | INSTR | LENGTH | PAYLOAD ...     |
//! +-------+-------+--------+-----------------+
//!                   0x00..=0xFE  single byte
//!                   0xFF LL HH   extended, little-endian u16
//! ```
//!
//! Two control frames sit outside that shape and are checked before any
//! generic decoding:
//!
//! | Frame | Bytes          |
//! |-------|----------------|
//! | ACK   | `80 00`        |
//! | NACK  | `84 00 <rsn>`  |
//!
//! Integers inside payload fields are big-endian (packed BCD, most
//! significant digit first). Only the extended frame length is little-endian.

// ============================================================================
// Control Frames
// ============================================================================

/// Positive acknowledgement. Exactly two bytes on the wire.
pub const ACK_CODE: [u8; 2] = [0x80, 0x00];

/// Negative acknowledgement. Followed by exactly one reason byte.
pub const NACK_CODE: [u8; 2] = [0x84, 0x00];

/// Total size of an encoded NACK frame.
pub const NACK_FRAME_LEN: usize = 3;

// ============================================================================
// Frame Layout
// ============================================================================

/// Bytes taken by class and instruction.
pub const COMMAND_LEN: usize = 2;

/// Length byte value announcing a 2-byte extended length.
pub const EXTENDED_LENGTH_MARKER: u8 = 0xFF;

/// Largest payload expressible in the single length byte.
pub const MAX_SHORT_PAYLOAD_LEN: usize = 0xFE;

/// Largest payload expressible at all (extended form).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Header bytes for the extended form: command + marker + u16.
pub const EXTENDED_HEADER_LEN: usize = COMMAND_LEN + 3;

// ============================================================================
// Result Codes (BMP 27 / abort payload)
// ============================================================================

/// Command completed successfully.
pub const RESULT_SUCCESS: u8 = 0x00;

/// Card could not be read.
pub const RESULT_CARD_NOT_READABLE: u8 = 0x64;

/// Processing error on the terminal.
pub const RESULT_PROCESSING_ERROR: u8 = 0x66;

/// Terminal function deactivated, e.g. not registered.
pub const RESULT_NOT_REGISTERED: u8 = 0x6B;

/// Aborted via timeout or abort key.
pub const RESULT_ABORTED: u8 = 0x6C;

/// Wrong currency.
pub const RESULT_WRONG_CURRENCY: u8 = 0x6F;

/// Credit not sufficient.
pub const RESULT_CREDIT_NOT_SUFFICIENT: u8 = 0x71;

/// Card expired.
pub const RESULT_CARD_EXPIRED: u8 = 0x78;

/// Requested function is not possible (also used for wrong passwords).
pub const RESULT_FUNCTION_NOT_POSSIBLE: u8 = 0x83;

/// Generic system error.
pub const RESULT_SYSTEM_ERROR: u8 = 0xFF;

/// Result codes drawn by the percentage error-injection policy.
pub const INJECTABLE_RESULT_CODES: [u8; 5] = [
    RESULT_CARD_NOT_READABLE,
    RESULT_PROCESSING_ERROR,
    RESULT_CREDIT_NOT_SUFFICIENT,
    RESULT_CARD_EXPIRED,
    RESULT_ABORTED,
];

// ============================================================================
// NACK Reasons
// ============================================================================

/// Command class/instruction not supported by the terminal.
pub const NACK_UNSUPPORTED_COMMAND: u8 = 0x83;

/// Transaction command received before registration.
pub const NACK_NOT_REGISTERED: u8 = 0x6B;

/// Terminal is processing another transaction.
pub const NACK_BUSY: u8 = 0xA0;

/// Frame could not be decoded.
pub const NACK_MALFORMED: u8 = 0x9A;

// ============================================================================
// Intermediate Status Codes (04 FF)
// ============================================================================

/// "Insert card".
pub const STATUS_INSERT_CARD: u8 = 0x0A;

/// "Please remove card".
pub const STATUS_REMOVE_CARD: u8 = 0x0B;

/// "Please wait".
pub const STATUS_PLEASE_WAIT: u8 = 0x0E;

/// "Enter PIN".
pub const STATUS_ENTER_PIN: u8 = 0x13;

// ============================================================================
// Defaults
// ============================================================================

/// Conventional TCP port of ZVT terminals.
pub const DEFAULT_TERMINAL_PORT: u16 = 20007;

/// Default port of the simulator management API.
pub const DEFAULT_API_PORT: u16 = 8080;

/// ISO 4217 numeric code for EUR.
pub const DEFAULT_CURRENCY_CODE: u16 = 978;

/// Connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Read timeout for the next response frame in milliseconds.
///
/// Card transactions wait for the customer, so this is generous.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

/// Time to wait for a peer ACK in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;

/// Largest value of a 6-digit BCD counter (trace, turnover).
pub const MAX_SIX_DIGIT_COUNTER: u32 = 999_999;

/// Largest value of a 4-digit BCD counter (receipt).
pub const MAX_FOUR_DIGIT_COUNTER: u32 = 9_999;

/// Largest amount in cents representable in BMP 04 (12 BCD digits).
pub const MAX_AMOUNT_CENTS: u64 = 999_999_999_999;
