//! Packed BCD numbers.
//!
//! Two decimal digits per byte, most significant digit first. A field of
//! `width` bytes therefore carries exactly `2 * width` digits, left padded
//! with zeros.
//!
//! ```text
//! 1234 cents in 6 bytes:  00 00 00 00 12 34
//! ```

use zvt_core::{Error, Result};

/// Largest number of bytes a BCD value may occupy and still fit a `u64`.
pub const MAX_BCD_WIDTH: usize = 9;

/// Largest value expressible in `width` BCD bytes.
pub fn max_value(width: usize) -> u64 {
    if width == 0 {
        return 0;
    }
    let digits = (width * 2).min(19) as u32;
    10u64.pow(digits) - 1
}

/// Encode `value` as `width` bytes of packed BCD.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `value` needs more than `2 * width` digits
/// or `width` exceeds [`MAX_BCD_WIDTH`].
///
/// # Example
///
/// ```
/// use zvt_protocol::bcd::encode_bcd;
///
/// assert_eq!(encode_bcd(1234, 3).unwrap(), vec![0x00, 0x12, 0x34]);
/// ```
pub fn encode_bcd(value: u64, width: usize) -> Result<Vec<u8>> {
    if width == 0 || width > MAX_BCD_WIDTH {
        return Err(Error::protocol(format!("unsupported BCD width {width}")));
    }
    if value > max_value(width) {
        return Err(Error::protocol(format!(
            "value {value} does not fit {} BCD digits",
            width * 2
        )));
    }

    let mut out = vec![0u8; width];
    let mut rest = value;
    for byte in out.iter_mut().rev() {
        let low = (rest % 10) as u8;
        rest /= 10;
        let high = (rest % 10) as u8;
        rest /= 10;
        *byte = (high << 4) | low;
    }
    Ok(out)
}

/// Decode packed BCD bytes into an integer.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if any nibble is above 9 or the input is
/// wider than [`MAX_BCD_WIDTH`].
pub fn decode_bcd(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > MAX_BCD_WIDTH {
        return Err(Error::protocol_with_raw(
            format!("BCD value of {} bytes exceeds u64 range", bytes.len()),
            bytes,
        ));
    }

    let mut value = 0u64;
    for &byte in bytes {
        let high = byte >> 4;
        let low = byte & 0x0F;
        if high > 9 || low > 9 {
            return Err(Error::protocol_with_raw(
                format!("invalid BCD digit in byte 0x{byte:02X}"),
                bytes,
            ));
        }
        value = value * 100 + u64::from(high) * 10 + u64::from(low);
    }
    Ok(value)
}
