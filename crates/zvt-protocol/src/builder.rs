use zvt_core::{Password, Result};

use crate::{
    bcd::encode_bcd,
    bmp::{FieldSet, FieldValue},
    commands::CommandCode,
    frame::Frame,
};

/// Builder for APDU payloads with a fluent API.
///
/// Untagged prefix bytes (password, config byte) come first in the order
/// they are added, followed by the tagged fields.
///
/// # Example
/// ```
/// use zvt_protocol::{PayloadBuilder, CommandCode, FieldValue, bmp::tags};
/// use zvt_core::Password;
///
/// let frame = PayloadBuilder::new(CommandCode::Registration)
///     .password(Password::new(123456).unwrap())
///     .byte(0x08)
///     .field(tags::CURRENCY_CODE, FieldValue::Number(978))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// assert_eq!(
///     frame.encode().unwrap().as_ref(),
///     &[0x06, 0x00, 0x07, 0x12, 0x34, 0x56, 0x08, 0x49, 0x09, 0x78]
/// );
/// ```
pub struct PayloadBuilder {
    command: CommandCode,
    prefix: Vec<u8>,
    fields: FieldSet,
}

impl PayloadBuilder {
    pub fn new(command: CommandCode) -> Self {
        PayloadBuilder {
            command,
            prefix: Vec::new(),
            fields: FieldSet::new(),
        }
    }

    /// Append the 3-byte BCD password.
    pub fn password(mut self, password: Password) -> Self {
        // Password::new caps the value at six digits, so this cannot fail.
        if let Ok(bytes) = encode_bcd(u64::from(password.as_u32()), 3) {
            self.prefix.extend(bytes);
        }
        self
    }

    /// Append one untagged byte.
    pub fn byte(mut self, value: u8) -> Self {
        self.prefix.push(value);
        self
    }

    /// Append untagged text bytes.
    pub fn text(mut self, value: &str) -> Self {
        self.prefix.extend_from_slice(value.as_bytes());
        self
    }

    /// Add a tagged field.
    ///
    /// # Errors
    /// Returns error if the value does not fit the tag's layout or the tag
    /// was already added.
    pub fn field(mut self, tag: u8, value: FieldValue) -> Result<Self> {
        self.fields.insert(tag, value)?;
        Ok(self)
    }

    /// Add a tagged field when `value` is present.
    pub fn optional_field(self, tag: u8, value: Option<FieldValue>) -> Result<Self> {
        match value {
            Some(value) => self.field(tag, value),
            None => Ok(self),
        }
    }

    /// Add every field of an existing set.
    pub fn fields(mut self, fields: &FieldSet) -> Result<Self> {
        for field in fields.fields() {
            self.fields.insert(field.tag, field.value.clone())?;
        }
        Ok(self)
    }

    /// Build the APDU.
    pub fn build(self) -> Result<Frame> {
        let mut payload = self.prefix;
        payload.extend(self.fields.encode()?);
        let frame = Frame::apdu(self.command, payload);
        // Surface oversize payloads here instead of at send time.
        frame.encode()?;
        Ok(frame)
    }
}
