//! Typed views of the APDUs exchanged by ECR and terminal.
//!
//! [`EcrRequest`] covers everything the ECR sends; [`TerminalMessage`]
//! everything the terminal answers with inside a response group. Both
//! convert to and from [`Frame`] so either peer can build and inspect them.

use zvt_core::{Error, Password, Result, constants::RESULT_SUCCESS};

use crate::{
    bcd::decode_bcd,
    bmp::{Field, FieldSet, FieldValue, amount, tags},
    builder::PayloadBuilder,
    commands::CommandCode,
    frame::Frame,
};

/// Config byte sent with registration: ECR prints receipts, ECR handles
/// intermediate status.
pub const DEFAULT_REGISTRATION_CONFIG: u8 = 0x8E;

/// Print line attribute for a normal text line.
pub const PRINT_ATTRIBUTE_NORMAL: u8 = 0x00;

/// Print line attribute marking the last line of a receipt.
pub const PRINT_ATTRIBUTE_LAST_LINE: u8 = 0xFF;

/// A command sent by the ECR.
///
/// Commands with a password carry it as a 3-byte BCD prefix; registration
/// adds one config byte after it. Everything else is tagged fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrRequest {
    pub command: CommandCode,
    pub password: Option<Password>,
    pub config_byte: Option<u8>,
    pub fields: FieldSet,
}

impl EcrRequest {
    pub fn new(command: CommandCode) -> Self {
        EcrRequest {
            command,
            password: None,
            config_byte: None,
            fields: FieldSet::new(),
        }
    }

    pub fn registration(password: Password, config_byte: u8, currency: u16) -> Result<Self> {
        let mut request = Self::new(CommandCode::Registration);
        request.password = Some(password);
        request.config_byte = Some(config_byte);
        request
            .fields
            .insert(tags::CURRENCY_CODE, FieldValue::Number(u64::from(currency)))?;
        Ok(request)
    }

    pub fn authorization(amount_cents: u64, currency: u16) -> Result<Self> {
        Self::payment(CommandCode::Authorization, amount_cents, currency)
    }

    pub fn pre_authorization(amount_cents: u64, currency: u16) -> Result<Self> {
        Self::payment(CommandCode::PreAuthorization, amount_cents, currency)
    }

    pub fn refund(password: Password, amount_cents: u64, currency: u16) -> Result<Self> {
        let mut request = Self::payment(CommandCode::Refund, amount_cents, currency)?;
        request.password = Some(password);
        Ok(request)
    }

    /// Reversal of an earlier transaction, identified by trace and/or
    /// receipt number.
    pub fn reversal(
        password: Password,
        original_trace: Option<u32>,
        receipt_number: Option<u32>,
        amount_cents: Option<u64>,
    ) -> Result<Self> {
        if original_trace.is_none() && receipt_number.is_none() {
            return Err(Error::protocol(
                "reversal needs an original trace or a receipt number",
            ));
        }
        let mut request = Self::new(CommandCode::Reversal);
        request.password = Some(password);
        if let Some(trace) = original_trace {
            request
                .fields
                .insert(tags::ORIGINAL_TRACE, FieldValue::Number(u64::from(trace)))?;
        }
        if let Some(receipt) = receipt_number {
            request
                .fields
                .insert(tags::RECEIPT_NUMBER, FieldValue::Number(u64::from(receipt)))?;
        }
        if let Some(cents) = amount_cents {
            request.fields.insert(tags::AMOUNT, amount(cents)?)?;
        }
        Ok(request)
    }

    pub fn end_of_day(password: Password) -> Self {
        let mut request = Self::new(CommandCode::EndOfDay);
        request.password = Some(password);
        request
    }

    pub fn status_enquiry(password: Password) -> Self {
        let mut request = Self::new(CommandCode::StatusEnquiry);
        request.password = Some(password);
        request
    }

    fn payment(command: CommandCode, amount_cents: u64, currency: u16) -> Result<Self> {
        let mut request = Self::new(command);
        request.fields.insert(tags::AMOUNT, amount(amount_cents)?)?;
        request
            .fields
            .insert(tags::CURRENCY_CODE, FieldValue::Number(u64::from(currency)))?;
        Ok(request)
    }

    /// Interpret an APDU as an ECR command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for control frames, unknown or
    /// terminal-side commands and malformed payloads.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let command = frame
            .command_code()
            .filter(CommandCode::is_ecr_command)
            .ok_or_else(|| Error::protocol(format!("{frame} is not an ECR command")))?;

        let mut rest = frame.payload();
        let mut request = Self::new(command);

        if command.has_password_prefix() {
            let (raw, tail) = rest.split_at_checked(3).ok_or_else(|| {
                Error::protocol_with_raw(
                    format!("{command:?} payload is missing the password"),
                    frame.payload(),
                )
            })?;
            let value = decode_bcd(raw)? as u32;
            request.password = Some(Password::new(value)?);
            rest = tail;
        }
        if command == CommandCode::Registration {
            let (&config, tail) = rest.split_first().ok_or_else(|| {
                Error::protocol_with_raw("registration is missing the config byte", frame.payload())
            })?;
            request.config_byte = Some(config);
            rest = tail;
        }

        request.fields = FieldSet::parse(rest)?;
        Ok(request)
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let mut builder = PayloadBuilder::new(self.command);
        if let Some(password) = self.password {
            builder = builder.password(password);
        }
        if let Some(config) = self.config_byte {
            builder = builder.byte(config);
        }
        builder.fields(&self.fields)?.build()
    }

    pub fn amount(&self) -> Option<u64> {
        self.fields.number(tags::AMOUNT)
    }

    pub fn currency(&self) -> Option<u16> {
        self.fields
            .number(tags::CURRENCY_CODE)
            .and_then(|c| u16::try_from(c).ok())
    }

    pub fn original_trace(&self) -> Option<u32> {
        self.fields
            .number(tags::ORIGINAL_TRACE)
            .and_then(|t| u32::try_from(t).ok())
    }

    pub fn receipt_number(&self) -> Option<u32> {
        self.fields
            .number(tags::RECEIPT_NUMBER)
            .and_then(|r| u32::try_from(r).ok())
    }
}

/// A frame of a terminal response group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMessage {
    /// `04 FF`: progress indication, not part of the result.
    IntermediateStatus { code: u8 },
    /// `04 0F`: transaction details.
    StatusInformation(FieldSet),
    /// `06 D1`: one receipt line.
    PrintLine { attribute: u8, text: String },
    /// `06 0F`: closes the group; BMP 27 carries the result code.
    Completion(FieldSet),
    /// `06 1E`: closes the group with a failure code.
    Abort { result_code: u8 },
}

impl TerminalMessage {
    pub fn print_line(text: impl Into<String>) -> Self {
        TerminalMessage::PrintLine {
            attribute: PRINT_ATTRIBUTE_NORMAL,
            text: text.into(),
        }
    }

    /// Completion carrying only a result code.
    pub fn completion_with_code(result_code: u8) -> Self {
        TerminalMessage::Completion(FieldSet::from_field(Field {
            tag: tags::RESULT_CODE,
            value: FieldValue::Byte(result_code),
        }))
    }

    pub fn parse(frame: &Frame) -> Result<Self> {
        let command = frame.command_code().ok_or_else(|| {
            Error::protocol_with_raw(
                format!("unexpected {frame} in response group"),
                &frame.encode().unwrap_or_default(),
            )
        })?;
        let payload = frame.payload();
        let missing = |what: &str| {
            Error::protocol_with_raw(format!("{command:?} is missing {what}"), payload)
        };

        let message = match command {
            CommandCode::IntermediateStatus => TerminalMessage::IntermediateStatus {
                code: *payload.first().ok_or_else(|| missing("the status byte"))?,
            },
            CommandCode::StatusInformation => {
                TerminalMessage::StatusInformation(FieldSet::parse(payload)?)
            }
            CommandCode::PrintLine => {
                let (&attribute, text) =
                    payload.split_first().ok_or_else(|| missing("the attribute"))?;
                TerminalMessage::PrintLine {
                    attribute,
                    text: String::from_utf8_lossy(text).into_owned(),
                }
            }
            CommandCode::Completion => TerminalMessage::Completion(FieldSet::parse(payload)?),
            CommandCode::TransactionAbort => TerminalMessage::Abort {
                result_code: *payload.first().ok_or_else(|| missing("the result code"))?,
            },
            other => {
                return Err(Error::protocol_with_raw(
                    format!("{other:?} is not a terminal response"),
                    payload,
                ));
            }
        };
        Ok(message)
    }

    pub fn to_frame(&self) -> Result<Frame> {
        match self {
            TerminalMessage::IntermediateStatus { code } => {
                PayloadBuilder::new(CommandCode::IntermediateStatus)
                    .byte(*code)
                    .build()
            }
            TerminalMessage::StatusInformation(fields) => {
                PayloadBuilder::new(CommandCode::StatusInformation)
                    .fields(fields)?
                    .build()
            }
            TerminalMessage::PrintLine { attribute, text } => {
                PayloadBuilder::new(CommandCode::PrintLine)
                    .byte(*attribute)
                    .text(text)
                    .build()
            }
            TerminalMessage::Completion(fields) => PayloadBuilder::new(CommandCode::Completion)
                .fields(fields)?
                .build(),
            TerminalMessage::Abort { result_code } => {
                PayloadBuilder::new(CommandCode::TransactionAbort)
                    .byte(*result_code)
                    .build()
            }
        }
    }

    /// Whether this message closes the response group.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TerminalMessage::Completion(_) | TerminalMessage::Abort { .. }
        )
    }

    /// Result code of a final message. A completion without BMP 27 counts
    /// as success.
    pub fn result_code(&self) -> Option<u8> {
        match self {
            TerminalMessage::Completion(fields) => {
                Some(fields.byte(tags::RESULT_CODE).unwrap_or(RESULT_SUCCESS))
            }
            TerminalMessage::Abort { result_code } => Some(*result_code),
            _ => None,
        }
    }
}
