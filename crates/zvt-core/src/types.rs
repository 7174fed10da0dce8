use crate::{
    Result,
    constants::{
        RESULT_ABORTED, RESULT_CARD_EXPIRED, RESULT_CARD_NOT_READABLE,
        RESULT_CREDIT_NOT_SUFFICIENT, RESULT_FUNCTION_NOT_POSSIBLE, RESULT_NOT_REGISTERED,
        RESULT_PROCESSING_ERROR, RESULT_SUCCESS, RESULT_SYSTEM_ERROR, RESULT_WRONG_CURRENCY,
        STATUS_ENTER_PIN, STATUS_INSERT_CARD, STATUS_PLEASE_WAIT, STATUS_REMOVE_CARD,
    },
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Terminal password (6 decimal digits, sent as 3 BCD bytes).
///
/// # Security
/// Comparison is constant-time so a wrong password cannot be guessed
/// digit by digit.
#[derive(Debug, Clone, Copy, Default, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Password(u32);

impl Password {
    /// Create a password with validation.
    ///
    /// # Errors
    /// Returns `Error::Protocol` if the value has more than 6 digits.
    pub fn new(value: u32) -> Result<Self> {
        if value > 999_999 {
            return Err(Error::protocol(format!(
                "Password must have at most 6 digits, got {value}"
            )));
        }
        Ok(Password(value))
    }

    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_be_bytes().ct_eq(&other.0.to_be_bytes()).into()
    }
}

impl TryFrom<u32> for Password {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Password::new(value)
    }
}

impl From<Password> for u32 {
    fn from(password: Password) -> Self {
        password.0
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl std::str::FromStr for Password {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::protocol(format!("Invalid password: {s}")))?;
        Password::new(value)
    }
}

/// Client connection lifecycle.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Registering -> Registered
///       ^                            ^            |
///       |                            +-- reject --+
///       +------------ disconnect() from any state
/// any state -- transport fault --> Error -- connect() --> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Registering,
    Registered,
    Error,
}

impl ConnectionState {
    /// A socket is open in this state.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Registering | ConnectionState::Registered
        )
    }

    /// `connect()` is allowed from this state.
    pub fn can_connect(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Registering => "Registering",
            ConnectionState::Registered => "Registered",
            ConnectionState::Error => "Error",
        };
        write!(f, "{}", state_str)
    }
}

/// Commands an ECR can issue to a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Registration,
    Authorization,
    PreAuthorization,
    Refund,
    Reversal,
    EndOfDay,
    Diagnosis,
    StatusEnquiry,
    Abort,
    LogOff,
}

impl CommandKind {
    /// Payment commands move money and are recorded in the ledger.
    ///
    /// A non-zero result code on these is a decline rather than a
    /// terminal error.
    pub fn is_payment(self) -> bool {
        matches!(
            self,
            CommandKind::Authorization
                | CommandKind::PreAuthorization
                | CommandKind::Refund
                | CommandKind::Reversal
        )
    }

    /// Sign applied to the amount when summing a batch.
    pub fn batch_sign(self) -> i64 {
        match self {
            CommandKind::Authorization | CommandKind::PreAuthorization => 1,
            CommandKind::Refund | CommandKind::Reversal => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Registration => "Registration",
            CommandKind::Authorization => "Authorization",
            CommandKind::PreAuthorization => "PreAuthorization",
            CommandKind::Refund => "Refund",
            CommandKind::Reversal => "Reversal",
            CommandKind::EndOfDay => "EndOfDay",
            CommandKind::Diagnosis => "Diagnosis",
            CommandKind::StatusEnquiry => "StatusEnquiry",
            CommandKind::Abort => "Abort",
            CommandKind::LogOff => "LogOff",
        };
        write!(f, "{}", name)
    }
}

/// Card details reported by the terminal after a card was read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardData {
    /// Masked primary account number, e.g. `************1234`.
    pub masked_pan: String,
    /// Brand label, e.g. `Girocard`.
    pub brand: String,
    /// Expiry as `YYMM`.
    pub expiry: String,
    pub sequence_number: u16,
    /// Application identifier as upper-case hex.
    pub aid: String,
}

impl CardData {
    /// True when no field was reported.
    pub fn is_empty(&self) -> bool {
        self.masked_pan.is_empty()
            && self.brand.is_empty()
            && self.expiry.is_empty()
            && self.sequence_number == 0
            && self.aid.is_empty()
    }
}

/// Count and net amount of one settlement batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub count: u32,
    /// Net total in cents: sales minus refunds and reversals.
    pub total_cents: i64,
}

/// Outcome of one completed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub command: CommandKind,
    pub success: bool,
    pub result_code: u8,
    pub amount_cents: u64,
    pub card: Option<CardData>,
    pub receipt_number: Option<u32>,
    pub trace_number: Option<u32>,
    pub turnover_number: Option<u32>,
    /// Trace number of the reversed transaction.
    pub original_trace: Option<u32>,
    pub terminal_id: Option<String>,
    pub currency_code: Option<u16>,
    pub batch_totals: Option<BatchTotals>,
    /// Print lines accumulated into the receipt, in arrival order.
    pub print_lines: Vec<String>,
    /// Tags of BMP fields that were skipped because they are not modelled.
    pub unknown_fields: Vec<u8>,
    /// Concatenated encoded frames of the response group.
    pub raw: Vec<u8>,
}

impl TransactionResult {
    pub fn new(command: CommandKind) -> Self {
        Self {
            command,
            success: true,
            result_code: RESULT_SUCCESS,
            amount_cents: 0,
            card: None,
            receipt_number: None,
            trace_number: None,
            turnover_number: None,
            original_trace: None,
            terminal_id: None,
            currency_code: None,
            batch_totals: None,
            print_lines: Vec::new(),
            unknown_fields: Vec::new(),
            raw: Vec::new(),
        }
    }

    /// Receipt text as one string, one print line per row.
    pub fn receipt(&self) -> String {
        self.print_lines.join("\n")
    }

    /// Turn a failed result into the matching typed error.
    ///
    /// Payment commands become [`Error::TransactionDeclined`], everything
    /// else [`Error::Terminal`].
    pub fn into_outcome(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let message = result_code_text(self.result_code).to_string();
        if self.command.is_payment() {
            Err(Error::TransactionDeclined {
                result_code: self.result_code,
                message,
                card: self.card,
                raw: self.raw,
            })
        } else {
            Err(Error::Terminal {
                result_code: self.result_code,
                message,
                raw: self.raw,
            })
        }
    }
}

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line on the client's log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Intermediate status reported while a command is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateStatus {
    pub code: u8,
    pub text: String,
}

impl IntermediateStatus {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            text: intermediate_status_text(code).to_string(),
        }
    }
}

/// Human readable text for a result code.
pub fn result_code_text(code: u8) -> &'static str {
    match code {
        RESULT_SUCCESS => "success",
        RESULT_CARD_NOT_READABLE => "card not readable",
        RESULT_PROCESSING_ERROR => "processing error",
        RESULT_NOT_REGISTERED => "function deactivated (terminal not registered)",
        RESULT_ABORTED => "aborted via timeout or abort key",
        RESULT_WRONG_CURRENCY => "wrong currency",
        RESULT_CREDIT_NOT_SUFFICIENT => "credit not sufficient",
        RESULT_CARD_EXPIRED => "card expired",
        RESULT_FUNCTION_NOT_POSSIBLE => "function not possible",
        RESULT_SYSTEM_ERROR => "system error",
        _ => "unknown result code",
    }
}

/// Display text for an intermediate status code.
pub fn intermediate_status_text(code: u8) -> &'static str {
    match code {
        STATUS_INSERT_CARD => "Insert card",
        STATUS_REMOVE_CARD => "Please remove card",
        STATUS_PLEASE_WAIT => "Please wait",
        STATUS_ENTER_PIN => "Enter PIN",
        _ => "Processing",
    }
}
