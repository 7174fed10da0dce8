//! Simulator configuration.
//!
//! Every field has a serde default, so `{}` is a complete configuration:
//!
//! ```json
//! {
//!   "tcp_port": 20007,
//!   "terminal_id": "29001234",
//!   "password": 0,
//!   "delays": { "processing_ms": 500 },
//!   "error_policy": { "enabled": true, "percentage": 10 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zvt_core::{
    CardData, ConfigError, Password,
    constants::{DEFAULT_ACK_TIMEOUT_MS, DEFAULT_API_PORT, DEFAULT_CURRENCY_CODE, DEFAULT_TERMINAL_PORT},
    load_json,
};

use crate::policy::ErrorPolicy;

/// Top-level simulator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Port the ECR connects to.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Port reserved for the management API.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Terminal id, 8 decimal digits (BMP 29).
    #[serde(default = "default_terminal_id")]
    pub terminal_id: String,
    /// Merchant contract number, up to 15 characters (BMP 2A).
    #[serde(default = "default_vu_number")]
    pub vu_number: String,
    /// ISO 4217 numeric currency code.
    #[serde(default = "default_currency_code")]
    pub currency_code: u16,
    /// Password expected by registration and administrative commands.
    #[serde(default)]
    pub password: Password,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Card presented for every payment.
    #[serde(default)]
    pub card: SimulatedCard,
    /// Send the customer receipt as print lines.
    #[serde(default = "default_true")]
    pub print_receipts: bool,
}

/// Artificial latencies, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Before ACKing a received command.
    #[serde(default = "default_ack_delay")]
    pub ack_ms: u64,
    /// Before each intermediate status frame.
    #[serde(default = "default_intermediate_delay")]
    pub intermediate_status_ms: u64,
    /// Before the status information frame (card processing).
    #[serde(default = "default_processing_delay")]
    pub processing_ms: u64,
    /// Before each print line.
    #[serde(default = "default_print_line_delay")]
    pub print_line_ms: u64,
    /// Before the completion frame.
    #[serde(default = "default_inter_response_delay")]
    pub inter_response_ms: u64,
    /// How long to wait for the ECR to ACK a response frame.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

impl DelayConfig {
    /// No artificial latency at all.
    pub fn instant() -> Self {
        DelayConfig {
            ack_ms: 0,
            intermediate_status_ms: 0,
            processing_ms: 0,
            print_line_ms: 0,
            inter_response_ms: 0,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }

    pub fn ack(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn intermediate_status(&self) -> Duration {
        Duration::from_millis(self.intermediate_status_ms)
    }

    pub fn processing(&self) -> Duration {
        Duration::from_millis(self.processing_ms)
    }

    pub fn print_line(&self) -> Duration {
        Duration::from_millis(self.print_line_ms)
    }

    pub fn inter_response(&self) -> Duration {
        Duration::from_millis(self.inter_response_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            ack_ms: default_ack_delay(),
            intermediate_status_ms: default_intermediate_delay(),
            processing_ms: default_processing_delay(),
            print_line_ms: default_print_line_delay(),
            inter_response_ms: default_inter_response_delay(),
            ack_timeout_ms: default_ack_timeout(),
        }
    }
}

/// Card data the simulated terminal reports after "reading" a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedCard {
    #[serde(default = "default_masked_pan")]
    pub masked_pan: String,
    #[serde(default = "default_brand")]
    pub brand: String,
    /// `YYMM`.
    #[serde(default = "default_expiry")]
    pub expiry: String,
    #[serde(default = "default_sequence_number")]
    pub sequence_number: u16,
    /// Application identifier as hex.
    #[serde(default = "default_aid")]
    pub aid: String,
    /// Card type byte (BMP 8A).
    #[serde(default = "default_card_type")]
    pub card_type: u8,
}

impl SimulatedCard {
    pub fn card_data(&self) -> CardData {
        CardData {
            masked_pan: self.masked_pan.clone(),
            brand: self.brand.clone(),
            expiry: self.expiry.clone(),
            sequence_number: self.sequence_number,
            aid: self.aid.to_ascii_uppercase(),
        }
    }

    /// Expiry as the `YYMM` number sent in BMP 0E.
    pub fn expiry_number(&self) -> Option<u64> {
        parse_digits(&self.expiry, 4)
    }

    /// AID bytes for BMP 3B.
    pub fn aid_bytes(&self) -> Option<Vec<u8>> {
        decode_hex(&self.aid)
    }
}

impl Default for SimulatedCard {
    fn default() -> Self {
        SimulatedCard {
            masked_pan: default_masked_pan(),
            brand: default_brand(),
            expiry: default_expiry(),
            sequence_number: default_sequence_number(),
            aid: default_aid(),
            card_type: default_card_type(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            tcp_port: default_tcp_port(),
            api_port: default_api_port(),
            terminal_id: default_terminal_id(),
            vu_number: default_vu_number(),
            currency_code: default_currency_code(),
            password: Password::default(),
            delays: DelayConfig::default(),
            error_policy: ErrorPolicy::default(),
            card: SimulatedCard::default(),
            print_receipts: default_true(),
        }
    }
}

impl SimulatorConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: SimulatorConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_digits(&self.terminal_id, 8).is_none() {
            return Err(invalid("terminal_id", "must be exactly 8 decimal digits"));
        }
        if self.vu_number.len() > 15 || !is_printable(&self.vu_number) {
            return Err(invalid(
                "vu_number",
                "must be at most 15 printable ASCII characters",
            ));
        }
        if self.currency_code > 9999 {
            return Err(invalid("currency_code", "must have at most 4 digits"));
        }
        if self.error_policy.percentage > 100 {
            return Err(invalid("error_policy.percentage", "must be between 0 and 100"));
        }
        if self.card.expiry_number().is_none() {
            return Err(invalid("card.expiry", "must be 4 digits (YYMM)"));
        }
        if self.card.sequence_number > 9999 {
            return Err(invalid("card.sequence_number", "must have at most 4 digits"));
        }
        if self.card.aid_bytes().is_none() {
            return Err(invalid("card.aid", "must be an even number of hex digits"));
        }
        if !is_printable(&self.card.masked_pan) || !is_printable(&self.card.brand) {
            return Err(invalid("card", "PAN and brand must be printable ASCII"));
        }
        Ok(())
    }

    /// Terminal id as the number sent in BMP 29.
    pub fn terminal_id_number(&self) -> u64 {
        parse_digits(&self.terminal_id, 8).unwrap_or(0)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn is_printable(text: &str) -> bool {
    text.bytes().all(|b| (0x20..0x7F).contains(&b))
}

fn parse_digits(text: &str, len: usize) -> Option<u64> {
    if text.len() != len || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || text.len() > 32 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

// ── Defaults ────────────────────────────────────────────────────────────────

fn default_tcp_port() -> u16 {
    DEFAULT_TERMINAL_PORT
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_terminal_id() -> String {
    "29001234".to_string()
}

fn default_vu_number() -> String {
    "SIMULATOR".to_string()
}

fn default_currency_code() -> u16 {
    DEFAULT_CURRENCY_CODE
}

fn default_true() -> bool {
    true
}

fn default_ack_delay() -> u64 {
    50
}

fn default_intermediate_delay() -> u64 {
    300
}

fn default_processing_delay() -> u64 {
    1_000
}

fn default_print_line_delay() -> u64 {
    20
}

fn default_inter_response_delay() -> u64 {
    100
}

fn default_ack_timeout() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_masked_pan() -> String {
    "6726********1234".to_string()
}

fn default_brand() -> String {
    "girocard".to_string()
}

fn default_expiry() -> String {
    "2912".to_string()
}

fn default_sequence_number() -> u16 {
    1
}

fn default_aid() -> String {
    "A0000003591010028001".to_string()
}

fn default_card_type() -> u8 {
    0x05
}
