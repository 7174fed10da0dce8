//! Command codes of the ZVT ECR interface.
//!
//! Every APDU starts with a class byte and an instruction byte. The pair
//! selects the command; the payload layout depends on it.
//!
//! # ECR to terminal
//!
//! | Command            | Class | Instr |
//! |--------------------|-------|-------|
//! | `Registration`     | 06    | 00    |
//! | `Authorization`    | 06    | 01    |
//! | `LogOff`           | 06    | 02    |
//! | `PreAuthorization` | 06    | 22    |
//! | `Reversal`         | 06    | 30    |
//! | `Refund`           | 06    | 31    |
//! | `EndOfDay`         | 06    | 50    |
//! | `Diagnosis`        | 06    | 70    |
//! | `Abort`            | 06    | B0    |
//! | `StatusEnquiry`    | 05    | 01    |
//!
//! # Terminal to ECR
//!
//! | Response             | Class | Instr |
//! |----------------------|-------|-------|
//! | `StatusInformation`  | 04    | 0F    |
//! | `IntermediateStatus` | 04    | FF    |
//! | `Completion`         | 06    | 0F    |
//! | `TransactionAbort`   | 06    | 1E    |
//! | `PrintLine`          | 06    | D1    |
//!
//! ```
//! use zvt_protocol::CommandCode;
//!
//! let cmd = CommandCode::from_bytes(0x06, 0x01).unwrap();
//! assert_eq!(cmd, CommandCode::Authorization);
//! assert_eq!(cmd.as_bytes(), [0x06, 0x01]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use zvt_core::CommandKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    // ECR -> terminal
    Registration,     // 06 00
    Authorization,    // 06 01
    LogOff,           // 06 02
    PreAuthorization, // 06 22
    Reversal,         // 06 30
    Refund,           // 06 31
    EndOfDay,         // 06 50
    Diagnosis,        // 06 70
    Abort,            // 06 B0
    StatusEnquiry,    // 05 01

    // Terminal -> ECR
    StatusInformation,  // 04 0F
    IntermediateStatus, // 04 FF
    Completion,         // 06 0F
    TransactionAbort,   // 06 1E
    PrintLine,          // 06 D1
}

impl CommandCode {
    /// Look up the command for a class/instruction pair.
    ///
    /// Returns `None` for pairs this implementation does not know; callers
    /// decide whether that is an error (terminal side NACKs it).
    pub fn from_bytes(class: u8, instruction: u8) -> Option<Self> {
        let code = match (class, instruction) {
            (0x06, 0x00) => CommandCode::Registration,
            (0x06, 0x01) => CommandCode::Authorization,
            (0x06, 0x02) => CommandCode::LogOff,
            (0x06, 0x22) => CommandCode::PreAuthorization,
            (0x06, 0x30) => CommandCode::Reversal,
            (0x06, 0x31) => CommandCode::Refund,
            (0x06, 0x50) => CommandCode::EndOfDay,
            (0x06, 0x70) => CommandCode::Diagnosis,
            (0x06, 0xB0) => CommandCode::Abort,
            (0x05, 0x01) => CommandCode::StatusEnquiry,
            (0x04, 0x0F) => CommandCode::StatusInformation,
            (0x04, 0xFF) => CommandCode::IntermediateStatus,
            (0x06, 0x0F) => CommandCode::Completion,
            (0x06, 0x1E) => CommandCode::TransactionAbort,
            (0x06, 0xD1) => CommandCode::PrintLine,
            _ => return None,
        };
        Some(code)
    }

    /// Class and instruction bytes.
    pub fn as_bytes(&self) -> [u8; 2] {
        match self {
            CommandCode::Registration => [0x06, 0x00],
            CommandCode::Authorization => [0x06, 0x01],
            CommandCode::LogOff => [0x06, 0x02],
            CommandCode::PreAuthorization => [0x06, 0x22],
            CommandCode::Reversal => [0x06, 0x30],
            CommandCode::Refund => [0x06, 0x31],
            CommandCode::EndOfDay => [0x06, 0x50],
            CommandCode::Diagnosis => [0x06, 0x70],
            CommandCode::Abort => [0x06, 0xB0],
            CommandCode::StatusEnquiry => [0x05, 0x01],
            CommandCode::StatusInformation => [0x04, 0x0F],
            CommandCode::IntermediateStatus => [0x04, 0xFF],
            CommandCode::Completion => [0x06, 0x0F],
            CommandCode::TransactionAbort => [0x06, 0x1E],
            CommandCode::PrintLine => [0x06, 0xD1],
        }
    }

    #[inline]
    pub fn class(&self) -> u8 {
        self.as_bytes()[0]
    }

    #[inline]
    pub fn instruction(&self) -> u8 {
        self.as_bytes()[1]
    }

    /// The command an ECR sends for a logical operation.
    pub fn for_kind(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Registration => CommandCode::Registration,
            CommandKind::Authorization => CommandCode::Authorization,
            CommandKind::PreAuthorization => CommandCode::PreAuthorization,
            CommandKind::Refund => CommandCode::Refund,
            CommandKind::Reversal => CommandCode::Reversal,
            CommandKind::EndOfDay => CommandCode::EndOfDay,
            CommandKind::Diagnosis => CommandCode::Diagnosis,
            CommandKind::StatusEnquiry => CommandCode::StatusEnquiry,
            CommandKind::Abort => CommandCode::Abort,
            CommandKind::LogOff => CommandCode::LogOff,
        }
    }

    /// Logical operation of an ECR command; `None` for terminal responses.
    pub fn kind(&self) -> Option<CommandKind> {
        let kind = match self {
            CommandCode::Registration => CommandKind::Registration,
            CommandCode::Authorization => CommandKind::Authorization,
            CommandCode::LogOff => CommandKind::LogOff,
            CommandCode::PreAuthorization => CommandKind::PreAuthorization,
            CommandCode::Reversal => CommandKind::Reversal,
            CommandCode::Refund => CommandKind::Refund,
            CommandCode::EndOfDay => CommandKind::EndOfDay,
            CommandCode::Diagnosis => CommandKind::Diagnosis,
            CommandCode::Abort => CommandKind::Abort,
            CommandCode::StatusEnquiry => CommandKind::StatusEnquiry,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns `true` for commands the ECR sends to the terminal.
    #[inline]
    pub fn is_ecr_command(&self) -> bool {
        self.kind().is_some()
    }

    /// Returns `true` if the payload starts with a 3-byte BCD password.
    #[inline]
    pub fn has_password_prefix(&self) -> bool {
        matches!(
            self,
            Self::Registration
                | Self::Refund
                | Self::Reversal
                | Self::EndOfDay
                | Self::StatusEnquiry
        )
    }

    /// Returns `true` for responses that close a response group.
    #[inline]
    pub fn is_final_response(&self) -> bool {
        matches!(self, Self::Completion | Self::TransactionAbort)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [class, instruction] = self.as_bytes();
        write!(f, "{:?} ({:02X} {:02X})", self, class, instruction)
    }
}
