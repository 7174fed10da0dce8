//! Command routing for the simulated terminal.
//!
//! The router turns one received APDU into either a NACK reason or the
//! ordered response group the session layer should send. Gating happens
//! before any handler runs:
//!
//! 1. unknown class/instruction      -> NACK `NACK_UNSUPPORTED_COMMAND`
//! 2. payload does not parse         -> NACK `NACK_MALFORMED`
//! 3. not registered (except 06 00)  -> NACK `NACK_NOT_REGISTERED`
//! 4. another command is running     -> NACK `NACK_BUSY`

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use zvt_core::{
    CommandKind,
    constants::{NACK_BUSY, NACK_MALFORMED, NACK_NOT_REGISTERED, NACK_UNSUPPORTED_COMMAND, RESULT_SYSTEM_ERROR},
};
use zvt_protocol::{CommandCode, EcrRequest, Frame, ResponseStep, TerminalMessage};

use crate::{
    handlers,
    state::{BusyGuard, SimulatorState},
};

/// Router decision for one received frame.
#[derive(Debug)]
pub enum Dispatch {
    /// ACK the command, then send `steps`. `guard` keeps the terminal busy
    /// until the session drops it after the last frame.
    Respond {
        command: CommandCode,
        steps: Vec<ResponseStep>,
        guard: Option<BusyGuard>,
    },
    /// NACK the command with this reason.
    Reject(u8),
}

impl Dispatch {
    pub fn is_reject(&self) -> bool {
        matches!(self, Dispatch::Reject(_))
    }
}

/// Maps ECR commands to handlers over shared simulator state.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    state: Arc<SimulatorState>,
}

impl CommandRouter {
    pub fn new(state: Arc<SimulatorState>) -> Self {
        CommandRouter { state }
    }

    pub fn state(&self) -> &Arc<SimulatorState> {
        &self.state
    }

    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let Some(command) = frame.command_code().filter(CommandCode::is_ecr_command) else {
            warn!("Unsupported command {frame}");
            return Dispatch::Reject(NACK_UNSUPPORTED_COMMAND);
        };

        let request = match EcrRequest::parse(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(?command, error = %e, "Malformed command payload");
                return Dispatch::Reject(NACK_MALFORMED);
            }
        };

        if command != CommandCode::Registration && !self.state.is_registered() {
            info!(?command, "Rejected: terminal not registered");
            return Dispatch::Reject(NACK_NOT_REGISTERED);
        }

        let guard = if claims_terminal(command) {
            match self.state.try_begin() {
                Some(guard) => Some(guard),
                None => {
                    info!(?command, "Rejected: terminal busy");
                    return Dispatch::Reject(NACK_BUSY);
                }
            }
        } else {
            None
        };

        info!(?command, "Handling command");
        let config = self.state.config();
        let steps = match handlers::handle(&self.state, &config, &request) {
            Ok(steps) => steps,
            Err(e) => {
                error!(?command, error = %e, "Handler failed");
                system_error_group()
            }
        };
        debug!(?command, frames = steps.len(), "Response group ready");

        Dispatch::Respond {
            command,
            steps,
            guard,
        }
    }
}

/// Commands that change terminal state run one at a time.
fn claims_terminal(command: CommandCode) -> bool {
    match command.kind() {
        Some(kind) => {
            kind.is_payment()
                || matches!(
                    kind,
                    CommandKind::Registration | CommandKind::EndOfDay | CommandKind::LogOff
                )
        }
        None => false,
    }
}

fn system_error_group() -> Vec<ResponseStep> {
    TerminalMessage::completion_with_code(RESULT_SYSTEM_ERROR)
        .to_frame()
        .map(|frame| vec![ResponseStep::new(frame)])
        .unwrap_or_default()
}
