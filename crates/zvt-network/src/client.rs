//! ECR side: connection state machine and command orchestration.
//!
//! # Architecture
//!
//! ```text
//! caller ─┬─> TerminalClient::authorize() ──┐
//!         └─> TerminalClient::refund() ─────┤  queue on the transport mutex
//!                                           v
//!                         Framed<TcpStream, ZvtCodec> ───(TCP)───> terminal
//!                                           │
//!          state (watch) <──────────────────┤
//!          logs / statuses / print lines <──┘  (EventStream)
//! ```
//!
//! One command runs at a time per connection. A command sends one APDU,
//! waits for the terminal's ACK, then reads the response group until the
//! completion or abort frame, ACKing every frame it consumes.
//!
//! # Example Usage
//!
//! ```no_run
//! use zvt_network::{ClientConfig, TerminalClient};
//!
//! # async fn example() -> zvt_core::Result<()> {
//! let client = TerminalClient::new(ClientConfig::default());
//! client.connect().await?;
//! client.register().await?;
//!
//! let result = client.authorize(1234).await?;
//! println!("trace {:?}\n{}", result.trace_number, result.receipt());
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure Handling
//!
//! Transport faults (lost socket, missing ACK, read timeout, malformed
//! frame) drop the connection and move the state to `Error`, from where
//! `connect()` may be called again. A declined payment or a terminal error
//! leaves the connection usable. No command is ever resent automatically.

use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zvt_core::{
    BatchTotals, CardData, CommandKind, ConnectionState, Error, IntermediateStatus, LogEntry,
    LogLevel, Result, TransactionResult,
    constants::{NACK_MALFORMED, RESULT_SUCCESS},
    result_code_text,
};
use zvt_protocol::{
    AckOutcome, CommandCode, EcrRequest, FieldSet, Frame, TerminalMessage, ZvtCodec,
    bmp::{decode_totals, tags},
    frame::to_hex,
    handshake,
    messages::DEFAULT_REGISTRATION_CONFIG,
};

use crate::config::ClientConfig;
use crate::events::EventStream;

type Transport = Framed<TcpStream, ZvtCodec>;

/// Time allowed for flushing and shutting down the socket on disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Client for one terminal connection.
///
/// All methods take `&self`; share the client behind an `Arc` to issue
/// commands from several tasks. Commands queue and run one at a time.
pub struct TerminalClient {
    config: ClientConfig,
    transport: Mutex<Option<Transport>>,
    state: watch::Sender<ConnectionState>,
    /// Cancels waits of the current connection.
    cancel: StdMutex<CancellationToken>,
    logs: EventStream<LogEntry>,
    statuses: EventStream<IntermediateStatus>,
    print_lines: EventStream<String>,
}

impl TerminalClient {
    pub fn new(config: ClientConfig) -> Self {
        debug!("Creating terminal client for {}", config.address());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        TerminalClient {
            config,
            transport: Mutex::new(None),
            state,
            cancel: StdMutex::new(CancellationToken::new()),
            logs: EventStream::default(),
            statuses: EventStream::default(),
            print_lines: EventStream::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn logs(&self) -> &EventStream<LogEntry> {
        &self.logs
    }

    pub fn statuses(&self) -> &EventStream<IntermediateStatus> {
        &self.statuses
    }

    pub fn print_lines(&self) -> &EventStream<String> {
        &self.print_lines
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            self.log(LogLevel::Debug, format!("State {previous} -> {state}"));
        }
    }

    /// Emit a tracing event and republish it on the log stream.
    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.logs.publish(LogEntry::new(level, message));
    }

    /// Hex dump of a frame on the log stream, only with `debug` set.
    fn dump(&self, direction: &str, bytes: &[u8]) {
        if self.config.debug {
            self.log(LogLevel::Debug, format!("{direction} {}", to_hex(bytes)));
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Open the TCP connection.
    ///
    /// Allowed from `Disconnected` and `Error`; a no-op while connected.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the terminal does not accept within
    /// `connect_timeout_ms`, [`Error::Connection`] if it refuses.
    pub async fn connect(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        if !self.state().can_connect() {
            debug!("connect() while {}, nothing to do", self.state());
            return Ok(());
        }

        let address = self.config.address();
        self.set_state(ConnectionState::Connecting);
        self.log(LogLevel::Info, format!("Connecting to {address}"));

        let timeout = self.config.connect_timeout();
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.log(LogLevel::Error, format!("Connection to {address} failed: {e}"));
                self.set_state(ConnectionState::Error);
                return Err(e.into());
            }
            Err(_) => {
                self.log(
                    LogLevel::Warn,
                    format!("Connection timeout after {}ms", timeout.as_millis()),
                );
                self.set_state(ConnectionState::Error);
                return Err(Error::timeout(
                    format!("connecting to {address}"),
                    self.config.connect_timeout_ms,
                ));
            }
        };

        // Frames are small and strictly turn-based; Nagle only adds latency.
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {e}");
        }

        *transport = Some(Framed::new(stream, ZvtCodec::new()));
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.set_state(ConnectionState::Connected);
        self.log(LogLevel::Info, format!("Connected to {address}"));
        Ok(())
    }

    /// Close the connection from any state.
    ///
    /// A command in flight is cancelled and fails with
    /// [`Error::Connection`]. Idempotent.
    pub async fn disconnect(&self) {
        self.cancel_token().cancel();
        let mut transport = self.transport.lock().await;
        if let Some(framed) = transport.take() {
            close_transport(framed).await;
            self.log(LogLevel::Info, "Disconnected".to_string());
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Register with the terminal using the configured password.
    ///
    /// # Errors
    ///
    /// A rejected registration returns [`Error::Terminal`] and the state
    /// stays `Connected`. Transport failures move the state to `Error`.
    pub async fn register(&self) -> Result<TransactionResult> {
        let request = EcrRequest::registration(
            self.config.password,
            DEFAULT_REGISTRATION_CONFIG,
            self.config.currency_code,
        )?;
        self.execute(request).await?.into_outcome()
    }

    pub async fn authorize(&self, amount_cents: u64) -> Result<TransactionResult> {
        let request = EcrRequest::authorization(amount_cents, self.config.currency_code)?;
        self.execute(request).await?.into_outcome()
    }

    pub async fn pre_authorization(&self, amount_cents: u64) -> Result<TransactionResult> {
        let request = EcrRequest::pre_authorization(amount_cents, self.config.currency_code)?;
        self.execute(request).await?.into_outcome()
    }

    pub async fn refund(&self, amount_cents: u64) -> Result<TransactionResult> {
        let request =
            EcrRequest::refund(self.config.password, amount_cents, self.config.currency_code)?;
        self.execute(request).await?.into_outcome()
    }

    /// Reverse an earlier payment by trace and/or receipt number. Without
    /// an amount the terminal reverses the full original amount.
    pub async fn reversal(
        &self,
        original_trace: Option<u32>,
        receipt_number: Option<u32>,
        amount_cents: Option<u64>,
    ) -> Result<TransactionResult> {
        let request = EcrRequest::reversal(
            self.config.password,
            original_trace,
            receipt_number,
            amount_cents,
        )?;
        self.execute(request).await?.into_outcome()
    }

    /// Settle the current batch. The result carries the batch totals.
    pub async fn end_of_day(&self) -> Result<TransactionResult> {
        let request = EcrRequest::end_of_day(self.config.password);
        self.execute(request).await?.into_outcome()
    }

    pub async fn diagnosis(&self) -> Result<TransactionResult> {
        self.execute(EcrRequest::new(CommandCode::Diagnosis))
            .await?
            .into_outcome()
    }

    pub async fn status_enquiry(&self) -> Result<TransactionResult> {
        let request = EcrRequest::status_enquiry(self.config.password);
        self.execute(request).await?.into_outcome()
    }

    pub async fn abort(&self) -> Result<TransactionResult> {
        self.execute(EcrRequest::new(CommandCode::Abort))
            .await?
            .into_outcome()
    }

    /// End the registration. The connection stays open.
    pub async fn log_off(&self) -> Result<TransactionResult> {
        self.execute(EcrRequest::new(CommandCode::LogOff))
            .await?
            .into_outcome()
    }

    /// Run one command and return its result without mapping a non-zero
    /// result code to an error.
    ///
    /// Registration is allowed while connected; every other command needs
    /// the `Registered` state.
    ///
    /// # Errors
    ///
    /// [`Error::NotRegistered`], a NACK as [`Error::Terminal`], or any
    /// transport failure.
    pub async fn execute(&self, request: EcrRequest) -> Result<TransactionResult> {
        let kind = request
            .command
            .kind()
            .filter(|_| request.command.is_ecr_command())
            .ok_or_else(|| Error::protocol(format!("{} is not an ECR command", request.command)))?;

        self.check_state(kind)?;
        let cancel = self.cancel_token();
        let mut transport = self.transport.lock().await;
        // The state may have changed while this command was queued.
        self.check_state(kind)?;
        let framed = transport
            .as_mut()
            .ok_or_else(|| Error::connection("not connected"))?;

        if kind == CommandKind::Registration {
            self.set_state(ConnectionState::Registering);
        }
        self.log(LogLevel::Info, format!("Sending {}", request.command));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(Error::connection(format!("{} cancelled by disconnect", request.command)))
            }
            result = self.exchange(framed, &request, kind) => result,
        };

        match &outcome {
            Ok(result) => {
                self.log(
                    if result.success { LogLevel::Info } else { LogLevel::Warn },
                    format!(
                        "{} finished: 0x{:02X} {}",
                        request.command,
                        result.result_code,
                        result_code_text(result.result_code)
                    ),
                );
                match kind {
                    CommandKind::Registration if result.success => {
                        self.set_state(ConnectionState::Registered)
                    }
                    CommandKind::Registration | CommandKind::LogOff => {
                        self.set_state(ConnectionState::Connected)
                    }
                    _ => {}
                }
            }
            Err(e) if e.is_transport_fault() => {
                self.log(LogLevel::Error, format!("{} failed: {e}", request.command));
                if !cancel.is_cancelled() {
                    if let Some(framed) = transport.take() {
                        close_transport(framed).await;
                    }
                    self.set_state(ConnectionState::Error);
                }
            }
            Err(e) => {
                self.log(LogLevel::Warn, format!("{} refused: {e}", request.command));
                if kind == CommandKind::Registration {
                    self.set_state(ConnectionState::Connected);
                }
            }
        }
        outcome
    }

    fn check_state(&self, kind: CommandKind) -> Result<()> {
        let state = self.state();
        match kind {
            CommandKind::Registration if state.is_connected() => Ok(()),
            CommandKind::Registration => Err(Error::connection(format!(
                "cannot register while {state}"
            ))),
            _ if state == ConnectionState::Registered => Ok(()),
            _ => Err(Error::NotRegistered),
        }
    }

    /// Send the command and consume its response group.
    async fn exchange(
        &self,
        framed: &mut Transport,
        request: &EcrRequest,
        kind: CommandKind,
    ) -> Result<TransactionResult> {
        let frame = request.to_frame()?;
        let mut result = TransactionResult::new(kind);
        result.amount_cents = request.amount().unwrap_or(0);
        result.original_trace = request.original_trace();
        let encoded = frame.encode()?;
        self.dump("->", &encoded);
        result.raw.extend_from_slice(&encoded);

        match handshake::send_and_await_ack(framed, frame, self.config.ack_timeout()).await? {
            AckOutcome::Acknowledged => {}
            AckOutcome::Rejected(reason) => {
                return Err(Error::Terminal {
                    result_code: reason,
                    message: format!("terminal rejected {}", request.command),
                    raw: Frame::nack(reason).encode()?.to_vec(),
                });
            }
            AckOutcome::TimedOut => {
                return Err(Error::connection(format!(
                    "no ACK for {} within {}ms",
                    request.command, self.config.ack_timeout_ms
                )));
            }
        }

        loop {
            let frame = handshake::recv_frame(framed, self.config.read_timeout()).await?;
            if frame.is_control() {
                return Err(Error::protocol_with_raw(
                    format!("unexpected {frame} inside a response group"),
                    &frame.encode()?,
                ));
            }
            let encoded = frame.encode()?;
            self.dump("<-", &encoded);
            result.raw.extend_from_slice(&encoded);

            let message = match TerminalMessage::parse(&frame) {
                Ok(message) => message,
                Err(e) => {
                    handshake::reject(framed, NACK_MALFORMED).await?;
                    return Err(e);
                }
            };
            handshake::acknowledge(framed).await?;

            match message {
                TerminalMessage::IntermediateStatus { code } => {
                    let status = IntermediateStatus::new(code);
                    self.log(LogLevel::Debug, format!("Status 0x{code:02X}: {}", status.text));
                    self.statuses.publish(status);
                }
                TerminalMessage::StatusInformation(fields) => {
                    apply_fields(&mut result, &fields)?;
                }
                TerminalMessage::PrintLine { text, .. } => {
                    self.print_lines.publish(text.clone());
                    result.print_lines.push(text);
                }
                TerminalMessage::Completion(fields) => {
                    apply_fields(&mut result, &fields)?;
                    if !fields.contains(tags::RESULT_CODE) {
                        result.result_code = RESULT_SUCCESS;
                    }
                    break;
                }
                TerminalMessage::Abort { result_code } => {
                    result.result_code = result_code;
                    break;
                }
            }
        }

        result.success = result.result_code == RESULT_SUCCESS;
        Ok(result)
    }
}

impl Drop for TerminalClient {
    fn drop(&mut self) {
        self.cancel_token().cancel();
        if self.transport.get_mut().is_some() {
            debug!("TerminalClient dropped while connected - connection will be closed");
        }
    }
}

/// Flush and shut the socket down, bounded so a dead peer cannot hang us.
async fn close_transport(mut framed: Transport) {
    match tokio::time::timeout(CLOSE_TIMEOUT, framed.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error flushing during close: {e}"),
        Err(_) => debug!("Flush timeout during close"),
    }
    let mut stream = framed.into_inner();
    match tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error during shutdown: {e}"),
        Err(_) => debug!("Shutdown timeout during close"),
    }
}

/// Copy the modelled fields of a status information or completion frame
/// into the result.
fn apply_fields(result: &mut TransactionResult, fields: &FieldSet) -> Result<()> {
    if let Some(code) = fields.byte(tags::RESULT_CODE) {
        result.result_code = code;
    }
    if let Some(amount) = fields.number(tags::AMOUNT) {
        result.amount_cents = amount;
    }
    let counter = |tag| fields.number(tag).and_then(|n| u32::try_from(n).ok());
    if let Some(trace) = counter(tags::TRACE_NUMBER) {
        result.trace_number = Some(trace);
    }
    if let Some(receipt) = counter(tags::RECEIPT_NUMBER) {
        result.receipt_number = Some(receipt);
    }
    if let Some(turnover) = counter(tags::TURNOVER_NUMBER) {
        result.turnover_number = Some(turnover);
    }
    if let Some(original) = counter(tags::ORIGINAL_TRACE) {
        result.original_trace = Some(original);
    }
    if let Some(tid) = fields.number(tags::TERMINAL_ID) {
        result.terminal_id = Some(format!("{tid:08}"));
    }
    if let Some(currency) = fields.number(tags::CURRENCY_CODE) {
        result.currency_code = u16::try_from(currency).ok();
    }
    if let Some(totals) = fields.bytes(tags::TOTALS) {
        let totals: BatchTotals = decode_totals(totals)?;
        result.batch_totals = Some(totals);
    }
    if let Some(card) = card_data(fields) {
        result.card = Some(card);
    }
    result
        .unknown_fields
        .extend(fields.unknown().iter().map(|field| field.tag));
    Ok(())
}

/// Card fields, if the terminal reported any.
fn card_data(fields: &FieldSet) -> Option<CardData> {
    let card = CardData {
        masked_pan: fields.text(tags::PAN).unwrap_or_default().to_string(),
        brand: fields.text(tags::CARD_NAME).unwrap_or_default().to_string(),
        expiry: fields
            .number(tags::EXPIRY_DATE)
            .map(|e| format!("{e:04}"))
            .unwrap_or_default(),
        sequence_number: fields
            .number(tags::CARD_SEQUENCE_NUMBER)
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(0),
        aid: fields
            .bytes(tags::AID)
            .map(|aid| aid.iter().map(|b| format!("{b:02X}")).collect())
            .unwrap_or_default(),
    };
    (!card.is_empty()).then_some(card)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zvt_protocol::FieldValue;

    #[test]
    fn test_client_starts_disconnected() {
        let client = TerminalClient::new(ClientConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_commands_require_registration() {
        let client = TerminalClient::new(ClientConfig::default());
        assert!(matches!(client.authorize(100).await, Err(Error::NotRegistered)));
        assert!(matches!(client.diagnosis().await, Err(Error::NotRegistered)));
    }

    #[tokio::test]
    async fn test_register_requires_connection() {
        let client = TerminalClient::new(ClientConfig::default());
        assert!(matches!(client.register().await, Err(Error::Connection { .. })));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_refused_moves_to_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TerminalClient::new(ClientConfig {
            port,
            ..Default::default()
        });
        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::Error);
        assert!(client.logs().history().iter().any(|e| e.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = TerminalClient::new(ClientConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_apply_fields() {
        let fields = FieldSet::new()
            .with(tags::RESULT_CODE, FieldValue::Byte(0))
            .unwrap()
            .with(tags::AMOUNT, FieldValue::Number(1000))
            .unwrap()
            .with(tags::TRACE_NUMBER, FieldValue::Number(7))
            .unwrap()
            .with(tags::TERMINAL_ID, FieldValue::Number(1234))
            .unwrap()
            .with(tags::PAN, FieldValue::Text("6726********1234".to_string()))
            .unwrap()
            .with(tags::EXPIRY_DATE, FieldValue::Number(912))
            .unwrap()
            .with(tags::AID, FieldValue::Bytes(vec![0xA0, 0x00]))
            .unwrap();

        let mut result = TransactionResult::new(CommandKind::Authorization);
        apply_fields(&mut result, &fields).unwrap();

        assert_eq!(result.amount_cents, 1000);
        assert_eq!(result.trace_number, Some(7));
        assert_eq!(result.terminal_id.as_deref(), Some("00001234"));
        let card = result.card.unwrap();
        assert_eq!(card.masked_pan, "6726********1234");
        assert_eq!(card.expiry, "0912");
        assert_eq!(card.aid, "A000");
    }

    #[test]
    fn test_no_card_fields_means_no_card() {
        let fields = FieldSet::new()
            .with(tags::RESULT_CODE, FieldValue::Byte(0))
            .unwrap();
        assert_eq!(card_data(&fields), None);
    }
}
