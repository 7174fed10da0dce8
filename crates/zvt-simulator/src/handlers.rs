//! Command handlers of the simulated terminal.
//!
//! Each handler builds the complete response group for one command. Delays
//! are attached per frame kind from [`DelayConfig`](crate::config::DelayConfig):
//!
//! | Frame                  | Delay before it        |
//! |------------------------|------------------------|
//! | intermediate status    | `intermediate_status`  |
//! | status information     | `processing`           |
//! | print line             | `print_line`           |
//! | completion / abort     | `inter_response`       |
//!
//! Failed payments allocate no numbers and leave the ledger untouched.

use chrono::{Datelike, Local, Timelike};
use tracing::{info, warn};
use uuid::Uuid;
use zvt_core::{
    BatchTotals, CommandKind, Result,
    constants::{
        RESULT_ABORTED, RESULT_CARD_NOT_READABLE, RESULT_FUNCTION_NOT_POSSIBLE, RESULT_SUCCESS,
        RESULT_WRONG_CURRENCY, STATUS_INSERT_CARD, STATUS_PLEASE_WAIT, STATUS_REMOVE_CARD,
    },
};
use zvt_protocol::{
    EcrRequest, FieldSet, FieldValue, ResponseStep, TerminalMessage,
    bmp::{self, tags},
};

use crate::{
    config::SimulatorConfig,
    ledger::StoredTransaction,
    receipt::{Receipt, format_amount},
    state::SimulatorState,
};

/// Build the response group for an already gated request.
pub(crate) fn handle(
    state: &SimulatorState,
    config: &SimulatorConfig,
    request: &EcrRequest,
) -> Result<Vec<ResponseStep>> {
    let ctx = Context { state, config };
    match request.command.kind() {
        Some(CommandKind::Registration) => ctx.registration(request),
        Some(kind @ (CommandKind::Authorization | CommandKind::PreAuthorization)) => {
            ctx.payment(kind, request)
        }
        Some(CommandKind::Refund) => {
            if !ctx.password_ok(request) {
                return ctx.fail(RESULT_FUNCTION_NOT_POSSIBLE);
            }
            ctx.payment(CommandKind::Refund, request)
        }
        Some(CommandKind::Reversal) => ctx.reversal(request),
        Some(CommandKind::EndOfDay) => ctx.end_of_day(request),
        Some(CommandKind::Diagnosis) => ctx.diagnosis(),
        Some(CommandKind::StatusEnquiry) => ctx.status_enquiry(request),
        Some(CommandKind::Abort) => ctx.abort(),
        Some(CommandKind::LogOff) => ctx.log_off(),
        None => ctx.fail(RESULT_FUNCTION_NOT_POSSIBLE),
    }
}

struct Context<'a> {
    state: &'a SimulatorState,
    config: &'a SimulatorConfig,
}

/// Numbers allocated to one successful payment.
struct Allocation {
    trace: u32,
    receipt: u32,
    turnover: u32,
}

impl Context<'_> {
    fn step(&self, message: TerminalMessage) -> Result<ResponseStep> {
        let delays = &self.config.delays;
        let delay = match &message {
            TerminalMessage::IntermediateStatus { .. } => delays.intermediate_status(),
            TerminalMessage::StatusInformation(_) => delays.processing(),
            TerminalMessage::PrintLine { .. } => delays.print_line(),
            TerminalMessage::Completion(_) | TerminalMessage::Abort { .. } => {
                delays.inter_response()
            }
        };
        Ok(ResponseStep::new(message.to_frame()?).with_delay(delay))
    }

    fn password_ok(&self, request: &EcrRequest) -> bool {
        // Password equality is constant-time.
        let ok = request.password == Some(self.config.password);
        if !ok {
            warn!(command = ?request.command, "Wrong password");
        }
        ok
    }

    fn currency_ok(&self, request: &EcrRequest) -> bool {
        request
            .currency()
            .is_none_or(|currency| currency == self.config.currency_code)
    }

    /// Terminal identity fields shared by completions.
    fn identity(&self) -> Result<FieldSet> {
        FieldSet::new()
            .with(tags::RESULT_CODE, FieldValue::Byte(RESULT_SUCCESS))?
            .with(tags::TERMINAL_ID, FieldValue::Number(self.config.terminal_id_number()))?
            .with(tags::CURRENCY_CODE, FieldValue::Number(u64::from(self.config.currency_code)))?
            .with(tags::VU_NUMBER, FieldValue::Text(self.config.vu_number.trim_end().to_string()))
    }

    fn completion(&self, fields: FieldSet) -> Result<ResponseStep> {
        self.step(TerminalMessage::Completion(fields))
    }

    fn success(&self) -> Result<Vec<ResponseStep>> {
        Ok(vec![self.completion(self.identity()?)?])
    }

    /// Single completion carrying a failure code.
    fn fail(&self, code: u8) -> Result<Vec<ResponseStep>> {
        Ok(vec![self.step(TerminalMessage::completion_with_code(code))?])
    }

    fn registration(&self, request: &EcrRequest) -> Result<Vec<ResponseStep>> {
        if !self.password_ok(request) {
            return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
        }
        if !self.currency_ok(request) {
            warn!(currency = ?request.currency(), "Registration with wrong currency");
            return self.fail(RESULT_WRONG_CURRENCY);
        }
        self.state.set_registered(true);
        info!(config_byte = ?request.config_byte, "ECR registered");
        self.success()
    }

    fn payment(&self, kind: CommandKind, request: &EcrRequest) -> Result<Vec<ResponseStep>> {
        let amount = match request.amount() {
            Some(amount) if amount > 0 => amount,
            _ => {
                warn!(%kind, "Payment without amount");
                return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
            }
        };
        if !self.currency_ok(request) {
            return self.fail(RESULT_WRONG_CURRENCY);
        }
        self.process_payment(kind, amount, None)
    }

    fn reversal(&self, request: &EcrRequest) -> Result<Vec<ResponseStep>> {
        if !self.password_ok(request) {
            return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
        }

        let original = request
            .original_trace()
            .and_then(|trace| self.state.find_by_trace(trace))
            .or_else(|| {
                request
                    .receipt_number()
                    .and_then(|receipt| self.state.find_by_receipt(receipt))
            });

        if let Some(original) = &original {
            if original.kind == CommandKind::Reversal || self.state.is_reversed(original.trace_number) {
                warn!(trace = original.trace_number, "Transaction cannot be reversed");
                return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
            }
        }

        let original_trace = original
            .as_ref()
            .map(|t| t.trace_number)
            .or(request.original_trace());
        let amount = request
            .amount()
            .or(original.as_ref().map(|t| t.amount_cents));

        match amount {
            Some(amount) if amount > 0 => {
                self.process_payment(CommandKind::Reversal, amount, original_trace)
            }
            _ => {
                warn!(?original_trace, "Reversal without amount or known original");
                self.fail(RESULT_FUNCTION_NOT_POSSIBLE)
            }
        }
    }

    fn process_payment(
        &self,
        kind: CommandKind,
        amount: u64,
        original_trace: Option<u32>,
    ) -> Result<Vec<ResponseStep>> {
        let mut steps = vec![self.step(TerminalMessage::IntermediateStatus {
            code: STATUS_INSERT_CARD,
        })?];

        if let Some(code) = self.config.error_policy.draw() {
            info!(%kind, amount, result_code = code, "Injected payment failure");
            let mut fields = FieldSet::new().with(tags::RESULT_CODE, FieldValue::Byte(code))?;
            if code != RESULT_CARD_NOT_READABLE {
                self.add_card_fields(&mut fields)?;
            }
            steps.push(self.completion(fields)?);
            return Ok(steps);
        }

        let allocation = Allocation {
            trace: self.state.next_trace(),
            receipt: self.state.next_receipt(),
            turnover: self.state.next_turnover(),
        };

        let mut fields = FieldSet::new()
            .with(tags::RESULT_CODE, FieldValue::Byte(RESULT_SUCCESS))?
            .with(tags::AMOUNT, bmp::amount(amount)?)?
            .with(tags::TRACE_NUMBER, FieldValue::Number(u64::from(allocation.trace)))?
            .with(tags::RECEIPT_NUMBER, FieldValue::Number(u64::from(allocation.receipt)))?
            .with(tags::TURNOVER_NUMBER, FieldValue::Number(u64::from(allocation.turnover)))?;
        if let Some(trace) = original_trace {
            fields.insert(tags::ORIGINAL_TRACE, FieldValue::Number(u64::from(trace)))?;
        }
        let now = Local::now();
        fields.insert(
            tags::TIME,
            FieldValue::Number(u64::from(now.hour() * 10_000 + now.minute() * 100 + now.second())),
        )?;
        fields.insert(
            tags::DATE,
            FieldValue::Number(u64::from(now.month() * 100 + now.day())),
        )?;
        self.add_card_fields(&mut fields)?;
        fields.insert(
            tags::TERMINAL_ID,
            FieldValue::Number(self.config.terminal_id_number()),
        )?;
        fields.insert(
            tags::CURRENCY_CODE,
            FieldValue::Number(u64::from(self.config.currency_code)),
        )?;
        steps.push(self.step(TerminalMessage::StatusInformation(fields))?);

        if self.config.print_receipts {
            for line in self.payment_receipt(kind, amount, &allocation) {
                steps.push(self.step(TerminalMessage::print_line(line))?);
            }
        }

        steps.push(self.step(TerminalMessage::IntermediateStatus {
            code: STATUS_REMOVE_CARD,
        })?);
        steps.push(self.completion(
            FieldSet::new()
                .with(tags::RESULT_CODE, FieldValue::Byte(RESULT_SUCCESS))?
                .with(tags::TERMINAL_ID, FieldValue::Number(self.config.terminal_id_number()))?,
        )?);

        self.state.record(StoredTransaction {
            id: Uuid::new_v4(),
            kind,
            amount_cents: amount,
            trace_number: allocation.trace,
            receipt_number: allocation.receipt,
            turnover_number: allocation.turnover,
            original_trace,
            card: self.config.card.card_data(),
            result_code: RESULT_SUCCESS,
            timestamp: chrono::Utc::now(),
        });
        info!(%kind, amount, trace = allocation.trace, "Payment approved");
        Ok(steps)
    }

    fn add_card_fields(&self, fields: &mut FieldSet) -> Result<()> {
        let card = &self.config.card;
        fields.insert(tags::PAN, FieldValue::Text(card.masked_pan.clone()))?;
        fields.insert(tags::CARD_NAME, FieldValue::Text(card.brand.clone()))?;
        fields.insert(tags::CARD_TYPE, FieldValue::Byte(card.card_type))?;
        fields.insert(
            tags::CARD_SEQUENCE_NUMBER,
            FieldValue::Number(u64::from(card.sequence_number)),
        )?;
        if let Some(expiry) = card.expiry_number() {
            fields.insert(tags::EXPIRY_DATE, FieldValue::Number(expiry))?;
        }
        if let Some(aid) = card.aid_bytes() {
            fields.insert(tags::AID, FieldValue::Bytes(aid))?;
        }
        Ok(())
    }

    fn payment_receipt(&self, kind: CommandKind, amount: u64, allocation: &Allocation) -> Vec<String> {
        let title = match kind {
            CommandKind::Refund => "Gutschrift",
            CommandKind::Reversal => "Storno",
            CommandKind::PreAuthorization => "Reservierung",
            _ => "Kartenzahlung",
        };
        let card = &self.config.card;
        Receipt::default()
            .centered(&self.config.vu_number)
            .centered(title)
            .separator()
            .row("Terminal-ID", &self.config.terminal_id)
            .row("Trace", &format!("{:06}", allocation.trace))
            .row("Beleg", &format!("{:04}", allocation.receipt))
            .row("Karte", &card.brand)
            .row("PAN", &card.masked_pan)
            .separator()
            .row("Betrag", &format_amount(amount, self.config.currency_code))
            .centered("Zahlung erfolgt")
            .into_lines()
    }

    fn end_of_day(&self, request: &EcrRequest) -> Result<Vec<ResponseStep>> {
        if !self.password_ok(request) {
            return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
        }

        let totals = self.state.settle_batch();
        info!(count = totals.count, total = totals.total_cents, "Batch settled");

        let mut fields = FieldSet::new()
            .with(tags::RESULT_CODE, FieldValue::Byte(RESULT_SUCCESS))?
            .with(tags::TOTALS, bmp::encode_totals(&totals))?;
        if let Ok(total) = u64::try_from(totals.total_cents) {
            fields.insert(tags::AMOUNT, bmp::amount(total)?)?;
        }

        let mut steps = vec![
            self.step(TerminalMessage::IntermediateStatus {
                code: STATUS_PLEASE_WAIT,
            })?,
            self.step(TerminalMessage::StatusInformation(fields))?,
        ];
        if self.config.print_receipts {
            for line in self.settlement_receipt(&totals) {
                steps.push(self.step(TerminalMessage::print_line(line))?);
            }
        }
        steps.push(self.completion(self.identity()?)?);
        Ok(steps)
    }

    fn settlement_receipt(&self, totals: &BatchTotals) -> Vec<String> {
        let sign = if totals.total_cents < 0 { "-" } else { "" };
        let total = format_amount(totals.total_cents.unsigned_abs(), self.config.currency_code);
        Receipt::default()
            .centered(&self.config.vu_number)
            .centered("Kassenschnitt")
            .separator()
            .row("Terminal-ID", &self.config.terminal_id)
            .row("Anzahl", &totals.count.to_string())
            .row("Summe", &format!("{sign}{total}"))
            .into_lines()
    }

    fn diagnosis(&self) -> Result<Vec<ResponseStep>> {
        Ok(vec![
            self.step(TerminalMessage::IntermediateStatus {
                code: STATUS_PLEASE_WAIT,
            })?,
            self.completion(self.identity()?)?,
        ])
    }

    fn status_enquiry(&self, request: &EcrRequest) -> Result<Vec<ResponseStep>> {
        if !self.password_ok(request) {
            return self.fail(RESULT_FUNCTION_NOT_POSSIBLE);
        }
        let text = if self.state.is_busy() { "BUSY" } else { "READY" };
        let fields = self
            .identity()?
            .with(tags::ADDITIONAL_TEXT, FieldValue::Text(text.to_string()))?;
        Ok(vec![self.completion(fields)?])
    }

    /// Nothing runs while a command is being handled, so an abort always
    /// closes with a transaction abort frame carrying 0x6C.
    fn abort(&self) -> Result<Vec<ResponseStep>> {
        info!("Abort requested by ECR");
        Ok(vec![self.step(TerminalMessage::Abort {
            result_code: RESULT_ABORTED,
        })?])
    }

    fn log_off(&self) -> Result<Vec<ResponseStep>> {
        self.state.set_registered(false);
        info!("ECR logged off");
        self.fail(RESULT_SUCCESS)
    }
}
