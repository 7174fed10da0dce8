//! In-memory journal of completed transactions.
//!
//! The ledger holds the current settlement batch. End-of-day clears the
//! batch but remembers the last transaction, so "reverse the last payment"
//! keeps working across a settlement. Only a full reset forgets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zvt_core::{BatchTotals, CardData, CommandKind};

/// One successful payment command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: Uuid,
    pub kind: CommandKind,
    pub amount_cents: u64,
    pub trace_number: u32,
    pub receipt_number: u32,
    pub turnover_number: u32,
    /// Trace of the reversed transaction, for reversals.
    pub original_trace: Option<u32>,
    pub card: CardData,
    pub result_code: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    batch: Vec<StoredTransaction>,
    last: Option<StoredTransaction>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, transaction: StoredTransaction) {
        self.last = Some(transaction.clone());
        self.batch.push(transaction);
    }

    /// Transactions of the current batch, oldest first.
    pub fn transactions(&self) -> &[StoredTransaction] {
        &self.batch
    }

    pub fn last_transaction(&self) -> Option<&StoredTransaction> {
        self.last.as_ref()
    }

    /// Find a transaction by trace number, in the batch or as the last one.
    pub fn find_by_trace(&self, trace: u32) -> Option<&StoredTransaction> {
        self.batch
            .iter()
            .rev()
            .find(|t| t.trace_number == trace)
            .or_else(|| self.last.as_ref().filter(|t| t.trace_number == trace))
    }

    /// Find a transaction by receipt number.
    pub fn find_by_receipt(&self, receipt: u32) -> Option<&StoredTransaction> {
        self.batch
            .iter()
            .rev()
            .find(|t| t.receipt_number == receipt)
            .or_else(|| self.last.as_ref().filter(|t| t.receipt_number == receipt))
    }

    /// Whether a reversal already references `trace`.
    pub fn is_reversed(&self, trace: u32) -> bool {
        self.batch
            .iter()
            .any(|t| t.kind == CommandKind::Reversal && t.original_trace == Some(trace))
    }

    /// Count and signed net total of the current batch.
    pub fn batch_summary(&self) -> BatchTotals {
        self.batch.iter().fold(BatchTotals::default(), |mut acc, t| {
            acc.count += 1;
            acc.total_cents += t.kind.batch_sign() * t.amount_cents as i64;
            acc
        })
    }

    /// Settle the batch. The last-transaction pointer survives.
    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    pub fn clear_all(&mut self) {
        self.batch.clear();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(kind: CommandKind, trace: u32, amount_cents: u64) -> StoredTransaction {
        StoredTransaction {
            id: Uuid::new_v4(),
            kind,
            amount_cents,
            trace_number: trace,
            receipt_number: trace,
            turnover_number: trace,
            original_trace: None,
            card: CardData::default(),
            result_code: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_summary() {
        let mut ledger = Ledger::new();
        ledger.record(transaction(CommandKind::Authorization, 1, 1000));
        ledger.record(transaction(CommandKind::Authorization, 2, 500));
        ledger.record(transaction(CommandKind::Refund, 3, 200));

        let summary = ledger.batch_summary();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.total_cents, 1300);
        assert_eq!(ledger.last_transaction().unwrap().trace_number, 3);
    }

    #[test]
    fn test_clear_batch_keeps_last() {
        let mut ledger = Ledger::new();
        ledger.record(transaction(CommandKind::Authorization, 1, 1000));
        ledger.clear_batch();

        assert!(ledger.transactions().is_empty());
        assert_eq!(ledger.batch_summary(), BatchTotals::default());
        assert_eq!(ledger.last_transaction().unwrap().trace_number, 1);
        assert!(ledger.find_by_trace(1).is_some());
    }

    #[test]
    fn test_clear_all_forgets_last() {
        let mut ledger = Ledger::new();
        ledger.record(transaction(CommandKind::Authorization, 1, 1000));
        ledger.clear_all();

        assert!(ledger.transactions().is_empty());
        assert!(ledger.last_transaction().is_none());
        assert!(ledger.find_by_trace(1).is_none());
    }

    #[test]
    fn test_reversal_tracking() {
        let mut ledger = Ledger::new();
        ledger.record(transaction(CommandKind::Authorization, 1, 1000));
        assert!(!ledger.is_reversed(1));

        let mut reversal = transaction(CommandKind::Reversal, 2, 1000);
        reversal.original_trace = Some(1);
        ledger.record(reversal);

        assert!(ledger.is_reversed(1));
        assert_eq!(ledger.batch_summary().total_cents, 0);
        assert_eq!(ledger.find_by_receipt(2).unwrap().kind, CommandKind::Reversal);
    }
}
