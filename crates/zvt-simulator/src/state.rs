//! Shared state of the simulated terminal.
//!
//! One `SimulatorState` is shared by all sessions behind an `Arc`. Counters
//! and flags are atomics; configuration and ledger sit behind `std::sync`
//! locks that are only held for the duration of a copy or an update, never
//! across an `.await`.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use zvt_core::{
    BatchTotals, ConfigError,
    constants::{MAX_FOUR_DIGIT_COUNTER, MAX_SIX_DIGIT_COUNTER},
};

use crate::{
    config::SimulatorConfig,
    ledger::{Ledger, StoredTransaction},
};

/// Point-in-time view for the management surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulatorSnapshot {
    pub registered: bool,
    pub busy: bool,
    /// Last allocated numbers (0 before the first allocation).
    pub trace_number: u32,
    pub receipt_number: u32,
    pub turnover_number: u32,
    pub batch: BatchTotals,
    pub last_transaction: Option<StoredTransaction>,
    pub started_at: DateTime<Utc>,
    pub config: SimulatorConfig,
}

#[derive(Debug)]
pub struct SimulatorState {
    trace: AtomicU32,
    receipt: AtomicU32,
    turnover: AtomicU32,
    registered: AtomicBool,
    busy: AtomicBool,
    config: RwLock<SimulatorConfig>,
    ledger: Mutex<Ledger>,
    started_at: DateTime<Utc>,
}

/// Marks the terminal busy until dropped.
///
/// Obtained from [`SimulatorState::try_begin`]. Dropping it on any path,
/// including errors and cancelled sessions, clears the flag.
#[derive(Debug)]
pub struct BusyGuard {
    state: Arc<SimulatorState>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::SeqCst);
    }
}

/// Increment a counter, wrapping from `max` back to 1. Returns the new value.
fn next_counter(counter: &AtomicU32, max: u32) -> u32 {
    let step = |v: u32| if v >= max { 1 } else { v + 1 };
    let previous = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(step(v)))
        .unwrap_or_else(|v| v);
    step(previous)
}

impl SimulatorState {
    pub fn new(config: SimulatorConfig) -> Arc<Self> {
        Arc::new(SimulatorState {
            trace: AtomicU32::new(0),
            receipt: AtomicU32::new(0),
            turnover: AtomicU32::new(0),
            registered: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            config: RwLock::new(config),
            ledger: Mutex::new(Ledger::new()),
            started_at: Utc::now(),
        })
    }

    /// Copy of the active configuration.
    pub fn config(&self) -> SimulatorConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and swap the configuration. Takes effect for the next command.
    pub fn update_config(&self, config: SimulatorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        info!("Simulator configuration updated");
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claim the terminal for one command; `None` if another is running.
    pub fn try_begin(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard {
                state: Arc::clone(self),
            })
    }

    pub fn next_trace(&self) -> u32 {
        next_counter(&self.trace, MAX_SIX_DIGIT_COUNTER)
    }

    pub fn next_receipt(&self) -> u32 {
        next_counter(&self.receipt, MAX_FOUR_DIGIT_COUNTER)
    }

    pub fn next_turnover(&self) -> u32 {
        next_counter(&self.turnover, MAX_SIX_DIGIT_COUNTER)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, transaction: StoredTransaction) {
        debug!(
            trace = transaction.trace_number,
            kind = %transaction.kind,
            amount = transaction.amount_cents,
            "Transaction recorded"
        );
        self.ledger().record(transaction);
    }

    /// Transactions of the current batch.
    pub fn all_transactions(&self) -> Vec<StoredTransaction> {
        self.ledger().transactions().to_vec()
    }

    pub fn last_transaction(&self) -> Option<StoredTransaction> {
        self.ledger().last_transaction().cloned()
    }

    pub fn find_by_trace(&self, trace: u32) -> Option<StoredTransaction> {
        self.ledger().find_by_trace(trace).cloned()
    }

    pub fn find_by_receipt(&self, receipt: u32) -> Option<StoredTransaction> {
        self.ledger().find_by_receipt(receipt).cloned()
    }

    pub fn is_reversed(&self, trace: u32) -> bool {
        self.ledger().is_reversed(trace)
    }

    pub fn batch_summary(&self) -> BatchTotals {
        self.ledger().batch_summary()
    }

    /// Close the batch and return its totals in one step.
    pub fn settle_batch(&self) -> BatchTotals {
        let mut ledger = self.ledger();
        let totals = ledger.batch_summary();
        ledger.clear_batch();
        totals
    }

    pub fn clear_batch(&self) {
        self.ledger().clear_batch();
    }

    pub fn clear_all(&self) {
        self.ledger().clear_all();
    }

    pub fn current_state(&self) -> SimulatorSnapshot {
        let (batch, last_transaction) = {
            let ledger = self.ledger();
            (ledger.batch_summary(), ledger.last_transaction().cloned())
        };
        SimulatorSnapshot {
            registered: self.is_registered(),
            busy: self.is_busy(),
            trace_number: self.trace.load(Ordering::SeqCst),
            receipt_number: self.receipt.load(Ordering::SeqCst),
            turnover_number: self.turnover.load(Ordering::SeqCst),
            batch,
            last_transaction,
            started_at: self.started_at,
            config: self.config(),
        }
    }

    /// Forget registration, counters and every transaction.
    pub fn reset(&self) {
        self.trace.store(0, Ordering::SeqCst);
        self.receipt.store(0, Ordering::SeqCst);
        self.turnover.store(0, Ordering::SeqCst);
        self.set_registered(false);
        self.clear_all();
        info!("Simulator state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use zvt_core::{CardData, CommandKind};

    fn stored(trace: u32, amount_cents: u64) -> StoredTransaction {
        StoredTransaction {
            id: Uuid::new_v4(),
            kind: CommandKind::Authorization,
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
    fn test_counters_start_at_one_and_increase() {
        let state = SimulatorState::new(SimulatorConfig::default());
        assert_eq!(state.next_trace(), 1);
        assert_eq!(state.next_trace(), 2);
        assert_eq!(state.next_receipt(), 1);
        assert_eq!(state.next_turnover(), 1);
        assert_eq!(state.current_state().trace_number, 2);
    }

    #[test]
    fn test_receipt_counter_wraps_after_four_digits() {
        let state = SimulatorState::new(SimulatorConfig::default());
        state.receipt.store(MAX_FOUR_DIGIT_COUNTER, Ordering::SeqCst);
        assert_eq!(state.next_receipt(), 1);
    }

    #[test]
    fn test_counters_unique_across_threads() {
        let state = SimulatorState::new(SimulatorConfig::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || (0..100).map(|_| state.next_trace()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
        assert_eq!(*all.last().unwrap(), 800);
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let state = SimulatorState::new(SimulatorConfig::default());
        let guard = state.try_begin().unwrap();
        assert!(state.is_busy());
        assert!(state.try_begin().is_none());
        drop(guard);
        assert!(!state.is_busy());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_update_config_validates() {
        let state = SimulatorState::new(SimulatorConfig::default());
        let mut config = state.config();
        config.terminal_id = "bad".to_string();
        assert!(state.update_config(config).is_err());

        let mut config = state.config();
        config.print_receipts = false;
        state.update_config(config).unwrap();
        assert!(!state.config().print_receipts);
    }

    #[test]
    fn test_settle_batch() {
        let state = SimulatorState::new(SimulatorConfig::default());
        state.record(stored(1, 1000));
        state.record(stored(2, 250));

        let totals = state.settle_batch();
        assert_eq!(totals, BatchTotals { count: 2, total_cents: 1250 });
        assert!(state.all_transactions().is_empty());
        assert_eq!(state.last_transaction().unwrap().trace_number, 2);
    }

    #[test]
    fn test_reset() {
        let state = SimulatorState::new(SimulatorConfig::default());
        state.set_registered(true);
        state.next_trace();
        state.record(stored(1, 1000));

        state.reset();
        let snapshot = state.current_state();
        assert!(!snapshot.registered);
        assert_eq!(snapshot.trace_number, 0);
        assert!(snapshot.last_transaction.is_none());
        assert_eq!(state.next_trace(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let state = SimulatorState::new(SimulatorConfig::default());
        let json = serde_json::to_value(state.current_state()).unwrap();
        assert_eq!(json["registered"], false);
        assert_eq!(json["config"]["tcp_port"], 20007);
    }
}
