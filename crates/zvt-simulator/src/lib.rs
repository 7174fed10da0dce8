//! Simulated ZVT payment terminal.
//!
//! The simulator answers ECR commands with the same frame sequences a real
//! terminal produces. It has no I/O of its own: the session layer in
//! `zvt-network` feeds received frames to a [`CommandRouter`] and sends the
//! returned response group.
//!
//! ```text
//! Frame -> CommandRouter -> gating -> handler -> Vec<ResponseStep>
//!                 |                      |
//!                 +---- SimulatorState --+  (counters, flags, ledger, config)
//! ```

pub mod config;
mod handlers;
pub mod ledger;
pub mod policy;
pub mod receipt;
pub mod router;
pub mod state;

pub use config::{DelayConfig, SimulatedCard, SimulatorConfig};
pub use ledger::{Ledger, StoredTransaction};
pub use policy::ErrorPolicy;
pub use receipt::{Alignment, Receipt, align_text, format_amount, truncate_text};
pub use router::{CommandRouter, Dispatch};
pub use state::{BusyGuard, SimulatorSnapshot, SimulatorState};
