//! Network layer for the ZVT ECR interface.
//!
//! Both ends of the protocol over TCP:
//!
//! - [`TerminalClient`]: the ECR side, a connection state machine that runs
//!   one command at a time and publishes state, log, status and print-line
//!   events to observers
//! - [`SessionManager`]: the terminal side, accepting connections and
//!   running one [`TerminalSession`] per connection against the simulator
//!
//! # Example
//!
//! ```no_run
//! use zvt_network::{ClientConfig, ServerConfig, SessionManager, TerminalClient};
//! use zvt_simulator::{SimulatorConfig, SimulatorState};
//!
//! # async fn example() -> zvt_core::Result<()> {
//! let state = SimulatorState::new(SimulatorConfig::default());
//! let server = SessionManager::bind(ServerConfig::on_port(0), state).await?.start();
//!
//! let client = TerminalClient::new(ClientConfig {
//!     port: server.local_addr().port(),
//!     ..Default::default()
//! });
//! client.connect().await?;
//! client.register().await?;
//! client.authorize(1000).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod events;
mod server;
mod session;

pub use client::TerminalClient;
pub use config::ClientConfig;
pub use events::{DEFAULT_REPLAY, EventStream};
pub use server::{ServerConfig, ServerHandle, SessionInfo, SessionManager};
pub use session::{SessionEnd, TerminalSession};
