//! `zvt` command line tool.
//!
//! # Usage
//!
//! ```bash
//! # Run the terminal simulator
//! zvt simulate --config simulator.json
//!
//! # Pay 10.00 EUR against a terminal on localhost
//! zvt pay --amount 1000 --password 000000
//!
//! # Reverse by trace number, then settle
//! zvt reverse --trace 1
//! zvt end-of-day
//! ```
//!
//! `RUST_LOG` overrides the log filter; `--debug` raises the default to debug.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use zvt_core::{Password, TransactionResult};
use zvt_network::{ClientConfig, ServerConfig, SessionManager, TerminalClient};
use zvt_simulator::{SimulatorConfig, SimulatorState};

/// ZVT payment terminal tools
#[derive(Parser, Debug)]
#[command(name = "zvt")]
#[command(about = "Drive a ZVT payment terminal or run a simulated one")]
#[command(version)]
struct Cli {
    /// Enable debug logging (frame dumps)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the terminal simulator until Ctrl-C
    Simulate {
        /// Simulator configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the TCP port from the configuration
        #[arg(short, long)]
        port: Option<u16>,

        /// Maximum concurrent ECR sessions
        #[arg(long, default_value = "16")]
        max_sessions: usize,
    },
    /// Authorize a payment
    Pay {
        /// Amount in cents
        #[arg(short, long)]
        amount: u64,

        #[command(flatten)]
        terminal: TerminalArgs,
    },
    /// Refund an amount
    Refund {
        /// Amount in cents
        #[arg(short, long)]
        amount: u64,

        #[command(flatten)]
        terminal: TerminalArgs,
    },
    /// Reverse an earlier transaction by trace or receipt number
    Reverse {
        #[arg(long)]
        trace: Option<u32>,

        #[arg(long)]
        receipt: Option<u32>,

        /// Amount in cents, defaults to the original amount
        #[arg(short, long)]
        amount: Option<u64>,

        #[command(flatten)]
        terminal: TerminalArgs,
    },
    /// Close the batch and print the totals
    EndOfDay {
        #[command(flatten)]
        terminal: TerminalArgs,
    },
    /// Run a terminal diagnosis
    Diagnosis {
        #[command(flatten)]
        terminal: TerminalArgs,
    },
    /// Query the terminal status
    Status {
        #[command(flatten)]
        terminal: TerminalArgs,
    },
}

/// Connection settings shared by the client subcommands.
#[derive(Args, Debug)]
struct TerminalArgs {
    /// Client configuration (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Six-digit terminal password
    #[arg(long)]
    password: Option<u32>,
}

impl TerminalArgs {
    fn client_config(&self, debug: bool) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading client config {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(password) = self.password {
            config.password = Password::new(password)?;
        }
        config.debug |= debug;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match cli.command {
        Command::Simulate {
            config,
            port,
            max_sessions,
        } => simulate(config, port, max_sessions).await,
        Command::Pay { amount, terminal } => {
            run_client(&terminal, cli.debug, |client| async move {
                client.authorize(amount).await
            })
            .await
        }
        Command::Refund { amount, terminal } => {
            run_client(&terminal, cli.debug, |client| async move {
                client.refund(amount).await
            })
            .await
        }
        Command::Reverse {
            trace,
            receipt,
            amount,
            terminal,
        } => {
            if trace.is_none() && receipt.is_none() {
                anyhow::bail!("reverse needs --trace or --receipt");
            }
            run_client(&terminal, cli.debug, |client| async move {
                client.reversal(trace, receipt, amount).await
            })
            .await
        }
        Command::EndOfDay { terminal } => {
            run_client(&terminal, cli.debug, |client| async move {
                client.end_of_day().await
            })
            .await
        }
        Command::Diagnosis { terminal } => {
            run_client(&terminal, cli.debug, |client| async move {
                client.diagnosis().await
            })
            .await
        }
        Command::Status { terminal } => {
            run_client(&terminal, cli.debug, |client| async move {
                client.status_enquiry().await
            })
            .await
        }
    }
}

async fn simulate(path: Option<PathBuf>, port: Option<u16>, max_sessions: usize) -> Result<()> {
    let mut config = match &path {
        Some(path) => SimulatorConfig::load(path)
            .with_context(|| format!("loading simulator config {}", path.display()))?,
        None => SimulatorConfig::default(),
    };
    if let Some(port) = port {
        config.tcp_port = port;
    }
    config.validate()?;

    let server_config = ServerConfig {
        max_sessions,
        ..ServerConfig::on_port(config.tcp_port)
    };
    info!(
        terminal_id = %config.terminal_id,
        currency = config.currency_code,
        "Starting terminal simulator"
    );
    let state = SimulatorState::new(config);
    let handle = SessionManager::bind(server_config, state).await?.start();
    info!("Listening on {} (Ctrl-C to stop)", handle.local_addr());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!(sessions = handle.session_count(), "Shutdown requested");
    handle.shutdown().await;
    Ok(())
}

/// Connect, register, run one command and print its result as JSON.
async fn run_client<F, Fut>(args: &TerminalArgs, debug: bool, command: F) -> Result<()>
where
    F: FnOnce(Arc<TerminalClient>) -> Fut,
    Fut: Future<Output = zvt_core::Result<TransactionResult>>,
{
    let config = args.client_config(debug)?;
    let client = Arc::new(TerminalClient::new(config));

    let (_, mut statuses) = client.statuses().subscribe();
    let status_printer = tokio::spawn(async move {
        while let Ok(status) = statuses.recv().await {
            info!("Terminal: {}", status.text);
        }
    });

    client.connect().await?;
    client.register().await.context("registration failed")?;
    let outcome = command(Arc::clone(&client)).await;
    client.disconnect().await;
    status_printer.abort();

    let result = outcome?;
    if !result.print_lines.is_empty() {
        println!("{}", result.receipt());
    }
    if !result.unknown_fields.is_empty() {
        warn!("Skipped unknown fields: {:02X?}", result.unknown_fields);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
