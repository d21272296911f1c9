use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use shardline::{OrchestratorConfig, TreasuryKind};
use std::net::SocketAddr;

/// Treasury implementation selectable from the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreasuryArg {
    /// Lock-free compare-and-swap.
    Atomic,
    /// Mutex-guarded timestamp.
    Lock,
}

impl From<TreasuryArg> for TreasuryKind {
    fn from(arg: TreasuryArg) -> Self {
        match arg {
            TreasuryArg::Atomic => Self::Atomic,
            TreasuryArg::Lock => Self::Lock,
        }
    }
}

/// Runtime configuration for the `shardline-server` binary.
///
/// Every flag can also be set through the environment variable named next to
/// it, or through a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shardline-server",
    version,
    about = "Allocates chunks, rate-limits logins and reaps silent workers"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Minimum spacing between two coin grants, in milliseconds.
    ///
    /// This should match the rate limit the upstream applies to logins.
    ///
    /// Environment variable: `MIN_COIN_INTERVAL_MS`
    #[arg(long, env = "MIN_COIN_INTERVAL_MS", default_value_t = 5_500)]
    pub min_coin_interval_ms: u64,

    /// Time without a heartbeat after which a worker's allocation is evicted
    /// and its chunk freed, in milliseconds.
    ///
    /// Environment variable: `LIVENESS_TIMEOUT_MS`
    #[arg(long, env = "LIVENESS_TIMEOUT_MS", default_value_t = 60_000)]
    pub liveness_timeout_ms: u64,

    /// Spacing between start times of workers allocated in the same burst, in
    /// milliseconds.
    ///
    /// Environment variable: `STAGGER_STRIDE_MS`
    #[arg(long, env = "STAGGER_STRIDE_MS", default_value_t = 5_500)]
    pub stagger_stride_ms: u64,

    /// How often the reaper sweeps for expired allocations, in milliseconds.
    ///
    /// Environment variable: `REAP_INTERVAL_MS`
    #[arg(long, env = "REAP_INTERVAL_MS", default_value_t = 5_000)]
    pub reap_interval_ms: u64,

    /// Whether a stats report also counts as a heartbeat.
    ///
    /// Environment variable: `REPORT_COUNTS_AS_HEARTBEAT`
    #[arg(
        long,
        env = "REPORT_COUNTS_AS_HEARTBEAT",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub report_counts_as_heartbeat: bool,

    /// Treasury implementation.
    ///
    /// Environment variable: `TREASURY`
    #[arg(long, env = "TREASURY", value_enum, default_value_t = TreasuryArg::Atomic)]
    pub treasury: TreasuryArg,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub orchestrator: OrchestratorConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR `{}` is not a socket address", args.server_addr))?;

        if args.reap_interval_ms > args.liveness_timeout_ms {
            bail!(
                "REAP_INTERVAL_MS ({}) must not exceed LIVENESS_TIMEOUT_MS ({})",
                args.reap_interval_ms,
                args.liveness_timeout_ms
            );
        }

        let orchestrator = OrchestratorConfig {
            min_coin_interval: Duration::from_millis(args.min_coin_interval_ms),
            liveness_timeout: Duration::from_millis(args.liveness_timeout_ms),
            stagger_stride: Duration::from_millis(args.stagger_stride_ms),
            reap_interval: Duration::from_millis(args.reap_interval_ms),
            report_counts_as_heartbeat: args.report_counts_as_heartbeat,
            treasury: args.treasury.into(),
        };
        orchestrator.validate()?;

        Ok(Self {
            server_addr,
            orchestrator,
        })
    }
}
