//! mcmgr - multicast state inspection tool
//!
//! Restores a state document written by `log_state` into a shadow engine and
//! answers replication queries against it.
//!
//! ```bash
//! mcmgr show state.yaml
//! mcmgr select-lag state.yaml --lag 3 --hash 7 --yid 2
//! mcmgr --json-logs --log-level debug replay state.json
//! ```

mod commands;

use anyhow::Result;
use bf_mc::PacketTags;
use clap::{Args, Parser, Subcommand};
use commands::Shadow;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "mcmgr", version)]
#[command(about = "Inspect logged multicast replication state", long_about = None)]
struct Cli {
    /// Manager configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Tags {
    /// Packet L1 exclusion id
    #[arg(long, default_value_t = 0)]
    xid: u16,

    /// Packet L2 exclusion id
    #[arg(long, default_value_t = 0)]
    yid: u16,

    /// Packet ingress RID
    #[arg(long, default_value_t = 0)]
    rid: u16,
}

impl From<&Tags> for PacketTags {
    fn from(tags: &Tags) -> Self {
        PacketTags {
            xid: tags.xid,
            yid: tags.yid,
            rid: tags.rid,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of the state
    Show { state: PathBuf },

    /// Pipes a group replicates to
    PipeVector {
        state: PathBuf,
        #[arg(long)]
        group: u16,
    },

    /// ECMP member chosen for a first-level hash
    SelectEcmp {
        state: PathBuf,
        #[arg(long)]
        group: u16,
        /// ECMP handle, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_ecmp_arg)]
        ecmp: bf_mc::EcmpHdl,
        #[arg(long)]
        hash: u16,
        /// Packet L1 exclusion id
        #[arg(long, default_value_t = 0)]
        xid: u16,
    },

    /// LAG member chosen for a second-level hash
    SelectLag {
        state: PathBuf,
        #[arg(long)]
        lag: u8,
        #[arg(long)]
        hash: u16,
        #[command(flatten)]
        tags: Tags,
    },

    /// Every copy a group's tree emits for a packet
    Replicate {
        state: PathBuf,
        #[arg(long)]
        group: u16,
        #[arg(long)]
        hash1: u16,
        #[arg(long)]
        hash2: u16,
        #[command(flatten)]
        tags: Tags,
    },

    /// Replay the state and count the hardware writes
    Replay { state: PathBuf },
}

fn parse_ecmp_arg(s: &str) -> Result<bf_mc::EcmpHdl, String> {
    commands::parse_ecmp(s).map_err(|e| e.to_string())
}

fn run(cli: &Cli) -> Result<serde_json::Value> {
    let config = commands::load_config(cli.config.as_deref())?;
    match &cli.command {
        Command::Show { state } => commands::show(&Shadow::open(config, state)?),
        Command::PipeVector { state, group } => {
            commands::pipe_vector(&Shadow::open(config, state)?, *group)
        }
        Command::SelectEcmp {
            state,
            group,
            ecmp,
            hash,
            xid,
        } => commands::select_ecmp(&Shadow::open(config, state)?, *group, *ecmp, *hash, *xid),
        Command::SelectLag {
            state,
            lag,
            hash,
            tags,
        } => commands::select_lag(&Shadow::open(config, state)?, *lag, *hash, tags.into()),
        Command::Replicate {
            state,
            group,
            hash1,
            hash2,
            tags,
        } => commands::replicate(
            &Shadow::open(config, state)?,
            *group,
            *hash1,
            *hash2,
            tags.into(),
        ),
        Command::Replay { state } => commands::replay(&mut Shadow::open(config, state)?),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        bf_mc::audit::init_logging(&cli.log_level);
    } else {
        bf_mc::audit::init_logging_pretty(&cli.log_level);
    }

    match run(&cli) {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "mcmgr: command failed");
            Err(e)
        }
    }
}
