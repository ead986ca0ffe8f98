//! # tessera-init
//!
//! First process inside a container: prepares `/dev`, `/proc` and `/sys`,
//! sets the hostname, then runs the target binary on a fresh
//! pseudo-terminal and exits with its status.
//!
//! Usage: `tessera-init <binary> [new_root] [-- args...]`

mod logging;

use std::path::PathBuf;

use clap::Parser;
use tessera_common::config::EngineConfig;
use tessera_runtime::init::{self, InitPlan};

/// In-container init for Tessera.
#[derive(Parser, Debug)]
#[command(name = "tessera-init", version, about, long_about = None)]
struct InitArgs {
    /// Binary to run once the container is ready.
    binary: PathBuf,

    /// Directory to pivot into before setup.
    new_root: Option<PathBuf>,

    /// Hostname inside the container.
    #[arg(long, env = "TESSERA_HOSTNAME")]
    hostname: Option<String>,

    /// Arguments passed to the binary.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = InitArgs::parse();
    logging::init(false);

    let mut config = EngineConfig::default();
    if let Some(hostname) = args.hostname {
        config.hostname = hostname;
    }
    let plan = InitPlan {
        target: args.binary,
        args: args.args,
        new_root: args.new_root,
    };

    let status = init::run(&config, &plan).map_err(|e| anyhow::anyhow!("{e}"))?;
    std::process::exit(status.code());
}
