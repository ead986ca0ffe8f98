//! # tessera
//!
//! Runs an application from an ext4 disk image inside fresh Linux
//! namespaces, and inspects or enters running containers.

mod commands;
mod logging;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);
    commands::execute(cli)
}
