//! CLI command definitions and dispatch.

pub mod exec;
pub mod ns;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tessera_common::config::EngineConfig;

/// Tessera — minimal Linux container execution engine.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON engine configuration file.
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory under which container roots are mounted.
    #[arg(long, global = true)]
    pub mount_root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an application from a disk image.
    Run(run::RunArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Show the namespaces of a process.
    Ns(ns::NsArgs),
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path).map_err(|e| anyhow::anyhow!("{e}"))?,
            None => EngineConfig::default(),
        };
        if let Some(mount_root) = &self.mount_root {
            config.mount_root.clone_from(mount_root);
        }
        config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(config)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.engine_config()?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Exec(args) => exec::execute(args, config),
        Command::Ns(args) => ns::execute(&args),
    }
}
