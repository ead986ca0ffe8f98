//! `tessera run` — Run an application from a disk image.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Args;
use tessera_common::config::EngineConfig;
use tessera_common::constants;
use tessera_common::types::{Application, RunOptions, Volume};
use tessera_runtime::engine::Engine;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Disk image holding the container's root filesystem.
    #[arg(long, env = constants::IMAGE_ENV, default_value = constants::DEFAULT_IMAGE)]
    pub image: PathBuf,

    /// Binary to run inside the container.
    #[arg(long = "bin", env = constants::BINARY_ENV, default_value = constants::DEFAULT_BINARY)]
    pub binary: PathBuf,

    /// Application name used in logs.
    #[arg(long, default_value = "app")]
    pub name: String,

    /// Extra environment entry, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env", value_parser = parse_env_entry)]
    pub env: Vec<(String, String)>,

    /// Share the host's network namespace.
    #[arg(long)]
    pub share_net: bool,

    /// Attach the application to a pseudo-terminal relayed to this terminal.
    #[arg(short, long)]
    pub terminal: bool,

    /// Full argv for the application, `argv[0]` included.
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Parses a `KEY=VALUE` environment entry.
fn parse_env_entry(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            arguments: self.args.clone(),
            environment: self.env.iter().cloned().collect::<BTreeMap<_, _>>(),
            share_host_network: self.share_net,
            terminal: self.terminal,
        }
    }
}

/// Executes the `run` command.
///
/// The container's exit code becomes this process's exit code when the
/// application fails.
///
/// # Errors
///
/// Returns an error if any setup or teardown step fails.
pub fn execute(args: RunArgs, config: EngineConfig) -> anyhow::Result<()> {
    let interrupts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&interrupts);
    ctrlc::set_handler(move || {
        let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(count, "interrupt received, waiting for the container to exit");
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let engine = Engine::new(config);
    let volume = Volume::new(&args.image);
    let application = Application::new(&args.name, &args.binary);

    let result = engine.run_application(&volume, &application, &args.options());
    let ignored = interrupts.load(Ordering::SeqCst);
    if ignored > 0 {
        tracing::info!(ignored, "interrupts were ignored while the container ran");
    }

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_child_failure() => {
            tracing::warn!(error = %e, "application failed");
            std::process::exit(e.exit_code());
        }
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn env_entries_must_have_a_key() {
        assert_eq!(
            parse_env_entry("TERM=linux").unwrap(),
            ("TERM".to_string(), "linux".to_string())
        );
        assert_eq!(
            parse_env_entry("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_entry("=x").is_err());
        assert!(parse_env_entry("novalue").is_err());
    }

    #[test]
    fn trailing_args_become_argv() {
        let args = parse(&[
            "tessera", "run", "--image", "/srv/img", "--bin", "/bin/sh", "-e", "TERM=linux",
            "--share-net", "--", "sh", "-c", "id",
        ]);
        let options = args.options();
        assert_eq!(args.image, PathBuf::from("/srv/img"));
        assert_eq!(options.arguments, vec!["sh", "-c", "id"]);
        assert_eq!(options.environment["TERM"], "linux");
        assert!(options.share_host_network);
        assert!(!options.terminal);
    }
}
