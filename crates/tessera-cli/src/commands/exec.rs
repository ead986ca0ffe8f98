//! `tessera exec` — Execute a command inside a running container.

use clap::Args;
use tessera_common::config::EngineConfig;
use tessera_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Host PID of the container's first process.
    pub pid: u32,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Joins the target's IPC, UTS, network, PID and mount namespaces and its
/// root, runs the command with inherited stdio, and exits with its code.
///
/// # Errors
///
/// Returns an error if the namespaces cannot be joined or the command
/// cannot be started.
pub fn execute(args: ExecArgs, config: EngineConfig) -> anyhow::Result<()> {
    let engine = Engine::new(config);
    let status = engine
        .exec(args.pid, &args.command)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    std::process::exit(status.code());
}
