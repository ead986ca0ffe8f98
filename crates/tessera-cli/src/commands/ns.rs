//! `tessera ns` — Show the namespaces of a process.

use clap::Args;
use tessera_core::namespace::{self, NamespaceKind};

/// Arguments for the `ns` command.
#[derive(Args, Debug)]
pub struct NsArgs {
    /// Process to inspect.
    pub pid: u32,

    /// Only show this kind (`net`, `ipc`, `uts`, `mnt`, `pid`, `user`, `cgroup`).
    #[arg(long)]
    pub kind: Option<NamespaceKind>,
}

/// Executes the `ns` command.
///
/// # Errors
///
/// Returns an error if the process does not exist or the requested kind
/// cannot be found.
pub fn execute(args: &NsArgs) -> anyhow::Result<()> {
    let namespaces = match args.kind {
        Some(kind) => vec![namespace::find_by_pid(kind, args.pid).map_err(|e| anyhow::anyhow!("{e}"))?],
        None => tessera_runtime::engine::Engine::default()
            .namespaces(args.pid)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    };

    println!("{:<8} {:<14} {}", "KIND", "ID", "PATH");
    for ns in &namespaces {
        println!("{:<8} {:<14} {}", ns.kind, ns.id, ns.path.display());
    }
    Ok(())
}
