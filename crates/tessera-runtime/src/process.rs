//! Container process description.
//!
//! Turns an application and its run options into the [`ProcessSpec`] the
//! backend launches: argv, merged environment, credentials, namespaces and
//! chroot.

use std::collections::BTreeMap;
use std::path::Path;

use tessera_common::config::EngineConfig;
use tessera_common::types::{Application, RunOptions};
use tessera_core::namespace::NamespaceSet;
use tessera_core::process::{ProcessSpec, StdioMode};

/// Merges the base environment with the caller's entries.
///
/// Every base key survives unless the caller overrides it; caller values
/// win.
#[must_use]
pub fn merge_environment(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Argv for the container process.
///
/// The caller's arguments replace argv entirely, `argv[0]` included. With no
/// arguments, argv is just the application path.
#[must_use]
pub fn build_argv(application: &Application, options: &RunOptions) -> Vec<String> {
    if options.arguments.is_empty() {
        vec![application.path.to_string_lossy().into_owned()]
    } else {
        options.arguments.clone()
    }
}

/// Describes the root-credentialed, chrooted process for `application`.
#[must_use]
pub fn build_spec(
    config: &EngineConfig,
    application: &Application,
    options: &RunOptions,
    root: &Path,
) -> ProcessSpec {
    ProcessSpec {
        program: application.path.clone(),
        args: build_argv(application, options),
        env: merge_environment(&config.base_env, &options.environment),
        workdir: config.workdir.clone(),
        root: root.to_path_buf(),
        uid: 0,
        gid: 0,
        namespaces: NamespaceSet::from_options(options),
        stdio: StdioMode::Inherit,
    }
}
