//! System-wide constants and default paths.

/// Directory under which container roots are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/opt/tessera/mount";

/// Filesystem type of container disk images.
pub const IMAGE_FS_TYPE: &str = "ext4";

/// Length of the randomly generated mount directory name.
pub const MOUNT_NAME_LENGTH: usize = 6;

/// Working directory of the container process, inside the container root.
pub const CONTAINER_WORKDIR: &str = "/root";

/// Hostname set by the in-container init sequence.
pub const CONTAINER_HOSTNAME: &str = "tessera-pod";

/// Directory inside the new root that receives the old root during `pivot_root`.
pub const PIVOT_STAGING_DIR: &str = ".oldroot";

/// Prompt exported to interactive shells.
pub const DEFAULT_PS1: &str = "[tessera] # ";

/// Terminal type exported to the container.
pub const DEFAULT_TERM: &str = "xterm";

/// Home directory exported to the container.
pub const DEFAULT_HOME: &str = "/root";

/// Loop control device used to find free loop slots.
pub const LOOP_CONTROL_PATH: &str = "/dev/loop-control";

/// Prefix of loop device nodes.
pub const LOOP_DEVICE_PREFIX: &str = "/dev/loop";

/// Pseudo-terminal multiplexer.
pub const PTMX_PATH: &str = "/dev/ptmx";

/// Directory holding pseudo-terminal slaves.
pub const PTS_DIR: &str = "/dev/pts";

/// Environment variable overriding the image path.
pub const IMAGE_ENV: &str = "TESSERA_IMAGE";

/// Environment variable overriding the binary to launch.
pub const BINARY_ENV: &str = "TESSERA_BIN";

/// Image path used when none is given.
pub const DEFAULT_IMAGE: &str = "./img";

/// Binary launched when none is given.
pub const DEFAULT_BINARY: &str = "/usr/bin/bash";

/// Application name used in CLI output.
pub const APP_NAME: &str = "tessera";
