//! Pseudo-terminal allocation and terminal ioctls.
//!
//! Everything here talks to the kernel's tty layer directly through
//! `TCGETS`/`TCSETS`, `TIOCGWINSZ`/`TIOCSWINSZ`, `TIOCGPTN` and `TIOCSPTLCK`.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tessera_common::constants::{PTMX_PATH, PTS_DIR};
use tessera_common::error::{EngineError, Result};

mod ioctl {
    nix::ioctl_read_bad!(tcgets, libc::TCGETS, libc::termios);
    nix::ioctl_write_ptr_bad!(tcsets, libc::TCSETS, libc::termios);
    nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
    nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);
    nix::ioctl_read_bad!(tiocgptn, libc::TIOCGPTN, libc::c_uint);
    nix::ioctl_write_ptr_bad!(tiocsptlck, libc::TIOCSPTLCK, libc::c_int);
    nix::ioctl_write_int_bad!(tiocsctty, libc::TIOCSCTTY);
}

fn terminal_error(operation: &'static str, source: impl Into<std::io::Error>) -> EngineError {
    EngineError::TerminalError {
        operation,
        source: source.into(),
    }
}

/// Terminal attributes as read by `TCGETS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalAttributes {
    /// Input modes (`c_iflag`).
    pub input: libc::tcflag_t,
    /// Output modes (`c_oflag`).
    pub output: libc::tcflag_t,
    /// Control modes (`c_cflag`).
    pub control: libc::tcflag_t,
    /// Local modes (`c_lflag`).
    pub local: libc::tcflag_t,
    /// Line discipline.
    pub line: libc::cc_t,
    /// Control characters.
    pub control_chars: [libc::cc_t; libc::NCCS],
}

impl TerminalAttributes {
    /// Switches to raw mode: no line editing, echo, signal characters or
    /// output processing, 8-bit characters, reads return after one byte.
    pub fn to_raw(&mut self) {
        self.input &= !(libc::IGNBRK
            | libc::BRKINT
            | libc::PARMRK
            | libc::ISTRIP
            | libc::INLCR
            | libc::IGNCR
            | libc::ICRNL
            | libc::IXON);
        self.output &= !libc::OPOST;
        self.local &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
        self.control &= !(libc::CSIZE | libc::PARENB);
        self.control |= libc::CS8;
        self.control_chars[libc::VMIN] = 1;
        self.control_chars[libc::VEOL] = 1;
        self.control_chars[libc::VERASE] = 1;
        self.control_chars[libc::VREPRINT] = 1;
        self.control_chars[libc::VKILL] = 1;
        self.control_chars[libc::VSWTC] = 1;
        self.control_chars[libc::VTIME] = 0;
    }

    /// Switches to cooked mode: line editing and signal characters on.
    pub fn to_cooked(&mut self) {
        self.input |= libc::BRKINT | libc::IGNPAR | libc::ISTRIP | libc::ICRNL | libc::IXON;
        self.output |= libc::OPOST;
        self.local |= libc::ISIG | libc::ICANON;
    }

    /// Resets to the values `reset(1)` would leave behind.
    pub fn to_sane(&mut self) {
        self.input &= !(libc::IGNBRK
            | libc::INLCR
            | libc::IGNCR
            | libc::IUTF8
            | libc::IXOFF
            | libc::IUCLC
            | libc::IXANY);
        self.input |= libc::BRKINT | libc::ICRNL | libc::IMAXBEL;
        self.output |= libc::OPOST | libc::ONLCR;
        self.output &= !(libc::OLCUC | libc::OCRNL | libc::ONOCR | libc::ONLRET);
        self.control |= libc::CREAD;
    }

    fn to_termios(&self) -> libc::termios {
        // SAFETY: libc::termios is a plain C struct; all-zero is a valid value.
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        termios.c_iflag = self.input;
        termios.c_oflag = self.output;
        termios.c_cflag = self.control;
        termios.c_lflag = self.local;
        termios.c_line = self.line;
        termios.c_cc = self.control_chars;
        termios
    }
}

impl From<libc::termios> for TerminalAttributes {
    fn from(raw: libc::termios) -> Self {
        Self {
            input: raw.c_iflag,
            output: raw.c_oflag,
            control: raw.c_cflag,
            local: raw.c_lflag,
            line: raw.c_line,
            control_chars: raw.c_cc,
        }
    }
}

/// Terminal window dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSize {
    /// Rows.
    pub rows: u16,
    /// Columns.
    pub cols: u16,
    /// Width in pixels.
    pub x_pixels: u16,
    /// Height in pixels.
    pub y_pixels: u16,
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            x_pixels: ws.ws_xpixel,
            y_pixels: ws.ws_ypixel,
        }
    }
}

impl From<WindowSize> for libc::winsize {
    fn from(size: WindowSize) -> Self {
        Self {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: size.x_pixels,
            ws_ypixel: size.y_pixels,
        }
    }
}

/// Reads the terminal attributes of `fd`.
///
/// # Errors
///
/// Returns [`EngineError::TerminalError`] if `fd` is not a terminal.
pub fn get_attributes(fd: impl AsFd) -> Result<TerminalAttributes> {
    // SAFETY: all-zero is a valid termios and the kernel fills it in.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is a live descriptor and `termios` outlives the call.
    let _ = unsafe { ioctl::tcgets(fd.as_fd().as_raw_fd(), &raw mut termios) }
        .map_err(|e| terminal_error("get attributes", e))?;
    Ok(termios.into())
}

/// Applies terminal attributes to `fd` immediately.
///
/// # Errors
///
/// Returns [`EngineError::TerminalError`] if the ioctl fails.
pub fn set_attributes(fd: impl AsFd, attributes: &TerminalAttributes) -> Result<()> {
    let termios = attributes.to_termios();
    // SAFETY: `fd` is a live descriptor and `termios` outlives the call.
    let _ = unsafe { ioctl::tcsets(fd.as_fd().as_raw_fd(), &raw const termios) }
        .map_err(|e| terminal_error("set attributes", e))?;
    Ok(())
}

/// Returns whether `fd` refers to a terminal.
pub fn is_terminal(fd: impl AsFd) -> bool {
    get_attributes(fd).is_ok()
}

/// Reads the window size of `fd`.
///
/// # Errors
///
/// Returns [`EngineError::TerminalError`] if the ioctl fails.
pub fn get_window_size(fd: impl AsFd) -> Result<WindowSize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `fd` is a live descriptor and `ws` outlives the call.
    let _ = unsafe { ioctl::tiocgwinsz(fd.as_fd().as_raw_fd(), &raw mut ws) }
        .map_err(|e| terminal_error("get window size", e))?;
    Ok(ws.into())
}

/// Sets the window size of `fd`.
///
/// # Errors
///
/// Returns [`EngineError::TerminalError`] if the ioctl fails.
pub fn set_window_size(fd: impl AsFd, size: WindowSize) -> Result<()> {
    let ws = libc::winsize::from(size);
    // SAFETY: `fd` is a live descriptor and `ws` outlives the call.
    let _ = unsafe { ioctl::tiocswinsz(fd.as_fd().as_raw_fd(), &raw const ws) }
        .map_err(|e| terminal_error("set window size", e))?;
    Ok(())
}

/// Makes `fd` the controlling terminal of a new session led by the caller.
///
/// Only performs raw syscalls, so it is safe to call between `fork`/`clone`
/// and `exec`.
///
/// # Errors
///
/// Returns the errno of `setsid(2)` or `TIOCSCTTY`.
pub fn acquire_controlling_terminal(fd: RawFd) -> nix::Result<()> {
    let _ = nix::unistd::setsid()?;
    // SAFETY: TIOCSCTTY takes an integer flag; 0 means do not steal.
    let _ = unsafe { ioctl::tiocsctty(fd, 0) }?;
    Ok(())
}

/// A pseudo-terminal pair: the master side and the path of the slave.
#[derive(Debug)]
pub struct Terminal {
    master: File,
    slave_path: PathBuf,
}

impl Terminal {
    /// Opens `/dev/ptmx`, unlocks the new slave and resolves its path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if any step fails; the master
    /// is closed in that case.
    pub fn allocate() -> Result<Self> {
        Self::allocate_from(Path::new(PTMX_PATH))
    }

    /// Same as [`Terminal::allocate`] with an explicit multiplexer path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if any step fails.
    pub fn allocate_from(ptmx: &Path) -> Result<Self> {
        let master = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(ptmx)
            .map_err(|e| terminal_error("open multiplexer", e))?;

        let unlock: libc::c_int = 0;
        // SAFETY: `master` is an open ptmx descriptor; TIOCSPTLCK reads an int.
        let _ = unsafe { ioctl::tiocsptlck(master.as_raw_fd(), &raw const unlock) }
            .map_err(|e| terminal_error("unlock", e))?;

        let mut number: libc::c_uint = 0;
        // SAFETY: `master` is an open ptmx descriptor; TIOCGPTN writes a uint.
        let _ = unsafe { ioctl::tiocgptn(master.as_raw_fd(), &raw mut number) }
            .map_err(|e| terminal_error("resolve slave", e))?;

        let slave_path = Path::new(PTS_DIR).join(number.to_string());
        std::fs::set_permissions(&slave_path, std::fs::Permissions::from_mode(0o620))
            .map_err(|e| terminal_error("set slave mode", e))?;

        tracing::debug!(slave = %slave_path.display(), "pseudo-terminal allocated");
        Ok(Self { master, slave_path })
    }

    /// Opens the slave for reading and writing without making it the
    /// caller's controlling terminal.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if the open fails.
    pub fn open_slave(&self) -> Result<File> {
        open_slave(&self.slave_path)
    }

    /// Master side of the pair.
    #[must_use]
    pub const fn master(&self) -> &File {
        &self.master
    }

    /// Path of the slave device, e.g. `/dev/pts/3`.
    #[must_use]
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }
}

/// Opens a pseudo-terminal slave by path with `O_NOCTTY`.
///
/// # Errors
///
/// Returns [`EngineError::TerminalError`] if the open fails.
pub fn open_slave(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map_err(|e| terminal_error("open slave", e))
}

/// Keeps a terminal in raw mode and restores its previous attributes on drop.
#[derive(Debug)]
pub struct RawModeGuard {
    file: File,
    saved: TerminalAttributes,
}

impl RawModeGuard {
    /// Switches the terminal behind `fd` to raw mode.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if `fd` is not a terminal or the
    /// attributes cannot be changed.
    pub fn enable(fd: BorrowedFd<'_>) -> Result<Self> {
        let file = File::from(
            fd.try_clone_to_owned()
                .map_err(|e| terminal_error("duplicate descriptor", e))?,
        );
        let saved = get_attributes(&file)?;
        let mut raw = saved.clone();
        raw.to_raw();
        set_attributes(&file, &raw)?;
        Ok(Self { file, saved })
    }

    /// Attributes in effect before raw mode was enabled.
    #[must_use]
    pub const fn saved(&self) -> &TerminalAttributes {
        &self.saved
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = set_attributes(&self.file, &self.saved) {
            tracing::warn!(error = %e, "could not restore terminal attributes");
        }
    }
}
