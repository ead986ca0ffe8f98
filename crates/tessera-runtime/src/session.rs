//! Interactive terminal sessions.
//!
//! A [`TerminalSession`] allocates a pseudo-terminal for the container,
//! mirrors the host terminal's attributes and window size onto the slave,
//! puts the host terminal in raw mode and relays bytes until closed.

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use tessera_common::error::{EngineError, Result};
use tessera_core::terminal::{self, RawModeGuard, Terminal};
use tracing::Span;

use crate::relay::Relay;

fn duplicate(fd: BorrowedFd<'_>) -> Result<File> {
    fd.try_clone_to_owned()
        .map(File::from)
        .map_err(|e| EngineError::TerminalError {
            operation: "duplicate host descriptor",
            source: e,
        })
}

/// A pseudo-terminal wired to the host's stdin and stdout.
#[derive(Debug)]
pub struct TerminalSession {
    relay: Option<Relay>,
    // Open until the relay stops: a master without any open slave reports
    // a hang-up and the output bridge would end before the container writes.
    slave: Option<File>,
    raw_mode: Option<RawModeGuard>,
    terminal: Terminal,
}

impl TerminalSession {
    /// Allocates the pty and starts relaying the process's stdin and stdout.
    ///
    /// When host stdin is a terminal its attributes and window size are
    /// copied to the slave and it is switched to raw mode until the session
    /// closes. Otherwise the slave is reset to sane cooked settings and
    /// bytes are relayed as they come.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if allocation, attribute
    /// propagation or the relay fails.
    pub fn open(span: &Span) -> Result<Self> {
        Self::open_on(io::stdin().as_fd(), io::stdout().as_fd(), span)
    }

    fn open_on(host_in: BorrowedFd<'_>, host_out: BorrowedFd<'_>, span: &Span) -> Result<Self> {
        let terminal = Terminal::allocate()?;
        tracing::info!(parent: span, slave = %terminal.slave_path().display(), "pseudo-terminal ready");

        let slave = terminal.open_slave()?;
        let raw_mode = if terminal::is_terminal(host_in) {
            let mut attributes = terminal::get_attributes(host_in)?;
            let size = terminal::get_window_size(host_in)?;
            let guard = RawModeGuard::enable(host_in)?;

            attributes.to_raw();
            terminal::set_attributes(&slave, &attributes)?;
            terminal::set_window_size(&slave, size)?;
            tracing::debug!(parent: span, rows = size.rows, cols = size.cols, "window size propagated");
            Some(guard)
        } else {
            let mut attributes = terminal::get_attributes(&slave)?;
            attributes.to_sane();
            attributes.to_cooked();
            terminal::set_attributes(&slave, &attributes)?;
            tracing::debug!(parent: span, "host stdin is not a terminal, relaying without raw mode");
            None
        };

        let relay = Relay::start(
            duplicate(host_in)?,
            duplicate(host_out)?,
            terminal.master(),
            span,
        )?;

        Ok(Self {
            relay: Some(relay),
            slave: Some(slave),
            raw_mode,
            terminal,
        })
    }

    /// Path of the slave the container process should use.
    #[must_use]
    pub fn slave_path(&self) -> &Path {
        self.terminal.slave_path()
    }

    /// Stops the relay, then restores the host terminal.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.stop();
        }
        drop(self.slave.take());
        drop(self.raw_mode.take());
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use nix::fcntl::OFlag;
    use nix::unistd::pipe2;
    use tessera_core::terminal::WindowSize;

    use super::*;

    fn pipe() -> (File, File) {
        let (rx, tx) = pipe2(OFlag::O_CLOEXEC).unwrap();
        (File::from(rx), File::from(tx))
    }

    /// A second pty whose slave stands in for an interactive host stdin, or
    /// `None` where the environment has no devpts.
    fn host_terminal() -> Option<(Terminal, File)> {
        let host = Terminal::allocate().ok()?;
        let stdin = host.open_slave().ok()?;
        Some((host, stdin))
    }

    #[test]
    fn container_output_reaches_host_when_stdin_is_a_terminal() {
        let Some((_host, host_in)) = host_terminal() else {
            return;
        };
        let (mut out_rx, out_tx) = pipe();
        let session =
            TerminalSession::open_on(host_in.as_fd(), out_tx.as_fd(), &Span::none()).unwrap();

        let mut container = terminal::open_slave(session.slave_path()).unwrap();
        container.write_all(b"hello-from-child").unwrap();
        let mut shown = [0u8; 16];
        out_rx.read_exact(&mut shown).unwrap();
        assert_eq!(&shown, b"hello-from-child");

        drop(container);
        session.close();
    }

    #[test]
    fn host_keystrokes_reach_container() {
        let Some((host, host_in)) = host_terminal() else {
            return;
        };
        let (_out_rx, out_tx) = pipe();
        let session =
            TerminalSession::open_on(host_in.as_fd(), out_tx.as_fd(), &Span::none()).unwrap();
        let mut container = terminal::open_slave(session.slave_path()).unwrap();

        let mut keyboard = host.master();
        keyboard.write_all(b"ls\n").unwrap();
        let mut typed = [0u8; 3];
        container.read_exact(&mut typed).unwrap();
        assert_eq!(&typed, b"ls\n");

        drop(container);
        session.close();
    }

    #[test]
    fn host_terminal_is_raw_only_while_open() {
        let Some((host, host_in)) = host_terminal() else {
            return;
        };
        let size = WindowSize {
            rows: 30,
            cols: 100,
            ..WindowSize::default()
        };
        terminal::set_window_size(host.master(), size).unwrap();
        let before = terminal::get_attributes(&host_in).unwrap();
        let (_out_rx, out_tx) = pipe();

        let session =
            TerminalSession::open_on(host_in.as_fd(), out_tx.as_fd(), &Span::none()).unwrap();
        assert_eq!(terminal::get_attributes(&host_in).unwrap().local & libc::ICANON, 0);
        let container = terminal::open_slave(session.slave_path()).unwrap();
        assert_eq!(terminal::get_attributes(&container).unwrap().local & libc::ICANON, 0);
        assert_eq!(terminal::get_window_size(&container).unwrap(), size);

        session.close();
        assert_eq!(terminal::get_attributes(&host_in).unwrap(), before);
    }

    #[test]
    fn piped_stdin_gets_cooked_slave() {
        if Terminal::allocate().is_err() {
            return;
        }
        let (in_rx, _in_tx) = pipe();
        let (mut out_rx, out_tx) = pipe();
        let session =
            TerminalSession::open_on(in_rx.as_fd(), out_tx.as_fd(), &Span::none()).unwrap();

        let mut container = terminal::open_slave(session.slave_path()).unwrap();
        let attributes = terminal::get_attributes(&container).unwrap();
        assert_ne!(attributes.local & libc::ICANON, 0);
        assert_ne!(attributes.output & libc::ONLCR, 0);

        container.write_all(b"ok\n").unwrap();
        let mut shown = [0u8; 4];
        out_rx.read_exact(&mut shown).unwrap();
        assert_eq!(&shown, b"ok\r\n");

        drop(container);
        session.close();
    }
}
