//! Byte relay between the host terminal and a pseudo-terminal master.
//!
//! Two bridge threads copy host input to the master and master output to
//! the host. Each polls its source together with the read end of a shared
//! cancellation pipe; [`Relay::stop`] closes the write end and joins both.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd::pipe2;
use tessera_common::error::{EngineError, Result};
use tracing::Span;

const BUFFER_SIZE: usize = 4096;

/// Direction of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Host stdin to master.
    Input,
    /// Master to host stdout.
    Output,
}

impl Direction {
    const fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }

    /// Output is flushed out of the master before cancellation is honoured.
    const fn drains(self) -> bool {
        matches!(self, Self::Output)
    }
}

fn relay_error(source: impl Into<std::io::Error>) -> EngineError {
    EngineError::TerminalError {
        operation: "start relay",
        source: source.into(),
    }
}

/// A running pair of bridges.
#[derive(Debug)]
pub struct Relay {
    cancel: Option<OwnedFd>,
    bridges: Vec<JoinHandle<()>>,
    span: Span,
}

impl Relay {
    /// Starts relaying between `host_in`/`host_out` and `master`.
    ///
    /// `master` is duplicated, so the caller keeps ownership of it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TerminalError`] if the cancellation pipe,
    /// descriptor duplicates or threads cannot be created.
    pub fn start(host_in: File, host_out: File, master: &File, span: &Span) -> Result<Self> {
        let (cancel_rx, cancel_tx) = pipe2(OFlag::O_CLOEXEC).map_err(relay_error)?;
        let mut relay = Self {
            cancel: Some(cancel_tx),
            bridges: Vec::with_capacity(2),
            span: span.clone(),
        };

        let master_in = master.try_clone().map_err(relay_error)?;
        let master_out = master.try_clone().map_err(relay_error)?;
        let input_cancel = cancel_rx.try_clone().map_err(relay_error)?;

        relay.spawn(Direction::Input, host_in, master_in, input_cancel)?;
        relay.spawn(Direction::Output, master_out, host_out, cancel_rx)?;
        tracing::debug!(parent: span, "terminal relay started");
        Ok(relay)
    }

    fn spawn(
        &mut self,
        direction: Direction,
        source: File,
        sink: File,
        cancel: OwnedFd,
    ) -> Result<()> {
        let span = self.span.clone();
        let handle = std::thread::Builder::new()
            .name(format!("relay-{}", direction.name()))
            .spawn(move || bridge(direction, source, sink, &cancel, &span))
            .map_err(relay_error)?;
        self.bridges.push(handle);
        Ok(())
    }

    /// Cancels both bridges and waits for them to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.cancel.take());
        for handle in std::mem::take(&mut self.bridges) {
            if handle.join().is_err() {
                tracing::error!(parent: &self.span, "relay bridge panicked");
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What a poll round found.
struct Readiness {
    source: bool,
    cancelled: bool,
}

fn wait_ready(source: &File, cancel: &OwnedFd) -> nix::Result<Readiness> {
    let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    let mut fds = [
        PollFd::new(source.as_fd(), PollFlags::POLLIN),
        PollFd::new(cancel.as_fd(), PollFlags::POLLIN),
    ];
    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e),
            Ok(_) => break,
        }
    }
    let is_set = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| r.intersects(ready));
    Ok(Readiness {
        source: is_set(&fds[0]),
        cancelled: is_set(&fds[1]),
    })
}

fn bridge(direction: Direction, mut source: File, mut sink: File, cancel: &OwnedFd, span: &Span) {
    let name = direction.name();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let readiness = match wait_ready(&source, cancel) {
            Ok(readiness) => readiness,
            Err(e) => {
                tracing::warn!(parent: span, bridge = name, error = %e, "relay poll failed");
                return;
            }
        };
        if readiness.cancelled && !(direction.drains() && readiness.source) {
            break;
        }
        if !readiness.source {
            continue;
        }
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_all(&buf[..n]).and_then(|()| sink.flush()) {
                    tracing::warn!(parent: span, bridge = name, error = %e, "relay write failed");
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            // The master reports EIO once every slave descriptor is closed.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => {
                tracing::warn!(parent: span, bridge = name, error = %e, "relay read failed");
                return;
            }
        }
    }
    tracing::debug!(parent: span, bridge = name, "relay bridge finished");
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn pipe() -> (File, File) {
        let (rx, tx) = pipe2(OFlag::O_CLOEXEC).unwrap();
        (File::from(rx), File::from(tx))
    }

    /// A socket pair stands in for the pty: one end is the "master", the
    /// other plays the container side.
    fn fake_master() -> (File, UnixStream) {
        let (master, container) = UnixStream::pair().unwrap();
        (File::from(OwnedFd::from(master)), container)
    }

    #[test]
    fn copies_in_both_directions() {
        let (in_rx, mut in_tx) = pipe();
        let (mut out_rx, out_tx) = pipe();
        let (master, mut container) = fake_master();

        let relay = Relay::start(in_rx, out_tx, &master, &Span::none()).unwrap();

        in_tx.write_all(b"ls\n").unwrap();
        let mut typed = [0u8; 3];
        container.read_exact(&mut typed).unwrap();
        assert_eq!(&typed, b"ls\n");

        container.write_all(b"bin etc\n").unwrap();
        let mut shown = [0u8; 8];
        out_rx.read_exact(&mut shown).unwrap();
        assert_eq!(&shown, b"bin etc\n");

        relay.stop();
    }

    #[test]
    fn stop_drains_pending_output() {
        let (in_rx, _in_tx) = pipe();
        let (mut out_rx, out_tx) = pipe();
        let (master, mut container) = fake_master();

        let relay = Relay::start(in_rx, out_tx, &master, &Span::none()).unwrap();
        container.write_all(b"goodbye").unwrap();
        relay.stop();

        let mut shown = String::new();
        let _ = out_rx.read_to_string(&mut shown).unwrap();
        assert_eq!(shown, "goodbye");
    }

    #[test]
    fn output_bridge_ends_when_container_side_closes() {
        let (in_rx, _in_tx) = pipe();
        let (mut out_rx, out_tx) = pipe();
        let (master, container) = fake_master();

        let relay = Relay::start(in_rx, out_tx, &master, &Span::none()).unwrap();
        drop(container);
        drop(master);
        relay.stop();

        let mut shown = Vec::new();
        let _ = out_rx.read_to_end(&mut shown).unwrap();
        assert!(shown.is_empty());
    }

    #[test]
    fn drop_joins_bridges() {
        let (in_rx, _in_tx) = pipe();
        let (_out_rx, out_tx) = pipe();
        let (master, _container) = fake_master();

        let relay = Relay::start(in_rx, out_tx, &master, &Span::none()).unwrap();
        drop(relay);
    }
}
