//! Terminal session and output sink.
//!
//! The terminal is exclusively held between alt-screen enter and exit.
//! Raw-mode entry saves the termios state; restore runs on drop and on
//! panic, whichever comes first. Frame bytes go out through a single
//! `write(2)` per frame, with bounded `EAGAIN` retries and `SIGPIPE`
//! ignored.

#![cfg(unix)]

use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::ansi;

/// Saved state for the panic-path restore.
struct SavedTerm {
    fd: RawFd,
    termios: libc::termios,
}

// Safety: termios is plain data and the fd is only written on restore.
unsafe impl Send for SavedTerm {}

static SAVED: Mutex<Option<SavedTerm>> = Mutex::new(None);
static PANIC_HOOK: OnceLock<()> = OnceLock::new();

fn restore_saved() {
    let saved = SAVED.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(saved) = saved {
        unsafe {
            libc::tcsetattr(saved.fd, libc::TCSANOW, &saved.termios);
            let bytes = [ansi::SHOW_CURSOR, ansi::EXIT_ALT_SCREEN].concat();
            libc::write(
                saved.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            );
        }
    }
}

/// Exclusive raw-mode + alt-screen session over a tty fd.
///
/// Dropping the session restores the terminal; a panic anywhere in the
/// process restores it too, via a chained panic hook.
pub struct TerminalSession {
    fd: RawFd,
    active: bool,
}

impl TerminalSession {
    /// Enter raw mode and the alternate screen.
    pub fn enter(fd: RawFd) -> io::Result<Self> {
        let mut original = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut raw = original;
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }

        *SAVED.lock().unwrap_or_else(|e| e.into_inner()) = Some(SavedTerm {
            fd,
            termios: original,
        });
        PANIC_HOOK.get_or_init(|| {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                restore_saved();
                previous(info);
            }));
        });

        let preamble = [ansi::ENTER_ALT_SCREEN, ansi::HIDE_CURSOR].concat();
        write_all(fd, &preamble)?;

        Ok(Self { fd, active: true })
    }

    /// Restore the terminal early. Idempotent.
    pub fn exit(&mut self) {
        if self.active {
            self.active = false;
            restore_saved();
        }
    }

    /// The session fd.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Maximum `EAGAIN` retries for one frame.
const EAGAIN_RETRIES: u32 = 10;

/// Owns the output fd; one frame, one write.
pub struct TerminalSink {
    fd: RawFd,
    eagain_count: u64,
    sigpipe_count: u64,
}

impl TerminalSink {
    /// Create a sink over an fd, ignoring `SIGPIPE` process-wide so a
    /// closed tty surfaces as `EPIPE` instead of killing us.
    pub fn new(fd: RawFd) -> Self {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        Self {
            fd,
            eagain_count: 0,
            sigpipe_count: 0,
        }
    }

    /// Write one frame's bytes.
    ///
    /// Short writes continue where they left off; `EAGAIN` backs off
    /// exponentially up to ten retries. `EPIPE` is counted and returned.
    pub fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        let mut retries = 0;
        let mut backoff = Duration::from_millis(1);

        while written < bytes.len() {
            let rest = &bytes[written..];
            let n = unsafe {
                libc::write(self.fd, rest.as_ptr() as *const libc::c_void, rest.len())
            };
            if n >= 0 {
                written += n as usize;
                continue;
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => {
                    self.eagain_count += 1;
                    retries += 1;
                    if retries > EAGAIN_RETRIES {
                        return Err(err);
                    }
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Some(libc::EINTR) => {}
                Some(libc::EPIPE) => {
                    self.sigpipe_count += 1;
                    return Err(err);
                }
                _ => return Err(err),
            }
        }
        Ok(())
    }

    /// `EAGAIN` retries observed.
    pub fn eagain_count(&self) -> u64 {
        self.eagain_count
    }

    /// `EPIPE` writes observed.
    pub fn sigpipe_count(&self) -> u64 {
        self.sigpipe_count
    }
}

fn write_all(fd: RawFd, bytes: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        let rest = &bytes[written..];
        let n =
            unsafe { libc::write(fd, rest.as_ptr() as *const libc::c_void, rest.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        written += n as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_writes_to_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let [read_fd, write_fd] = fds;

        let mut sink = TerminalSink::new(write_fd);
        sink.write_frame(b"frame-bytes").unwrap();

        let mut buf = [0u8; 32];
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        assert_eq!(&buf[..n as usize], b"frame-bytes");

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn test_sink_counts_epipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let [read_fd, write_fd] = fds;
        unsafe { libc::close(read_fd) };

        let mut sink = TerminalSink::new(write_fd);
        let err = sink.write_frame(b"doomed").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
        assert_eq!(sink.sigpipe_count(), 1);

        unsafe { libc::close(write_fd) };
    }
}
