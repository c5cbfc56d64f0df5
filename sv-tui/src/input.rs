//! Keyboard input.
//!
//! Bytes arrive from a non-blocking fd polled `select(2)`-style on a
//! 10 ms tick. A bounded sequence buffer accumulates escape sequences and
//! multi-byte UTF-8; anything malformed or stale is dropped with a fault
//! log. A debouncer rejects identical keys repeated within 100 ms.

use std::time::{Duration, Instant};

/// Semantic key events.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Key {
    /// Bare escape (lone ESC after the settle window, or ESC ESC).
    Escape,
    /// Carriage return or line feed.
    Enter,
    /// DEL or BS.
    Backspace,
    /// Horizontal tab.
    Tab,
    /// Arrow up.
    Up,
    /// Arrow down.
    Down,
    /// Arrow left.
    Left,
    /// Arrow right.
    Right,
    /// Control-chord, lowercase letter.
    Ctrl(char),
    /// A printable scalar (one grapheme base).
    Char(char),
}

/// Sequence buffer cap; anything longer is dropped.
pub const SEQUENCE_CAP: usize = 64;

/// Incomplete sequences older than this are discarded.
pub const SEQUENCE_STALE: Duration = Duration::from_millis(100);

/// How long a lone ESC waits before resolving to `Key::Escape`.
pub const ESCAPE_SETTLE: Duration = Duration::from_millis(100);

/// Escape-sequence and UTF-8 parser.
#[derive(Debug, Default)]
pub struct SequenceParser {
    buf: Vec<u8>,
    since: Option<Instant>,
    faults: u64,
}

impl SequenceParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Malformed or overlong sequences dropped so far.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    fn fault(&mut self, why: &str) {
        self.faults += 1;
        tracing::warn!(why, bytes = ?self.buf, "dropping input sequence");
        self.buf.clear();
        self.since = None;
    }

    /// Feed one byte; returns a key when a sequence completes.
    pub fn feed(&mut self, byte: u8, now: Instant) -> Option<Key> {
        if self.buf.len() >= SEQUENCE_CAP {
            self.fault("sequence over 64 bytes");
        }

        if self.buf.is_empty() {
            return self.feed_initial(byte, now);
        }

        self.buf.push(byte);
        if self.buf[0] == 0x1B {
            self.continue_escape(now)
        } else {
            self.continue_utf8()
        }
    }

    fn feed_initial(&mut self, byte: u8, now: Instant) -> Option<Key> {
        match byte {
            0x1B => {
                self.buf.push(byte);
                self.since = Some(now);
                None
            }
            0x0D | 0x0A => Some(Key::Enter),
            0x7F | 0x08 => Some(Key::Backspace),
            0x09 => Some(Key::Tab),
            0x01..=0x1A => Some(Key::Ctrl((b'a' + byte - 1) as char)),
            0x00 | 0x1C..=0x1F => None, // remaining C0: no semantic key
            0x20..=0x7E => Some(Key::Char(byte as char)),
            0xC2..=0xF4 => {
                self.buf.push(byte);
                self.since = Some(now);
                None
            }
            _ => {
                self.buf.push(byte);
                self.fault("invalid utf-8 lead byte");
                None
            }
        }
    }

    fn continue_escape(&mut self, _now: Instant) -> Option<Key> {
        let done = |parser: &mut Self, key: Option<Key>| {
            parser.buf.clear();
            parser.since = None;
            key
        };

        match self.buf.as_slice() {
            [0x1B, 0x1B] => done(self, Some(Key::Escape)),
            [0x1B, b'['] => None,
            [0x1B, b'[', b'A'] => done(self, Some(Key::Up)),
            [0x1B, b'[', b'B'] => done(self, Some(Key::Down)),
            [0x1B, b'[', b'C'] => done(self, Some(Key::Right)),
            [0x1B, b'[', b'D'] => done(self, Some(Key::Left)),
            // SGR mouse: ESC [ < params M/m. Consumed, no semantic key.
            [0x1B, b'[', b'<', .., last] if matches!(last, b'M' | b'm') => done(self, None),
            [0x1B, b'[', b'<', ..] => None,
            // Other CSI: accumulate params, consume at the final byte.
            [0x1B, b'[', .., last] if (0x40..=0x7E).contains(last) => done(self, None),
            [0x1B, b'[', ..] => None,
            // X10 mouse: ESC M and three payload bytes. Consumed.
            [0x1B, b'M', _, _, _] => done(self, None),
            [0x1B, b'M', ..] => None,
            // Anything else ESC-prefixed we do not speak: one more byte
            // then drop.
            [0x1B, _] => done(self, None),
            _ => done(self, None),
        }
    }

    fn continue_utf8(&mut self) -> Option<Key> {
        let expected = match self.buf[0] {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => {
                self.fault("invalid utf-8 state");
                return None;
            }
        };
        let last = self.buf[self.buf.len() - 1];
        if !(0x80..=0xBF).contains(&last) {
            self.fault("invalid utf-8 continuation");
            return None;
        }
        if self.buf.len() < expected {
            return None;
        }

        let key = match std::str::from_utf8(&self.buf) {
            Ok(s) => s.chars().next().map(Key::Char),
            Err(_) => {
                self.fault("invalid utf-8 scalar");
                return None;
            }
        };
        self.buf.clear();
        self.since = None;
        key
    }

    /// Resolve timeouts: a lone ESC settles to `Escape`, any other
    /// incomplete sequence past the staleness window is dropped.
    pub fn poll(&mut self, now: Instant) -> Option<Key> {
        let since = self.since?;
        if now.duration_since(since) < SEQUENCE_STALE {
            return None;
        }
        if self.buf == [0x1B] {
            self.buf.clear();
            self.since = None;
            return Some(Key::Escape);
        }
        self.fault("stale sequence");
        None
    }
}

/// Rejects identical key events repeated within the window.
#[derive(Debug)]
pub struct KeyDebouncer {
    window: Duration,
    last: Option<(Key, Instant)>,
}

impl KeyDebouncer {
    /// Create with the standard 100 ms window.
    pub fn new() -> Self {
        Self {
            window: Duration::from_millis(100),
            last: None,
        }
    }

    /// Whether to accept this key event.
    pub fn accept(&mut self, key: Key, now: Instant) -> bool {
        if let Some((last_key, at)) = self.last {
            if last_key == key && now.duration_since(at) < self.window {
                return false;
            }
        }
        self.last = Some((key, now));
        true
    }
}

impl Default for KeyDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking fd reader polled via `select(2)`.
#[cfg(unix)]
pub struct FdPoller {
    fd: std::os::unix::io::RawFd,
}

#[cfg(unix)]
impl FdPoller {
    /// Wrap an fd, switching it to non-blocking mode.
    pub fn new(fd: std::os::unix::io::RawFd) -> std::io::Result<Self> {
        // O_NONBLOCK so a ready fd with a short payload never stalls us.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Wait up to `timeout` for readability.
    pub fn poll_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        let mut readfds = unsafe { std::mem::zeroed::<libc::fd_set>() };
        unsafe {
            libc::FD_ZERO(&mut readfds);
            libc::FD_SET(self.fd, &mut readfds);
        }
        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let ready = unsafe {
            libc::select(
                self.fd + 1,
                &mut readfds,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut tv,
            )
        };
        match ready {
            -1 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Read whatever is available, up to 256 bytes.
    pub fn read_available(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = [0u8; 256];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            return match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(Vec::new()),
                _ => Err(err),
            };
        }
        Ok(buf[..n as usize].to_vec())
    }
}

/// The assembled pipeline: poller → parser → debouncer.
#[cfg(unix)]
pub struct InputPipeline {
    poller: FdPoller,
    parser: SequenceParser,
    debouncer: KeyDebouncer,
}

/// Poll tick for the input loop.
pub const POLL_TICK: Duration = Duration::from_millis(10);

#[cfg(unix)]
impl InputPipeline {
    /// Build a pipeline over an fd (normally stdin).
    pub fn new(fd: std::os::unix::io::RawFd) -> std::io::Result<Self> {
        Ok(Self {
            poller: FdPoller::new(fd)?,
            parser: SequenceParser::new(),
            debouncer: KeyDebouncer::new(),
        })
    }

    /// One poll cycle: wait up to the tick, drain bytes, emit keys.
    pub fn poll_once(&mut self) -> std::io::Result<Vec<Key>> {
        let mut keys = Vec::new();
        if self.poller.poll_readable(POLL_TICK)? {
            for byte in self.poller.read_available()? {
                if let Some(key) = self.parser.feed(byte, Instant::now()) {
                    keys.push(key);
                }
            }
        }
        if let Some(key) = self.parser.poll(Instant::now()) {
            keys.push(key);
        }
        let now = Instant::now();
        keys.retain(|key| self.debouncer.accept(*key, now));
        Ok(keys)
    }
}
