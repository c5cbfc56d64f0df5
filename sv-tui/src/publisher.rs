//! State bus.
//!
//! A unix-domain stream server fanning newline-delimited JSON frames out
//! to every subscriber. New subscribers immediately receive the last
//! published payload; `PING` (case-insensitive) requests a resend.
//! `seq` is strictly increasing for the life of the server.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::update::{Frame, FrameKind, Update};

/// Default bus socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/smartvestor-tui.sock";

/// Per-subscriber outbound queue depth.
const SUBSCRIBER_QUEUE: usize = 64;

struct Shared {
    seq: u64,
    last_payload: Option<String>,
    subscribers: Vec<mpsc::Sender<String>>,
}

/// The fan-out publisher.
pub struct StatePublisher {
    path: PathBuf,
    shared: Arc<Mutex<Shared>>,
}

impl StatePublisher {
    /// Bind the bus socket and start accepting subscribers.
    ///
    /// A stale socket file from a previous run is removed first.
    pub async fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        let shared = Arc::new(Mutex::new(Shared {
            seq: 0,
            last_payload: None,
            subscribers: Vec::new(),
        }));

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        tokio::spawn(serve_subscriber(stream, Arc::clone(&accept_shared)));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "bus accept failed");
                        break;
                    }
                }
            }
        });

        tracing::info!(path = %path.display(), "state bus listening");
        Ok(Self { path, shared })
    }

    /// Publish one frame. The publisher assigns `seq`.
    pub fn publish(&self, kind: FrameKind, mut update: Update) -> io::Result<u64> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.seq += 1;
        update.seq = shared.seq;

        let frame = Frame { kind, update };
        let mut payload = serde_json::to_string(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        payload.push('\n');
        shared.last_payload = Some(payload.clone());

        // Fan out; drop subscribers with saturated or closed queues.
        shared
            .subscribers
            .retain(|subscriber| subscriber.try_send(payload.clone()).is_ok());
        Ok(shared.seq)
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }

    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StatePublisher {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve_subscriber(stream: UnixStream, shared: Arc<Mutex<Shared>>) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(SUBSCRIBER_QUEUE);

    // Replay the last payload before anything else.
    {
        let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = &shared.last_payload {
            let _ = tx.try_send(last.clone());
        }
        shared.subscribers.push(tx.clone());
    }

    // Command reader: PING re-queues the last payload.
    let command_shared = Arc::clone(&shared);
    let command_tx = tx;
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().eq_ignore_ascii_case("ping") {
                let last = command_shared
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .last_payload
                    .clone();
                if let Some(last) = last {
                    if command_tx.send(last).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(payload) = rx.recv().await {
        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// A bus client: connects, replays, and yields updates in `seq` order.
pub struct StateSubscriber {
    lines: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl StateSubscriber {
    /// Connect to a bus socket.
    pub async fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Next frame from the bus; `None` when the server goes away.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    // A malformed frame is logged and skipped, not fatal.
                    tracing::warn!(error = %err, "malformed bus frame");
                }
            }
        }
    }

    /// Ask the server to resend the last payload.
    pub async fn ping(&mut self) -> io::Result<()> {
        self.writer.write_all(b"PING\n").await
    }
}
