//! Live events from the orchestrator
//!
//! The orchestrator appends one JSON object per line to an events file:
//!
//! ```text
//! {"name": "start-phase-2", "contents": {"users": 500}}
//! ```
//!
//! A single tail task reads new lines on a fixed interval and publishes them on
//! a bounded broadcast channel. Any number of waiters subscribe; each wait
//! carries its own timeout and is cancelled when the watcher finishes.

use serde::Deserialize;
use serde_json::Value;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default tail interval
pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// A live event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveEvent {
    pub name: String,
    #[serde(default)]
    pub contents: Option<Value>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Timeout waiting for event {name}")]
    Timeout { name: String },

    #[error("event watcher stopped while waiting for {name}")]
    Closed { name: String },
}

/// Tails an events file and fans events out to waiters
pub struct EventWatcher {
    sender: broadcast::Sender<LiveEvent>,
    cancel: CancellationToken,
    local: bool,
}

impl EventWatcher {
    /// Start tailing `path` from its beginning
    ///
    /// Must be called from within a tokio runtime. A file that does not exist
    /// yet is picked up once it appears.
    pub fn spawn(path: PathBuf, tail_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(tail_events(path, tail_interval, sender.clone(), cancel.clone()));

        Self {
            sender,
            cancel,
            local: false,
        }
    }

    /// Watcher for a local run: every wait resolves with its default
    pub fn local() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            cancel: CancellationToken::new(),
            local: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    /// Wait for the next event called `name` and return its contents
    ///
    /// Only events published after the wait starts are observed.
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Option<Duration>,
        default: Option<Value>,
    ) -> Result<Option<Value>, EventError> {
        if self.local {
            return Ok(default);
        }

        let mut rx = self.sender.subscribe();
        let token = self.cancel.child_token();
        let deadline = async {
            match timeout.filter(|t| !t.is_zero()) {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(EventError::Closed { name: name.to_string() });
                }
                _ = &mut deadline => {
                    return Err(EventError::Timeout { name: name.to_string() });
                }
                received = rx.recv() => match received {
                    Ok(event) if event.name == name => return Ok(event.contents),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event waiter lagged behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EventError::Closed { name: name.to_string() });
                    }
                },
            }
        }
    }

    /// Stop tailing and fail outstanding waits
    pub fn finish(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tail_events(
    path: PathBuf,
    interval: Duration,
    sender: broadcast::Sender<LiveEvent>,
    cancel: CancellationToken,
) {
    let mut offset = 0u64;
    let mut pending: Vec<u8> = Vec::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let chunk = match read_from(&path, offset).await {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error tailing live events");
                continue;
            }
        };
        offset += chunk.len() as u64;
        pending.extend_from_slice(&chunk);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            publish_line(&line, &sender);
        }
    }
}

async fn read_from(path: &PathBuf, offset: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn publish_line(line: &[u8], sender: &broadcast::Sender<LiveEvent>) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<LiveEvent>(line) {
        Ok(event) => {
            debug!(name = %event.name, "Received live event");
            // No receivers is fine: nobody is waiting for this event
            let _ = sender.send(event);
        }
        Err(e) => warn!(line, error = %e, "Error processing live event"),
    }
}
