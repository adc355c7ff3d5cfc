// src/commands.rs
//
// Outbound chat-command transport. The simulator's race control is driven by
// a line-oriented chat interface; delivery is best-effort (a lost line is the
// transport's failure mode, not ours — log and move on, no retry).
//
// The pacing constants are properties of the downstream transport: the chat
// box needs a short settle after opening, and back-to-back commands must be
// spaced or the window drops them. Do not batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Settle after opening the chat box.
pub const CHAT_OPEN_SETTLE: Duration = Duration::from_millis(100);
/// Spacing between consecutive commands.
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(500);

// ── Command shapes ────────────────────────────────────────────────────────────

/// `!y <message>` — throw a full-course yellow.
pub fn yellow(message: &str) -> String {
    format!("!y {message}")
}

/// `!p <n>` — set pace laps remaining. `0` defers to the simulator default;
/// `1` is documented as ignored by the simulator and passed through unchanged.
pub fn pace_laps(n: u32) -> String {
    format!("!p {n}")
}

/// `!w <car_number>` — wave a car around the pace car.
pub fn wave(car_number: &str) -> String {
    format!("!w {car_number}")
}

/// `!eol <car_number>` — send a car to the end of its line.
pub fn end_of_line(car_number: &str) -> String {
    format!("!eol {car_number}")
}

// ── Sink capability ───────────────────────────────────────────────────────────

#[async_trait]
pub trait ChatSink: Send {
    async fn send_line(&mut self, line: &str) -> Result<()>;
}

/// Pacing wrapper around a sink. Single-writer: owned by the supervisor, no
/// other task emits.
pub struct ChatCommander {
    sink:        Box<dyn ChatSink>,
    open_settle: Duration,
    between:     Duration,
}

impl ChatCommander {
    pub fn new(sink: Box<dyn ChatSink>) -> Self {
        Self::with_pacing(sink, CHAT_OPEN_SETTLE, INTER_COMMAND_DELAY)
    }

    pub fn with_pacing(sink: Box<dyn ChatSink>, open_settle: Duration, between: Duration) -> Self {
        Self { sink, open_settle, between }
    }

    /// Emit one command. Emission failures are logged and swallowed — the
    /// transport gives no delivery guarantee to recover against.
    pub async fn send(&mut self, command: &str) {
        tokio::time::sleep(self.open_settle).await;
        if let Err(e) = self.sink.send_line(command).await {
            warn!("command emission failed ({command}): {e}");
        }
    }

    /// Emit commands in order with the inter-command delay, checking
    /// `cancelled` between commands. Returns how many were emitted. An
    /// in-flight command is always finished before unwinding.
    pub async fn send_all(&mut self, commands: &[String], cancelled: impl Fn() -> bool) -> usize {
        let mut sent = 0;
        for command in commands {
            if cancelled() {
                debug!("command batch cancelled after {sent} of {}", commands.len());
                break;
            }
            self.send(command).await;
            sent += 1;
            tokio::time::sleep(self.between).await;
        }
        sent
    }
}

// ── Mock sink ─────────────────────────────────────────────────────────────────

/// Records every line instead of touching a simulator window. Interchangeable
/// with the real sink for tests and dry runs.
#[derive(Clone, Default)]
pub struct MockSink {
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatSink for MockSink {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        info!("chat> {line}");
        self.sent.lock().push(line.to_string());
        Ok(())
    }
}
