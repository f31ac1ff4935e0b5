//! Status reporting
//!
//! Every relay decision goes through [`StatusReporter::report`], which updates the running
//! counters, writes a log line, keeps a short history for display and fans the event out to
//! subscribers. Reporting never fails.

use crate::messages::DeliveryResult;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Rendered lines kept for display
pub const LOG_HISTORY: usize = 50;

/// Characters of a message body shown in events
pub const PREVIEW_CHARS: usize = 40;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the relay is within its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Fetching,
    Dispatching,
    Stopped,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::Fetching => write!(f, "fetching"),
            CycleState::Dispatching => write!(f, "dispatching"),
            CycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Aggregate result of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub ack_failures: usize,
    /// Fetch failed, nothing was dispatched
    pub fetch_failed: bool,
    pub last_error: Option<String>,
    /// Per-message outcomes in dispatch order, duplicates excluded
    pub results: Vec<DeliveryResult>,
}

impl CycleSummary {
    /// The queue answered with nothing to do
    pub fn is_idle(&self) -> bool {
        !self.fetch_failed && self.fetched == 0
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fetch_failed {
            return write!(
                f,
                "fetch failed: {}",
                self.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        if self.is_idle() {
            return write!(f, "waiting, no pending messages");
        }
        write!(
            f,
            "fetched {}, sent {}, failed {}, duplicates {}",
            self.fetched, self.sent, self.failed, self.duplicates
        )?;
        if self.ack_failures > 0 {
            write!(f, ", ack failures {}", self.ack_failures)?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " (last error: {})", err)?;
        }
        Ok(())
    }
}

/// Something the relay did, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Started { server: String, interval_ms: u64 },
    CycleStarted,
    MessageSent { destination: String, preview: String },
    MessageFailed { destination: String, error: String },
    DuplicateSkipped { id: String },
    AcknowledgeFailed { id: String, error: String },
    ServerUnreachable { error: String },
    PermissionDenied { reason: String },
    CycleCompleted(CycleSummary),
    Stopped,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Started {
                server,
                interval_ms,
            } => write!(
                f,
                "Relay active, polling {} every {}ms",
                server, interval_ms
            ),
            StatusEvent::CycleStarted => write!(f, "Polling"),
            StatusEvent::MessageSent {
                destination,
                preview,
            } => write!(f, "Sent -> {}: {}", destination, preview),
            StatusEvent::MessageFailed { destination, error } => {
                write!(f, "Failed -> {}: {}", destination, error)
            }
            StatusEvent::DuplicateSkipped { id } => {
                write!(f, "Skipped {} (already delivered)", id)
            }
            StatusEvent::AcknowledgeFailed { id, error } => {
                write!(f, "Acknowledge failed for {}: {}", id, error)
            }
            StatusEvent::ServerUnreachable { error } => {
                write!(f, "Server unreachable: {}", error)
            }
            StatusEvent::PermissionDenied { reason } => {
                write!(f, "Permission denied, cannot send messages: {}", reason)
            }
            StatusEvent::CycleCompleted(summary) => write!(f, "Cycle done: {}", summary),
            StatusEvent::Stopped => write!(f, "Relay stopped"),
        }
    }
}

/// Running totals for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub sent_total: u64,
    pub failed_total: u64,
    pub duplicates_total: u64,
    pub ack_failures_total: u64,
    pub cycles: u64,
    pub last_error: Option<String>,
    pub state: CycleState,
}

impl Counters {
    /// One-line status, e.g. `Running | Sent: 3 | Failed: 1`
    pub fn status_line(&self) -> String {
        let head = match self.state {
            CycleState::Stopped => "Stopped",
            _ => "Running",
        };
        format!(
            "{} | Sent: {} | Failed: {}",
            head, self.sent_total, self.failed_total
        )
    }
}

/// A rendered event with its local time
#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.text)
    }
}

/// Counter aggregation plus event fan-out
pub struct StatusReporter {
    counters: Mutex<Counters>,
    history: Mutex<VecDeque<LogLine>>,
    events: broadcast::Sender<StatusEvent>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            counters: Mutex::new(Counters::default()),
            history: Mutex::new(VecDeque::with_capacity(LOG_HISTORY)),
            events,
        }
    }

    /// Record an event. Never fails, never blocks on subscribers.
    pub fn report(&self, event: StatusEvent) {
        {
            let mut counters = lock(&self.counters);
            match &event {
                StatusEvent::CycleStarted => counters.cycles += 1,
                StatusEvent::MessageSent { .. } => counters.sent_total += 1,
                StatusEvent::MessageFailed { error, .. } => {
                    counters.failed_total += 1;
                    counters.last_error = Some(error.clone());
                }
                StatusEvent::DuplicateSkipped { .. } => counters.duplicates_total += 1,
                StatusEvent::AcknowledgeFailed { .. } => counters.ack_failures_total += 1,
                StatusEvent::ServerUnreachable { error } => {
                    counters.last_error = Some(error.clone());
                }
                StatusEvent::PermissionDenied { reason } => {
                    counters.last_error = Some(reason.clone());
                }
                StatusEvent::Stopped => counters.state = CycleState::Stopped,
                StatusEvent::Started { .. } | StatusEvent::CycleCompleted(_) => {}
            }
        }

        log_event(&event);

        if !matches!(event, StatusEvent::CycleStarted) {
            let mut history = lock(&self.history);
            if history.len() == LOG_HISTORY {
                history.pop_back();
            }
            history.push_front(LogLine {
                at: Local::now(),
                text: event.to_string(),
            });
        }

        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn set_state(&self, state: CycleState) {
        lock(&self.counters).state = state;
    }

    /// Consistent copy of all counters
    pub fn snapshot(&self) -> Counters {
        lock(&self.counters).clone()
    }

    /// Most recent rendered events, newest first
    pub fn recent(&self) -> Vec<LogLine> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Live event stream. Slow receivers see `Lagged` rather than stalling the relay.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// A panic elsewhere must not stop reporting
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn log_event(event: &StatusEvent) {
    match event {
        StatusEvent::CycleStarted => debug!("{}", event),
        StatusEvent::CycleCompleted(summary) if summary.is_idle() => debug!("{}", event),
        StatusEvent::MessageFailed { .. } | StatusEvent::AcknowledgeFailed { .. } => {
            warn!("{}", event)
        }
        StatusEvent::ServerUnreachable { .. } | StatusEvent::PermissionDenied { .. } => {
            error!("{}", event)
        }
        _ => info!("{}", event),
    }
}
