//! The poll loop: fetch pending messages, send each one, acknowledge what was sent.
//!
//! Cycles start on a fixed cadence measured from the start of the previous cycle. A cycle is
//! awaited inline, so a slow cycle delays the next one instead of overlapping it. Shutdown is
//! only observed between cycles; a cycle in progress always runs to completion.

use crate::config::Config;
use crate::dedup::DedupGuard;
use crate::error::Result;
use crate::messages::{DeliveryResult, PendingMessage};
use crate::queue::Queue;
use crate::status::{
    Counters, CycleState, CycleSummary, StatusEvent, StatusReporter, PREVIEW_CHARS,
};
use crate::transmitter::Transmitter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub struct PollLoop<Q, T> {
    queue: Q,
    transmitter: T,
    dedup: DedupGuard,
    reporter: Arc<StatusReporter>,
    server: String,
    interval: Duration,
    reack_duplicates: bool,
}

impl<Q: Queue, T: Transmitter> PollLoop<Q, T> {
    pub fn new(config: &Config, queue: Q, transmitter: T, reporter: Arc<StatusReporter>) -> Self {
        Self {
            queue,
            transmitter,
            dedup: DedupGuard::new(config.dedup_retention(), config.dedup_max_entries),
            reporter,
            server: config.server_address.clone(),
            interval: config.poll_interval(),
            reack_duplicates: config.reack_duplicates,
        }
    }

    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.reporter
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    /// Go/no-go check on the transmitter. Reports `PermissionDenied` on failure.
    pub async fn ready(&self) -> Result<()> {
        if let Err(e) = self.transmitter.ready().await {
            self.reporter.report(StatusEvent::PermissionDenied {
                reason: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    /// Run one fetch -> dispatch -> acknowledge pass.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        self.reporter.report(StatusEvent::CycleStarted);
        self.reporter.set_state(CycleState::Fetching);

        let mut summary = CycleSummary::default();

        match self.queue.fetch().await {
            Ok(messages) => {
                summary.fetched = messages.len();
                self.reporter.set_state(CycleState::Dispatching);
                for msg in &messages {
                    if let Some(result) = self.dispatch(msg, &mut summary).await {
                        summary.results.push(result);
                    }
                }
            }
            Err(e) => {
                let error = e.to_string();
                summary.fetch_failed = true;
                summary.last_error = Some(error.clone());
                self.reporter.report(StatusEvent::ServerUnreachable { error });
            }
        }

        self.reporter.set_state(CycleState::Idle);
        self.reporter.report(StatusEvent::CycleCompleted(summary.clone()));
        summary
    }

    /// Handle one message. Returns `None` when it was suppressed as a duplicate.
    async fn dispatch(
        &mut self,
        msg: &PendingMessage,
        summary: &mut CycleSummary,
    ) -> Option<DeliveryResult> {
        if self.dedup.seen(&msg.id) {
            summary.duplicates += 1;
            self.reporter.report(StatusEvent::DuplicateSkipped { id: msg.id.clone() });
            if self.reack_duplicates {
                self.acknowledge(&msg.id, summary).await;
            }
            return None;
        }

        match self.transmitter.send(&msg.destination, &msg.body).await {
            Ok(()) => {
                // Remembered before acknowledging: a lost ack must not cause a second send
                self.dedup.remember(&msg.id);
                summary.sent += 1;
                self.reporter.report(StatusEvent::MessageSent {
                    destination: msg.destination.clone(),
                    preview: msg.preview(PREVIEW_CHARS),
                });
                self.acknowledge(&msg.id, summary).await;
                Some(DeliveryResult::sent(&msg.id))
            }
            Err(e) => {
                let error = e.to_string();
                summary.failed += 1;
                summary.last_error = Some(error.clone());
                self.reporter.report(StatusEvent::MessageFailed {
                    destination: msg.destination.clone(),
                    error: error.clone(),
                });
                Some(DeliveryResult::failed(&msg.id, error))
            }
        }
    }

    /// Best effort; failures are reported and otherwise ignored.
    async fn acknowledge(&self, id: &str, summary: &mut CycleSummary) {
        if let Err(e) = self.queue.acknowledge(id).await {
            summary.ack_failures += 1;
            self.reporter.report(StatusEvent::AcknowledgeFailed {
                id: id.to_string(),
                error: e.to_string(),
            });
        }
    }

    /// Run cycles until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Counters {
        self.reporter.report(StatusEvent::Started {
            server: self.server.clone(),
            interval_ms: self.interval.as_millis() as u64,
        });

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let summary = self.run_cycle().await;
            debug!("Cycle finished: {}", summary);
        }

        info!("Shutdown requested, stopping poll loop");
        self.reporter.set_state(CycleState::Stopped);
        self.reporter.report(StatusEvent::Stopped);
        self.reporter.snapshot()
    }
}

impl<Q, T> PollLoop<Q, T>
where
    Q: Queue + 'static,
    T: Transmitter + 'static,
{
    /// Run the loop on its own task
    pub fn spawn(self) -> RelayHandle {
        let (tx, rx) = watch::channel(false);
        let reporter = Arc::clone(&self.reporter);
        let task = tokio::spawn(self.run(rx));
        RelayHandle {
            shutdown: tx,
            task,
            reporter,
        }
    }
}

/// Handle to a spawned [`PollLoop`]
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Counters>,
    reporter: Arc<StatusReporter>,
}

impl RelayHandle {
    pub fn reporter(&self) -> &Arc<StatusReporter> {
        &self.reporter
    }

    /// Stop scheduling cycles and wait for an in-flight cycle to finish
    pub async fn shutdown(self) -> Counters {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(counters) => counters,
            Err(e) => {
                tracing::error!("Poll loop task failed: {}", e);
                self.reporter.snapshot()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedQueue {
        batch: Vec<PendingMessage>,
        acked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Queue for FixedQueue {
        async fn fetch(&self) -> Result<Vec<PendingMessage>> {
            Ok(self.batch.clone())
        }

        async fn acknowledge(&self, id: &str) -> Result<()> {
            self.acked.lock().unwrap().push(id.to_string());
            Err(Error::Transport("ack lost".to_string()))
        }
    }

    struct OkTransmitter;

    #[async_trait]
    impl Transmitter for OkTransmitter {
        async fn send(&self, _destination: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    struct DeniedTransmitter;

    #[async_trait]
    impl Transmitter for DeniedTransmitter {
        async fn ready(&self) -> Result<()> {
            Err(Error::PermissionDenied("no SEND_SMS".to_string()))
        }

        async fn send(&self, _destination: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn relay<T: Transmitter>(batch: Vec<PendingMessage>, tx: T) -> PollLoop<FixedQueue, T> {
        let queue = FixedQueue {
            batch,
            acked: Mutex::new(Vec::new()),
        };
        PollLoop::new(
            &Config::for_test("http://localhost:5000"),
            queue,
            tx,
            Arc::new(StatusReporter::new()),
        )
    }

    #[tokio::test]
    async fn test_lost_ack_still_remembered() {
        let mut relay = relay(vec![PendingMessage::new("1", "+1", "hi")], OkTransmitter);

        let first = relay.run_cycle().await;
        assert_eq!(first.sent, 1);
        assert_eq!(first.ack_failures, 1);
        assert_eq!(relay.dedup().len(), 1);

        let second = relay.run_cycle().await;
        assert_eq!(second.sent, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(relay.queue.acked.lock().unwrap().len(), 2);
        assert_eq!(relay.reporter().snapshot().ack_failures_total, 2);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch_sent_once() {
        let msg = PendingMessage::new("7", "+1", "hi");
        let mut relay = relay(vec![msg.clone(), msg], OkTransmitter);
        let summary = relay.run_cycle().await;
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.duplicates, 1);
    }

    #[tokio::test]
    async fn test_no_reack_when_disabled() {
        let mut relay = relay(vec![PendingMessage::new("1", "+1", "hi")], OkTransmitter);
        relay.reack_duplicates = false;
        relay.run_cycle().await;
        relay.run_cycle().await;
        assert_eq!(relay.queue.acked.lock().unwrap().as_slice(), ["1"]);
    }

    #[tokio::test]
    async fn test_ready_gate_reports_permission_denied() {
        let relay = relay(Vec::new(), DeniedTransmitter);
        let mut rx = relay.reporter().subscribe();

        assert!(matches!(relay.ready().await, Err(Error::PermissionDenied(_))));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StatusEvent::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_fetch_is_idle() {
        let mut relay = relay(Vec::new(), OkTransmitter);
        let summary = relay.run_cycle().await;
        assert!(summary.is_idle());
        assert_eq!(relay.reporter().snapshot().state, CycleState::Idle);
    }
}
