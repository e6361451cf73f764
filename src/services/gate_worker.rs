//! Gate command worker - processes gate commands off the frame loop
//!
//! The pipeline runs on a blocking thread and must never wait on relay I/O.
//! It enqueues commands through `GateCmdSender` (fire-and-forget `try_send`),
//! and the worker performs the actual network operations.

use crate::domain::types::Decision;
use crate::infra::metrics::Metrics;
use crate::services::gate::{GateAction, GateCommand};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A gate command to be processed by the worker
#[derive(Debug)]
pub struct GateCmd {
    /// Canonical plate that triggered the command
    pub plate: String,
    pub action: GateAction,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Synchronous trigger used by the pipeline for each emitted event
pub trait GateTrigger: Send + Sync {
    fn trigger(&self, plate: &str, decision: Decision);
}

/// Channel-backed trigger. Never blocks; drops commands when the queue is full.
pub struct GateCmdSender {
    tx: mpsc::Sender<GateCmd>,
    metrics: Arc<Metrics>,
}

impl GateCmdSender {
    pub fn new(tx: mpsc::Sender<GateCmd>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }
}

impl GateTrigger for GateCmdSender {
    fn trigger(&self, plate: &str, decision: Decision) {
        let cmd = GateCmd {
            plate: plate.to_string(),
            action: GateAction::from(decision),
            enqueued_at: Instant::now(),
        };
        if let Err(e) = self.tx.try_send(cmd) {
            self.metrics.record_gate_cmd_dropped();
            warn!(plate = %plate, error = %e, "gate_cmd_dropped");
        }
    }
}

/// Worker that processes gate commands asynchronously
pub struct GateCmdWorker {
    gate: Arc<dyn GateCommand>,
    cmd_rx: mpsc::Receiver<GateCmd>,
    metrics: Arc<Metrics>,
}

impl GateCmdWorker {
    pub fn new(
        gate: Arc<dyn GateCommand>,
        cmd_rx: mpsc::Receiver<GateCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { gate, cmd_rx, metrics }
    }

    /// Run the worker, processing commands until every sender is dropped
    pub async fn run(mut self) {
        info!("gate_cmd_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;

            let send_start = Instant::now();
            let send_latency_us = self.gate.send(&cmd.plate, cmd.action).await;
            let total_send_us = send_start.elapsed().as_micros() as u64;

            info!(
                plate = %cmd.plate,
                action = %cmd.action.as_str(),
                queue_delay_us = %queue_delay_us,
                send_latency_us = %send_latency_us,
                total_send_us = %total_send_us,
                "gate_cmd_processed"
            );

            self.metrics.record_gate_queue_delay(queue_delay_us);
            self.metrics.record_gate_command();

            // backlog
            if queue_delay_us > 1000 {
                warn!(plate = %cmd.plate, queue_delay_us = %queue_delay_us, "gate_cmd_queue_delay_high");
            }
        }

        info!("gate_cmd_worker_stopped");
    }
}

/// Create a gate command channel and worker
///
/// Returns the sender (for the pipeline) and the worker (to be spawned)
pub fn create_gate_worker(
    gate: Arc<dyn GateCommand>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (GateCmdSender, GateCmdWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let worker = GateCmdWorker::new(gate, cmd_rx, metrics.clone());
    (GateCmdSender::new(cmd_tx, metrics), worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingGate {
        sent: Mutex<Vec<(String, GateAction)>>,
    }

    #[async_trait]
    impl GateCommand for RecordingGate {
        async fn send(&self, plate: &str, action: GateAction) -> u64 {
            self.sent.lock().push((plate.to_string(), action));
            0
        }
    }

    #[tokio::test]
    async fn test_worker_sends_enqueued_commands() {
        let gate = Arc::new(RecordingGate::default());
        let metrics = Arc::new(Metrics::new());
        let (sender, worker) = create_gate_worker(gate.clone(), metrics.clone(), 8);
        let handle = tokio::spawn(worker.run());

        sender.trigger("MH20CP0688", Decision::Allowed);
        sender.trigger("MH20GV3260", Decision::Blocked);
        drop(sender);
        handle.await.unwrap();

        let sent = gate.sent.lock().clone();
        assert_eq!(
            sent,
            vec![
                ("MH20CP0688".to_string(), GateAction::Open),
                ("MH20GV3260".to_string(), GateAction::Block),
            ]
        );
        assert_eq!(metrics.report().gate_commands_sent, 2);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(Metrics::new());
        let (tx, _rx) = mpsc::channel(1);
        let sender = GateCmdSender::new(tx, metrics.clone());

        sender.trigger("MH20CP0688", Decision::Allowed);
        sender.trigger("MH20CP0688", Decision::Allowed);
        assert_eq!(metrics.gate_cmds_dropped(), 1);
    }
}
