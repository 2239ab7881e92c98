//! Delivery of stage dispatches.
//!
//! [`LocalDriver`] runs every hand-off inline from a FIFO queue.
//! [`ChannelDriver`] serializes each hand-off to its JSON message and lets a
//! pool of workers pick them up, so no stage shares a call stack with the
//! stage that produced its input.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::EnrichedRecord;
use crate::pipeline::boundary::{ItemIndex, ResultSink};
use crate::pipeline::message::{Dispatch, StageMessage};
use crate::pipeline::report::RunReport;
use crate::pipeline::stages::{execute_stage, StageContext};

/// Run one stage, deliver its final records, and return its forwards.
///
/// A failing unit is logged and counted; it never stops the run. A failed
/// record also keeps its source item from being marked processed.
async fn process(
    ctx: &StageContext,
    sink: &dyn ResultSink,
    message: &StageMessage,
    report: &mut RunReport,
) -> Vec<StageMessage> {
    let outcome = match execute_stage(ctx, message).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                run_id = %message.run_id,
                stage = message.stage,
                unit = %message.unit_label(),
                error = %err,
                "stage unit failed, skipping"
            );
            report.failures += 1;
            if message.stage == 3 {
                report.failed_items.insert(message.source_item_id.clone());
            }
            return Vec::new();
        }
    };
    report.merge(outcome.tally);

    let mut forwards = Vec::new();
    for dispatch in outcome.dispatches {
        match dispatch {
            Dispatch::Forward(next) => forwards.push(next),
            Dispatch::Final(record) => deliver_final(sink, message, &record, report).await,
        }
    }
    forwards
}

async fn deliver_final(sink: &dyn ResultSink, message: &StageMessage, record: &EnrichedRecord, report: &mut RunReport) {
    match sink.store_final(record).await {
        Ok(outcome) if outcome.was_stored() => report.final_results_stored += 1,
        Ok(_) => {
            debug!(row_id = %record.row_id, sppin_key = %record.sppin_key, "record already committed, discarding");
            report.final_results_existing += 1;
        }
        Err(err) => {
            warn!(
                sppin_key = %record.sppin_key,
                scientific_name = %record.record.scientific_name,
                error = %err,
                "failed to store final result"
            );
            report.failures += 1;
            report.failed_items.insert(message.source_item_id.clone());
        }
    }
}

/// Sequential, in-process delivery.
#[derive(Clone)]
pub struct LocalDriver {
    ctx: StageContext,
    sink: Arc<dyn ResultSink>,
}

impl LocalDriver {
    pub fn new(ctx: StageContext, sink: Arc<dyn ResultSink>) -> Self {
        Self { ctx, sink }
    }

    /// Drive `start` and everything it produces to completion.
    pub async fn run(&self, start: StageMessage) -> RunReport {
        let mut report = RunReport::default();
        let mut queue = VecDeque::from([start]);

        while let Some(message) = queue.pop_front() {
            let forwards = process(&self.ctx, self.sink.as_ref(), &message, &mut report).await;
            queue.extend(forwards);
        }

        info!(
            items = report.items_forwarded,
            records = report.records_forwarded,
            stored = report.final_results_stored,
            failures = report.failures,
            "local run finished"
        );
        report
    }
}

/// Queue-backed delivery over a tokio channel of JSON messages.
#[derive(Clone)]
pub struct ChannelDriver {
    ctx: StageContext,
    sink: Arc<dyn ResultSink>,
    workers: usize,
}

impl ChannelDriver {
    pub fn new(ctx: StageContext, sink: Arc<dyn ResultSink>, workers: usize) -> Self {
        Self {
            ctx,
            sink,
            workers: workers.max(1),
        }
    }

    /// Drive `start` to completion across the worker pool.
    pub async fn run(&self, start: StageMessage) -> Result<RunReport, serde_json::Error> {
        let (sender, receiver) = mpsc::unbounded_channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        if sender.send(start.to_json()?).is_err() {
            return Ok(RunReport::default());
        }

        let handles = (0..self.workers)
            .map(|worker| {
                let queue = WorkerQueue {
                    sender: sender.clone(),
                    receiver: receiver.clone(),
                    pending: pending.clone(),
                    shutdown_tx: shutdown_tx.clone(),
                    shutdown_rx: shutdown_rx.clone(),
                };
                let ctx = self.ctx.clone();
                let sink = self.sink.clone();
                tokio::spawn(async move { run_worker(worker, ctx, sink, queue).await })
            })
            .collect::<Vec<_>>();
        drop(sender);

        let mut report = RunReport::default();
        for handle in handles {
            match handle.await {
                Ok(worker_report) => report.merge(worker_report),
                Err(err) => {
                    error!(error = %err, "pipeline worker panicked");
                    report.failures += 1;
                }
            }
        }

        info!(
            workers = self.workers,
            items = report.items_forwarded,
            records = report.records_forwarded,
            stored = report.final_results_stored,
            failures = report.failures,
            "channel run finished"
        );
        Ok(report)
    }
}

struct WorkerQueue {
    sender: mpsc::UnboundedSender<String>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Messages sent but not yet fully processed.
    pending: Arc<AtomicUsize>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerQueue {
    async fn next(&mut self) -> Option<String> {
        if *self.shutdown_rx.borrow() {
            return None;
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            message = receiver.recv() => message,
            _ = self.shutdown_rx.changed() => None,
        }
    }

    fn push(&self, message: &StageMessage) -> Result<(), serde_json::Error> {
        let json = message.to_json()?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(json).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shutdown_tx.send_replace(true);
        }
    }
}

async fn run_worker(worker: usize, ctx: StageContext, sink: Arc<dyn ResultSink>, mut queue: WorkerQueue) -> RunReport {
    let mut report = RunReport::default();

    while let Some(json) = queue.next().await {
        match StageMessage::from_json(&json) {
            Ok(message) => {
                debug!(worker, stage = message.stage, unit = %message.unit_label(), "worker picked up message");
                for next in process(&ctx, sink.as_ref(), &message, &mut report).await {
                    if let Err(err) = queue.push(&next) {
                        warn!(unit = %next.unit_label(), error = %err, "failed to enqueue stage message");
                        report.failures += 1;
                    }
                }
            }
            Err(err) => {
                warn!(worker, error = %err, "rejected stage message");
                report.failures += 1;
            }
        }
        queue.finish_one();
    }

    report
}

/// Record every item whose stage 2 completed, and none of whose records
/// failed, as processed.
pub async fn mark_completed_items(index: &dyn ItemIndex, report: &RunReport) -> usize {
    for source_item_id in &report.failed_items {
        info!(source_item_id = %source_item_id, "source item has failed records, leaving it processable");
    }

    let mut marked = 0;
    for item in report.items_to_mark() {
        match index.mark_processed(item).await {
            Ok(()) => marked += 1,
            Err(err) => warn!(source_item_id = %item.source_item_id, error = %err, "failed to mark item processed"),
        }
    }
    marked
}
