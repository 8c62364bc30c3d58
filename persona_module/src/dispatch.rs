//! Background reply pipeline.
//!
//! Admitted events are pushed onto a bounded queue so the webhook can answer
//! Slack right away. A single dispatcher task pulls jobs off the queue and runs
//! each one concurrently: stagger, re-check, generate, post, record.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::InboundEvent;
use crate::gate::{RejectReason, ReplyStage, ResponseGate};
use crate::reply::{ReplyError, ReplyGenerator};
use crate::state_store::ResponseStateStore;

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ReplyJob {
    pub job_id: Uuid,
    pub event: InboundEvent,
    pub thread_id: String,
    pub sender_is_operator: bool,
}

impl ReplyJob {
    pub fn new(event: InboundEvent, thread_id: String, sender_is_operator: bool) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            event,
            thread_id,
            sender_is_operator,
        }
    }
}

#[derive(Debug)]
pub enum ReplyOutcome {
    Posted { text: String, turn_count: u32 },
    Rejected(RejectReason),
    Failed(ReplyError),
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Posted { .. } => "posted",
            ReplyOutcome::Rejected(_) => "rejected",
            ReplyOutcome::Failed(_) => "failed",
        }
    }
}

pub struct ReplyPipeline {
    gate: Arc<ResponseGate>,
    generator: ReplyGenerator,
    store: Arc<dyn ResponseStateStore>,
}

impl ReplyPipeline {
    pub fn new(
        gate: Arc<ResponseGate>,
        generator: ReplyGenerator,
        store: Arc<dyn ResponseStateStore>,
    ) -> Self {
        Self {
            gate,
            generator,
            store,
        }
    }

    /// Drive one admitted job to completion. Counters change only after the
    /// reply was posted.
    pub async fn run(&self, job: ReplyJob) -> ReplyOutcome {
        let delay = self.gate.stagger_delay();
        debug!(
            job_id = %job.job_id,
            stage = ReplyStage::Staggering.as_str(),
            delay_ms = delay.as_millis() as u64,
            "staggering reply"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Err(reason) = self.gate.recheck(&job.event, Utc::now()) {
            info!(
                job_id = %job.job_id,
                thread_id = %job.thread_id,
                outcome = "rejected",
                reason = reason.as_str(),
                "reply dropped after stagger"
            );
            return ReplyOutcome::Rejected(reason);
        }

        debug!(
            job_id = %job.job_id,
            stage = ReplyStage::Generating.as_str(),
            "generating reply"
        );
        let result = self
            .generator
            .generate_and_post(
                &job.event.text,
                job.sender_is_operator,
                &job.event.channel_id,
                &job.thread_id,
            )
            .await;

        match result {
            Ok(text) => {
                let profile = self.gate.profile();
                let state = self.store.record_reply(
                    &profile.id,
                    &job.thread_id,
                    &job.event.ts,
                    Utc::now(),
                    profile.cooldown,
                );
                info!(
                    job_id = %job.job_id,
                    thread_id = %job.thread_id,
                    stage = ReplyStage::Posted.as_str(),
                    outcome = "posted",
                    turn_count = state.turn_count,
                    "reply posted"
                );
                ReplyOutcome::Posted {
                    text,
                    turn_count: state.turn_count,
                }
            }
            Err(err) => {
                error!(
                    job_id = %job.job_id,
                    thread_id = %job.thread_id,
                    outcome = "failed",
                    error_kind = err.kind(),
                    "reply failed: {}",
                    err
                );
                ReplyOutcome::Failed(err)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("reply queue is full")]
    QueueFull,
    #[error("reply queue is closed")]
    Closed,
}

/// Producer half handed to the webhook handlers.
#[derive(Clone)]
pub struct ReplyDispatcher {
    sender: mpsc::Sender<ReplyJob>,
    capacity: usize,
}

impl ReplyDispatcher {
    pub fn try_dispatch(&self, job: ReplyJob) -> Result<(), DispatchError> {
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}

pub struct DispatcherControl {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DispatcherControl {
    /// Stop accepting jobs, then finish everything queued or in flight.
    pub async fn stop_and_join(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.handle.await {
            warn!("reply dispatcher join failed: {}", err);
        }
    }
}

pub fn spawn_reply_dispatcher(
    pipeline: Arc<ReplyPipeline>,
    capacity: usize,
) -> (ReplyDispatcher, DispatcherControl) {
    let capacity = capacity.max(1);
    let (sender, mut receiver) = mpsc::channel::<ReplyJob>(capacity);
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    let pipeline = pipeline.clone();
                    in_flight.spawn(async move { pipeline.run(job).await });
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!("reply task panicked: {}", err);
                    }
                }
            }
        }

        receiver.close();
        while let Some(job) = receiver.recv().await {
            let pipeline = pipeline.clone();
            in_flight.spawn(async move { pipeline.run(job).await });
        }
        let draining = in_flight.len();
        if draining > 0 {
            info!("draining {} in-flight replies", draining);
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!("reply task panicked: {}", err);
            }
        }
        info!("reply dispatcher stopped");
    });

    (
        ReplyDispatcher { sender, capacity },
        DispatcherControl { stop_tx, handle },
    )
}
