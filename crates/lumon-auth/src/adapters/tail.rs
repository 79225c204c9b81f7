//! # Background Tail Dispatcher
//!
//! Fire-and-forget side effects (audit entries, session activity stamps)
//! are queued here instead of being awaited on
//! the request path. A single worker task drains the queue in order.
//!
//! Failures are logged and counted in `lumon_auth_tail_failures_total`;
//! they never reach the caller that enqueued the job.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{AuditEvent, SessionId};
use crate::ports::{AuditSink, SessionRepository};
use crate::service::deadline::with_deadline;

/// A deferred side effect.
#[derive(Debug, Clone)]
pub enum TailJob {
    Audit(AuditEvent),
    TouchSession { id: SessionId, at: DateTime<Utc> },
}

impl TailJob {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            TailJob::Audit(_) => "audit",
            TailJob::TouchSession { .. } => "touch_session",
        }
    }
}

/// Where tail jobs land.
#[derive(Clone)]
pub struct TailTargets {
    pub sessions: Arc<dyn SessionRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub timeout: Duration,
}

enum Message {
    Job(TailJob),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the tail worker.
pub struct TailDispatcher {
    tx: mpsc::UnboundedSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TailDispatcher {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(targets: TailTargets) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(targets, rx));
        Arc::new(Self {
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a job. Never blocks and never fails the caller.
    pub fn dispatch(&self, job: TailJob) {
        let kind = job.kind();
        if self.tx.send(Message::Job(job)).is_err() {
            tracing::warn!(job = kind, "Tail worker stopped; dropping job");
            lumon_telemetry::metric_inc!(lumon_telemetry::TAIL_FAILURES, &[kind]);
        }
    }

    /// Resolves once every job dispatched before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            // Err only if the worker is gone, in which case nothing is pending.
            let _ = done_rx.await;
        }
    }

    /// Drain everything queued so far, then stop the worker.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Tail worker panicked");
            }
        }
    }
}

async fn run_worker(targets: TailTargets, mut rx: mpsc::UnboundedReceiver<Message>) {
    tracing::debug!("Tail worker started");
    while let Some(message) = rx.recv().await {
        match message {
            Message::Job(job) => run_job(&targets, job).await,
            Message::Flush(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => break,
        }
    }
    tracing::debug!("Tail worker stopped");
}

async fn run_job(targets: &TailTargets, job: TailJob) {
    let kind = job.kind();
    let result = match job {
        TailJob::Audit(event) => {
            with_deadline(targets.timeout, "audit.record", targets.audit.record(event)).await
        }
        TailJob::TouchSession { id, at } => {
            with_deadline(targets.timeout, "session.touch", targets.sessions.touch(id, at)).await
        }
    };

    if let Err(error) = result {
        tracing::warn!(job = kind, error = %error, "Tail job failed");
        lumon_telemetry::metric_inc!(lumon_telemetry::TAIL_FAILURES, &[kind]);
    }
}
