//! Background fact-check queue.
//!
//! One worker task drains an unbounded FIFO and keeps exactly one
//! verification in flight. Results go back to the owning session through a
//! [`VerificationSink`] held weakly. A session torn down mid-check lets the
//! verifier call finish and drops the late result.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agora_core::collaborators::FactVerifier;
use agora_core::errors::VerificationError;
use agora_core::ids::MessageId;
use agora_core::model::VerificationStatus;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::ledger::Verdict;

/// One queued check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Message to check.
    pub message_id: MessageId,
    /// Text handed to the verifier.
    pub statement: String,
}

/// Receives the queue's progress for one session.
pub trait VerificationSink: Send + Sync {
    /// Mark the message `checking`. `false` skips the request.
    fn begin(&self, message_id: &MessageId) -> bool;
    /// Record a verdict.
    fn complete(&self, message_id: &MessageId, verdict: Verdict);
    /// Record a failed attempt.
    fn fail(&self, message_id: &MessageId, error: &VerificationError);
}

/// Classify a confidence against the threshold.
pub fn verdict_for(confidence: f64, threshold: f64) -> VerificationStatus {
    if confidence >= threshold {
        VerificationStatus::Verified
    } else {
        VerificationStatus::Contested
    }
}

/// Handle to a running queue. Cloning shares the same worker.
#[derive(Clone)]
pub struct FactCheckQueue {
    tx: mpsc::UnboundedSender<VerificationRequest>,
    pending: Arc<AtomicUsize>,
}

struct Worker {
    verifier: Arc<dyn FactVerifier>,
    sink: Weak<dyn VerificationSink>,
    threshold: f64,
    timeout: Duration,
    pending: Arc<AtomicUsize>,
}

impl FactCheckQueue {
    /// Start the worker. It stops when `cancel` fires or every handle is dropped.
    pub fn spawn(
        verifier: Arc<dyn FactVerifier>,
        sink: Weak<dyn VerificationSink>,
        threshold: f64,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = Worker {
            verifier,
            sink,
            threshold,
            timeout,
            pending: Arc::clone(&pending),
        };
        let _worker = tokio::spawn(worker.run(rx, cancel));
        Self { tx, pending }
    }

    /// Queue a check. `false` once the worker has stopped.
    pub fn enqueue(&self, request: VerificationRequest) -> bool {
        let _ = self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Worker {
    /// The check in flight always runs to completion; cancellation only stops
    /// the worker from taking the next request.
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<VerificationRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            let request = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.process(&request).await;
            let _ = self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        debug!("fact-check worker stopped");
    }

    #[instrument(skip_all, fields(message_id = %request.message_id))]
    async fn process(&self, request: &VerificationRequest) {
        {
            let Some(sink) = self.sink.upgrade() else {
                debug!("session gone, skipping check");
                return;
            };
            if !sink.begin(&request.message_id) {
                debug!("message not checkable, skipping");
                return;
            }
        }

        let verify = self.verifier.verify(&request.statement);
        let result = match time::timeout(self.timeout, verify).await {
            Ok(result) => result,
            Err(_) => Err(VerificationError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        let Some(sink) = self.sink.upgrade() else {
            debug!("session gone, discarding late result");
            return;
        };
        match result {
            Ok(report) => {
                let status = verdict_for(report.confidence, self.threshold);
                info!(confidence = report.confidence, status = %status, "fact check complete");
                sink.complete(
                    &request.message_id,
                    Verdict {
                        status,
                        confidence: Some(report.confidence),
                        sources: report.sources,
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "fact check failed");
                sink.fail(&request.message_id, &e);
            }
        }
    }
}
