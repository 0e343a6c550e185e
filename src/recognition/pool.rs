//! Fixed-size recognition worker pool
//!
//! Every worker owns its own recognizer instance and runs the same loop:
//! wait for a ROI or cancellation, recognize, keep the best candidate,
//! normalize, validate, publish. Invalid or empty readings leave no trace
//! beyond a counter.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::shared::{guarded, CancelToken, PipelineStats, ResultAggregator};
use crate::vision::{best_candidate, normalize_plate, Candidate, PlateValidator, Roi, TextRecognizer};

/// What a worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for work
    Idle,
    /// Inside the recognizer
    Recognizing,
    /// Writing an accepted reading to the aggregator
    Publishing,
    /// Exited
    Stopped,
}

/// Why a recognition produced no reading
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The recognizer returned nothing
    NoCandidates,
    /// The best candidate scored below the configured floor
    LowConfidence(f32),
    /// The normalized text is not a plate
    InvalidFormat(String),
}

/// Everything a worker shares with the rest of the pipeline
#[derive(Clone)]
pub struct PoolContext {
    pub aggregator: Arc<ResultAggregator>,
    pub validator: Arc<dyn PlateValidator>,
    pub stats: Arc<PipelineStats>,
    /// Candidates scoring below this are ignored
    pub min_confidence: f32,
}

impl PoolContext {
    /// Reduce recognizer output to one publishable `(text, confidence)`
    pub fn evaluate(&self, candidates: Vec<Candidate>) -> Result<(String, f32), Rejection> {
        let best = best_candidate(candidates).ok_or(Rejection::NoCandidates)?;
        if best.confidence < self.min_confidence {
            return Err(Rejection::LowConfidence(best.confidence));
        }
        let text = normalize_plate(&best.text);
        if !self.validator.is_valid(&text) {
            return Err(Rejection::InvalidFormat(text));
        }
        Ok((text, best.confidence))
    }
}

/// Outcome of [`RecognitionPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Workers that exited and were joined
    pub joined: usize,
    /// Workers still inside a recognizer call when the grace period ran out
    pub detached: usize,
}

struct WorkerHandle {
    id: usize,
    thread: Option<JoinHandle<()>>,
    state: Arc<Mutex<WorkerState>>,
}

/// A fixed set of recognition workers draining one queue
pub struct RecognitionPool {
    workers: Vec<WorkerHandle>,
    cancel: CancelToken,
    /// Disconnects once every worker has exited
    all_stopped: Receiver<()>,
    grace: Duration,
    shut_down: bool,
}

impl RecognitionPool {
    /// Start `count` workers on `queue`. `make_recognizer` is called once per
    /// worker with the worker index.
    pub fn spawn<F>(
        count: usize,
        queue: Receiver<Roi>,
        context: PoolContext,
        cancel: CancelToken,
        grace: Duration,
        mut make_recognizer: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn TextRecognizer>>,
    {
        let (stopped_tx, all_stopped) = bounded::<()>(0);
        // Dropping a half-built pool cancels and joins the workers started so far
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            cancel: cancel.clone(),
            all_stopped,
            grace,
            shut_down: false,
        };

        let mut started = Ok(());
        for id in 0..count {
            let spawned = make_recognizer(id)
                .with_context(|| format!("failed to create recognizer for worker {}", id))
                .and_then(|recognizer| {
                    let state = Arc::new(Mutex::new(WorkerState::Idle));
                    let worker = Worker {
                        id,
                        recognizer,
                        queue: queue.clone(),
                        context: context.clone(),
                        cancel: cancel.clone(),
                        state: state.clone(),
                        _stopped: stopped_tx.clone(),
                    };
                    let thread = std::thread::Builder::new()
                        .name(format!("recognition-{}", id))
                        .spawn(move || worker.run())
                        .context("failed to spawn recognition worker")?;
                    Ok(WorkerHandle {
                        id,
                        thread: Some(thread),
                        state,
                    })
                });
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    started = Err(e);
                    break;
                }
            }
        }
        // Only workers may hold senders, or shutdown could never observe them all gone
        drop(stopped_tx);
        started?;

        info!(workers = count, "recognition pool started");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current state of every worker, by index
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| *w.state.lock()).collect()
    }

    /// Cancel all workers and wait up to the grace period for them to exit.
    ///
    /// Idle workers leave immediately. A worker inside a recognizer call
    /// finishes it and discards the result; one that is still busy when the
    /// grace period runs out is detached.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            return ShutdownReport::default();
        }
        self.shut_down = true;
        self.cancel.cancel();

        let deadline = Instant::now() + self.grace;
        let all_exited = loop {
            match self.all_stopped.recv_deadline(deadline) {
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
                Ok(()) => {}
            }
        };

        let mut report = ShutdownReport::default();
        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            if all_exited || thread.is_finished() {
                if thread.join().is_err() {
                    warn!(worker = worker.id, "recognition worker panicked");
                }
                report.joined += 1;
            } else {
                warn!(
                    worker = worker.id,
                    grace_ms = self.grace.as_millis() as u64,
                    "recognition worker still busy after grace period, detaching"
                );
                report.detached += 1;
            }
        }

        info!(joined = report.joined, detached = report.detached, "recognition pool stopped");
        report
    }
}

impl Drop for RecognitionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    id: usize,
    recognizer: Box<dyn TextRecognizer>,
    queue: Receiver<Roi>,
    context: PoolContext,
    cancel: CancelToken,
    state: Arc<Mutex<WorkerState>>,
    /// Dropped on exit so the pool can tell when every worker is gone
    _stopped: Sender<()>,
}

impl Worker {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    fn run(mut self) {
        debug!(worker = self.id, "recognition worker started");

        loop {
            self.set_state(WorkerState::Idle);

            let roi = select! {
                recv(self.cancel.signal()) -> _ => break,
                recv(self.queue) -> msg => match msg {
                    Ok(roi) => roi,
                    // Dispatcher dropped: no more work will arrive
                    Err(_) => break,
                },
            };
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(WorkerState::Recognizing);
            let recognizer = &mut self.recognizer;
            let result = guarded(|| recognizer.recognize(&roi.crop));

            if self.cancel.is_cancelled() {
                debug!(worker = self.id, "shutdown during recognition, discarding result");
                break;
            }

            let candidates = match result {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "text recognizer failed");
                    self.context.stats.collaborator_failed();
                    continue;
                }
            };

            match self.context.evaluate(candidates) {
                Ok((text, confidence)) => {
                    self.set_state(WorkerState::Publishing);
                    let reading = self.context.aggregator.publish(&text, confidence);
                    self.context.stats.reading_accepted();
                    info!(
                        worker = self.id,
                        plate = %reading.text,
                        confidence = reading.confidence,
                        status = reading.status.label(),
                        frame = roi.frame_sequence,
                        "plate recognized"
                    );
                }
                Err(rejection) => {
                    self.context.stats.reading_rejected();
                    debug!(worker = self.id, ?rejection, frame = roi.frame_sequence, "reading rejected");
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        debug!(worker = self.id, "recognition worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::MatchStatus;
    use crate::testing::{plate_roi, wait_for, EncodedPlateRecognizer, ScriptedRecognizer};
    use crate::vision::BrazilianPlateFormat;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context(capacity: usize) -> PoolContext {
        PoolContext {
            aggregator: Arc::new(ResultAggregator::new(capacity)),
            validator: Arc::new(BrazilianPlateFormat),
            stats: Arc::new(PipelineStats::new()),
            min_confidence: 0.0,
        }
    }

    #[test]
    fn test_evaluate_picks_best_and_normalizes() {
        let ctx = context(10);
        let result = ctx.evaluate(vec![
            Candidate::new("xyz-9999", 0.3),
            Candidate::new("abc-1234", 0.9),
        ]);
        assert_eq!(result, Ok(("ABC1234".to_string(), 0.9)));
    }

    #[test]
    fn test_evaluate_rejections() {
        let mut ctx = context(10);
        assert_eq!(ctx.evaluate(vec![]), Err(Rejection::NoCandidates));
        assert_eq!(
            ctx.evaluate(vec![Candidate::new("AB12345", 0.9)]),
            Err(Rejection::InvalidFormat("AB12345".to_string()))
        );

        // Best candidate invalid: no fallback to a weaker valid one
        assert!(ctx
            .evaluate(vec![Candidate::new("ABC1234", 0.2), Candidate::new("HELLO", 0.8)])
            .is_err());

        ctx.min_confidence = 0.5;
        assert_eq!(
            ctx.evaluate(vec![Candidate::new("ABC1234", 0.4)]),
            Err(Rejection::LowConfidence(0.4))
        );
    }

    #[test]
    fn test_invalid_reading_has_no_side_effect() {
        let ctx = context(10);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool = RecognitionPool::spawn(
            1,
            rx,
            ctx.clone(),
            CancelToken::new(),
            Duration::from_secs(2),
            |_| Ok(Box::new(ScriptedRecognizer::always(vec![Candidate::new("NOPE", 0.9)])) as _),
        )
        .unwrap();

        tx.send(plate_roi(0)).unwrap();
        wait_for(|| ctx.stats.snapshot().readings_rejected == 1);

        assert!(ctx.aggregator.current_match().is_none());
        assert!(ctx.aggregator.history().is_empty());
        assert_eq!(pool.shutdown().joined, 1);
    }

    #[test]
    fn test_recognizer_failure_keeps_worker_alive() {
        let ctx = context(10);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool = RecognitionPool::spawn(
            1,
            rx,
            ctx.clone(),
            CancelToken::new(),
            Duration::from_secs(2),
            |_| Ok(Box::new(ScriptedRecognizer::fail_then(vec![Candidate::new("ABC1234", 0.9)])) as _),
        )
        .unwrap();

        tx.send(plate_roi(0)).unwrap();
        tx.send(plate_roi(1)).unwrap();
        wait_for(|| ctx.stats.snapshot().readings_accepted == 1);

        assert_eq!(ctx.stats.snapshot().collaborator_failures, 1);
        assert_eq!(ctx.aggregator.current_match().unwrap().text, "ABC1234");
        pool.shutdown();
    }

    #[test]
    fn test_two_workers_publish_every_reading_once() {
        let ctx = context(100);
        ctx.aggregator.set_target("ABC0042");
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool = RecognitionPool::spawn(
            2,
            rx,
            ctx.clone(),
            CancelToken::new(),
            Duration::from_secs(2),
            |_| Ok(Box::new(EncodedPlateRecognizer) as _),
        )
        .unwrap();
        assert_eq!(pool.len(), 2);

        // Concurrent poller checking that (text, status) is never torn
        let done = Arc::new(AtomicBool::new(false));
        let poller = {
            let aggregator = ctx.aggregator.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut polls = 0u64;
                while !done.load(Ordering::Relaxed) {
                    if let Some(current) = aggregator.snapshot().current {
                        let expected = if current.text == "ABC0042" {
                            MatchStatus::Match
                        } else {
                            MatchStatus::Mismatch
                        };
                        assert_eq!(current.status, expected);
                    }
                    polls += 1;
                }
                polls
            })
        };

        for i in 0..100 {
            tx.send(plate_roi(i)).unwrap();
        }
        wait_for(|| ctx.aggregator.snapshot().total_published == 100);
        done.store(true, Ordering::Relaxed);
        assert!(poller.join().unwrap() > 0);

        let history = ctx.aggregator.history();
        assert_eq!(history.len(), 100);
        let distinct: HashSet<&str> = history.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(distinct.len(), 100);
        assert_eq!(
            history.iter().filter(|r| r.status == MatchStatus::Match).count(),
            1
        );
        assert_eq!(ctx.stats.snapshot().readings_accepted, 100);

        let report = pool.shutdown();
        assert_eq!(report, ShutdownReport { joined: 2, detached: 0 });
        assert_eq!(pool.worker_states(), vec![WorkerState::Stopped; 2]);
    }

    #[test]
    fn test_shutdown_while_idle() {
        let ctx = context(10);
        let (_tx, rx) = crossbeam_channel::unbounded::<Roi>();
        let mut pool = RecognitionPool::spawn(
            2,
            rx,
            ctx,
            CancelToken::new(),
            Duration::from_secs(2),
            |_| Ok(Box::new(EncodedPlateRecognizer) as _),
        )
        .unwrap();

        let start = Instant::now();
        let report = pool.shutdown();
        assert_eq!(report.joined, 2);
        assert!(start.elapsed() < Duration::from_secs(1));

        // Second call is a no-op
        assert_eq!(pool.shutdown(), ShutdownReport::default());
    }

    #[test]
    fn test_shutdown_mid_recognition_discards_result() {
        let ctx = context(10);
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();
        let mut pool = RecognitionPool::spawn(
            1,
            rx,
            ctx.clone(),
            cancel.clone(),
            Duration::from_secs(2),
            |_| {
                Ok(Box::new(
                    ScriptedRecognizer::always(vec![Candidate::new("ABC1234", 0.9)])
                        .with_delay(Duration::from_millis(200)),
                ) as _)
            },
        )
        .unwrap();

        tx.send(plate_roi(0)).unwrap();
        wait_for(|| pool.worker_states()[0] == WorkerState::Recognizing);

        let report = pool.shutdown();
        assert_eq!(report, ShutdownReport { joined: 1, detached: 0 });
        assert!(cancel.is_cancelled());
        assert_eq!(ctx.aggregator.snapshot().total_published, 0);
    }

    #[test]
    fn test_stuck_worker_is_detached_after_grace() {
        let ctx = context(10);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool = RecognitionPool::spawn(
            1,
            rx,
            ctx,
            CancelToken::new(),
            Duration::from_millis(50),
            |_| {
                Ok(Box::new(ScriptedRecognizer::always(vec![]).with_delay(Duration::from_secs(3))) as _)
            },
        )
        .unwrap();

        tx.send(plate_roi(0)).unwrap();
        wait_for(|| pool.worker_states()[0] == WorkerState::Recognizing);

        let start = Instant::now();
        let report = pool.shutdown();
        assert_eq!(report, ShutdownReport { joined: 0, detached: 1 });
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_workers_exit_when_queue_closes() {
        let ctx = context(10);
        let (tx, rx) = crossbeam_channel::unbounded::<Roi>();
        let pool = RecognitionPool::spawn(
            2,
            rx,
            ctx,
            CancelToken::new(),
            Duration::from_secs(2),
            |_| Ok(Box::new(EncodedPlateRecognizer) as _),
        )
        .unwrap();

        drop(tx);
        wait_for(|| pool.worker_states().iter().all(|s| *s == WorkerState::Stopped));
    }

    #[test]
    fn test_recognizer_factory_error_is_reported() {
        let (_tx, rx) = crossbeam_channel::unbounded::<Roi>();
        let result = RecognitionPool::spawn(
            2,
            rx,
            context(10),
            CancelToken::new(),
            Duration::from_secs(2),
            |id| {
                if id == 1 {
                    anyhow::bail!("model missing")
                }
                Ok(Box::new(EncodedPlateRecognizer) as _)
            },
        );
        assert!(result.is_err());
    }
}
