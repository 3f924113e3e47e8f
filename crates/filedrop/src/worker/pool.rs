use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::processor::{ProcessError, Processor};
use crate::store::{StatusStore, StoreError};
use crate::worker::job::{Job, JobResult};

/// Retry behavior for transiently failing jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `3` means up to 4 invocations.
    pub max_retries: u32,
    /// Base delay, doubled per attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

pub struct WorkerPool {
    job_sender: Sender<Job>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Record ids currently queued or running. Checked at submission time
    /// so no two workers ever process the same record concurrently.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WorkerPool {
    /// Starts `worker_count` worker threads pulling from a shared queue.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(
        store: StatusStore,
        processor: Arc<dyn Processor>,
        worker_count: usize,
        policy: RetryPolicy,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        // Retries re-enter the queue from worker threads; an unbounded
        // channel means a full queue can never deadlock a retrying worker.
        let (job_sender, job_receiver) = unbounded::<Job>();
        let (result_sender, result_receiver) = unbounded::<JobResult>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let retry_tx = job_sender.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_store = store.clone();
            let worker_processor = Arc::clone(&processor);
            let claims = Arc::clone(&in_flight);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    job_rx,
                    retry_tx,
                    result_tx,
                    shutdown_flag,
                    worker_store,
                    worker_processor,
                    policy,
                    claims,
                );
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
            in_flight,
        }
    }

    /// Enqueues a processing request for a record.
    ///
    /// Returns `WorkerError::AlreadyQueued` if a request for the same
    /// record is already queued or running; callers treat that as an
    /// idempotent no-op.
    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        {
            let mut claims = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !claims.insert(job.record_id.clone()) {
                return Err(WorkerError::AlreadyQueued {
                    record_id: job.record_id,
                });
            }
        }

        if self.job_sender.send(job.clone()).is_err() {
            release_claim(&self.in_flight, &job.record_id);
            return Err(WorkerError::ChannelClosed);
        }

        Ok(())
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    /// Number of records currently queued or running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Workers hold retry clones of the job sender, so dropping ours
        // never disconnects the channel; the flag is what stops them.
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn release_claim(in_flight: &Arc<Mutex<HashSet<String>>>, record_id: &str) {
    in_flight
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(record_id);
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<Job>,
    retry_sender: Sender<Job>,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    store: StatusStore,
    processor: Arc<dyn Processor>,
    policy: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!(
                    "Worker {} processing record {} (attempt {})",
                    worker_id, job.record_id, job.attempt
                );
                run_job(
                    job,
                    &retry_sender,
                    &result_sender,
                    &shutdown,
                    &store,
                    processor.as_ref(),
                    policy,
                    &in_flight,
                );
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[allow(clippy::too_many_arguments)]
fn run_job(
    job: Job,
    retry_sender: &Sender<Job>,
    result_sender: &Sender<JobResult>,
    shutdown: &AtomicBool,
    store: &StatusStore,
    processor: &dyn Processor,
    policy: RetryPolicy,
    in_flight: &Arc<Mutex<HashSet<String>>>,
) {
    // First attempt moves the record out of Pending; retries arrive with
    // the record already in Processing.
    if job.attempt == 0 {
        match store.begin_processing(&job.record_id) {
            Ok(()) => {}
            Err(StoreError::InvalidTransition { id, actual, .. }) => {
                warn!("Record {} is {:?}, skipping job", id, actual);
                release_claim(in_flight, &job.record_id);
                return;
            }
            Err(e) => {
                error!("Cannot start record {}: {}", job.record_id, e);
                release_claim(in_flight, &job.record_id);
                return;
            }
        }
    }

    if let Err(e) = store.record_attempt(&job.record_id) {
        warn!("Failed to record attempt for {}: {}", job.record_id, e);
    }

    match processor.process(&job.path) {
        Ok(note) => {
            finish(store, result_sender, in_flight, JobResult::success(&job, note));
        }
        Err(ProcessError::Transient(msg)) if job.attempt < policy.max_retries => {
            let delay = policy.delay_for(job.attempt);
            debug!(
                "Record {} failed transiently ({}), retry {}/{} in {:?}",
                job.record_id,
                msg,
                job.attempt + 1,
                policy.max_retries,
                delay
            );
            interruptible_sleep(delay, shutdown);

            if shutdown.load(Ordering::Relaxed) || retry_sender.send(job.next_attempt()).is_err() {
                // Shutting down: leave the record in Processing for the
                // startup reconciliation pass and drop the claim.
                warn!(
                    "Dropping retry for record {} during shutdown",
                    job.record_id
                );
                release_claim(in_flight, &job.record_id);
            }
        }
        Err(err) => {
            let msg = match &err {
                ProcessError::Transient(msg) => {
                    debug!("Record {} exhausted retries: {}", job.record_id, msg);
                    msg.clone()
                }
                ProcessError::Permanent(msg) => msg.clone(),
            };
            finish(store, result_sender, in_flight, JobResult::failure(&job, msg));
        }
    }
}

/// Persists the terminal transition, releases the claim, and emits the result.
fn finish(
    store: &StatusStore,
    result_sender: &Sender<JobResult>,
    in_flight: &Arc<Mutex<HashSet<String>>>,
    result: JobResult,
) {
    let outcome = if result.success {
        store.complete(&result.record_id, &result.note)
    } else {
        store.fail(&result.record_id, &result.note)
    };

    if let Err(e) = outcome {
        error!(
            "Failed to persist outcome for record {}: {}",
            result.record_id, e
        );
    }

    release_claim(in_flight, &result.record_id);

    if result_sender.send(result).is_err() {
        debug!("Result channel closed");
    }
}

/// Sleeps in slices so a long backoff doesn't stall shutdown.
fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}
