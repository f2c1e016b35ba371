//! Run orchestration
//!
//! A [`Worker`] owns every [`Connection`] of one job and walks the run through
//! `Created → Starting → Running → Stopping → Completed`. Stopping is entered
//! exactly once, whichever of the duration timer or [`Worker::stop`] gets there
//! first.

use futures::future::join_all;
use hubload_core::ECHO_TARGET;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, LoopContext, ReceiveLoop};
use crate::error::{Result, WorkerError};
use crate::job::{ErrorLog, JobDescriptor, JobResults};
use crate::samples::SampleStore;
use crate::stats;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Starting,
    Running,
    Stopping,
    Completed,
    /// Start aborted; no invocation was sent
    Failed,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    /// Completed or Failed
    pub fn is_final(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a stop trigger did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This trigger ran the stop sequence
    Performed,
    /// Another trigger got there first
    AlreadyStopped,
}

/// Load test driver for one [`JobDescriptor`]
///
/// Cheap to clone; clones share the same run.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

struct Inner {
    job: JobDescriptor,
    url: String,
    log_text: String,
    state: watch::Sender<RunState>,
    /// Acquired by the first stop trigger only
    stop_guard: AtomicBool,
    /// Seen by receive loops so teardown closes are not reported as failures
    stopping: Arc<AtomicBool>,
    connections: Mutex<Vec<Connection>>,
    loops: parking_lot::Mutex<Vec<ReceiveLoop>>,
    samples: parking_lot::Mutex<SampleStore>,
    started_at: parking_lot::Mutex<Option<Instant>>,
    disarm: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    results: OnceLock<JobResults>,
    errors: ErrorLog,
}

impl Worker {
    /// Validate the job and prepare a run
    pub fn new(job: JobDescriptor) -> Result<Self> {
        job.validate()?;
        let url = job.websocket_url()?;
        let log_text = job.log_text();
        info!("Created job {}", log_text);

        let (state, _) = watch::channel(RunState::Created);
        Ok(Self {
            inner: Arc::new(Inner {
                samples: parking_lot::Mutex::new(SampleStore::new(job.connections)),
                job,
                url,
                log_text,
                state,
                stop_guard: AtomicBool::new(false),
                stopping: Arc::new(AtomicBool::new(false)),
                connections: Mutex::new(Vec::new()),
                loops: parking_lot::Mutex::new(Vec::new()),
                started_at: parking_lot::Mutex::new(None),
                disarm: parking_lot::Mutex::new(None),
                results: OnceLock::new(),
                errors: ErrorLog::new(),
            }),
        })
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.inner.job
    }

    /// WebSocket URL every connection targets
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// One-line description of the job, as logged at creation
    pub fn log_text(&self) -> &str {
        &self.inner.log_text
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// Handshake failures and early closes collected so far
    pub fn errors(&self) -> &ErrorLog {
        &self.inner.errors
    }

    /// Results of the run, once it has completed
    pub fn results(&self) -> Option<JobResults> {
        if self.state() == RunState::Completed {
            self.inner.results.get().cloned()
        } else {
            None
        }
    }

    /// Open every connection, ask connection 0 for echoes and arm the timer.
    ///
    /// All-or-nothing: if any connection fails to open, every connection is
    /// closed, the run ends `Failed` and nothing is sent.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let entered = inner.state.send_if_modified(|state| {
            if *state == RunState::Created {
                *state = RunState::Starting;
                true
            } else {
                false
            }
        });
        if !entered {
            return Err(WorkerError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }

        let job = &inner.job;
        info!(
            "Opening {} {} connections to {}",
            job.connections, job.transport, inner.url
        );

        let mut connections = inner.connections.lock().await;
        *connections = (0..job.connections)
            .map(|index| Connection::new(index, job, &inner.url))
            .collect();

        let opened = join_all(connections.iter_mut().map(Connection::open)).await;
        let failures: Vec<WorkerError> = opened.into_iter().filter_map(|r| r.err()).collect();
        if !failures.is_empty() {
            for failure in &failures {
                inner.errors.append(format!("Handshake failed: {}", failure));
            }
            error!(
                "{} of {} connections failed to open",
                failures.len(),
                job.connections
            );
            close_all(&connections).await;
            inner.state.send_replace(RunState::Failed);
            return Err(failures
                .into_iter()
                .next()
                .unwrap_or_else(|| WorkerError::Configuration("no connections".to_string())));
        }

        let context = LoopContext::new(inner.errors.clone(), Arc::clone(&inner.stopping));
        let loops: Vec<ReceiveLoop> = {
            let mut store = inner.samples.lock();
            connections
                .iter_mut()
                .filter_map(|connection| {
                    let samples = store.take(connection.index())?;
                    match connection.take_inbound() {
                        Some(inbound) => Some(ReceiveLoop::spawn(inbound, samples, context.clone())),
                        None => {
                            store.restore(samples);
                            None
                        }
                    }
                })
                .collect()
        };
        *inner.loops.lock() = loops;

        let echo_secs = job.duration.saturating_add(1);
        let kickoff = match connections.first() {
            Some(first) => first.send(ECHO_TARGET, vec![json!(echo_secs)]).await,
            None => Err(WorkerError::Configuration("no connections".to_string())),
        };
        if let Err(e) = kickoff {
            inner.errors.append(format!("Echo request failed: {}", e));
            error!("Echo request failed: {}", e);
            inner.stopping.store(true, Ordering::SeqCst);
            self.join_loops().await;
            close_all(&connections).await;
            inner.state.send_replace(RunState::Failed);
            return Err(e);
        }
        drop(connections);

        *inner.started_at.lock() = Some(Instant::now());
        self.arm_timer();
        inner.state.send_replace(RunState::Running);
        info!("Job {} running for {}s", job.id, job.duration);

        Ok(())
    }

    /// One-shot duration timer, disarmed by the stop sequence
    fn arm_timer(&self) {
        let (disarm, disarmed) = oneshot::channel::<()>();
        *self.inner.disarm.lock() = Some(disarm);

        let worker = self.clone();
        let duration = self.inner.job.duration();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    debug!("Duration of job {} elapsed", worker.inner.job.id);
                    if let Err(e) = worker.stop().await {
                        warn!("Timed stop failed: {}", e);
                    }
                }
                _ = disarmed => {}
            }
        });
    }

    /// Trigger the stop sequence.
    ///
    /// Only the first trigger performs it; every later trigger returns
    /// [`StopOutcome::AlreadyStopped`] straight away. Stopping a run that never
    /// reached `Running` is an invalid-state error.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let inner = &self.inner;
        match self.state() {
            RunState::Running => {}
            RunState::Stopping | RunState::Completed => return Ok(StopOutcome::AlreadyStopped),
            state => {
                return Err(WorkerError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }

        if inner
            .stop_guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(StopOutcome::AlreadyStopped);
        }

        if let Some(disarm) = inner.disarm.lock().take() {
            let _ = disarm.send(());
        }
        let started_at = *inner.started_at.lock();
        let elapsed = started_at.map(|at| at.elapsed()).unwrap_or_default();
        inner.stopping.store(true, Ordering::SeqCst);
        inner.state.send_replace(RunState::Stopping);
        info!("Stopping job {} after {:.3}s", inner.job.id, elapsed.as_secs_f64());

        self.join_loops().await;
        let snapshot = inner.samples.lock().snapshot();
        let results = stats::compute(&snapshot, elapsed);
        info!(
            "Job {}: {} requests, {:.1} rps, p50 {:.3} ms, p99 {:.3} ms",
            inner.job.id,
            results.total_requests,
            results.requests_per_second,
            results.latency.p50,
            results.latency.p99
        );
        let _ = inner.results.set(results);

        {
            let connections = inner.connections.lock().await;
            close_all(&connections).await;
        }

        tokio::time::sleep(inner.job.cool_down()).await;
        inner.state.send_replace(RunState::Completed);
        info!("Job {} completed", inner.job.id);

        Ok(StopOutcome::Performed)
    }

    /// Like [`Worker::stop`], but a run still opening its connections is
    /// stopped as soon as it reaches `Running`.
    ///
    /// A run that fails to open reports the `Failed` state as before.
    pub async fn stop_when_started(&self) -> Result<StopOutcome> {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state != RunState::Starting).await;
        self.stop().await
    }

    /// Tear down every receive loop and put its samples back in the store
    async fn join_loops(&self) {
        let loops = std::mem::take(&mut *self.inner.loops.lock());
        let joined = join_all(loops.into_iter().map(ReceiveLoop::join)).await;

        let mut store = self.inner.samples.lock();
        for samples in joined.into_iter().flatten() {
            store.restore(samples);
        }
    }

    /// Wait for the run to complete and return its results
    pub async fn wait_completed(&self) -> Result<JobResults> {
        let mut state = self.inner.state.subscribe();
        let reached = match state.wait_for(RunState::is_final).await {
            Ok(reached) => *reached,
            Err(_) => self.state(),
        };

        match (reached, self.inner.results.get()) {
            (RunState::Completed, Some(results)) => Ok(results.clone()),
            (state, _) => Err(WorkerError::InvalidState {
                operation: "collect results",
                state,
            }),
        }
    }

    /// Start, wait for the duration timer, return the results
    pub async fn run(&self) -> Result<JobResults> {
        self.start().await?;
        self.wait_completed().await
    }

    /// Release every connection. Only valid once the run is `Completed` or `Failed`.
    pub async fn dispose(&self) -> Result<()> {
        let state = self.state();
        if !state.is_final() {
            return Err(WorkerError::InvalidState {
                operation: "dispose",
                state,
            });
        }

        let mut connections = self.inner.connections.lock().await;
        join_all(connections.iter_mut().map(Connection::dispose)).await;
        connections.clear();
        debug!("Disposed job {}", self.inner.job.id);
        Ok(())
    }
}

/// Close every connection concurrently; failures are logged only
async fn close_all(connections: &[Connection]) {
    let closed = join_all(connections.iter().map(Connection::close)).await;
    for (connection, result) in connections.iter().zip(closed) {
        if let Err(e) = result {
            warn!("Closing connection {} failed: {}", connection.index(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TransportKind;

    #[test]
    fn test_new_rejects_invalid_job() {
        let job = JobDescriptor::new("http://localhost:5000/echo", 0, 10);
        assert!(matches!(
            Worker::new(job),
            Err(WorkerError::Configuration(_))
        ));

        let job = JobDescriptor::new("http://localhost:5000/echo", 1, 0);
        assert!(matches!(
            Worker::new(job),
            Err(WorkerError::Configuration(_))
        ));
    }

    #[test]
    fn test_new_maps_url_and_logs_job() {
        let job = JobDescriptor::new("https://example.com/echo", 3, 10)
            .with_transport(TransportKind::Sockets);
        let worker = Worker::new(job).unwrap();

        assert_eq!(worker.state(), RunState::Created);
        assert_eq!(worker.url(), "wss://example.com/echo");
        assert!(worker.log_text().contains("Connections:3"));
        assert!(worker.results().is_none());
        assert!(worker.errors().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_invalid() {
        let worker = Worker::new(JobDescriptor::new("http://localhost:5000/echo", 1, 1)).unwrap();
        assert!(matches!(
            worker.stop().await,
            Err(WorkerError::InvalidState {
                operation: "stop",
                state: RunState::Created
            })
        ));
    }

    #[tokio::test]
    async fn test_dispose_before_completion_is_invalid() {
        let worker = Worker::new(JobDescriptor::new("http://localhost:5000/echo", 1, 1)).unwrap();
        assert!(matches!(
            worker.dispose().await,
            Err(WorkerError::InvalidState {
                operation: "dispose",
                ..
            })
        ));
    }

    #[test]
    fn test_final_states() {
        assert!(RunState::Completed.is_final());
        assert!(RunState::Failed.is_final());
        assert!(!RunState::Stopping.is_final());
        assert_eq!(RunState::Running.to_string(), "running");
    }
}
