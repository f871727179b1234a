//! Background jobs dispatched by processors.
//!
//! Jobs run on a shared rayon pool. When a job ends its result is posted to
//! the front queue and handed to the processor's `job_finished` on the thread
//! that owns the network, but only if that processor still exists.

use crate::config::PoolConfig;
use crate::error::NetworkError;
use crate::front::FrontSender;
use crate::network::ProcessorNetwork;
use crate::processor::{Liveness, ProcessorHandle};
use crate::timer::{Delay, TimerHandle};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

/// Cooperative cancellation flag handed to every job.
#[derive(Debug, Clone, Default)]
pub struct Stop(Arc<AtomicBool>);

impl Stop {
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Progress of the most recent job of a processor, in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU32>);

impl Progress {
    pub fn report(&self, fraction: f32) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.0.store(fraction.to_bits(), Ordering::Relaxed);
    }

    pub fn report_steps(&self, step: usize, total: usize) {
        if total > 0 {
            self.report(step as f32 / total as f32);
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// How a processor's dispatches are scheduled and how its outports behave
/// while jobs are in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// Deliver results of jobs that were superseded by a newer dispatch
    /// instead of discarding them.
    pub keep_old_results: bool,
    /// Hold a new dispatch back while a job is still running. Only the last
    /// held-back dispatch is submitted, once the running job reports.
    pub queued_dispatch: bool,
    /// Submit only after a quiet period without further dispatches.
    pub delay_dispatch: bool,
    /// Keep the previous outputs available downstream until the new result
    /// arrives. Downstream processors are not invalidated in the meantime.
    pub delay_invalidation: bool,
}

/// The value a background job returned.
pub struct JobOutput {
    job: JobId,
    value: Box<dyn Any + Send>,
}

impl JobOutput {
    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn downcast<T: Any>(self) -> Option<T> {
        self.value.downcast::<T>().ok().map(|value| *value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

type Task = Box<dyn FnOnce(&Stop, &Progress) -> Box<dyn Any + Send> + Send>;

/// A dispatch that was not handed to the pool yet.
pub(crate) struct Submission {
    job: JobId,
    task: Task,
}

/// Per processor bookkeeping of dispatched jobs.
#[derive(Default)]
pub(crate) struct JobState {
    next_id: u64,
    latest: Option<JobId>,
    active: Vec<(JobId, Stop)>,
    queued: Option<Submission>,
    delay: Option<Delay>,
    pub(crate) progress: Progress,
}

impl JobState {
    fn reserve(&mut self) -> JobId {
        self.next_id += 1;
        let job = JobId(self.next_id);
        self.latest = Some(job);
        job
    }

    fn track(&mut self, job: JobId) -> Stop {
        let stop = Stop::default();
        self.active.push((job, stop.clone()));
        self.progress.report(0.0);
        stop
    }

    fn submit(
        &mut self,
        dispatcher: &JobDispatcher,
        submission: Submission,
        handle: ProcessorHandle,
        liveness: Weak<Liveness>,
    ) {
        let stop = self.track(submission.job);
        let ticket = JobTicket {
            handle,
            liveness,
            job: submission.job,
            stop,
        };
        dispatcher.spawn(ticket, self.progress.clone(), submission.task);
    }

    /// Creates the dispatch delay on first use. False without a timer thread.
    fn ensure_delay(&mut self, dispatcher: &JobDispatcher, handle: ProcessorHandle) -> bool {
        if self.delay.is_none() {
            let Some(timers) = &dispatcher.timers else {
                return false;
            };
            self.delay = Some(Delay::on(timers, dispatcher.dispatch_delay, move |network| {
                network.submit_queued_job(handle);
            }));
        }
        true
    }

    fn delay_pending(&self) -> bool {
        self.delay.as_ref().is_some_and(Delay::is_pending)
    }

    /// Stops running jobs; held-back dispatches stay queued.
    pub(crate) fn stop_all(&mut self) {
        for (_, stop) in &self.active {
            stop.stop();
        }
    }

    /// Stops running jobs and drops any held-back dispatch.
    pub(crate) fn cancel(&mut self) {
        self.stop_all();
        self.queued = None;
        if let Some(delay) = &mut self.delay {
            delay.cancel();
        }
    }

    fn finish(&mut self, job: JobId) {
        self.active.retain(|(id, _)| *id != job);
    }

    fn is_running(&self) -> bool {
        !self.active.is_empty()
    }

    pub(crate) fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    /// Jobs running or held back.
    pub(crate) fn has_jobs(&self) -> bool {
        self.is_running() || self.has_queued()
    }

    fn is_latest(&self, job: JobId) -> bool {
        self.latest == Some(job)
    }
}

impl std::fmt::Debug for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobState")
            .field("latest", &self.latest)
            .field("active", &self.active.len())
            .field("queued", &self.queued.as_ref().map(|submission| submission.job))
            .field("progress", &self.progress.get())
            .finish()
    }
}

pub(crate) struct JobTicket {
    handle: ProcessorHandle,
    liveness: Weak<Liveness>,
    job: JobId,
    stop: Stop,
}

pub(crate) struct JobMessage {
    ticket: JobTicket,
    outcome: Result<Box<dyn Any + Send>, String>,
}

/// Runs jobs on a rayon pool and routes their results to the front queue.
#[derive(Clone)]
pub struct JobDispatcher {
    pool: Arc<rayon::ThreadPool>,
    front: FrontSender,
    running: Arc<AtomicUsize>,
    timers: Option<TimerHandle>,
    dispatch_delay: Duration,
}

impl JobDispatcher {
    pub fn new(config: &PoolConfig, front: FrontSender) -> Result<Self, NetworkError> {
        let name = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(move |index| format!("{}-{}", name, index))
            .build()
            .map_err(|e| NetworkError::Pool(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
            front,
            running: Arc::new(AtomicUsize::new(0)),
            timers: None,
            dispatch_delay: Duration::from_millis(config.dispatch_delay_ms),
        })
    }

    /// Timers used for delayed dispatch. Without them a delayed dispatch is
    /// submitted right away.
    pub fn with_timers(mut self, timers: TimerHandle) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Jobs that were dispatched and whose results have not been consumed on
    /// the front thread yet.
    pub fn running_jobs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn<F>(&self, ticket: JobTicket, progress: Progress, job: F)
    where
        F: FnOnce(&Stop, &Progress) -> Box<dyn Any + Send> + Send + 'static,
    {
        self.running.fetch_add(1, Ordering::SeqCst);
        let front = self.front.clone();
        let running = self.running.clone();
        self.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&ticket.stop, &progress)))
                .map_err(|payload| panic_message(payload.as_ref()));
            if !front.send_job(JobMessage { ticket, outcome }) {
                running.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }

    fn consumed(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dispatch side of a [`ProcessContext`](crate::ProcessContext).
pub(crate) struct JobContext<'a> {
    pub(crate) dispatcher: Option<&'a JobDispatcher>,
    pub(crate) state: &'a mut JobState,
    pub(crate) handle: ProcessorHandle,
    pub(crate) liveness: &'a Arc<Liveness>,
    pub(crate) options: PoolOptions,
}

impl JobContext<'_> {
    pub(crate) fn dispatch<T, F>(&mut self, job: F) -> Result<JobId, NetworkError>
    where
        T: Send + 'static,
        F: FnOnce(&Stop, &Progress) -> T + Send + 'static,
    {
        let dispatcher = self.dispatcher.ok_or(NetworkError::NoJobDispatcher)?;
        if !self.options.keep_old_results {
            self.state.stop_all();
        }
        let job_id = self.state.reserve();
        let submission = Submission {
            job: job_id,
            task: Box::new(move |stop: &Stop, progress: &Progress| {
                Box::new(job(stop, progress)) as Box<dyn Any + Send>
            }),
        };

        if self.options.delay_dispatch {
            if self.state.ensure_delay(dispatcher, self.handle) {
                self.state.queued = Some(submission);
                if let Some(delay) = &mut self.state.delay {
                    delay.start();
                }
                trace!(job = job_id.0, "dispatch delayed");
                return Ok(job_id);
            }
            debug!(job = job_id.0, "no timer thread, dispatching without delay");
        }
        if self.options.queued_dispatch && self.state.is_running() {
            self.state.queued = Some(submission);
            trace!(job = job_id.0, "dispatch queued behind a running job");
            return Ok(job_id);
        }
        self.state
            .submit(dispatcher, submission, self.handle, Arc::downgrade(self.liveness));
        Ok(job_id)
    }
}

impl ProcessorNetwork {
    /// Applies a finished job on the front thread.
    pub(crate) fn finish_job(&mut self, message: JobMessage) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.consumed();
        }
        let JobMessage { ticket, outcome } = message;

        if ticket.liveness.upgrade().is_none() {
            debug!(job = ticket.job.0, "discarding job result for a removed processor");
            return;
        }
        let Some(identifier) = self.handles.get(&ticket.handle).cloned() else {
            debug!(job = ticket.job.0, "discarding job result for an unknown processor");
            return;
        };
        let Some(node) = self.processors.get_mut(&identifier) else {
            return;
        };

        node.jobs.finish(ticket.job);
        if node.options.queued_dispatch
            && node.jobs.has_queued()
            && !node.jobs.is_running()
            && !node.jobs.delay_pending()
        {
            debug!(processor = %identifier, job = ticket.job.0, "result replaced by the queued dispatch");
            self.submit_queued_job(ticket.handle);
            return;
        }
        if ticket.stop.is_stopped() {
            debug!(processor = %identifier, job = ticket.job.0, "discarding result of a stopped job");
            node.settle_outports();
            return;
        }
        if !node.options.keep_old_results && !node.jobs.is_latest(ticket.job) {
            debug!(processor = %identifier, job = ticket.job.0, "discarding superseded job result");
            return;
        }

        let value = match outcome {
            Ok(value) => value,
            Err(message) => {
                error!(processor = %identifier, job = ticket.job.0, error = %message, "background job failed");
                node.error = Some(message);
                return;
            }
        };
        if node.jobs.is_latest(ticket.job) {
            node.jobs.progress.report(1.0);
        }

        let output = JobOutput {
            job: ticket.job,
            value,
        };
        let result = self.call_processor(&identifier, |processor, ctx| {
            panic::catch_unwind(AssertUnwindSafe(|| processor.job_finished(ctx, output)))
        });
        match result {
            Some(Ok(Ok(()))) => {
                if let Some(node) = self.processors.get_mut(&identifier) {
                    node.error = None;
                    if node.is_valid() {
                        node.set_outports_valid(true);
                    }
                }
            }
            Some(Ok(Err(e))) => self.record_failure(&identifier, e.to_string()),
            Some(Err(payload)) => self.record_failure(&identifier, panic_message(payload.as_ref())),
            None => {}
        }
    }

    /// Hands the processor's held-back dispatch to the pool. Under queued
    /// dispatch it keeps waiting while a job of the processor still runs.
    pub(crate) fn submit_queued_job(&mut self, handle: ProcessorHandle) {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return;
        };
        let Some(identifier) = self.handles.get(&handle) else {
            return;
        };
        let Some(node) = self.processors.get_mut(identifier) else {
            return;
        };
        if node.options.queued_dispatch && node.jobs.is_running() {
            trace!(processor = %identifier, "held-back dispatch waits for the running job");
            return;
        }
        let Some(submission) = node.jobs.queued.take() else {
            return;
        };
        debug!(processor = %identifier, job = submission.job.0, "submitting held-back dispatch");
        let liveness = Arc::downgrade(&node.liveness);
        node.jobs.submit(dispatcher, submission, handle, liveness);
    }

    /// Sets the stop flag of every job the processor has in flight and drops
    /// any dispatch it held back.
    pub fn stop_jobs(&mut self, identifier: &str) -> Result<(), NetworkError> {
        let node = self
            .processors
            .get_mut(identifier)
            .ok_or_else(|| NetworkError::ProcessorNotFound(identifier.to_string()))?;
        node.jobs.cancel();
        Ok(())
    }

    /// Jobs on the pool plus dispatches held back by queued or delayed
    /// dispatch.
    pub fn running_background_jobs(&self) -> usize {
        let held_back = self
            .processors
            .values()
            .filter(|node| node.jobs.has_queued())
            .count();
        self.dispatcher
            .as_ref()
            .map_or(0, JobDispatcher::running_jobs)
            + held_back
    }

    pub(crate) fn record_failure(&mut self, identifier: &str, message: String) {
        warn!(processor = %identifier, error = %message, "processor failed");
        if let Some(node) = self.processors.get_mut(identifier) {
            node.error = Some(message);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        let progress = Progress::default();
        progress.report(1.5);
        assert_eq!(progress.get(), 1.0);
        progress.report_steps(1, 4);
        assert_eq!(progress.get(), 0.25);
        progress.report(f32::NAN);
        assert_eq!(progress.get(), 0.0);
    }

    #[test]
    fn test_job_state_tracks_latest() {
        let mut state = JobState::default();
        let first = state.reserve();
        let first_stop = state.track(first);
        let second = state.reserve();
        state.track(second);
        assert!(!state.is_latest(first));
        assert!(state.is_latest(second));

        state.stop_all();
        assert!(first_stop.is_stopped());
        state.finish(first);
        assert!(state.has_jobs());
        state.finish(second);
        assert!(!state.has_jobs());
    }

    #[test]
    fn test_cancel_drops_held_back_dispatch() {
        let mut state = JobState::default();
        let running = state.reserve();
        let stop = state.track(running);
        let job = state.reserve();
        state.queued = Some(Submission {
            job,
            task: Box::new(|_: &Stop, _: &Progress| Box::new(()) as Box<dyn Any + Send>),
        });
        assert!(state.has_jobs());

        state.stop_all();
        assert!(stop.is_stopped());
        assert!(state.has_queued());

        state.cancel();
        assert!(!state.has_queued());
        state.finish(running);
        assert!(!state.has_jobs());
    }

    #[test]
    fn test_job_output_downcast() {
        let output = JobOutput {
            job: JobId(1),
            value: Box::new(42_u32),
        };
        assert_eq!(output.downcast_ref::<u32>(), Some(&42));
        assert_eq!(output.downcast::<u32>(), Some(42));
    }
}
