use crate::error::NetworkError;
use crate::front::FrontSender;
use crate::network::ProcessorNetwork;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub type TimerCallback = Arc<dyn Fn(&mut ProcessorNetwork) + Send + Sync>;

/// Owned by a [`Timer`] or [`Delay`]. The timer thread only holds weak
/// references, so dropping the owner cancels every pending and queued call.
struct ControlBlock {
    callback: TimerCallback,
    fired: AtomicBool,
}

struct Entry {
    due: Instant,
    repeat: Option<Duration>,
    block: Weak<ControlBlock>,
}

#[derive(Default)]
struct Schedule {
    /// Sorted by `due`, earliest first.
    entries: Vec<Entry>,
    stopped: bool,
}

impl Schedule {
    fn insert(&mut self, entry: Entry) {
        let index = self.entries.partition_point(|e| e.due <= entry.due);
        self.entries.insert(index, entry);
    }
}

#[derive(Default)]
struct Shared {
    schedule: Mutex<Schedule>,
    wake: Condvar,
}

impl Shared {
    fn add(&self, entry: Entry) {
        self.schedule.lock().insert(entry);
        self.wake.notify_one();
    }
}

/// One background thread that waits for timer deadlines and posts the
/// callbacks to the front queue. Callbacks never run on this thread.
pub struct TimerThread {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Weak reference to a [`TimerThread`] for code that schedules calls
/// without keeping the thread alive.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Weak<Shared>,
}

impl TimerThread {
    pub fn new(front: FrontSender) -> Result<Self, NetworkError> {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("procflow-timer".to_string())
            .spawn(move || run(&worker, &front))
            .map_err(|error| NetworkError::TimerThread(error.to_string()))?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Entries still waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared
            .schedule
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.block.strong_count() > 0)
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops the thread. Pending timers never fire afterwards.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        {
            let mut schedule = self.shared.schedule.lock();
            schedule.stopped = true;
            schedule.entries.clear();
        }
        self.shared.wake.notify_all();
        if thread.join().is_err() {
            debug!("timer thread panicked");
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, front: &FrontSender) {
    let mut schedule = shared.schedule.lock();
    loop {
        if schedule.stopped {
            break;
        }
        schedule.entries.retain(|entry| entry.block.strong_count() > 0);

        let now = Instant::now();
        match schedule.entries.first().map(|entry| entry.due) {
            None => shared.wake.wait(&mut schedule),
            Some(due) if due > now => {
                shared.wake.wait_until(&mut schedule, due);
            }
            Some(_) => {
                let split = schedule.entries.partition_point(|entry| entry.due <= now);
                let due: Vec<Entry> = schedule.entries.drain(..split).collect();
                for entry in due {
                    let Some(block) = entry.block.upgrade() else {
                        continue;
                    };
                    if entry.repeat.is_none() {
                        block.fired.store(true, Ordering::SeqCst);
                    }
                    let weak = Arc::downgrade(&block);
                    let posted = front.post(move |network| {
                        if let Some(block) = weak.upgrade() {
                            (block.callback)(network);
                        }
                    });
                    if !posted {
                        trace!("front queue closed, timer thread exiting");
                        return;
                    }
                    if let Some(interval) = entry.repeat {
                        schedule.insert(Entry {
                            due: now + interval,
                            repeat: Some(interval),
                            block: entry.block,
                        });
                    }
                }
            }
        }
    }
}

/// Calls its callback on the front thread every `interval` while started.
pub struct Timer {
    interval: Duration,
    callback: TimerCallback,
    thread: Weak<Shared>,
    block: Option<Arc<ControlBlock>>,
}

impl Timer {
    pub fn new(
        thread: &TimerThread,
        interval: Duration,
        callback: impl Fn(&mut ProcessorNetwork) + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            callback: Arc::new(callback),
            thread: Arc::downgrade(&thread.shared),
            block: None,
        }
    }

    /// Starts, or restarts from now when already running.
    pub fn start(&mut self) {
        self.block = schedule(&self.thread, &self.callback, self.interval, Some(self.interval));
    }

    pub fn stop(&mut self) {
        self.block = None;
    }

    pub fn is_running(&self) -> bool {
        self.block.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        if self.is_running() {
            self.start();
        }
    }
}

/// Calls its callback once on the front thread after `delay`.
pub struct Delay {
    delay: Duration,
    callback: TimerCallback,
    thread: Weak<Shared>,
    block: Option<Arc<ControlBlock>>,
}

impl Delay {
    pub fn new(
        thread: &TimerThread,
        delay: Duration,
        callback: impl Fn(&mut ProcessorNetwork) + Send + Sync + 'static,
    ) -> Self {
        Self::on(&thread.handle(), delay, callback)
    }

    /// Like [`Delay::new`] but scheduled through a handle.
    pub fn on(
        timers: &TimerHandle,
        delay: Duration,
        callback: impl Fn(&mut ProcessorNetwork) + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay,
            callback: Arc::new(callback),
            thread: timers.shared.clone(),
            block: None,
        }
    }

    /// Schedules the call, replacing one that is still pending.
    pub fn start(&mut self) {
        self.block = schedule(&self.thread, &self.callback, self.delay, None);
    }

    pub fn cancel(&mut self) {
        self.block = None;
    }

    /// Started and not yet handed to the front queue.
    pub fn is_pending(&self) -> bool {
        self.block
            .as_ref()
            .is_some_and(|block| !block.fired.load(Ordering::SeqCst))
    }
}

fn schedule(
    thread: &Weak<Shared>,
    callback: &TimerCallback,
    delay: Duration,
    repeat: Option<Duration>,
) -> Option<Arc<ControlBlock>> {
    let Some(shared) = thread.upgrade() else {
        debug!("timer started after its thread was dropped");
        return None;
    };
    let block = Arc::new(ControlBlock {
        callback: Arc::clone(callback),
        fired: AtomicBool::new(false),
    });
    shared.add(Entry {
        due: Instant::now() + delay,
        repeat,
        block: Arc::downgrade(&block),
    });
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::front::FrontQueue;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_delay_fires_once_on_front_thread() -> Result<(), NetworkError> {
        let queue = FrontQueue::new();
        let thread = TimerThread::new(queue.sender())?;
        let mut network = ProcessorNetwork::new(NetworkConfig::default());

        let mut delay = Delay::new(&thread, Duration::from_millis(5), |network| {
            network.set_modified(true)
        });
        delay.start();
        assert!(delay.is_pending());
        assert!(queue.process_timeout(&mut network, Duration::from_secs(5)) >= 1);
        assert!(network.is_modified());
        assert!(!delay.is_pending());
        Ok(())
    }

    #[test]
    fn test_dropped_delay_never_runs() -> Result<(), NetworkError> {
        let queue = FrontQueue::new();
        let thread = TimerThread::new(queue.sender())?;
        let mut network = ProcessorNetwork::new(NetworkConfig::default());

        let mut delay = Delay::new(&thread, Duration::from_millis(20), |network| {
            network.set_modified(true)
        });
        delay.start();
        drop(delay);
        std::thread::sleep(Duration::from_millis(60));
        queue.process(&mut network);
        assert!(!network.is_modified());
        assert_eq!(thread.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_timer_repeats_until_stopped() -> Result<(), NetworkError> {
        let queue = FrontQueue::new();
        let thread = TimerThread::new(queue.sender())?;
        let mut network = ProcessorNetwork::new(NetworkConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let mut timer = Timer::new(&thread, Duration::from_millis(2), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.start();
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            queue.process_timeout(&mut network, Duration::from_millis(50));
        }
        assert!(count.load(Ordering::SeqCst) >= 3);

        timer.stop();
        assert!(!timer.is_running());
        queue.process(&mut network);
        let stopped_at = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        queue.process(&mut network);
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
        Ok(())
    }

    #[test]
    fn test_delay_through_handle_is_dead_after_shutdown() -> Result<(), NetworkError> {
        let queue = FrontQueue::new();
        let mut thread = TimerThread::new(queue.sender())?;
        let handle = thread.handle();
        thread.shutdown();
        drop(thread);

        let mut delay = Delay::on(&handle, Duration::from_millis(1), |network| {
            network.set_modified(true)
        });
        delay.start();
        assert!(!delay.is_pending());
        Ok(())
    }

    #[test]
    fn test_shutdown_is_idempotent() -> Result<(), NetworkError> {
        let queue = FrontQueue::new();
        let mut thread = TimerThread::new(queue.sender())?;
        thread.shutdown();
        thread.shutdown();
        assert!(!thread.is_running());
        Ok(())
    }
}
