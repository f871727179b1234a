use crate::network::ProcessorNetwork;
use crate::pool::JobMessage;
use flume::{Receiver, Sender};
use std::time::{Duration, Instant};

pub(crate) enum FrontTask {
    Call(Box<dyn FnOnce(&mut ProcessorNetwork) + Send>),
    JobFinished(JobMessage),
}

/// Work posted from other threads to the thread that owns the network.
///
/// Timers and background jobs never touch the network directly; they post
/// here and the owner drains the queue with [`FrontQueue::process`].
pub struct FrontQueue {
    sender: Sender<FrontTask>,
    receiver: Receiver<FrontTask>,
}

impl FrontQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> FrontSender {
        FrontSender {
            sender: self.sender.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Runs every task queued right now. Returns how many ran.
    pub fn process(&self, network: &mut ProcessorNetwork) -> usize {
        let mut count = 0;
        while let Ok(task) = self.receiver.try_recv() {
            run(task, network);
            count += 1;
        }
        count
    }

    /// Waits up to `timeout` for the first task, then drains the queue.
    pub fn process_timeout(&self, network: &mut ProcessorNetwork, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        match self.receiver.recv_deadline(deadline) {
            Ok(task) => {
                run(task, network);
                1 + self.process(network)
            }
            Err(_) => 0,
        }
    }
}

impl Default for FrontQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn run(task: FrontTask, network: &mut ProcessorNetwork) {
    match task {
        FrontTask::Call(call) => call(network),
        FrontTask::JobFinished(message) => network.finish_job(message),
    }
}

#[derive(Clone)]
pub struct FrontSender {
    sender: Sender<FrontTask>,
}

impl FrontSender {
    /// Queues `task`. Returns false once the queue is gone.
    pub fn post(&self, task: impl FnOnce(&mut ProcessorNetwork) + Send + 'static) -> bool {
        self.sender.send(FrontTask::Call(Box::new(task))).is_ok()
    }

    pub(crate) fn send_job(&self, message: JobMessage) -> bool {
        self.sender.send(FrontTask::JobFinished(message)).is_ok()
    }
}
