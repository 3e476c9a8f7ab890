//! The owner thread and its task queue.
//!
//! Every mutation of the indicator and every native call runs here, one task
//! at a time and in submission order. The native event poll runs on the same
//! thread as a step between tasks, so nothing the owner touches needs a lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, error, info};

use crate::error::Result;

pub type Task = Box<dyn FnOnce() + Send + 'static>;
pub type Step = Box<dyn FnMut() -> StepOutcome + Send + 'static>;

/// Whether a poll step wants to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Stop,
}

enum Message {
    Run(Task),
    Step(Step),
    Shutdown,
}

/// Single worker thread executing submitted tasks in FIFO order.
pub struct TaskQueue {
    sender: Sender<Message>,
    owner: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Start the owner thread. `poll_interval` is how long the worker waits
    /// for a task before running the poll step again.
    pub fn spawn(name: &str, poll_interval: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(receiver, poll_interval))?;

        Ok(Self {
            sender,
            owner: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `task` behind everything submitted before it. Never blocks and
    /// may be called from any thread, the owner included. Returns `false` if
    /// the owner thread has already stopped and the task was dropped.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.sender.send(Message::Run(Box::new(task))).is_err() {
            debug!("Task queue has shut down; dropping task");
            return false;
        }
        true
    }

    /// Install the poll step, replacing any previous one. It runs after every
    /// task and at least once per poll interval until it returns
    /// [`StepOutcome::Stop`].
    pub fn set_step(&self, step: impl FnMut() -> StepOutcome + Send + 'static) {
        if self.sender.send(Message::Step(Box::new(step))).is_err() {
            debug!("Task queue has shut down; dropping poll step");
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Stop the owner thread once the tasks already queued have run. Joins the
    /// worker unless called from the worker itself.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown);
        if self.is_owner_thread() {
            return;
        }
        if let Some(worker) = self.worker.lock().unwrap().take()
            && worker.join().is_err()
        {
            error!("Task queue worker panicked");
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(receiver: Receiver<Message>, poll_interval: Duration) {
    info!("Task queue started");
    let mut step: Option<Step> = None;

    loop {
        let message = if step.is_some() {
            match receiver.recv_timeout(poll_interval) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            }
        };

        match message {
            Some(Message::Run(task)) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    error!("Task panicked: {}", panic_message(&payload));
                }
            }
            Some(Message::Step(next)) => {
                debug!("Poll step installed");
                step = Some(next);
            }
            Some(Message::Shutdown) => break,
            None => {}
        }

        if let Some(current) = step.as_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(current)).unwrap_or_else(|payload| {
                error!("Poll step panicked: {}", panic_message(&payload));
                StepOutcome::Stop
            });
            if outcome == StepOutcome::Stop {
                debug!("Poll step finished");
                step = None;
            }
        }
    }

    info!("Task queue stopped");
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn queue() -> TaskQueue {
        TaskQueue::spawn("test-tasks", Duration::from_millis(1)).unwrap()
    }

    /// Block until everything submitted so far has run.
    fn drain(queue: &TaskQueue) {
        let (tx, rx) = mpsc::channel();
        queue.submit(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..100 {
            let log = log.clone();
            queue.submit(move || log.lock().unwrap().push(tag));
        }
        drain(&queue);
        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn order_across_producers_matches_submission() {
        let queue = Arc::new(queue());
        let executed = Arc::new(Mutex::new(Vec::new()));
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let start = Arc::new(Barrier::new(4));

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let queue = queue.clone();
                let executed = executed.clone();
                let submitted = submitted.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for n in 0..50 {
                        let tag = (producer, n);
                        let executed = executed.clone();
                        // Record and submit under one lock so the recorded
                        // order is the order the queue saw.
                        let mut order = submitted.lock().unwrap();
                        order.push(tag);
                        queue.submit(move || executed.lock().unwrap().push(tag));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        drain(&queue);

        let executed = executed.lock().unwrap();
        assert_eq!(executed.len(), 200);
        assert_eq!(*executed, *submitted.lock().unwrap());
    }

    #[test]
    fn tasks_never_overlap() {
        let queue = queue();
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let running = running.clone();
            let overlaps = overlaps.clone();
            queue.submit(move || {
                if running.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(100));
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        drain(&queue);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn owner_thread_is_detected() {
        let queue = Arc::new(queue());
        assert!(!queue.is_owner_thread());

        let (tx, rx) = mpsc::channel();
        let inner = queue.clone();
        queue.submit(move || tx.send(inner.is_owner_thread()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn tasks_may_submit_tasks() {
        let queue = Arc::new(queue());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (inner_queue, inner_log) = (queue.clone(), log.clone());
        queue.submit(move || {
            let nested_log = inner_log.clone();
            inner_queue.submit(move || nested_log.lock().unwrap().push("nested"));
            inner_log.lock().unwrap().push("outer");
        });
        let tail = log.clone();
        queue.submit(move || tail.lock().unwrap().push("second"));

        drain(&queue);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "second", "nested"]);
    }

    #[test]
    fn step_runs_between_tasks_until_stopped() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        let step_log = log.clone();
        let mut remaining = 3;
        queue.set_step(move || {
            step_log.lock().unwrap().push("step".to_string());
            remaining -= 1;
            if remaining == 0 {
                StepOutcome::Stop
            } else {
                StepOutcome::Continue
            }
        });
        let task_log = log.clone();
        queue.submit(move || task_log.lock().unwrap().push("task".to_string()));

        thread::sleep(Duration::from_millis(50));
        drain(&queue);

        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|e| *e == "step").count(), 3);
        assert_eq!(log[0], "step");
        assert!(log.contains(&"task".to_string()));
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let queue = queue();
        queue.submit(|| panic!("boom"));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        queue.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drain(&queue);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_shutdown_is_dropped() {
        let queue = queue();
        queue.shutdown();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let accepted = queue.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!accepted);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
