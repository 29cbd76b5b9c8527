//! Single threaded task queue all asynchronous completions are delivered through.
//!
//! Loaders run on worker threads, but they never call back into the application directly.
//! Instead, completions are posted to a [`RunLoop`] with a [`RunLoopHandle`] and executed on the
//! thread that drives the loop. This way all state touched by callbacks is only mutated from that
//! single thread.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use web_time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task(Task),
    Stop,
}

/// Identifier of a run loop. Handles know the id of the loop they post to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RunLoopId(u64);

impl RunLoopId {
    fn next_id() -> Self {
        static ID: AtomicU64 = AtomicU64::new(0);
        Self(ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Queue of tasks executed on the thread that owns the loop.
///
/// The loop cannot be sent to another thread. Use [`RunLoop::handle`] to post tasks from any
/// thread.
///
/// The loop must be driven outside of an async context, since [`RunLoop::run`] and
/// [`RunLoop::run_until`] park the current thread.
///
/// Dropping the loop discards all pending tasks without running them.
pub struct RunLoop {
    id: RunLoopId,
    sender: UnboundedSender<Message>,
    receiver: RefCell<UnboundedReceiver<Message>>,
    _not_send: PhantomData<Rc<()>>,
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLoop {
    /// Creates a new empty loop.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            id: RunLoopId::next_id(),
            sender,
            receiver: RefCell::new(receiver),
            _not_send: PhantomData,
        }
    }

    /// Id of the loop.
    pub fn id(&self) -> RunLoopId {
        self.id
    }

    /// Returns a handle to post tasks to this loop.
    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            id: self.id,
            sender: self.sender.clone(),
        }
    }

    /// Number of tasks waiting to be executed.
    pub fn pending(&self) -> usize {
        self.receiver.borrow().len()
    }

    /// Executes the tasks that are queued at the moment of the call and returns without waiting.
    ///
    /// Tasks posted while the pass runs are left for the next pass. Stop requests are ignored.
    /// Returns the number of executed tasks.
    pub fn run_once(&self) -> usize {
        let queued = self.pending();
        let mut executed = 0;
        for _ in 0..queued {
            let message = self.receiver.borrow_mut().try_recv();
            match message {
                Ok(Message::Task(task)) => {
                    task();
                    executed += 1;
                }
                Ok(Message::Stop) => {}
                Err(_) => break,
            }
        }

        executed
    }

    /// Executes tasks as they arrive until [`RunLoopHandle::stop`] is called.
    pub fn run(&self) {
        while let Some(message) = self.next_message() {
            match message {
                Message::Task(task) => task(),
                Message::Stop => break,
            }
        }
    }

    /// Executes tasks as they arrive until `done` returns true.
    ///
    /// The condition is checked before waiting for the first task and after every task. Returns
    /// `false` if the loop was stopped before the condition was met.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> bool {
        loop {
            if done() {
                return true;
            }

            match self.next_message() {
                Some(Message::Task(task)) => task(),
                Some(Message::Stop) | None => return done(),
            }
        }
    }

    fn next_message(&self) -> Option<Message> {
        self.receiver.borrow_mut().blocking_recv()
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        let receiver = self.receiver.get_mut();
        receiver.close();

        let mut discarded = 0;
        while let Ok(message) = receiver.try_recv() {
            if matches!(message, Message::Task(_)) {
                discarded += 1;
            }
        }

        if discarded > 0 {
            log::debug!("Run loop dropped with {discarded} pending tasks");
        }
    }
}

/// Handle to post tasks to a [`RunLoop`] from any thread.
#[derive(Clone)]
pub struct RunLoopHandle {
    id: RunLoopId,
    sender: UnboundedSender<Message>,
}

impl std::fmt::Debug for RunLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoopHandle").field("id", &self.id).finish()
    }
}

impl RunLoopHandle {
    /// Id of the loop the handle posts to.
    pub fn id(&self) -> RunLoopId {
        self.id
    }

    /// Adds the task to the queue of the loop.
    ///
    /// Returns false if the loop no longer exists. In this case the task is dropped without being
    /// executed.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Message::Task(Box::new(task))).is_ok()
    }

    /// Adds the task to the queue of the loop after the `delay` passes.
    pub fn post_after(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let handle = self.clone();
        let timer = crate::async_runtime::spawn(async move {
            tokio::time::sleep(delay).await;
            if !handle.post(task) {
                log::trace!("Timer fired after the run loop was dropped");
            }
        });

        if timer.is_none() {
            log::warn!("Failed to schedule a timer, worker runtime is not available");
        }
    }

    /// Ends the current or the next blocking run of the loop.
    pub fn stop(&self) {
        let _ = self.sender.send(Message::Stop);
    }

    /// Returns true if the loop was dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
