use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use mosaic_core::{MosaicError, Result};
use parking_lot::{Condvar, Mutex};

/// Work to run against the context `C` on its owning thread.
pub type Task<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Wakes the owning thread's loop after a task was enqueued.
pub trait Waker: Send + Sync {
    fn wake(&self);
}

struct Shared<C> {
    tasks: Mutex<VecDeque<Task<C>>>,
    ready: Condvar,
    waker: Mutex<Option<Arc<dyn Waker>>>,
    owner: ThreadId,
}

impl<C> Shared<C> {
    fn enqueue(&self, task: Task<C>) {
        self.tasks.lock().push_back(task);
        self.ready.notify_all();
        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// FIFO of tasks bound to the thread that created it.
pub struct TaskQueue<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for TaskQueue<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Cloneable handle for enqueueing from any thread.
pub struct TaskSender<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for TaskSender<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C> TaskSender<C> {
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.shared.enqueue(Box::new(task));
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TaskQueue<C> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                waker: Mutex::new(None),
                owner: thread::current().id(),
            }),
        }
    }

    pub fn sender(&self) -> TaskSender<C> {
        TaskSender {
            shared: self.shared.clone(),
        }
    }

    pub fn set_waker(&self, waker: Arc<dyn Waker>) {
        *self.shared.waker.lock() = Some(waker);
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    pub fn pending(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Run `task` right away on the owning thread, otherwise enqueue it.
    pub fn execute<F>(&self, task: F, ctx: &mut C)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        if self.is_owner_thread() {
            task(ctx);
        } else {
            self.shared.enqueue(Box::new(task));
        }
    }

    /// Run everything enqueued so far, in order. Returns how many ran.
    pub fn run_pending(&self, ctx: &mut C) -> Result<usize> {
        if !self.is_owner_thread() {
            return Err(MosaicError::Usage(
                "tasks can only run on the thread that owns the queue".into(),
            ));
        }
        let batch: VecDeque<Task<C>> = std::mem::take(&mut *self.shared.tasks.lock());
        let count = batch.len();
        for task in batch {
            task(ctx);
        }
        Ok(count)
    }

    /// Block until a task is pending or `timeout` elapses. Returns whether
    /// tasks are pending.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut tasks = self.shared.tasks.lock();
        if tasks.is_empty() {
            self.shared.ready.wait_for(&mut tasks, timeout);
        }
        !tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counter(AtomicUsize);

    impl Waker for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn runs_tasks_in_fifo_order() {
        let queue: TaskQueue<Vec<u32>> = TaskQueue::new();
        let sender = queue.sender();
        for i in 0..3 {
            sender.enqueue(move |log: &mut Vec<u32>| log.push(i));
        }
        let mut log = Vec::new();
        assert_eq!(queue.run_pending(&mut log).unwrap(), 3);
        assert_eq!(log, vec![0, 1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn execute_runs_inline_on_owner_thread() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let mut value = 0;
        queue.execute(|v: &mut u32| *v = 7, &mut value);
        assert_eq!(value, 7);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn foreign_threads_enqueue_and_wake() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        queue.set_waker(counter.clone());
        let sender = queue.sender();

        let handle = thread::spawn(move || {
            assert!(!sender.is_owner_thread());
            sender.enqueue(|v: &mut u32| *v += 1);
        });
        handle.join().unwrap();

        assert!(queue.wait_timeout(Duration::from_secs(5)));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        let mut value = 0;
        queue.run_pending(&mut value).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn running_off_thread_is_usage_error() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let other = queue.clone();
        let err = thread::spawn(move || {
            let mut v = 0;
            other.run_pending(&mut v).unwrap_err()
        })
        .join()
        .unwrap();
        assert!(err.is_usage());
    }

    #[test]
    fn wait_times_out_when_idle() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(!queue.wait_timeout(Duration::from_millis(10)));
    }
}
