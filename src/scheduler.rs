//! Bounded task scheduler.
//!
//! A fixed pool of worker threads accepting opaque units of work. Every submission returns a
//! [`TaskHandle`] that can be waited on for the task result or simply dropped when the caller
//! observes completion some other way.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{bounded, Receiver};
use log;

/// Scheduler error.
#[derive(Debug)]
pub enum SchedulerError {
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Task submitted after shutdown has been initiated.
    PoolClosed,
    /// Task callable panicked.
    TaskPanicked(String),
    /// Task was dropped before producing a result.
    TaskLost,
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SchedulerError::ThreadPoolBuildError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SchedulerError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SchedulerError::PoolClosed => write!(f, "scheduler is shut down, task rejected"),
            SchedulerError::TaskPanicked(msg) => write!(f, "task panicked: {}", msg),
            SchedulerError::TaskLost => write!(f, "task dropped without a result"),
        }
    }
}

/// Bookkeeping shared between the scheduler and its running tasks.
#[derive(Default)]
struct State {
    /// Submitted tasks not yet picked up by a worker.
    queued: AtomicUsize,
    /// Tasks whose callable is executing.
    running: AtomicUsize,
    /// Close flag and number of tasks not yet finished, guarded together.
    outstanding: Mutex<Outstanding>,
    /// Signalled when the last outstanding task finishes.
    drained: Condvar,
}

#[derive(Default)]
struct Outstanding {
    closed: bool,
    tasks: usize,
}

impl State {
    fn finish(&self) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(|err| err.into_inner());
        outstanding.tasks -= 1;
        if outstanding.tasks == 0 {
            self.drained.notify_all();
        }
    }
}

/// Handle of a submitted task.
pub struct TaskHandle<T> {
    receiver: Receiver<std::thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks the calling thread until the task callable returns.
    pub fn wait(self) -> Result<T, SchedulerError> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(SchedulerError::TaskPanicked(panic_message(payload))),
            Err(_) => Err(SchedulerError::TaskLost),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed-size worker pool.
pub struct Scheduler {
    /// Worker thread pool, released on shutdown.
    thread_pool: Option<rayon::ThreadPool>,
    /// Number of workers.
    threads: usize,
    state: Arc<State>,
}

impl Scheduler {
    /// Creates a new scheduler.
    ///
    /// # Arguments
    /// * `threads_number` - Number of worker threads. If the parameter is [`None`] threads number will be
    ///   selected based on available CPU core number.
    pub fn new(threads_number: Option<usize>) -> Result<Self, SchedulerError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("shard-worker-{}", idx));

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SchedulerError::ThreadPoolBuildError(err))?;

        return Ok(Scheduler {
            threads: thread_pool.current_num_threads(),
            thread_pool: Some(thread_pool),
            state: Arc::new(State::default()),
        });
    }

    /// Returns the number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Enqueues a unit of work.
    /// Fails with [`SchedulerError::PoolClosed`] once shutdown has been initiated.
    pub fn submit<F, T>(&self, work: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let thread_pool = match &self.thread_pool {
            Some(thread_pool) => thread_pool,
            None => return Err(SchedulerError::PoolClosed),
        };

        {
            let mut outstanding = self.state.outstanding.lock().unwrap_or_else(|err| err.into_inner());
            if outstanding.closed {
                return Err(SchedulerError::PoolClosed);
            }
            outstanding.tasks += 1;
            self.state.queued.fetch_add(1, Ordering::SeqCst);
        }

        let (sender, receiver) = bounded(1);
        let state = Arc::clone(&self.state);

        thread_pool.spawn(move || {
            state.running.fetch_add(1, Ordering::SeqCst);
            state.queued.fetch_sub(1, Ordering::SeqCst);

            let result = panic::catch_unwind(AssertUnwindSafe(work));
            if result.is_err() {
                log::error!("scheduled task panicked");
            }

            state.running.fetch_sub(1, Ordering::SeqCst);
            // the handle may have been dropped, the result is discarded then
            let _ = sender.send(result);
            state.finish();
        });

        return Ok(TaskHandle { receiver });
    }

    /// Checks that no task is executing and none is queued.
    ///
    /// Both counters are read one after the other, not as a consistent snapshot, so the answer is a
    /// heuristic: a `true` may be stale as soon as it is returned if other threads keep submitting.
    pub fn quiescent(&self) -> bool {
        self.state.queued.load(Ordering::SeqCst) == 0 && self.state.running.load(Ordering::SeqCst) == 0
    }

    /// Stops task intake and blocks until every already queued task has run.
    pub fn shutdown(&mut self) {
        {
            let mut outstanding = self.state.outstanding.lock().unwrap_or_else(|err| err.into_inner());
            if !outstanding.closed {
                log::debug!("shutting down scheduler ({} tasks outstanding)", outstanding.tasks);
            }
            outstanding.closed = true;
            while outstanding.tasks > 0 {
                outstanding = self
                    .state
                    .drained
                    .wait(outstanding)
                    .unwrap_or_else(|err| err.into_inner());
            }
        }

        // dropping the pool lets the idle workers exit
        self.thread_pool.take();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use rstest::*;

    use super::{Scheduler, SchedulerError};

    #[rstest]
    #[case(1, 10)]
    #[case(2, 50)]
    #[case(4, 200)]
    fn test_each_task_runs_once(#[case] threads: usize, #[case] tasks: usize) {
        let scheduler = Scheduler::new(Some(threads)).unwrap();
        assert_eq!(scheduler.threads(), threads);

        let executed = Arc::new((0..tasks).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());

        let handles: Vec<_> = (0..tasks)
            .map(|idx| {
                let executed = Arc::clone(&executed);
                scheduler
                    .submit(move || {
                        executed[idx].fetch_add(1, Ordering::SeqCst);
                        idx * 2
                    })
                    .unwrap()
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|handle| handle.wait().unwrap()).collect();

        assert_eq!(results, Vec::from_iter((0..tasks).map(|idx| idx * 2)));
        assert!(executed.iter().all(|count| count.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_quiescent_after_all_tasks_returned() {
        let scheduler = Scheduler::new(Some(2)).unwrap();
        assert!(scheduler.quiescent());

        let barrier = Arc::new(Barrier::new(2));
        let task_barrier = Arc::clone(&barrier);
        let handle = scheduler.submit(move || {
            task_barrier.wait();
        })
        .unwrap();

        assert!(!scheduler.quiescent());
        barrier.wait();
        handle.wait().unwrap();

        assert!(scheduler.quiescent());
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut scheduler = Scheduler::new(Some(2)).unwrap();
        scheduler.shutdown();

        match scheduler.submit(|| 1) {
            Err(SchedulerError::PoolClosed) => (),
            _ => panic!("task accepted by a closed scheduler"),
        }
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let mut scheduler = Scheduler::new(Some(1)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            // handles dropped on purpose
            scheduler
                .submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        scheduler.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert!(scheduler.quiescent());
    }

    #[test]
    fn test_task_panic_is_reported() {
        let scheduler = Scheduler::new(Some(1)).unwrap();
        let handle = scheduler.submit(|| -> usize { panic!("boom") }).unwrap();

        match handle.wait() {
            Err(SchedulerError::TaskPanicked(msg)) => assert_eq!(msg, "boom"),
            _ => panic!("panic not reported"),
        }

        // the worker survives the panic
        assert_eq!(scheduler.submit(|| 3).unwrap().wait().unwrap(), 3);
    }
}
