use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, tick, Sender};
use parking_lot::Mutex;

use crate::events::{DeliveryMode, EventListener, ListenerId, ListenerRegistry, TaskEvent};
use crate::task::{Task, TaskControl, TaskId, ThreadCleanup};
use crate::worker::{QueuedTask, TaskQueue, WorkerThread};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the worker pool is already running; configure it before queueing tasks")]
    PoolStarted,

    #[error("the dispatcher has been shut down")]
    ShutDown,
}

struct Heartbeat {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RunningTasks {
    queue: Arc<TaskQueue>,
    listeners: Arc<ListenerRegistry>,
    workers: Mutex<Vec<WorkerThread>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    thread_cleanup: Mutex<Option<Box<dyn ThreadCleanup>>>,
    max_threads: Mutex<usize>,
    heartbeat_interval: Mutex<Duration>,
    started: AtomicBool,
    is_shutdown: AtomicBool,
    next_task_id: AtomicU64,
}

impl RunningTasks {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            listeners: Arc::new(ListenerRegistry::new(mode)),
            workers: Mutex::new(Vec::new()),
            heartbeat: Mutex::new(None),
            thread_cleanup: Mutex::new(None),
            max_threads: Mutex::new(0),
            heartbeat_interval: Mutex::new(DEFAULT_HEARTBEAT_INTERVAL),
            started: AtomicBool::new(false),
            is_shutdown: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub fn set_max_threads(&self, max_threads: usize) -> Result<(), DispatchError> {
        self.ensure_configurable()?;
        *self.max_threads.lock() = max_threads;
        Ok(())
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) -> Result<(), DispatchError> {
        self.ensure_configurable()?;
        *self.heartbeat_interval.lock() = interval;
        Ok(())
    }

    pub fn set_thread_cleanup(&self, cleanup: Box<dyn ThreadCleanup>) {
        *self.thread_cleanup.lock() = Some(cleanup);
    }

    fn ensure_configurable(&self) -> Result<(), DispatchError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown);
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(DispatchError::PoolStarted);
        }
        Ok(())
    }

    /// After shutdown the task is dropped without running and `None` is returned.
    pub fn queue(&self, task: Box<dyn Task>) -> Option<TaskId> {
        let mut tasks = self.queue.tasks.lock();
        if self.is_shutdown.load(Ordering::SeqCst) {
            drop(tasks);
            log::debug!("ignoring task '{}' queued after shutdown", task.label());
            return None;
        }
        self.started.store(true, Ordering::SeqCst);

        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        let control = Arc::new(TaskControl::new(task_id, task.event_id(), task.label()));
        log::debug!("queueing task {task_id} ({})", control.label());
        self.queue.in_flight.fetch_add(1, Ordering::SeqCst);
        tasks.push_back(QueuedTask { control, task });
        drop(tasks);
        self.queue.available.notify_one();

        self.ensure_pool();
        self.ensure_heartbeat();
        Some(task_id)
    }

    pub fn cancel_action(&self, task_id: TaskId) -> bool {
        let removed = {
            let mut tasks = self.queue.tasks.lock();
            tasks
                .iter()
                .position(|queued| queued.control.task_id() == task_id)
                .and_then(|index| tasks.remove(index))
        };
        if let Some(queued) = removed {
            queued.control.cancel();
            self.queue.discard(queued);
            return true;
        }

        self.workers
            .lock()
            .iter()
            .fold(false, |found, worker| worker.cancel_running_if(task_id) || found)
    }

    /// Blocks until every worker has returned. Hangs if a running task never honors
    /// cancellation.
    pub fn stop_all(&self) {
        let drained: Vec<QueuedTask> = {
            let mut tasks = self.queue.tasks.lock();
            self.queue.stop_requested.store(true, Ordering::SeqCst);
            tasks.drain(..).collect()
        };
        let drained_count = drained.len();
        for queued in drained {
            queued.control.cancel();
            self.queue.discard(queued);
        }
        self.queue.available.notify_all();

        let workers: Vec<WorkerThread> = std::mem::take(&mut *self.workers.lock());
        for worker in &workers {
            worker.cancel_running();
        }
        let worker_count = workers.len();
        for worker in workers {
            worker.join();
        }

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            let _ = heartbeat.stop_tx.send(());
            if heartbeat.handle.join().is_err() {
                log::error!("heartbeat thread panicked");
            }
        }

        // Tasks queued while the pool was stopping still need workers.
        let restarted = {
            let mut workers = self.workers.lock();
            self.queue.stop_requested.store(false, Ordering::SeqCst);
            let pending = !self.queue.tasks.lock().is_empty();
            if pending && workers.is_empty() && !self.is_shutdown() {
                self.spawn_workers(&mut workers);
                true
            } else {
                false
            }
        };
        if restarted {
            self.ensure_heartbeat();
        }

        if worker_count > 0 || drained_count > 0 {
            log::info!("stopped {worker_count} worker(s), discarded {drained_count} queued task(s)");
        }
    }

    pub fn shutdown(&self) {
        {
            let _tasks = self.queue.tasks.lock();
            self.is_shutdown.store(true, Ordering::SeqCst);
        }
        self.stop_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    pub fn add_event_handler(&self, listener: &Arc<dyn EventListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_event_handler(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn post_event(&self, event: TaskEvent) {
        self.listeners.post(event);
    }

    pub fn dispatch_pending(&self) -> usize {
        self.listeners.dispatch_pending()
    }

    pub fn dispatch_pending_timeout(&self, timeout: Duration) -> usize {
        self.listeners.dispatch_pending_timeout(timeout)
    }

    pub fn in_flight(&self) -> usize {
        self.queue.in_flight.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|worker| worker.is_running_task())
            .count()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.tasks.lock().len()
    }

    fn pool_size(&self) -> usize {
        match *self.max_threads.lock() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    fn ensure_pool(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty()
            || self.is_shutdown.load(Ordering::SeqCst)
            || self.queue.stop_requested.load(Ordering::SeqCst)
        {
            return;
        }
        self.spawn_workers(&mut workers);
    }

    fn spawn_workers(&self, workers: &mut Vec<WorkerThread>) {
        let size = self.pool_size();
        let cleanup = self.thread_cleanup.lock();
        for index in 0..size {
            let per_thread = cleanup.as_ref().map(|hook| hook.clone_for_thread());
            match WorkerThread::spawn(index, self.queue.clone(), self.listeners.clone(), per_thread) {
                Ok(worker) => workers.push(worker),
                Err(error) => log::error!("failed to spawn worker {index}: {error}"),
            }
        }
        log::info!("started {} worker thread(s)", workers.len());
    }

    fn ensure_heartbeat(&self) {
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_some() || self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        let interval = *self.heartbeat_interval.lock();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let queue = self.queue.clone();
        let listeners = self.listeners.clone();
        let spawned = std::thread::Builder::new()
            .name("phpdesk-heartbeat".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if queue.in_flight.load(Ordering::SeqCst) > 0 {
                                listeners.post(TaskEvent::Heartbeat);
                            }
                        }
                    }
                }
            });
        match spawned {
            Ok(handle) => *heartbeat = Some(Heartbeat { stop_tx, handle }),
            Err(error) => log::error!("failed to start heartbeat: {error}"),
        }
    }
}

impl Drop for RunningTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}
