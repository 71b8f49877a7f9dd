use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::events::{ListenerRegistry, TaskEvent};
use crate::task::{Task, TaskContext, TaskControl, TaskId, ThreadCleanup};

const IDLE_WAIT: Duration = Duration::from_millis(50);

pub(crate) struct QueuedTask {
    pub control: Arc<TaskControl>,
    pub task: Box<dyn Task>,
}

pub(crate) struct TaskQueue {
    pub tasks: Mutex<VecDeque<QueuedTask>>,
    pub available: Condvar,
    pub stop_requested: AtomicBool,
    pub in_flight: AtomicUsize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn discard(&self, queued: QueuedTask) {
        log::debug!(
            "discarding queued task {} ({})",
            queued.control.task_id(),
            queued.control.label()
        );
        drop(queued);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct WorkerThread {
    running: Arc<Mutex<Option<Arc<TaskControl>>>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub fn spawn(
        index: usize,
        queue: Arc<TaskQueue>,
        listeners: Arc<ListenerRegistry>,
        cleanup: Option<Box<dyn ThreadCleanup>>,
    ) -> std::io::Result<Self> {
        let running: Arc<Mutex<Option<Arc<TaskControl>>>> = Arc::new(Mutex::new(None));
        let slot = running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("phpdesk-worker-{index}"))
            .spawn(move || entry(queue, slot, listeners, cleanup))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn cancel_running_if(&self, task_id: TaskId) -> bool {
        match self.running.lock().as_ref() {
            Some(control) if control.task_id() == task_id => {
                control.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_running(&self) {
        if let Some(control) = self.running.lock().as_ref() {
            control.cancel();
        }
    }

    pub fn is_running_task(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker thread panicked while running a task");
            }
        }
    }
}

fn entry(
    queue: Arc<TaskQueue>,
    running: Arc<Mutex<Option<Arc<TaskControl>>>>,
    listeners: Arc<ListenerRegistry>,
    mut cleanup: Option<Box<dyn ThreadCleanup>>,
) {
    log::debug!("worker {:?} started", std::thread::current().name());
    while let Some(QueuedTask { control, mut task }) = next_task(&queue, &running) {
        if control.is_cancelled() {
            log::debug!("skipping task {} cancelled before start", control.task_id());
        } else {
            let ctx = TaskContext::new(control.clone(), listeners.clone());
            let message = match task.background_work(&ctx) {
                Ok(()) => String::new(),
                Err(error) => {
                    log::warn!("task {} ({}) failed: {error}", control.task_id(), control.label());
                    error.to_string()
                }
            };
            ctx.clear_cancel_hook();
            listeners.post(TaskEvent::Completion {
                event_id: control.event_id(),
                task_id: control.task_id(),
                message,
            });
        }

        drop(task);
        running.lock().take();
        queue.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    if let Some(cleanup) = cleanup.as_mut() {
        cleanup.cleanup();
    }
    log::debug!("worker {:?} terminated", std::thread::current().name());
}

// The running slot is published under the queue lock, so a concurrent stop or
// cancel finds the task either in the queue or in the slot.
fn next_task(
    queue: &TaskQueue,
    running: &Mutex<Option<Arc<TaskControl>>>,
) -> Option<QueuedTask> {
    let mut tasks = queue.tasks.lock();
    loop {
        if queue.stop_requested.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(queued) = tasks.pop_front() {
            *running.lock() = Some(queued.control.clone());
            return Some(queued);
        }
        queue.available.wait_for(&mut tasks, IDLE_WAIT);
    }
}
