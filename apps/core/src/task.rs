use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{ListenerRegistry, TaskEvent};
use crate::tag_store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub u32);

impl EventId {
    pub const NONE: EventId = EventId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    Determinate,
    #[default]
    Indeterminate,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

pub trait Task: Send {
    fn label(&self) -> &str {
        "task"
    }

    fn event_id(&self) -> EventId {
        EventId::NONE
    }

    /// Must poll `ctx.is_cancelled()` and return soon after a cancel request.
    fn background_work(&mut self, ctx: &TaskContext) -> Result<(), TaskError>;
}

type CancelHook = Box<dyn Fn() + Send + Sync>;

pub struct TaskControl {
    task_id: TaskId,
    event_id: EventId,
    label: String,
    cancelled: AtomicBool,
    cancel_hook: Mutex<Option<CancelHook>>,
    progress_mode: Mutex<ProgressMode>,
    percent: AtomicU8,
    status: Mutex<String>,
}

impl fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControl")
            .field("task_id", &self.task_id)
            .field("event_id", &self.event_id)
            .field("label", &self.label)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl TaskControl {
    pub fn new(task_id: TaskId, event_id: EventId, label: &str) -> Self {
        Self {
            task_id,
            event_id,
            label: label.to_string(),
            cancelled: AtomicBool::new(false),
            cancel_hook: Mutex::new(None),
            progress_mode: Mutex::new(ProgressMode::default()),
            percent: AtomicU8::new(0),
            status: Mutex::new(String::new()),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Only the first call raises the flag and runs the hook.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(hook) = self.cancel_hook.lock().as_ref() {
            hook();
        }
        log::debug!("task {} ({}) cancelled", self.task_id, self.label);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress_mode(&self) -> ProgressMode {
        *self.progress_mode.lock()
    }

    pub fn percent_complete(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }
}

pub struct TaskContext {
    control: Arc<TaskControl>,
    listeners: Arc<ListenerRegistry>,
}

impl TaskContext {
    pub(crate) fn new(control: Arc<TaskControl>, listeners: Arc<ListenerRegistry>) -> Self {
        Self { control, listeners }
    }

    pub fn task_id(&self) -> TaskId {
        self.control.task_id
    }

    pub fn event_id(&self) -> EventId {
        self.control.event_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn set_cancel_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut slot = self.control.cancel_hook.lock();
        if self.control.is_cancelled() {
            hook();
            return;
        }
        *slot = Some(Box::new(hook));
    }

    pub fn clear_cancel_hook(&self) {
        self.control.cancel_hook.lock().take();
    }

    pub fn set_progress_mode(&self, mode: ProgressMode) {
        *self.control.progress_mode.lock() = mode;
    }

    pub fn set_percent_complete(&self, percent: i32) {
        let clamped = percent.clamp(0, 100) as u8;
        self.control.percent.store(clamped, Ordering::SeqCst);
        let message = self.control.status.lock().clone();
        self.post_progress(message);
    }

    pub fn set_status(&self, text: &str) {
        *self.control.status.lock() = text.to_string();
        self.post_progress(text.to_string());
    }

    pub fn post_event(&self, event: TaskEvent) {
        self.listeners.post(event);
    }

    fn post_progress(&self, message: String) {
        let mode = self.control.progress_mode();
        let percent = match mode {
            ProgressMode::Determinate => self.control.percent_complete(),
            ProgressMode::Indeterminate => 0,
        };
        self.post_event(TaskEvent::Progress {
            event_id: self.control.event_id,
            task_id: self.control.task_id,
            mode,
            percent,
            message,
        });
    }
}

pub trait ThreadCleanup: Send {
    fn cleanup(&mut self);

    fn clone_for_thread(&self) -> Box<dyn ThreadCleanup>;
}
