use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::tag::Tag;
use crate::task::{EventId, ProgressMode, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress {
        event_id: EventId,
        task_id: TaskId,
        mode: ProgressMode,
        percent: u8,
        message: String,
    },
    Completion {
        event_id: EventId,
        task_id: TaskId,
        message: String,
    },
    Heartbeat,
    TagSearchComplete {
        event_id: EventId,
        query: String,
        tags: Vec<Tag>,
        error: Option<String>,
    },
    FileListingComplete {
        event_id: EventId,
        files: Vec<PathBuf>,
    },
}

impl TaskEvent {
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Self::Progress { event_id, .. }
            | Self::Completion { event_id, .. }
            | Self::TagSearchComplete { event_id, .. }
            | Self::FileListingComplete { event_id, .. } => Some(*event_id),
            Self::Heartbeat => None,
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TaskEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    Immediate,
    #[default]
    Marshaled,
}

pub struct ListenerRegistry {
    mode: DeliveryMode,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn EventListener>)>>,
    pending_tx: Sender<TaskEvent>,
    pending_rx: Receiver<TaskEvent>,
}

impl ListenerRegistry {
    pub fn new(mode: DeliveryMode) -> Self {
        let (pending_tx, pending_rx) = crossbeam_channel::unbounded();
        Self {
            mode,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            pending_tx,
            pending_rx,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn add(&self, listener: &Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, Arc::downgrade(listener)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn post(&self, event: TaskEvent) {
        match self.mode {
            DeliveryMode::Immediate => self.deliver(&event),
            DeliveryMode::Marshaled => {
                // The registry owns the receiver, so the channel never disconnects.
                let _ = self.pending_tx.send(event);
            }
        }
    }

    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.pending_rx.try_recv() {
            self.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    pub fn dispatch_pending_timeout(&self, timeout: Duration) -> usize {
        match self.pending_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.deliver(&event);
                1 + self.dispatch_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn deliver(&self, event: &TaskEvent) {
        let live: Vec<Arc<dyn EventListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(_, weak)| weak.strong_count() > 0);
            listeners.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for listener in live {
            listener.on_event(event);
        }
    }
}
