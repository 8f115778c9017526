//! Completion signals for callers waiting on channel progress.

use std::collections::BTreeMap;
use std::sync::Arc;

use linkmux_frame::ChannelId;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// What a task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Send-buffer space freed by an acknowledged packet.
    Send,
    /// New data in the channel's receive buffer.
    Receive,
}

#[derive(Debug)]
struct Task {
    channel: ChannelId,
    kind: TaskKind,
    event: Arc<Event>,
}

/// Registry of outstanding tasks and their wait handles.
#[derive(Debug)]
pub struct TaskManager {
    tasks: BTreeMap<u32, Task>,
    next_id: u32,
    send_ready_notifications: u64,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
            send_ready_notifications: 0,
        }
    }

    /// Register a task and return its id. Ids are never 0.
    pub fn allocate(&mut self, channel: ChannelId, kind: TaskKind) -> u32 {
        let mut id = self.next_id;
        while id == 0 || self.tasks.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);

        self.tasks.insert(
            id,
            Task {
                channel,
                kind,
                event: Arc::new(Event::new()),
            },
        );
        id
    }

    /// Forget a task. Returns whether it existed.
    pub fn free(&mut self, task_id: u32) -> bool {
        self.tasks.remove(&task_id).is_some()
    }

    /// Wait handle of a registered task.
    pub fn get_task_event(&self, task_id: u32) -> Option<Arc<Event>> {
        self.tasks.get(&task_id).map(|task| Arc::clone(&task.event))
    }

    /// A send slot freed up: wake every task waiting for send space.
    pub fn notify_send_ready(&mut self) {
        self.send_ready_notifications += 1;
        for task in self.tasks.values().filter(|t| t.kind == TaskKind::Send) {
            task.event.signal();
        }
    }

    /// Data arrived on `channel`: wake its receive waiters.
    pub fn notify_receive_data(&mut self, channel: ChannelId) {
        for task in self
            .tasks
            .values()
            .filter(|t| t.kind == TaskKind::Receive && t.channel == channel)
        {
            task.event.signal();
        }
    }

    /// Drop every task bound to `channel`, waking its waiters first.
    pub fn free_channel_tasks(&mut self, channel: ChannelId) {
        self.tasks.retain(|_, task| {
            if task.channel == channel {
                task.event.signal();
                false
            } else {
                true
            }
        });
    }

    /// Number of `notify_send_ready` calls so far.
    pub fn send_ready_notifications(&self) -> u64 {
        self.send_ready_notifications
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
