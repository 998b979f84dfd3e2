//! Language Pool: a bounded, dynamically-grown set of [`ExecutorHandle`]s
//! for one language family, plus its ready/busy bookkeeping and
//! pending-task queue.
//!
//! `LanguagePool` itself only holds state; the `tryDispatch` *algorithm*
//! lives in [`crate::orchestrator`] because assigning a task means sending
//! a message on the handle and growing the pool means spawning a
//! transport — both belong to the control loop, not to this struct.

use std::time::Instant;

use serde::Serialize;

use crate::config::PoolConfig;
use crate::handle::{ExecutorHandle, HandleId};
use crate::protocol::{Language, TaskId};
use crate::task::TaskQueue;

pub struct LanguagePool {
    pub language: Language,
    pub config: PoolConfig,
    pub handles: Vec<ExecutorHandle>,
    pub queue: TaskQueue,
}

/// Snapshot returned by `Orchestrator::stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub language: String,
    pub handles: usize,
    pub ready: usize,
    pub busy: usize,
    pub queued: usize,
    pub ceiling: usize,
}

impl LanguagePool {
    pub fn new(language: Language, config: PoolConfig) -> Self {
        Self {
            language,
            config,
            handles: Vec::new(),
            queue: TaskQueue::new(),
        }
    }

    pub fn can_grow(&self) -> bool {
        self.handles.len() < self.config.ceiling
    }

    pub fn find_idle_ready(&self) -> Option<HandleId> {
        self.handles
            .iter()
            .find(|h| h.is_idle_ready())
            .map(|h| h.id)
    }

    pub fn handle_mut(&mut self, id: HandleId) -> Option<&mut ExecutorHandle> {
        self.handles.iter_mut().find(|h| h.id == id)
    }

    pub fn find_by_task_mut(&mut self, task_id: &TaskId) -> Option<&mut ExecutorHandle> {
        self.handles
            .iter_mut()
            .find(|h| h.assigned_task_id() == Some(task_id))
    }

    pub fn remove_handle(&mut self, id: HandleId) -> Option<ExecutorHandle> {
        let index = self.handles.iter().position(|h| h.id == id)?;
        Some(self.handles.remove(index))
    }

    pub fn push_handle(&mut self, handle: ExecutorHandle) {
        debug_assert!(self.handles.len() < self.config.ceiling, "pool ceiling invariant");
        self.handles.push(handle);
    }

    /// Retirement candidates: idle-ready handles that have been idle past
    /// `idle_timeout`, kept down to (but never below) `idle_floor`. Returns
    /// `[]` when idle cleanup is disabled.
    pub fn idle_retirement_candidates(&self, now: Instant) -> Vec<HandleId> {
        let (Some(floor), Some(timeout)) = (self.config.idle_floor, self.config.idle_timeout)
        else {
            return Vec::new();
        };

        let idle_ready: Vec<&ExecutorHandle> = self
            .handles
            .iter()
            .filter(|h| h.is_idle_ready())
            .collect();

        if idle_ready.len() <= floor {
            return Vec::new();
        }

        let mut candidates: Vec<&ExecutorHandle> = idle_ready
            .into_iter()
            .filter(|h| {
                h.idle_since
                    .map(|since| now.duration_since(since) >= timeout)
                    .unwrap_or(false)
            })
            .collect();

        // Retire the longest-idle handles first, never dropping below the
        // floor across the whole idle-ready set.
        candidates.sort_by_key(|h| h.idle_since);
        let current_idle_ready = self.handles.iter().filter(|h| h.is_idle_ready()).count();
        let max_retirable = current_idle_ready.saturating_sub(floor);
        candidates.truncate(max_retirable);
        candidates.into_iter().map(|h| h.id).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let ready = self.handles.iter().filter(|h| h.ready).count();
        let busy = self
            .handles
            .iter()
            .filter(|h| h.assigned_task.is_some())
            .count();
        PoolStats {
            language: self.language.pool_key(),
            handles: self.handles.len(),
            ready,
            busy,
            queued: self.queue.len(),
            ceiling: self.config.ceiling,
        }
    }
}
