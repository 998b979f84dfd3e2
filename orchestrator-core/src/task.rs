//! Task wrapper and the per-pool priority queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::ExecutionResult;
use crate::protocol::{ExecutionRequest, TaskId};

/// A pending or assigned execution, wrapping the request with its
/// single-assignment completion slot and submission bookkeeping.
///
/// Timers are owned by the orchestrator's control loop (as
/// `tokio::spawn`ed sleeps that post back into the command channel), not by
/// `Task` itself — see `orchestrator.rs`. `Task` only carries what's needed
/// to resolve it and to order it in the queue.
pub struct Task {
    pub request: ExecutionRequest,
    pub submitted_at: Instant,
    /// Monotonic counter used to break priority ties FIFO; assigned at
    /// enqueue time by the owning `TaskQueue`.
    pub sequence: u64,
    completion: Option<oneshot::Sender<ExecutionResult>>,
}

impl Task {
    pub fn new(request: ExecutionRequest, completion: oneshot::Sender<ExecutionResult>) -> Self {
        Self {
            request,
            submitted_at: Instant::now(),
            sequence: 0,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.request.id
    }

    pub fn priority(&self) -> i64 {
        self.request.priority
    }

    /// Resolves the task's future exactly once; later calls are no-ops so
    /// that a stray terminal/crash message arriving after resolution can't
    /// panic the control loop.
    pub fn resolve(&mut self, result: ExecutionResult) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.completion.is_none()
    }

    /// Splits an unresolved task into its request and completion slot, for
    /// callers (the Bytecode-Module Executor) that resolve off the control
    /// loop instead of through an `ExecutorHandle`.
    pub fn into_parts(mut self) -> (ExecutionRequest, oneshot::Sender<ExecutionResult>) {
        let completion = self.completion.take().expect("task not yet resolved");
        (self.request, completion)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.request.id)
            .field("priority", &self.request.priority)
            .field("sequence", &self.sequence)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Max-heap entry: higher priority first, then lower sequence number first
/// (FIFO within a priority band).
struct QueueEntry(Task);

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority() == other.0.priority() && self.0.sequence == other.0.sequence
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority()
            .cmp(&other.0.priority())
            // BinaryHeap is a max-heap; reverse sequence so the
            // earliest-submitted task among equal priorities pops first.
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// FIFO-within-priority queue of pending tasks for one language pool.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    next_sequence: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, mut task: Task) {
        task.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry(task));
    }

    /// Pops the highest-priority, earliest-submitted task.
    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Removes a queued task by id in O(n) and returns it, if present.
    /// `cancel(id)` on a queued task pays this linear scan.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let items: Vec<QueueEntry> = std::mem::take(&mut self.heap).into_vec();
        let mut removed = None;
        for entry in items {
            if removed.is_none() && entry.0.id() == id {
                removed = Some(entry.0);
            } else {
                self.heap.push(entry);
            }
        }
        removed
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.heap.iter().any(|entry| entry.0.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ExecutionOptions, Language};

    fn req(id: &str, priority: i64) -> ExecutionRequest {
        ExecutionRequest {
            id: id.to_string(),
            code: String::new(),
            language: Language::Scripted,
            options: ExecutionOptions::default(),
            priority,
        }
    }

    fn task(id: &str, priority: i64) -> Task {
        let (tx, _rx) = oneshot::channel();
        Task::new(req(id, priority), tx)
    }

    #[test]
    fn higher_priority_pops_first() {
        let mut q = TaskQueue::new();
        q.push(task("low", 0));
        q.push(task("high", 10));
        assert_eq!(q.pop().unwrap().id(), "high");
        assert_eq!(q.pop().unwrap().id(), "low");
    }

    #[test]
    fn fifo_within_priority() {
        let mut q = TaskQueue::new();
        q.push(task("first", 0));
        q.push(task("second", 0));
        q.push(task("third", 0));
        assert_eq!(q.pop().unwrap().id(), "first");
        assert_eq!(q.pop().unwrap().id(), "second");
        assert_eq!(q.pop().unwrap().id(), "third");
    }

    #[test]
    fn remove_by_id() {
        let mut q = TaskQueue::new();
        q.push(task("a", 0));
        q.push(task("b", 0));
        let removed = q.remove(&"a".to_string()).expect("present");
        assert_eq!(removed.id(), "a");
        assert_eq!(q.len(), 1);
        assert!(q.remove(&"missing".to_string()).is_none());
    }
}
