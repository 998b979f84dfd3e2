//! The Orchestrator: a single-writer control loop that owns every
//! `LanguagePool`, the Bytecode-Module Executor, and the Host Egress,
//! reached only through a command channel. Every public method on
//! [`Orchestrator`] is a clone-able handle around an `mpsc` sender; the
//! actual state lives in [`Actor`], which runs on one dedicated task so
//! `tryDispatch`, cancellation, and timeout escalation never race each
//! other — a single task owns all pool/handle mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::bytecode::BytecodeExecutor;
use crate::config::{self, BytecodeConfig, PoolConfig};
use crate::error::{ErrorKind, ExecutionError, ExecutionResult, OrchestratorError};
use crate::handle::{ExecutorHandle, HandleEvent, HandleId};
use crate::host_egress::{channel, HostEgress, HostSink};
use crate::pool::{LanguagePool, PoolStats};
use crate::protocol::{ExecutionRequest, InboundMessage, Language, OutboundMessage, TaskId};
use crate::spawner::ExecutorFactory;
use crate::task::{Task, TaskQueue};
use crate::transform::Transformer;

/// Everything the actor needs to stand up its pools, supplied once at
/// construction: binaries/ceilings are host-supplied.
pub struct OrchestratorConfig {
    pub scripted: PoolConfig,
    pub interpreted: PoolConfig,
    /// Module name -> ceiling. Bytecode pools are per-module configurable.
    pub bytecode_modules: HashMap<String, usize>,
    pub bytecode: BytecodeConfig,
    /// `None` disables the optional idle-retirement sweep entirely.
    pub idle_sweep_interval: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scripted: PoolConfig::scripted(),
            interpreted: PoolConfig::interpreted(),
            bytecode_modules: HashMap::new(),
            bytecode: BytecodeConfig::default(),
            idle_sweep_interval: None,
        }
    }
}

/// Clone-able façade over the control loop. Cloning just clones the
/// `mpsc::UnboundedSender`; every clone talks to the same actor.
#[derive(Clone)]
pub struct Orchestrator {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

enum Command {
    Submit {
        request: ExecutionRequest,
        completion: oneshot::Sender<ExecutionResult>,
        accept: oneshot::Sender<Result<(), OrchestratorError>>,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    ResolveInput {
        id: TaskId,
        value: String,
        request_id: Option<String>,
    },
    ClearModuleCache {
        package: Option<String>,
    },
    SetHostSink(Option<Arc<dyn HostSink>>),
    Stats(oneshot::Sender<Vec<PoolStats>>),
    Shutdown {
        drain: bool,
        reply: oneshot::Sender<()>,
    },
    Handle {
        pool_key: String,
        event: HandleEvent,
    },
    SoftTimeout {
        id: TaskId,
        epoch: u64,
    },
    ForceTimeout {
        id: TaskId,
        epoch: u64,
    },
    BytecodeCompleted {
        pool_key: String,
    },
    /// Fired once, `DEFAULT_INIT_BUDGET` after a handle is spawned; a no-op
    /// if the handle already reported `ready` by then.
    InitTimeout {
        pool_key: String,
        handle_id: HandleId,
    },
    IdleSweep,
}

impl Orchestrator {
    /// Spawns the control loop task and returns a handle to it.
    pub fn spawn(
        config: OrchestratorConfig,
        factory: Arc<dyn ExecutorFactory>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = Actor::new(config, factory, transformer, cmd_tx.clone());
        tokio::spawn(actor.run(cmd_rx));
        Self { cmd_tx }
    }

    /// Submits one request. Resolves once the task reaches a terminal
    /// state; never resolves early just because the task was accepted.
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult, OrchestratorError> {
        let (accept_tx, accept_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                request,
                completion: completion_tx,
                accept: accept_tx,
            })
            .map_err(|_| OrchestratorError::ShutDown)?;

        accept_rx.await.map_err(|_| OrchestratorError::ShutDown)??;
        let result = completion_rx.await.map_err(|_| OrchestratorError::ShutDown)?;
        Ok(result)
    }

    pub async fn cancel(&self, id: TaskId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Cancel { id, reply: reply_tx }).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// `resolveInput(id, value)`: routed to whichever channel the assigned
    /// handle actually uses. `request_id`
    /// threads a nested-prompt correlation id through for interpreted
    /// executors; scripted executors ignore it (the Input Bridge has no
    /// concept of concurrent requests).
    pub fn resolve_input(&self, id: TaskId, value: String, request_id: Option<String>) {
        let _ = self.cmd_tx.send(Command::ResolveInput { id, value, request_id });
    }

    pub fn clear_module_cache(&self, package: Option<String>) {
        let _ = self.cmd_tx.send(Command::ClearModuleCache { package });
    }

    pub fn set_host_sink(&self, sink: Option<Arc<dyn HostSink>>) {
        let _ = self.cmd_tx.send(Command::SetHostSink(sink));
    }

    pub async fn stats(&self) -> Vec<PoolStats> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stats(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// `shutdown(drain)`. `drain = true` lets in-flight tasks
    /// finish and rejects new submissions in the meantime; `drain = false`
    /// resolves everything outstanding with `cancelled` and tears down every
    /// handle immediately.
    pub async fn shutdown(&self, drain: bool) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { drain, reply: tx }).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

enum RunState {
    Running,
    Draining,
}

struct BytecodeQueue {
    ceiling: usize,
    in_flight: usize,
    queue: TaskQueue,
}

struct Actor {
    pools: HashMap<String, LanguagePool>,
    bytecode_queues: HashMap<String, BytecodeQueue>,
    bytecode: Arc<BytecodeExecutor>,
    factory: Arc<dyn ExecutorFactory>,
    transformer: Arc<dyn Transformer>,
    egress: Arc<HostEgress>,
    state: RunState,
    self_tx: mpsc::UnboundedSender<Command>,
    soft_epoch: HashMap<TaskId, u64>,
    force_epoch: HashMap<TaskId, u64>,
    /// Set while a cancel or timeout sequence is in flight for a task, so
    /// `resolve_terminal` knows to report `cancelled`/`timeout` instead of
    /// whatever the executor's own terminal message said: any terminal
    /// message before the force timer fires wins, reported under the kind
    /// that started the sequence.
    pending_cancel: HashMap<TaskId, ErrorKind>,
    pending_shutdown: Option<oneshot::Sender<()>>,
    idle_sweep_interval: Option<Duration>,
}

impl Actor {
    fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn ExecutorFactory>,
        transformer: Arc<dyn Transformer>,
        self_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let mut pools = HashMap::new();
        pools.insert("scripted".to_string(), LanguagePool::new(Language::Scripted, config.scripted));
        pools.insert(
            "interpreted".to_string(),
            LanguagePool::new(Language::Interpreted, config.interpreted),
        );

        let mut bytecode_queues = HashMap::new();
        for (name, ceiling) in &config.bytecode_modules {
            bytecode_queues.insert(
                Language::Bytecode(name.clone()).pool_key(),
                BytecodeQueue {
                    ceiling: *ceiling,
                    in_flight: 0,
                    queue: TaskQueue::new(),
                },
            );
        }

        Self {
            pools,
            bytecode_queues,
            bytecode: Arc::new(BytecodeExecutor::new(config.bytecode)),
            factory,
            transformer,
            egress: Arc::new(HostEgress::new()),
            state: RunState::Running,
            self_tx,
            soft_epoch: HashMap::new(),
            force_epoch: HashMap::new(),
            pending_cancel: HashMap::new(),
            pending_shutdown: None,
            idle_sweep_interval: config.idle_sweep_interval,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        if let Some(interval) = self.idle_sweep_interval {
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if tx.send(Command::IdleSweep).is_err() {
                        return;
                    }
                }
            });
        }

        while let Some(cmd) = cmd_rx.recv().await {
            self.handle(cmd);
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { request, completion, accept } => self.handle_submit(request, completion, accept),
            Command::Cancel { id, reply } => {
                let cancelled = self.cancel_task(id);
                let _ = reply.send(cancelled);
            }
            Command::ResolveInput { id, value, request_id } => self.handle_resolve_input(id, value, request_id),
            Command::ClearModuleCache { package } => self.handle_clear_cache(package),
            Command::SetHostSink(sink) => self.egress.set_sink(sink),
            Command::Stats(reply) => self.handle_stats(reply),
            Command::Shutdown { drain, reply } => self.handle_shutdown(drain, reply),
            Command::Handle { pool_key, event } => self.handle_handle_event(pool_key, event),
            Command::SoftTimeout { id, epoch } => self.handle_soft_timeout(id, epoch),
            Command::ForceTimeout { id, epoch } => self.handle_force_timeout(id, epoch),
            Command::BytecodeCompleted { pool_key } => {
                if let Some(bq) = self.bytecode_queues.get_mut(&pool_key) {
                    bq.in_flight = bq.in_flight.saturating_sub(1);
                }
                self.try_dispatch_bytecode(&pool_key);
            }
            Command::InitTimeout { pool_key, handle_id } => self.handle_init_timeout(&pool_key, handle_id),
            Command::IdleSweep => self.handle_idle_sweep(),
        }
    }

    // ---- submit -----------------------------------------------------

    fn handle_submit(
        &mut self,
        mut request: ExecutionRequest,
        completion: oneshot::Sender<ExecutionResult>,
        accept: oneshot::Sender<Result<(), OrchestratorError>>,
    ) {
        if matches!(self.state, RunState::Draining) {
            let _ = accept.send(Err(OrchestratorError::Draining));
            return;
        }
        let _ = accept.send(Ok(()));

        let pool_key = request.language.pool_key();
        tracing::info!(task_id = %request.id, language = %request.language, "task submitted");
        self.egress.send(
            channel::LOG_ENTRY,
            serde_json::json!({"event": "submit", "taskId": request.id, "language": pool_key}),
        );

        let recognized = match &request.language {
            Language::Scripted | Language::Interpreted => true,
            Language::Bytecode(_) => self.bytecode_queues.contains_key(&pool_key),
        };
        if !recognized {
            let mut task = Task::new(request.clone(), completion);
            task.resolve(Err(ExecutionError::unknown_language(&request.language)));
            return;
        }

        // Interpreted source is passed through untouched; scripted and
        // bytecode both run through `transform` first.
        let transformed = match &request.language {
            Language::Interpreted => Ok(request.code.clone()),
            _ => self.transformer.transform(&request.code, &request.options),
        };

        match transformed {
            Ok(code) => request.code = code,
            Err(message) => {
                let mut task = Task::new(request, completion);
                task.resolve(Err(ExecutionError::transpile(message)));
                return;
            }
        }

        if matches!(request.language, Language::Bytecode(_)) {
            self.submit_bytecode(pool_key, request, completion);
        } else {
            self.submit_process(pool_key, request, completion);
        }
    }

    fn submit_process(&mut self, pool_key: String, request: ExecutionRequest, completion: oneshot::Sender<ExecutionResult>) {
        let pool = self.pools.get_mut(&pool_key).expect("scripted/interpreted pools are pre-registered");
        if pool.queue.len() >= pool.config.queue_ceiling {
            let mut task = Task::new(request, completion);
            task.resolve(Err(ExecutionError::queue_full()));
            return;
        }
        pool.queue.push(Task::new(request, completion));
        self.try_dispatch(&pool_key);
    }

    fn submit_bytecode(&mut self, pool_key: String, request: ExecutionRequest, completion: oneshot::Sender<ExecutionResult>) {
        let bq = self.bytecode_queues.get_mut(&pool_key).expect("recognized bytecode language is pre-registered");
        if bq.queue.len() >= 100 {
            let mut task = Task::new(request, completion);
            task.resolve(Err(ExecutionError::queue_full()));
            return;
        }
        bq.queue.push(Task::new(request, completion));
        self.try_dispatch_bytecode(&pool_key);
    }

    // ---- tryDispatch ---------------------------------------------------

    fn try_dispatch(&mut self, pool_key: &str) {
        loop {
            let Some(pool) = self.pools.get_mut(pool_key) else { return };
            if pool.queue.is_empty() {
                self.maybe_retire_idle_during_drain(pool_key);
                return;
            }
            if let Some(handle_id) = pool.find_idle_ready() {
                let task = pool.queue.pop().expect("queue just checked non-empty");
                self.assign(pool_key, handle_id, task);
                continue;
            }
            let draining = matches!(self.state, RunState::Draining);
            if !draining && pool.can_grow() {
                self.spawn_handle(pool_key.to_string());
            }
            return;
        }
    }

    fn assign(&mut self, pool_key: &str, handle_id: HandleId, mut task: Task) {
        let language = task.request.language.clone();
        let timeout_ms = task.request.options.timeout_ms;
        let id = task.id().clone();
        let epoch = self.bump_soft_epoch(&id);

        let Some(pool) = self.pools.get_mut(pool_key) else { return };
        let Some(handle) = pool.handle_mut(handle_id) else {
            pool.queue.push(task);
            return;
        };

        let code = task.request.code.clone();
        let options = task.request.options.clone();
        handle.idle_since = None;
        let send_result = handle.send(InboundMessage::Execute { id: id.clone(), code, options });
        handle.assigned_task = Some(task);

        if let Err(error) = send_result {
            tracing::warn!(task_id = %id, %error, "failed to send execute to handle; treating as worker-crash");
            self.on_exit(pool_key, handle_id, None);
            return;
        }

        self.spawn_soft_timer(id, timeout_ms, &language, epoch);
    }

    fn spawn_handle(&mut self, pool_key: String) {
        let Some(pool) = self.pools.get_mut(&pool_key) else { return };
        let language = pool.language.clone();
        let transport = match self.factory.spawn(&language) {
            Ok(transport) => transport,
            Err(error) => {
                tracing::error!(pool = %pool_key, %error, "failed to spawn executor transport");
                return;
            }
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let input_bridge = match &language {
            Language::Scripted => crate::input_bridge::InputBridge::new().ok(),
            _ => None,
        };
        let interrupt_byte = match &language {
            Language::Interpreted => Some(crate::interrupt::InterruptByte::new()),
            _ => None,
        };

        let mut handle = ExecutorHandle::spawn(language, transport, events_tx, input_bridge.clone(), interrupt_byte.clone());
        if let Some(interrupt_byte) = &interrupt_byte {
            let _ = handle.send(InboundMessage::SetInterruptBuffer {
                buffer: vec![interrupt_byte.current()],
            });
        }

        let self_tx = self.self_tx.clone();
        let bridge_pool_key = pool_key.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if self_tx
                    .send(Command::Handle { pool_key: bridge_pool_key.clone(), event })
                    .is_err()
                {
                    return;
                }
            }
        });

        let handle_id = handle.id;
        let init_tx = self.self_tx.clone();
        let init_pool_key = pool_key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config::DEFAULT_INIT_BUDGET).await;
            let _ = init_tx.send(Command::InitTimeout { pool_key: init_pool_key, handle_id });
        });

        pool.push_handle(handle);
    }

    // ---- cancellation & timeout escalation ------------------------------

    fn cancel_task(&mut self, id: TaskId) -> bool {
        for pool in self.pools.values_mut() {
            if let Some(mut task) = pool.queue.remove(&id) {
                task.resolve(Err(ExecutionError::cancelled()));
                return true;
            }
        }
        for bq in self.bytecode_queues.values_mut() {
            if let Some(mut task) = bq.queue.remove(&id) {
                task.resolve(Err(ExecutionError::cancelled()));
                return true;
            }
        }
        if let Some((pool_key, handle_id)) = self.locate_assigned(&id) {
            self.start_cancel_sequence(&pool_key, handle_id, ErrorKind::Cancelled);
            return true;
        }
        // A bytecode task already dispatched to wasmtime has no kill path;
        // cancel(id) on it is a documented no-op.
        false
    }

    fn locate_assigned(&self, id: &TaskId) -> Option<(String, HandleId)> {
        for (pool_key, pool) in &self.pools {
            if let Some(handle) = pool.handles.iter().find(|h| h.assigned_task_id() == Some(id)) {
                return Some((pool_key.clone(), handle.id));
            }
        }
        None
    }

    fn start_cancel_sequence(&mut self, pool_key: &str, handle_id: HandleId, kind: ErrorKind) {
        let Some(pool) = self.pools.get_mut(pool_key) else { return };
        let Some(handle) = pool.handle_mut(handle_id) else { return };
        let Some(task_id) = handle.assigned_task_id().cloned() else { return };

        if self.pending_cancel.contains_key(&task_id) {
            // Already mid-sequence (e.g. the soft timer fired after an
            // explicit cancel was already issued); don't restart the force
            // timer or re-send cancel.
            return;
        }

        let _ = handle.send(InboundMessage::Cancel { id: task_id.clone() });
        if let Some(interrupt) = &handle.interrupt_byte {
            interrupt.raise();
        }

        self.pending_cancel.insert(task_id.clone(), kind);
        let epoch = self.bump_force_epoch(&task_id);
        self.spawn_force_timer(task_id, epoch);
    }

    fn handle_soft_timeout(&mut self, id: TaskId, epoch: u64) {
        if self.soft_epoch.get(&id).copied() != Some(epoch) {
            return;
        }
        if let Some((pool_key, handle_id)) = self.locate_assigned(&id) {
            tracing::warn!(task_id = %id, "soft timer fired, starting cooperative cancel");
            self.start_cancel_sequence(&pool_key, handle_id, ErrorKind::Timeout);
        }
    }

    fn handle_force_timeout(&mut self, id: TaskId, epoch: u64) {
        if self.force_epoch.get(&id).copied() != Some(epoch) {
            return;
        }
        let Some((pool_key, handle_id)) = self.locate_assigned(&id) else { return };

        tracing::error!(task_id = %id, "force timer fired, terminating handle");
        self.pending_cancel.remove(&id);
        self.soft_epoch.remove(&id);
        self.force_epoch.remove(&id);

        let Some(pool) = self.pools.get_mut(&pool_key) else { return };
        let Some(mut handle) = pool.remove_handle(handle_id) else { return };
        if let Some(mut task) = handle.assigned_task.take() {
            task.resolve(Err(ExecutionError::cancel_error()));
            self.egress.send(
                channel::CODE_EXECUTION_RESULT,
                &OutboundMessage::Error { id: id.clone(), message: "forcibly terminated".to_string() },
            );
        }
        handle.terminate();
        self.try_dispatch(&pool_key);
    }

    fn bump_soft_epoch(&mut self, id: &TaskId) -> u64 {
        let entry = self.soft_epoch.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn bump_force_epoch(&mut self, id: &TaskId) -> u64 {
        let entry = self.force_epoch.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn spawn_soft_timer(&self, id: TaskId, timeout_ms: u64, language: &Language, epoch: u64) {
        let grace = config::grace_margin(language);
        let duration = Duration::from_millis(timeout_ms) + grace;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Command::SoftTimeout { id, epoch });
        });
    }

    fn spawn_force_timer(&self, id: TaskId, epoch: u64) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config::FORCE_TIMER).await;
            let _ = tx.send(Command::ForceTimeout { id, epoch });
        });
    }

    // ---- handle events (messages, ready, exit) -----------------------

    fn handle_handle_event(&mut self, pool_key: String, event: HandleEvent) {
        match event {
            HandleEvent::Message(handle_id, msg) => self.on_message(&pool_key, handle_id, msg),
            HandleEvent::Exited(handle_id, code) => self.on_exit(&pool_key, handle_id, code),
        }
    }

    fn on_message(&mut self, pool_key: &str, handle_id: HandleId, msg: OutboundMessage) {
        if matches!(msg, OutboundMessage::Ready) {
            if let Some(pool) = self.pools.get_mut(pool_key) {
                if let Some(handle) = pool.handle_mut(handle_id) {
                    if !handle.ready {
                        handle.ready = true;
                        handle.idle_since = Some(Instant::now());
                        tracing::info!(pool = pool_key, handle = %handle_id, "executor ready");
                    }
                }
            }
            self.try_dispatch(pool_key);
            return;
        }

        let Some(task_id) = msg.task_id().cloned() else { return };

        let assigned = self
            .pools
            .get(pool_key)
            .and_then(|pool| pool.handles.iter().find(|h| h.id == handle_id))
            .map(|h| h.assigned_task_id() == Some(&task_id))
            .unwrap_or(false);

        if !assigned {
            // Stale message for a task this handle no longer owns (already
            // force-terminated, or reassigned after a race); drop it rather
            // than forwarding a result for a task the submitter already
            // heard back about. Exactly one terminal message reaches the
            // submitter.
            tracing::trace!(task_id = %task_id, "dropping message for unassigned task");
            return;
        }

        if msg.is_input_request() {
            self.forward_input_request(&msg);
        }

        self.egress.send(channel::CODE_EXECUTION_RESULT, &msg);

        if msg.is_terminal() {
            self.resolve_terminal(pool_key, handle_id, msg);
        }
    }

    fn handle_init_timeout(&mut self, pool_key: &str, handle_id: HandleId) {
        let still_not_ready = self
            .pools
            .get(pool_key)
            .and_then(|pool| pool.handles.iter().find(|h| h.id == handle_id))
            .map(|h| !h.ready)
            .unwrap_or(false);
        if !still_not_ready {
            return;
        }
        tracing::error!(pool = pool_key, handle = %handle_id, "handle missed its init budget; terminating");
        if let Some(pool) = self.pools.get_mut(pool_key) {
            if let Some(handle) = pool.remove_handle(handle_id) {
                handle.terminate();
            }
        }
        self.try_dispatch(pool_key);
    }

    fn forward_input_request(&self, msg: &OutboundMessage) {
        let channel = match msg {
            OutboundMessage::PromptRequest { .. } | OutboundMessage::AlertRequest { .. } => {
                channel::INPUT_REQUEST_SCRIPTED
            }
            OutboundMessage::InputRequest { .. } => channel::INPUT_REQUEST_INTERPRETED,
            _ => return,
        };
        self.egress.send(channel, msg);
    }

    fn resolve_terminal(&mut self, pool_key: &str, handle_id: HandleId, msg: OutboundMessage) {
        let task_id = msg.task_id().cloned().expect("resolve_terminal only called for Complete/Error");
        let pending_kind = self.pending_cancel.remove(&task_id);
        self.soft_epoch.remove(&task_id);
        self.force_epoch.remove(&task_id);

        let Some(pool) = self.pools.get_mut(pool_key) else { return };
        let Some(handle) = pool.handle_mut(handle_id) else { return };
        let Some(mut task) = handle.assigned_task.take() else { return };

        let result = match msg {
            OutboundMessage::Complete { value, .. } => Ok(value),
            OutboundMessage::Error { message, .. } => {
                let kind = pending_kind.unwrap_or(ErrorKind::Execution);
                Err(ExecutionError::new(kind, message))
            }
            _ => unreachable!("is_terminal() only matches Complete/Error"),
        };
        task.resolve(result);

        if let Some(interrupt) = &handle.interrupt_byte {
            interrupt.clear();
        }
        handle.idle_since = Some(Instant::now());

        if matches!(self.state, RunState::Draining) {
            handle.terminate();
        }

        self.try_dispatch(pool_key);
        self.check_drain_complete();
    }

    fn on_exit(&mut self, pool_key: &str, handle_id: HandleId, code: Option<i32>) {
        let Some(pool) = self.pools.get_mut(pool_key) else { return };
        let Some(mut handle) = pool.remove_handle(handle_id) else { return };

        if let Some(mut task) = handle.assigned_task.take() {
            let task_id = task.id().clone();
            self.pending_cancel.remove(&task_id);
            self.soft_epoch.remove(&task_id);
            self.force_epoch.remove(&task_id);

            let detail = match code {
                Some(status) => format!("executor exited with code {status}"),
                None => "executor transport failed".to_string(),
            };
            task.resolve(Err(ExecutionError::worker_crash(detail.clone())));
            self.egress.send(
                channel::CODE_EXECUTION_RESULT,
                &OutboundMessage::Error { id: task_id, message: detail },
            );
        }

        tracing::warn!(pool = pool_key, handle = %handle_id, ?code, "executor handle exited");
        self.try_dispatch(pool_key);
        self.check_drain_complete();
    }

    // ---- resolveInput / clearModuleCache / stats ---------------------

    fn handle_resolve_input(&mut self, id: TaskId, value: String, request_id: Option<String>) {
        for pool in self.pools.values_mut() {
            let Some(handle) = pool.find_by_task_mut(&id) else { continue };
            if let Some(bridge) = &handle.input_bridge {
                bridge.resolve(&value);
                return;
            }
            if handle.interrupt_byte.is_some() {
                let _ = handle.send(InboundMessage::InputResponse { id, value, request_id });
                return;
            }
            return;
        }
        tracing::warn!(task_id = %id, "resolveInput: no assigned handle found");
    }

    fn handle_clear_cache(&mut self, package: Option<String>) {
        let Some(pool) = self.pools.get_mut("scripted") else { return };
        for handle in &pool.handles {
            let _ = handle.send(InboundMessage::ClearCache { package: package.clone() });
        }
    }

    fn handle_stats(&self, reply: oneshot::Sender<Vec<PoolStats>>) {
        let mut stats: Vec<PoolStats> = self.pools.values().map(|p| p.stats()).collect();
        for (key, bq) in &self.bytecode_queues {
            stats.push(PoolStats {
                language: key.clone(),
                handles: bq.in_flight,
                ready: 0,
                busy: bq.in_flight,
                queued: bq.queue.len(),
                ceiling: bq.ceiling,
            });
        }
        let _ = reply.send(stats);
    }

    // ---- bytecode dispatch --------------------------------------------

    fn try_dispatch_bytecode(&mut self, pool_key: &str) {
        loop {
            let Some(bq) = self.bytecode_queues.get_mut(pool_key) else { return };
            if bq.queue.is_empty() {
                self.check_drain_complete();
                return;
            }
            if bq.in_flight >= bq.ceiling {
                return;
            }
            let task = bq.queue.pop().expect("queue just checked non-empty");
            bq.in_flight += 1;
            self.spawn_bytecode_execution(pool_key.to_string(), task);
        }
    }

    fn spawn_bytecode_execution(&self, pool_key: String, task: Task) {
        let module = pool_key
            .strip_prefix("bytecode-")
            .expect("bytecode pool keys always carry the prefix")
            .to_string();
        let grace = config::grace_margin(&Language::Bytecode(module.clone()));
        let executor = Arc::clone(&self.bytecode);
        let self_tx = self.self_tx.clone();
        let (request, completion) = task.into_parts();
        let timeout = Duration::from_millis(request.options.timeout_ms) + grace;
        let memory_limit = request.options.memory_limit;

        tokio::spawn(async move {
            let result = executor.execute(&module, &request.code, memory_limit, timeout).await;
            let _ = completion.send(result);
            let _ = self_tx.send(Command::BytecodeCompleted { pool_key });
        });
    }

    // ---- idle retirement sweep (optional) -------------------------------

    fn handle_idle_sweep(&mut self) {
        let now = Instant::now();
        let pool_keys: Vec<String> = self.pools.keys().cloned().collect();
        for key in pool_keys {
            let candidates = match self.pools.get(&key) {
                Some(pool) => pool.idle_retirement_candidates(now),
                None => continue,
            };
            if candidates.is_empty() {
                continue;
            }
            if let Some(pool) = self.pools.get_mut(&key) {
                for id in candidates {
                    if let Some(handle) = pool.handle_mut(id) {
                        handle.terminate();
                    }
                }
            }
        }
        self.bytecode.cleanup_idle();
    }

    // ---- shutdown / drain ------------------------------------------

    fn handle_shutdown(&mut self, drain: bool, reply: oneshot::Sender<()>) {
        self.state = RunState::Draining;

        if !drain {
            for pool in self.pools.values_mut() {
                while let Some(mut task) = pool.queue.pop() {
                    task.resolve(Err(ExecutionError::cancelled()));
                }
                for handle in pool.handles.iter_mut() {
                    if let Some(mut task) = handle.assigned_task.take() {
                        task.resolve(Err(ExecutionError::cancelled()));
                    }
                    handle.terminate();
                }
            }
            for bq in self.bytecode_queues.values_mut() {
                while let Some(mut task) = bq.queue.pop() {
                    task.resolve(Err(ExecutionError::cancelled()));
                }
            }
            let _ = reply.send(());
            return;
        }

        let pool_keys: Vec<String> = self.pools.keys().cloned().collect();
        for key in pool_keys {
            self.maybe_retire_idle_during_drain(&key);
        }

        if self.is_fully_drained() {
            let _ = reply.send(());
        } else {
            self.pending_shutdown = Some(reply);
        }
    }

    fn maybe_retire_idle_during_drain(&mut self, pool_key: &str) {
        if !matches!(self.state, RunState::Draining) {
            return;
        }
        let Some(pool) = self.pools.get_mut(pool_key) else { return };
        if !pool.queue.is_empty() {
            return;
        }
        let idle_ids: Vec<HandleId> = pool.handles.iter().filter(|h| h.is_idle_ready()).map(|h| h.id).collect();
        for id in idle_ids {
            if let Some(handle) = pool.handle_mut(id) {
                handle.terminate();
            }
        }
    }

    fn is_fully_drained(&self) -> bool {
        self.pools.values().all(|p| p.handles.is_empty() && p.queue.is_empty())
            && self.bytecode_queues.values().all(|bq| bq.in_flight == 0 && bq.queue.is_empty())
    }

    fn check_drain_complete(&mut self) {
        if matches!(self.state, RunState::Draining) && self.is_fully_drained() {
            if let Some(tx) = self.pending_shutdown.take() {
                let _ = tx.send(());
            }
        }
    }
}
