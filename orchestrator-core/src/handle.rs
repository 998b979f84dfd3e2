//! Executor Handle: lifecycle, bidirectional message channel, and
//! ready-state of one isolated executor instance.
//!
//! The handle itself holds no interior task-processing logic — it owns the
//! I/O pump task and exposes `send`/`terminate`; all routing/dispatch
//! decisions live in [`crate::pool::LanguagePool`] and
//! [`crate::orchestrator`], which is where `tryDispatch` lives.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::interrupt::InterruptByte;
use crate::input_bridge::InputBridge;
use crate::protocol::{InboundMessage, Language, OutboundMessage, TaskId};
use crate::task::Task;
use crate::transport::ExecutorTransport;

pub type HandleId = Uuid;

/// Events the handle's I/O pump reports back to the owning pool/orchestrator.
#[derive(Debug)]
pub enum HandleEvent {
    Message(HandleId, OutboundMessage),
    /// Transport closed or exited; `code` is `None` for a transport error
    /// (not a clean process exit) as well as a clean exit with no captured
    /// status.
    Exited(HandleId, Option<i32>),
}

/// One isolated executor instance plus its assignment state.
pub struct ExecutorHandle {
    pub id: HandleId,
    pub language: Language,
    pub ready: bool,
    /// The task currently assigned to this handle, if any. Owning the
    /// `Task` here (rather than just its id) is what keeps the single-
    /// assignment completion slot reachable once a task leaves the pool's
    /// queue: a task is always exactly one of queued, assigned, or resolved.
    pub assigned_task: Option<Task>,
    /// Scripted handles only.
    pub input_bridge: Option<InputBridge>,
    /// Interpreted handles only.
    pub interrupt_byte: Option<InterruptByte>,
    /// Instant the handle last became idle-ready, for the optional idle
    /// retirement sweep.
    pub idle_since: Option<std::time::Instant>,

    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    kill_tx: mpsc::UnboundedSender<()>,
    io_task: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Spawns the I/O pump over `transport` and returns the handle
    /// immediately; the pump reports `ready`/messages/exit asynchronously
    /// via `events_tx`.
    pub fn spawn(
        language: Language,
        mut transport: Box<dyn ExecutorTransport>,
        events_tx: mpsc::UnboundedSender<HandleEvent>,
        input_bridge: Option<InputBridge>,
        interrupt_byte: Option<InterruptByte>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundMessage>();
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = kill_rx.recv() => {
                        let _ = transport.kill();
                        let code = transport.wait().await.ok().flatten();
                        let _ = events_tx.send(HandleEvent::Exited(id, code));
                        return;
                    }

                    outbound = inbound_rx.recv() => {
                        match outbound {
                            Some(msg) => {
                                if transport.send(msg).await.is_err() {
                                    let code = transport.wait().await.ok().flatten();
                                    let _ = events_tx.send(HandleEvent::Exited(id, code));
                                    return;
                                }
                            }
                            // Handle dropped; nothing left to pump.
                            None => return,
                        }
                    }

                    received = transport.recv() => {
                        match received {
                            Ok(Some(msg)) => {
                                if events_tx.send(HandleEvent::Message(id, msg)).is_err() {
                                    return;
                                }
                            }
                            Ok(None) | Err(_) => {
                                let code = transport.wait().await.ok().flatten();
                                let _ = events_tx.send(HandleEvent::Exited(id, code));
                                return;
                            }
                        }
                    }
                }
            }
        });

        Self {
            id,
            language,
            ready: false,
            assigned_task: None,
            input_bridge,
            interrupt_byte,
            idle_since: None,
            inbound_tx,
            kill_tx,
            io_task,
        }
    }

    pub fn is_idle_ready(&self) -> bool {
        self.ready && self.assigned_task.is_none()
    }

    pub fn assigned_task_id(&self) -> Option<&TaskId> {
        self.assigned_task.as_ref().map(|task| task.id())
    }

    pub fn send(&self, msg: InboundMessage) -> anyhow::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| anyhow::anyhow!("executor transport already closed"))
    }

    /// Requests immediate termination; the pump reports `Exited` once the
    /// kill completes.
    pub fn terminate(&self) {
        let _ = self.kill_tx.send(());
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}
