//! Fake executor transport/factory used to drive the control loop through
//! end-to-end scenarios without spawning a real child process.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use orchestrator_core::protocol::{InboundMessage, Language, OutboundMessage};
use orchestrator_core::spawner::ExecutorFactory;
use orchestrator_core::transport::ExecutorTransport;

#[derive(Clone, Copy)]
pub enum Behavior {
    /// Completes every execution after a short delay.
    EchoComplete,
    /// Ignores `execute` until it sees `cancel`, then reports `error`
    /// within one delay tick.
    CooperativeCancel,
    /// Ignores both `execute` and `cancel` forever, forcing the force timer
    /// to fire.
    IgnoreCancel,
    /// Drops off the line the moment it sees `execute`.
    CrashOnExecute,
    /// Sends an `input-request` on `execute`, then completes once it gets
    /// an `input-response` back.
    PromptRoundTrip,
}

pub struct FakeFactory {
    pub behavior: Behavior,
}

impl ExecutorFactory for FakeFactory {
    fn spawn(&self, _language: &Language) -> anyhow::Result<Box<dyn ExecutorTransport>> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundMessage>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let behavior = self.behavior;

        let ready_tx = outbound_tx.clone();
        tokio::spawn(async move {
            let _ = ready_tx.send(OutboundMessage::Ready);

            while let Some(msg) = inbound_rx.recv().await {
                match (behavior, &msg) {
                    (Behavior::CrashOnExecute, InboundMessage::Execute { .. }) => {
                        return;
                    }
                    (Behavior::EchoComplete, InboundMessage::Execute { id, .. }) => {
                        let tx = outbound_tx.clone();
                        let id = id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            let _ = tx.send(OutboundMessage::Complete {
                                id,
                                value: serde_json::json!({"ok": true}),
                            });
                        });
                    }
                    (Behavior::CooperativeCancel, InboundMessage::Execute { .. }) => {
                        // Long-running; only responds once cancelled.
                    }
                    (Behavior::CooperativeCancel, InboundMessage::Cancel { id }) => {
                        let tx = outbound_tx.clone();
                        let id = id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            let _ = tx.send(OutboundMessage::Error { id, message: "stopped".to_string() });
                        });
                    }
                    (Behavior::IgnoreCancel, InboundMessage::Execute { .. })
                    | (Behavior::IgnoreCancel, InboundMessage::Cancel { .. }) => {
                        // Deliberately unresponsive.
                    }
                    (Behavior::PromptRoundTrip, InboundMessage::Execute { id, .. }) => {
                        let tx = outbound_tx.clone();
                        let id = id.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(OutboundMessage::InputRequest {
                                id,
                                request_id: None,
                                prompt: "name?".to_string(),
                            });
                        });
                    }
                    (Behavior::PromptRoundTrip, InboundMessage::InputResponse { id, value, .. }) => {
                        let tx = outbound_tx.clone();
                        let id = id.clone();
                        let value = value.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(OutboundMessage::Complete {
                                id,
                                value: serde_json::json!({"greeting": format!("hi {value}")}),
                            });
                        });
                    }
                    _ => {}
                }
            }
        });

        let exit_code = matches!(behavior, Behavior::CrashOnExecute).then_some(1);
        Ok(Box::new(FakeTransport { inbound_tx, outbound_rx, exit_code }))
    }
}

struct FakeTransport {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    exit_code: Option<i32>,
}

#[async_trait]
impl ExecutorTransport for FakeTransport {
    async fn send(&mut self, msg: InboundMessage) -> anyhow::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| anyhow::anyhow!("fake executor task gone"))
    }

    async fn recv(&mut self) -> anyhow::Result<Option<OutboundMessage>> {
        Ok(self.outbound_rx.recv().await)
    }

    async fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        Ok(self.exit_code)
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
