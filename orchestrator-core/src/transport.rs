//! Executor transport: the duplex channel an [`ExecutorHandle`](crate::handle::ExecutorHandle)
//! speaks over. Abstracted behind a trait so tests can swap in an
//! in-process fake instead of spawning a real child process. Messages are
//! JSON-like tagged records over a duplex channel.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::protocol::{InboundMessage, OutboundMessage};

/// One line of newline-delimited JSON in each direction. Order from a
/// single executor is preserved by construction: we never buffer or
/// reorder, `recv` just drains the pipe.
#[async_trait]
pub trait ExecutorTransport: Send {
    async fn send(&mut self, msg: InboundMessage) -> anyhow::Result<()>;

    /// `Ok(Some(_))` for a message, `Ok(None)` on clean EOF, `Err` on a
    /// transport-level failure. Either `Ok(None)` or `Err` collapses to
    /// handle-fatal in the caller.
    async fn recv(&mut self) -> anyhow::Result<Option<OutboundMessage>>;

    /// Blocks until the underlying executor exits, returning its exit code
    /// if available.
    async fn wait(&mut self) -> anyhow::Result<Option<i32>>;

    /// Best-effort immediate kill, used by forced termination. Not
    /// expected to block.
    fn kill(&mut self) -> anyhow::Result<()>;
}

/// Spawns the executor as a child process and speaks newline-delimited
/// JSON over its stdio — the separate-OS-process half of executor
/// isolation.
pub struct ProcessTransport {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessTransport {
    /// `binary` and `args` come from the host, which supplies executor
    /// binary paths.
    pub fn spawn(binary: &str, args: &[String]) -> anyhow::Result<Self> {
        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl ExecutorTransport for ProcessTransport {
    async fn send(&mut self, msg: InboundMessage) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<Option<OutboundMessage>> {
        match self.stdout.next_line().await? {
            Some(line) if line.trim().is_empty() => Ok(None),
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.child.start_kill()?;
        Ok(())
    }
}
