//! Executor factory: how the orchestrator turns "spawn a handle for this
//! language" into a concrete transport. Kept as a trait so tests can hand
//! back an in-process fake instead of a real child process — the host
//! process supplies executor binary paths.

use crate::protocol::Language;
use crate::transport::{ExecutorTransport, ProcessTransport};

pub trait ExecutorFactory: Send + Sync {
    fn spawn(&self, language: &Language) -> anyhow::Result<Box<dyn ExecutorTransport>>;
}

/// Spawns the configured binary for each language family as a child
/// process. Scripted and interpreted executors run in separate OS
/// processes or threads.
pub struct ProcessExecutorFactory {
    pub scripted_binary: String,
    pub scripted_args: Vec<String>,
    pub interpreted_binary: String,
    pub interpreted_args: Vec<String>,
    /// Keyed by bytecode module name.
    pub bytecode_binaries: std::collections::HashMap<String, (String, Vec<String>)>,
}

impl ExecutorFactory for ProcessExecutorFactory {
    fn spawn(&self, language: &Language) -> anyhow::Result<Box<dyn ExecutorTransport>> {
        let (binary, args) = match language {
            Language::Scripted => (&self.scripted_binary, &self.scripted_args),
            Language::Interpreted => (&self.interpreted_binary, &self.interpreted_args),
            Language::Bytecode(name) => self
                .bytecode_binaries
                .get(name)
                .map(|(bin, args)| (bin, args))
                .ok_or_else(|| anyhow::anyhow!("no executor binary configured for {name}"))?,
        };
        let transport = ProcessTransport::spawn(binary, args)?;
        Ok(Box::new(transport))
    }
}
