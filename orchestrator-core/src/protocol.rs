//! Data model and executor wire protocol.
//!
//! The wire types mirror `ob-workflow/task_queue.rs`'s `TaskCompleteRequest`/
//! `BundleItem` shape: small tagged structs that serialize to and from the
//! records an external process sends, kept separate from the in-process
//! `Task`/`ExecutionError` types that never cross a wire.

use serde::{Deserialize, Serialize};

/// Client-chosen, unique-per-submission task id. Opaque to the orchestrator.
pub type TaskId = String;

/// The closed language registry: every request is resolved against this
/// set, never an open-ended string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    /// Transpiled dynamic language, run in its own child process.
    Scripted,
    /// Interpreted scripting language, embedded via an in-process
    /// interpreter running on its own OS thread.
    Interpreted,
    /// A sandboxed bytecode module, identified by name (e.g. a WASM
    /// language runtime compiled for a specific guest language).
    Bytecode(String),
}

impl Language {
    /// Parses a wire language tag of the form `scripted`, `interpreted`, or
    /// `bytecode-<name>`. Returns `None` for anything outside the registry
    /// rather than guessing.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "scripted" => Some(Self::Scripted),
            "interpreted" => Some(Self::Interpreted),
            other => other
                .strip_prefix("bytecode-")
                .filter(|name| !name.is_empty())
                .map(|name| Self::Bytecode(name.to_string())),
        }
    }

    /// The pool key this language dispatches under. Every `Bytecode`
    /// variant gets its own pool, keyed by module name.
    pub fn pool_key(&self) -> String {
        match self {
            Self::Scripted => "scripted".to_string(),
            Self::Interpreted => "interpreted".to_string(),
            Self::Bytecode(name) => format!("bytecode-{name}"),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pool_key())
    }
}

/// Recognized option fields. Fields outside this list are
/// simply not representable — the options record is closed, not a bag of
/// arbitrary JSON, so callers get a compile error instead of a silently
/// ignored typo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub timeout_ms: u64,
    pub show_undefined: bool,
    pub show_top_level_results: bool,
    pub loop_protection: bool,
    pub magic_comments: bool,
    pub working_directory: Option<String>,
    /// Bytecode executors only; ignored by scripted/interpreted pools.
    pub memory_limit: Option<u32>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            show_undefined: false,
            show_top_level_results: false,
            loop_protection: false,
            magic_comments: false,
            working_directory: None,
            memory_limit: None,
        }
    }
}

/// A request to run one snippet of user-authored source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: TaskId,
    pub code: String,
    pub language: Language,
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Higher runs first; FIFO among equal priorities. Defaults to 0.
    #[serde(default)]
    pub priority: i64,
}

/// `console.*`-style output sub-kind, carried on `OutboundMessage::Console`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Warn,
    Error,
    Info,
    Table,
    Dir,
}

/// Messages the orchestrator sends *to* an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Execute {
        id: TaskId,
        code: String,
        options: ExecutionOptions,
    },
    Cancel {
        id: TaskId,
    },
    /// Scripted executors only.
    ClearCache {
        #[serde(skip_serializing_if = "Option::is_none")]
        package: Option<String>,
    },
    /// Interpreted executors only.
    InstallPackage {
        id: TaskId,
        name: String,
    },
    ListPackages {
        id: TaskId,
    },
    GetMemoryStats {
        id: TaskId,
    },
    CleanupNamespace {
        id: TaskId,
    },
    ResetRuntime {
        id: TaskId,
    },
    InputResponse {
        id: TaskId,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Sent once at spawn, interpreted executors only.
    SetInterruptBuffer {
        buffer: Vec<u8>,
    },
}

/// Messages an executor sends back to the orchestrator.
///
/// Every variant but `Ready` carries the originating task id; `Complete`
/// and `Error` are terminal for that task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Ready,
    Result {
        id: TaskId,
        value: serde_json::Value,
    },
    Console {
        id: TaskId,
        kind: ConsoleKind,
        text: String,
    },
    Debug {
        id: TaskId,
        text: String,
    },
    Status {
        id: TaskId,
        text: String,
    },
    PromptRequest {
        id: TaskId,
        prompt: String,
    },
    AlertRequest {
        id: TaskId,
        text: String,
    },
    InputRequest {
        id: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        prompt: String,
    },
    Complete {
        id: TaskId,
        value: serde_json::Value,
    },
    Error {
        id: TaskId,
        message: String,
    },
}

impl OutboundMessage {
    /// The task id this message concerns, if any (`Ready` has none).
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Ready => None,
            Self::Result { id, .. }
            | Self::Console { id, .. }
            | Self::Debug { id, .. }
            | Self::Status { id, .. }
            | Self::PromptRequest { id, .. }
            | Self::AlertRequest { id, .. }
            | Self::InputRequest { id, .. }
            | Self::Complete { id, .. }
            | Self::Error { id, .. } => Some(id),
        }
    }

    /// `complete`/`error` are terminal — the last message a task ever gets.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// These three additionally go out on the input-request channel so the
    /// host can render a modal.
    pub fn is_input_request(&self) -> bool {
        matches!(
            self,
            Self::PromptRequest { .. } | Self::AlertRequest { .. } | Self::InputRequest { .. }
        )
    }
}
