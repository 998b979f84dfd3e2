//! Source-code transformer boundary: a pure function `transform(code,
//! opts) -> string`. Explicitly out of scope to implement — modeled here
//! only as the seam the orchestrator calls through, so the host can plug
//! in whatever the scripted/bytecode languages need.

use crate::protocol::ExecutionOptions;

/// A pure source transform. Implementations must not block the control
/// loop for long — `submit` awaits this before a pool is ever touched.
pub trait Transformer: Send + Sync {
    fn transform(&self, code: &str, options: &ExecutionOptions) -> Result<String, String>;
}

/// Passes source through unchanged. Used for languages that don't need a
/// transform step (the interpreted family, whose source is passed through
/// as-is) and as a test default.
pub struct Identity;

impl Transformer for Identity {
    fn transform(&self, code: &str, _options: &ExecutionOptions) -> Result<String, String> {
        Ok(code.to_string())
    }
}
