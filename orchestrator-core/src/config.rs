//! Tunable constants, gathered into plain structs with `Default` impls
//! rather than a config-file crate — nothing here needs file-based
//! configuration, and `ob-workflow`'s own engine configures itself the
//! same way (plain structs passed in by the host at construction).

use std::time::Duration;

/// How long a newly-spawned handle may take to emit its first `ready`
/// message before it's treated as handle-fatal.
pub const DEFAULT_INIT_BUDGET: Duration = Duration::from_secs(10);

/// Forced-termination grace period after a cooperative cancel is sent.
pub const FORCE_TIMER: Duration = Duration::from_secs(2);

/// Grace margin added to a task's declared timeout to form its soft timer.
pub fn grace_margin(language: &crate::protocol::Language) -> Duration {
    match language {
        crate::protocol::Language::Scripted => Duration::from_secs(5),
        crate::protocol::Language::Interpreted => Duration::from_secs(15),
        crate::protocol::Language::Bytecode(_) => Duration::from_secs(5),
    }
}

/// Interrupt code written to the Interrupt Byte to request a cooperative
/// interrupt.
pub const INTERRUPT_CODE: u8 = 2;

/// Capacity of the Input Bridge's shared byte buffer.
pub const INPUT_BRIDGE_CAPACITY: usize = 10 * 1024;

/// Per-language pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of simultaneously-spawned handles.
    pub ceiling: usize,
    /// Maximum number of queued (not yet assigned) tasks before `submit`
    /// fails with `queue-full` (default 100).
    pub queue_ceiling: usize,
    /// Lowest number of idle-ready handles the retirement sweep will leave
    /// behind. `None` disables idle cleanup entirely.
    pub idle_floor: Option<usize>,
    /// How long a handle may sit idle-ready after its last terminal
    /// resolution before it becomes a retirement candidate.
    pub idle_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn scripted() -> Self {
        Self {
            ceiling: 4,
            queue_ceiling: 100,
            idle_floor: None,
            idle_timeout: None,
        }
    }

    pub fn interpreted() -> Self {
        Self {
            ceiling: 2,
            queue_ceiling: 100,
            idle_floor: None,
            idle_timeout: None,
        }
    }

    /// Bytecode pools are per-module configurable; callers supply their own
    /// ceiling rather than relying on a shared default.
    pub fn bytecode(ceiling: usize) -> Self {
        Self {
            ceiling,
            queue_ceiling: 100,
            idle_floor: None,
            idle_timeout: None,
        }
    }
}

/// Bytecode-Module Executor tunables.
#[derive(Debug, Clone)]
pub struct BytecodeConfig {
    /// Hard cap on the per-instance memory page count regardless of what a
    /// request's `memory_limit` asks for.
    pub max_pages: u32,
    /// How long an idle cached instance survives before the cleanup sweep
    /// reclaims it.
    pub instance_idle_ttl: Duration,
}

impl Default for BytecodeConfig {
    fn default() -> Self {
        Self {
            max_pages: 2048,
            instance_idle_ttl: Duration::from_secs(5 * 60),
        }
    }
}
