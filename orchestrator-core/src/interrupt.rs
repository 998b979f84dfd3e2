//! Interrupt Byte: a one-byte shared region the embedded interpreter polls
//! from its signal-check hook. Distinct from, and additive with, the
//! cooperative `cancel` message.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::INTERRUPT_CODE;

const NO_SIGNAL: u8 = 0;

/// Cheap to clone; shares one underlying byte.
#[derive(Clone)]
pub struct InterruptByte {
    byte: Arc<AtomicU8>,
}

impl InterruptByte {
    pub fn new() -> Self {
        Self {
            byte: Arc::new(AtomicU8::new(NO_SIGNAL)),
        }
    }

    /// Requests a cooperative interrupt. The orchestrator is the sole
    /// writer.
    pub fn raise(&self) {
        self.byte.store(INTERRUPT_CODE, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.byte.store(NO_SIGNAL, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.byte.load(Ordering::SeqCst) == INTERRUPT_CODE
    }

    /// The raw byte, for handing to `{set-interrupt-buffer}` at spawn —
    /// callers on real hardware would share the backing page; in this
    /// process model the value itself is the payload.
    pub fn current(&self) -> u8 {
        self.byte.load(Ordering::SeqCst)
    }
}

impl Default for InterruptByte {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_sets_interrupt_code() {
        let byte = InterruptByte::new();
        assert!(!byte.is_raised());
        byte.raise();
        assert!(byte.is_raised());
        assert_eq!(byte.current(), 2);
        byte.clear();
        assert!(!byte.is_raised());
    }
}
