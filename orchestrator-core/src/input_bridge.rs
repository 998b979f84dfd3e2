//! Shared-Memory Input Bridge: a fixed-size shared buffer plus a 32-bit
//! atomic lock word, giving the scripted executor a synchronous read of
//! user input from inside a running snippet.
//!
//! The region is a single anonymous `MAP_SHARED` mapping (via `memmap2`) so
//! the bytes are visible to every thread that holds a clone of the
//! [`InputBridge`] handle without any additional locking — single writer,
//! single reader, synchronized via the atomic lock word.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use memmap2::MmapMut;

use crate::config::INPUT_BRIDGE_CAPACITY;

const LOCK_WAITING: u32 = 0;
const LOCK_READY: u32 = 1;

struct Region {
    mmap: MmapMut,
}

// The mapping is read by exactly one reader and written by exactly one
// writer at a time, coordinated by the atomic lock word it contains; no
// other field is touched concurrently.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

/// Host-side (and, in tests, executor-side) handle to one bridge instance.
/// Cheap to clone: internally an `Arc` over the mapped region.
#[derive(Clone)]
pub struct InputBridge {
    region: Arc<Region>,
}

impl InputBridge {
    /// Allocates a fresh buffer + lock word, lock initialized to `waiting`.
    pub fn new() -> anyhow::Result<Self> {
        let mmap = MmapMut::map_anon(INPUT_BRIDGE_CAPACITY + std::mem::size_of::<u32>())?;
        let bridge = Self {
            region: Arc::new(Region { mmap }),
        };
        bridge.lock_word().store(LOCK_WAITING, Ordering::SeqCst);
        Ok(bridge)
    }

    fn lock_word(&self) -> &AtomicU32 {
        // The lock word occupies the last 4 bytes of the mapping; the
        // mapping is page-aligned so this is also u32-aligned.
        let ptr = self.region.mmap[INPUT_BRIDGE_CAPACITY..].as_ptr() as *const AtomicU32;
        unsafe { &*ptr }
    }

    fn buffer_mut(&self) -> *mut u8 {
        self.region.mmap.as_ptr() as *mut u8
    }

    /// Host side of `resolveInput(value)`: zero-fill the buffer, write the
    /// UTF-8 bytes of `value` truncated to capacity, then publish by
    /// storing `1` into the lock word and waking one waiter.
    pub fn resolve(&self, value: &str) {
        let bytes = value.as_bytes();
        let len = bytes.len().min(INPUT_BRIDGE_CAPACITY);
        unsafe {
            let dst = self.buffer_mut();
            std::ptr::write_bytes(dst, 0, INPUT_BRIDGE_CAPACITY);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, len);
        }
        self.lock_word().store(LOCK_READY, Ordering::SeqCst);
        atomic_wait::wake_one(self.lock_word());
    }

    /// Blocks the calling thread until `resolve` publishes a value, then
    /// returns the opaque byte string. Readers must treat it as opaque and
    /// not rely on a terminator.
    ///
    /// This is the executor side of the contract. `orchestrator-core` only
    /// calls it from tests standing in for a real executor; production
    /// executors implement the equivalent wait in their own runtime.
    pub fn blocking_read(&self) -> Vec<u8> {
        loop {
            let word = self.lock_word().load(Ordering::SeqCst);
            if word == LOCK_READY {
                let bytes =
                    unsafe { std::slice::from_raw_parts(self.buffer_mut(), INPUT_BRIDGE_CAPACITY) }
                        .to_vec();
                self.lock_word().store(LOCK_WAITING, Ordering::SeqCst);
                return bytes;
            }
            atomic_wait::wait(self.lock_word(), LOCK_WAITING);
        }
    }

    pub fn capacity(&self) -> usize {
        INPUT_BRIDGE_CAPACITY
    }
}

/// Minimal futex-style wait/wake used only by [`InputBridge`]. Kept local
/// rather than pulled in as a dependency since it's two syscalls wide and
/// the rest of the crate has no other use for it.
mod atomic_wait {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    pub fn wait(word: &AtomicU32, expected: u32) {
        // No portable safe futex wait in std; fall back to a short park
        // between checks rather than a hand-rolled syscall per platform.
        while word.load(std::sync::atomic::Ordering::SeqCst) == expected {
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    pub fn wake_one(_word: &AtomicU32) {
        // The waiting thread is polling; nothing to explicitly wake.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_then_read_round_trips() {
        let bridge = InputBridge::new().unwrap();
        let reader = bridge.clone();
        let handle = std::thread::spawn(move || reader.blocking_read());

        std::thread::sleep(std::time::Duration::from_millis(10));
        bridge.resolve("hello\n");

        let bytes = handle.join().unwrap();
        assert!(bytes.starts_with(b"hello\n"));
        assert_eq!(bytes.len(), INPUT_BRIDGE_CAPACITY);
    }

    #[test]
    fn oversized_value_is_truncated_without_error() {
        let bridge = InputBridge::new().unwrap();
        let huge = "x".repeat(INPUT_BRIDGE_CAPACITY + 500);
        bridge.resolve(&huge);
        let bytes = bridge.blocking_read();
        assert_eq!(bytes.len(), INPUT_BRIDGE_CAPACITY);
        assert!(bytes.iter().all(|&b| b == b'x'));
    }
}
