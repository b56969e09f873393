//! Module lock shared by the sequencer and the parameter setters.
//!
//! Holding the lock is represented by a [`ModuleLockGuard`]; the flag clears when the
//! guard drops, so every exit path of a session (completion, stop, hardware error)
//! unlocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AppResult, DaqError};

/// Exclusivity flag: at most one session or setter at a time.
#[derive(Debug, Clone, Default)]
pub struct ModuleLock {
    locked: Arc<AtomicBool>,
}

impl ModuleLock {
    /// Create an unlocked flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, failing with [`DaqError::Busy`] if it is held.
    ///
    /// `operation` names the caller in the error message.
    pub fn try_lock(&self, operation: &str) -> AppResult<ModuleLockGuard> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                DaqError::Busy(format!("cannot {operation} while an acquisition is running"))
            })?;
        Ok(ModuleLockGuard {
            locked: Arc::clone(&self.locked),
        })
    }

    /// Whether the lock is held right now.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Held lock; releases on drop.
#[derive(Debug)]
pub struct ModuleLockGuard {
    locked: Arc<AtomicBool>,
}

impl Drop for ModuleLockGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_is_rejected() {
        let lock = ModuleLock::new();
        let guard = lock.try_lock("start acquisition").unwrap();
        assert!(lock.is_locked());

        let err = lock.try_lock("set grating").unwrap_err();
        assert!(matches!(err, DaqError::Busy(ref msg) if msg.contains("set grating")));

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock("start acquisition").is_ok());
    }

    #[test]
    fn clones_share_the_flag() {
        let lock = ModuleLock::new();
        let other = lock.clone();
        let _guard = lock.try_lock("start acquisition").unwrap();
        assert!(other.is_locked());
        assert!(other.try_lock("set gain").is_err());
    }
}
