//! Session Context
//!
//! One query session's explicit state: a config snapshot, the interrupt
//! flag, and the GROUP_CONCAT truncation latch. The context is passed by
//! reference through every engine entry point; there is no ambient
//! global state. The interrupt flag is written by a watchdog thread
//! through an [`InterruptHandle`] and read at row boundaries.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-session engine state.
#[derive(Debug)]
pub struct SessionContext {
    session_id: u64,
    group_concat_max_len: usize,
    multi_range_opt_limit: u64,
    spill_dir: Option<PathBuf>,
    interrupted: Arc<AtomicBool>,
    /// Latched on the first GROUP_CONCAT truncation of the session
    concat_truncation_warned: AtomicBool,
}

impl SessionContext {
    pub fn new(session_id: u64, config: &EngineConfig) -> Self {
        SessionContext {
            session_id,
            group_concat_max_len: config.aggregate.group_concat_max_len,
            multi_range_opt_limit: config.optimizer.multi_range_opt_limit,
            spill_dir: config.aggregate.spill_dir.clone(),
            interrupted: Arc::new(AtomicBool::new(false)),
            concat_truncation_warned: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn group_concat_max_len(&self) -> usize {
        self.group_concat_max_len
    }

    pub fn multi_range_opt_limit(&self) -> u64 {
        self.multi_range_opt_limit
    }

    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    /// Handle for a watchdog thread to interrupt this session.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            interrupted: Arc::clone(&self.interrupted),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Row-boundary check: fail with `Interrupted` once the flag is set.
    pub fn check_interrupt(&self) -> EngineResult<()> {
        if self.is_interrupted() {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }

    /// Log the GROUP_CONCAT truncation warning once per session.
    pub fn warn_concat_truncated(&self, context: &str) {
        if !self.concat_truncation_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(session_id = self.session_id, context, "string result truncated");
        }
    }

    pub fn concat_truncation_warned(&self) -> bool {
        self.concat_truncation_warned.load(Ordering::Relaxed)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        SessionContext::new(0, &EngineConfig::default())
    }
}

/// Handle for interrupting a session from another thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    interrupted: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.interrupted.store(false, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_roundtrip() {
        let session = SessionContext::default();
        assert!(session.check_interrupt().is_ok());

        let handle = session.interrupt_handle();
        handle.interrupt();
        assert!(session.is_interrupted());
        assert!(matches!(
            session.check_interrupt(),
            Err(EngineError::Interrupted)
        ));

        handle.clear();
        assert!(session.check_interrupt().is_ok());
    }

    #[test]
    fn test_truncation_latch() {
        let session = SessionContext::default();
        assert!(!session.concat_truncation_warned());
        session.warn_concat_truncated("GROUP_CONCAT()");
        assert!(session.concat_truncation_warned());
        // Second call is a no-op; the latch stays set.
        session.warn_concat_truncated("GROUP_CONCAT()");
        assert!(session.concat_truncation_warned());
    }
}
