//! Lifecycle flag shared between an engine and its I/O thread

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RunState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RunState::Starting,
            2 => RunState::Running,
            3 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    pub fn new() -> Self {
        Self(AtomicU8::new(RunState::Stopped as u8))
    }

    pub fn load(&self) -> RunState {
        RunState::from_raw(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: RunState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to`; returns false if the current state differs.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Starting or running.
    pub fn is_active(&self) -> bool {
        matches!(self.load(), RunState::Starting | RunState::Running)
    }
}

impl Default for AtomicRunState {
    fn default() -> Self {
        Self::new()
    }
}
