//! Mount lifecycle state shared by the dispatcher, lock arbiter and orchestrator

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub use common::protocol::MountState;

fn to_u8(state: MountState) -> u8 {
    match state {
        MountState::Mounting => 0,
        MountState::Ready => 1,
        MountState::Unmounting => 2,
        MountState::MountFailed => 3,
    }
}

fn from_u8(raw: u8) -> MountState {
    match raw {
        0 => MountState::Mounting,
        1 => MountState::Ready,
        2 => MountState::Unmounting,
        _ => MountState::MountFailed,
    }
}

/// Whether `from -> to` is a legal lifecycle step.
pub fn is_valid_transition(from: MountState, to: MountState) -> bool {
    matches!(
        (from, to),
        (MountState::Mounting, MountState::Ready)
            | (MountState::Mounting, MountState::MountFailed)
            | (MountState::Ready, MountState::Unmounting)
            | (MountState::MountFailed, MountState::Unmounting)
            | (MountState::Unmounting, MountState::Ready)
    )
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("cannot move mount from {actual} to {requested}")]
pub struct TransitionError {
    pub actual: MountState,
    pub requested: MountState,
}

/// The single daemon-wide mount state. Cloning shares the same cell.
#[derive(Debug, Clone)]
pub struct MountStateCell {
    inner: Arc<AtomicU8>,
}

impl Default for MountStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl MountStateCell {
    /// Every mount starts in `Mounting`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(to_u8(MountState::Mounting))),
        }
    }

    pub fn get(&self) -> MountState {
        from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.get() == MountState::Ready
    }

    /// Move from the current state to `to` if that step is legal.
    ///
    /// Returns the state that was replaced. Concurrent callers racing for the
    /// same step see exactly one success.
    pub fn transition(&self, to: MountState) -> Result<MountState, TransitionError> {
        let mut current = self.get();
        loop {
            if !is_valid_transition(current, to) {
                return Err(TransitionError {
                    actual: current,
                    requested: to,
                });
            }

            match self.inner.compare_exchange(
                to_u8(current),
                to_u8(to),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::info!(from = %current, to = %to, "mount state changed");
                    return Ok(current);
                }
                Err(actual) => current = from_u8(actual),
            }
        }
    }
}
