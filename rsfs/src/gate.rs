//! Per-inode reader/writer admission.
//!
//! Every inode carries an [`AccessGate`]. A descriptor may only exist while its opener holds an
//! admission on the gate: any number of read-only admissions may overlap, a read-write admission
//! overlaps nothing. Waiting is FIFO-agnostic, so a steady stream of readers can starve a writer.

use crate::fs::AccessMode;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Idle,
    Reading(usize),
    Writing,
}

impl Access {
    fn admits(self, mode: AccessMode) -> bool {
        match (self, mode) {
            (Access::Idle, _) => true,
            (Access::Reading(_), AccessMode::ReadOnly) => true,
            _ => false,
        }
    }

    fn enter(self, mode: AccessMode) -> Access {
        match (self, mode) {
            (Access::Idle, AccessMode::ReadOnly) => Access::Reading(1),
            (Access::Reading(n), AccessMode::ReadOnly) => Access::Reading(n + 1),
            (_, AccessMode::ReadWrite) => Access::Writing,
            (Access::Writing, AccessMode::ReadOnly) => unreachable!("reader admitted past a writer"),
        }
    }

    fn leave(self, mode: AccessMode) -> Access {
        match (self, mode) {
            (Access::Reading(1), AccessMode::ReadOnly) => Access::Idle,
            (Access::Reading(n), AccessMode::ReadOnly) => Access::Reading(n - 1),
            (Access::Writing, AccessMode::ReadWrite) => Access::Idle,
            (state, mode) => {
                error!("{:?} release on a gate in state {:?} ignored", mode, state);
                state
            }
        }
    }
}

pub struct AccessGate {
    state: Mutex<Access>,
    waiters: Condvar,
}

impl AccessGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Access::Idle),
            waiters: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Access> {
        // Transitions are single assignments, a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `mode` is compatible with the current holders, then records the admission.
    pub fn admit(&self, mode: AccessMode) {
        let mut state = self.lock();
        if !state.admits(mode) {
            debug!("{:?} admission waits on {:?}", mode, *state);
            state = self
                .waiters
                .wait_while(state, |state| !state.admits(mode))
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state = state.enter(mode);
    }

    /// Drops one admission of `mode`. Waiters are woken once the gate is idle again; while
    /// readers remain nobody blocked here could make progress.
    pub fn release(&self, mode: AccessMode) {
        let mut state = self.lock();
        *state = state.leave(mode);
        if *state == Access::Idle {
            self.waiters.notify_all();
        }
    }

    pub fn state(&self) -> Access {
        *self.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == Access::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(100);

    #[test]
    fn readers_share_the_gate() {
        let gate = AccessGate::new();
        gate.admit(AccessMode::ReadOnly);
        gate.admit(AccessMode::ReadOnly);
        gate.admit(AccessMode::ReadOnly);
        assert_eq!(gate.state(), Access::Reading(3));

        gate.release(AccessMode::ReadOnly);
        assert_eq!(gate.state(), Access::Reading(2));
        gate.release(AccessMode::ReadOnly);
        gate.release(AccessMode::ReadOnly);
        assert!(gate.is_idle());
    }

    #[test]
    fn mismatched_release_leaves_state_alone() {
        let gate = AccessGate::new();
        gate.admit(AccessMode::ReadWrite);
        gate.release(AccessMode::ReadOnly);
        assert_eq!(gate.state(), Access::Writing);
        gate.release(AccessMode::ReadWrite);
        assert!(gate.is_idle());
    }

    #[test]
    fn writer_waits_for_last_reader() {
        let gate = Arc::new(AccessGate::new());
        gate.admit(AccessMode::ReadOnly);
        gate.admit(AccessMode::ReadOnly);

        let (tx, rx) = mpsc::channel();
        let writer = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.admit(AccessMode::ReadWrite);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(SETTLE).is_err());
        gate.release(AccessMode::ReadOnly);
        assert!(rx.recv_timeout(SETTLE).is_err());
        gate.release(AccessMode::ReadOnly);
        rx.recv().unwrap();
        writer.join().unwrap();
        assert_eq!(gate.state(), Access::Writing);
    }

    #[test]
    fn readers_wait_for_writer() {
        let gate = Arc::new(AccessGate::new());
        gate.admit(AccessMode::ReadWrite);

        let (tx, rx) = mpsc::channel();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    gate.admit(AccessMode::ReadOnly);
                    tx.send(()).unwrap();
                })
            })
            .collect();

        assert!(rx.recv_timeout(SETTLE).is_err());
        gate.release(AccessMode::ReadWrite);
        for _ in 0..3 {
            rx.recv().unwrap();
        }
        readers.into_iter().for_each(|r| r.join().unwrap());
        assert_eq!(gate.state(), Access::Reading(3));
    }
}
