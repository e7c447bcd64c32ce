// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared deadman state and the cheap handles other components hold

use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Operator answer to a grace-window prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceResponse {
    Continue,
    Stop,
}

impl GraceResponse {
    /// `y`/`yes` continue; anything else stops.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" => GraceResponse::Continue,
            _ => GraceResponse::Stop,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DeadmanState {
    pub last_activity: Instant,
    pub warning_emitted: bool,
    pub running: bool,
    pub awaiting_response: bool,
    pub fault: Option<String>,
    /// Bumped on every start/stop; a monitor thread exits once it is stale.
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub timeout: Duration,
    state: Mutex<DeadmanState>,
    pub wake: Condvar,
}

impl Shared {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(DeadmanState {
                last_activity: Instant::now(),
                warning_emitted: false,
                running: false,
                awaiting_response: false,
                fault: None,
                generation: 0,
            }),
            wake: Condvar::new(),
        }
    }

    /// The monitor may panic while holding the lock; state stays usable.
    pub fn lock(&self) -> MutexGuard<'_, DeadmanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.last_activity = Instant::now();
        state.warning_emitted = false;
    }

    pub fn remaining(&self) -> Option<Duration> {
        let state = self.lock();
        state
            .running
            .then(|| self.timeout.saturating_sub(state.last_activity.elapsed()))
    }
}

/// Handle for recording activity; held by the controller.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    pub(crate) shared: Arc<Shared>,
}

impl ActivityClock {
    /// Mark "operator is still here": restarts the countdown and re-arms the warning.
    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn last_activity(&self) -> Instant {
        self.shared.lock().last_activity
    }

    /// Time left before expiry, `None` while the switch is not running.
    pub fn remaining(&self) -> Option<Duration> {
        self.shared.remaining()
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn fault(&self) -> Option<String> {
        self.shared.lock().fault.clone()
    }
}

/// Handle for answering a grace prompt; held by the input-owning shell.
#[derive(Debug, Clone)]
pub struct GraceResponder {
    pub(crate) shared: Arc<Shared>,
    pub(crate) tx: Sender<GraceResponse>,
}

impl GraceResponder {
    /// The monitor is waiting for a continue/stop answer.
    pub fn awaiting(&self) -> bool {
        self.shared.lock().awaiting_response
    }

    /// Deliver an answer. Returns `false` when no prompt was open.
    pub fn respond(&self, response: GraceResponse) -> bool {
        if !self.awaiting() {
            return false;
        }
        self.tx.send(response).is_ok()
    }
}
