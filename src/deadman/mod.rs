// SPDX-License-Identifier: PMPL-1.0-or-later

//! Deadman's switch: reverts chaos when the operator goes quiet.
//!
//! A monitor thread polls the time since the last recorded activity.
//! Shortly before the timeout it emits a warning; in grace mode it then
//! asks the operator (through the shell, which owns stdin) whether to keep
//! going and fires the emergency callback on "stop" or silence. Every tick
//! runs under `catch_unwind`, so a fault re-arms the loop instead of
//! silently killing the safety net.

mod clock;

pub use clock::{ActivityClock, GraceResponder, GraceResponse};

use clock::Shared;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const DEFAULT_WARNING_LEAD: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_FAULTS: u32 = 3;

pub type EmergencyCallback = Arc<dyn Fn() + Send + Sync>;
pub type EventObserver = Arc<dyn Fn(&DeadmanEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadmanConfig {
    pub timeout: Duration,
    pub warning_lead: Duration,
    /// `None` disables the continue/stop prompt; the switch then fires on timeout.
    pub grace_window: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for DeadmanConfig {
    fn default() -> Self {
        Self::minutes(30)
    }
}

impl DeadmanConfig {
    pub fn minutes(minutes: u64) -> Self {
        Self {
            timeout: Duration::from_secs(minutes.saturating_mul(60)),
            warning_lead: DEFAULT_WARNING_LEAD,
            grace_window: Some(DEFAULT_GRACE_WINDOW),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_warning_lead(mut self, lead: Duration) -> Self {
        self.warning_lead = lead;
        self
    }

    pub fn with_grace(mut self, window: Option<Duration>) -> Self {
        self.grace_window = window;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    Timeout,
    OperatorStop,
    NoResponse,
}

/// Lifecycle notifications, delivered on the monitor thread (or the
/// caller's, for `Armed`/`Disarmed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadmanEvent {
    Armed { timeout: Duration },
    Warning { remaining: Duration },
    GraceOpened { window: Duration },
    Continued,
    Expired { reason: ExpiryReason },
    Fault { message: String },
    Disarmed,
}

enum Tick {
    Continue,
    Finished,
}

pub struct DeadmanSwitch {
    config: DeadmanConfig,
    shared: Arc<Shared>,
    callback: EmergencyCallback,
    observer: EventObserver,
    responses_tx: Sender<GraceResponse>,
    responses_rx: Arc<Mutex<Receiver<GraceResponse>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeadmanSwitch {
    pub fn new(config: DeadmanConfig, callback: EmergencyCallback) -> Self {
        let (responses_tx, responses_rx) = mpsc::channel();
        Self {
            shared: Arc::new(Shared::new(config.timeout)),
            config,
            callback,
            observer: Arc::new(log_event),
            responses_tx,
            responses_rx: Arc::new(Mutex::new(responses_rx)),
            handle: Mutex::new(None),
        }
    }

    /// Replace the default tracing observer.
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &DeadmanConfig {
        &self.config
    }

    pub fn clock(&self) -> ActivityClock {
        ActivityClock {
            shared: self.shared.clone(),
        }
    }

    pub fn responder(&self) -> GraceResponder {
        GraceResponder {
            shared: self.shared.clone(),
            tx: self.responses_tx.clone(),
        }
    }

    /// Arm the switch. No-op while already running; re-arms after an expiry.
    pub fn start(&self) {
        let generation = {
            let mut state = self.shared.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.warning_emitted = false;
            state.awaiting_response = false;
            state.fault = None;
            state.last_activity = Instant::now();
            state.generation += 1;
            state.generation
        };
        self.join_previous();

        let monitor = Monitor {
            config: self.config.clone(),
            shared: self.shared.clone(),
            callback: self.callback.clone(),
            observer: self.observer.clone(),
            responses: self.responses_rx.clone(),
            generation,
        };
        let handle = thread::Builder::new()
            .name("ruckus-deadman".to_string())
            .spawn(move || monitor.run());
        match handle {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                (self.observer)(&DeadmanEvent::Armed {
                    timeout: self.config.timeout,
                });
            }
            Err(err) => {
                let mut state = self.shared.lock();
                state.running = false;
                state.fault = Some(format!("could not spawn monitor thread: {}", err));
                error!(error = %err, "deadman monitor not started");
            }
        }
    }

    /// Disarm. Idempotent; joins the monitor unless called from it.
    pub fn stop(&self) {
        let was_running = {
            let mut state = self.shared.lock();
            let was_running = state.running;
            state.running = false;
            state.awaiting_response = false;
            state.generation += 1;
            was_running
        };
        self.shared.wake.notify_all();
        self.join_previous();
        if was_running {
            (self.observer)(&DeadmanEvent::Disarmed);
        }
    }

    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.shared.remaining()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn awaiting_response(&self) -> bool {
        self.shared.lock().awaiting_response
    }

    pub fn fault(&self) -> Option<String> {
        self.shared.lock().fault.clone()
    }

    fn join_previous(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for DeadmanSwitch {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Monitor {
    config: DeadmanConfig,
    shared: Arc<Shared>,
    callback: EmergencyCallback,
    observer: EventObserver,
    responses: Arc<Mutex<Receiver<GraceResponse>>>,
    generation: u64,
}

impl Monitor {
    fn run(self) {
        self.supervise(Self::tick);
    }

    /// Tick until finished or stopped; give up after repeated faults.
    fn supervise(&self, mut tick: impl FnMut(&Self) -> Tick) {
        let mut consecutive_faults = 0;
        while self.wait_tick() {
            match panic::catch_unwind(AssertUnwindSafe(|| tick(self))) {
                Ok(Tick::Continue) => consecutive_faults = 0,
                Ok(Tick::Finished) => break,
                Err(payload) => {
                    consecutive_faults += 1;
                    self.record_fault(panic_message(payload.as_ref()));
                    if consecutive_faults >= MAX_CONSECUTIVE_FAULTS {
                        error!(
                            faults = consecutive_faults,
                            "deadman monitor gave up; chaos will NOT be reverted automatically"
                        );
                        let mut state = self.shared.lock();
                        if state.generation == self.generation {
                            state.running = false;
                            state.awaiting_response = false;
                        }
                        break;
                    }
                }
            }
        }
    }

    fn is_current(&self) -> bool {
        let state = self.shared.lock();
        state.running && state.generation == self.generation
    }

    /// Sleep one poll interval. `false` once this run was stopped.
    fn wait_tick(&self) -> bool {
        let deadline = Instant::now() + self.config.poll_interval;
        let mut state = self.shared.lock();
        loop {
            if !state.running || state.generation != self.generation {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = match self.shared.wake.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn tick(&self) -> Tick {
        let (elapsed, warned) = {
            let state = self.shared.lock();
            if !state.running || state.generation != self.generation {
                return Tick::Finished;
            }
            (state.last_activity.elapsed(), state.warning_emitted)
        };
        let remaining = self.config.timeout.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.fire(ExpiryReason::Timeout);
            return Tick::Finished;
        }
        if !warned && remaining <= self.config.warning_lead {
            self.shared.lock().warning_emitted = true;
            (self.observer)(&DeadmanEvent::Warning { remaining });
            if let Some(window) = self.config.grace_window {
                return self.grace(window);
            }
        }
        Tick::Continue
    }

    /// Wait for a continue/stop answer. The hard timeout does not apply here.
    fn grace(&self, window: Duration) -> Tick {
        let responses = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Answers that arrived while no prompt was open are stale.
        while responses.try_recv().is_ok() {}

        let activity_mark = {
            let mut state = self.shared.lock();
            state.awaiting_response = true;
            state.last_activity
        };
        (self.observer)(&DeadmanEvent::GraceOpened { window });

        let deadline = Instant::now() + window;
        loop {
            if !self.is_current() {
                self.close_prompt();
                return Tick::Finished;
            }
            let now = Instant::now();
            if now >= deadline {
                self.fire(ExpiryReason::NoResponse);
                return Tick::Finished;
            }
            let slice = self.config.poll_interval.min(deadline - now);
            match responses.recv_timeout(slice) {
                Ok(GraceResponse::Continue) => return self.continue_run(),
                Ok(GraceResponse::Stop) => {
                    self.fire(ExpiryReason::OperatorStop);
                    return Tick::Finished;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.lock().last_activity != activity_mark {
                        return self.continue_run();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => thread::sleep(slice),
            }
        }
    }

    fn continue_run(&self) -> Tick {
        {
            let mut state = self.shared.lock();
            state.awaiting_response = false;
            state.last_activity = Instant::now();
            state.warning_emitted = false;
        }
        (self.observer)(&DeadmanEvent::Continued);
        Tick::Continue
    }

    fn close_prompt(&self) {
        self.shared.lock().awaiting_response = false;
    }

    /// Invoke the callback. At most once per run: `running` is cleared
    /// under the lock before the call.
    fn fire(&self, reason: ExpiryReason) {
        {
            let mut state = self.shared.lock();
            if !state.running || state.generation != self.generation {
                return;
            }
            state.running = false;
            state.awaiting_response = false;
        }
        warn!(reason = ?reason, "deadman switch expired; reverting chaos");
        (self.observer)(&DeadmanEvent::Expired { reason });
        let callback = self.callback.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            self.record_fault(format!(
                "emergency callback panicked: {}",
                panic_message(payload.as_ref())
            ));
        }
    }

    fn record_fault(&self, message: String) {
        error!(fault = %message, "deadman monitor fault");
        self.shared.lock().fault = Some(message.clone());
        let event = DeadmanEvent::Fault { message };
        let _ = panic::catch_unwind(AssertUnwindSafe(|| (self.observer)(&event)));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_event(event: &DeadmanEvent) {
    match event {
        DeadmanEvent::Armed { timeout } => {
            info!(timeout_secs = timeout.as_secs(), "deadman switch armed")
        }
        DeadmanEvent::Warning { remaining } => {
            warn!(remaining_secs = remaining.as_secs(), "deadman switch about to expire")
        }
        DeadmanEvent::GraceOpened { window } => {
            warn!(window_secs = window.as_secs(), "waiting for operator to continue")
        }
        DeadmanEvent::Continued => info!("operator continued; deadman reset"),
        DeadmanEvent::Expired { reason } => warn!(reason = ?reason, "deadman expired"),
        DeadmanEvent::Fault { message } => error!(fault = %message, "deadman fault"),
        DeadmanEvent::Disarmed => info!("deadman switch disarmed"),
    }
}
