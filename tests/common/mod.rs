// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared fakes for the integration tests

#![allow(dead_code)]

use ruckus::backend::{Backend, ShapingPlan};
use ruckus::catalog::Catalog;
use ruckus::controller::{ChaosController, ProtectionSettings};
use ruckus::error::BackendError;
use ruckus::netinfo::StaticProbe;
use ruckus::types::{BackendKind, Scope};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Clear(Scope),
    Apply(ShapingPlan, Scope),
    Protect(Vec<IpAddr>),
    Drop(Scope),
    EnableForwarding,
}

/// Records every backend call; individual operations can be told to fail.
#[derive(Clone, Default)]
pub struct FakeBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<Vec<&'static str>>>,
    /// Clears beyond this many succeed no more.
    clears_allowed: Arc<Mutex<Option<usize>>>,
    forwarding: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn clear_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Clear(_)))
            .count()
    }

    pub fn position(&self, wanted: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(wanted)
    }

    /// `op` is one of clear, apply, protect, drop, forward.
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().expect("failing lock").push(op);
    }

    /// The next `allowed` clears succeed, every later one fails.
    pub fn fail_clears_after(&self, allowed: usize) {
        *self.clears_allowed.lock().expect("clears lock") = Some(allowed);
    }

    pub fn heal(&self) {
        self.failing.lock().expect("failing lock").clear();
        *self.clears_allowed.lock().expect("clears lock") = None;
    }

    pub fn set_forwarding(&self, enabled: bool) {
        self.forwarding.store(enabled, Ordering::SeqCst);
    }

    fn record(&self, op: &'static str, call: Call) -> Result<(), BackendError> {
        self.calls.lock().expect("calls lock").push(call);
        if self.failing.lock().expect("failing lock").contains(&op) {
            return Err(BackendError::CommandFailed {
                command: format!("fake {}", op),
                status: "status 2".to_string(),
                stderr: "simulated".to_string(),
            });
        }
        Ok(())
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Netem
    }

    fn preflight(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn clear_all(&mut self, _interface: &str, scope: &Scope) -> Result<(), BackendError> {
        let exhausted = {
            let mut allowed = self.clears_allowed.lock().expect("clears lock");
            match allowed.as_mut() {
                Some(0) => true,
                Some(left) => {
                    *left -= 1;
                    false
                }
                None => false,
            }
        };
        if exhausted {
            self.fail_on("clear");
        }
        let result = self.record("clear", Call::Clear(*scope));
        if exhausted {
            self.failing.lock().expect("failing lock").retain(|op| *op != "clear");
        }
        result
    }

    fn apply_profile(
        &mut self,
        plan: &ShapingPlan,
        _interface: &str,
        scope: &Scope,
    ) -> Result<Vec<String>, BackendError> {
        self.record("apply", Call::Apply(*plan, *scope))?;
        Ok(Vec::new())
    }

    fn protect_addresses(&mut self, addresses: &[IpAddr], _interface: &str) -> Result<(), BackendError> {
        self.record("protect", Call::Protect(addresses.to_vec()))
    }

    fn drop_all(&mut self, _interface: &str, scope: &Scope) -> Result<(), BackendError> {
        self.record("drop", Call::Drop(*scope))
    }

    fn query_status(&self, _interface: &str) -> String {
        format!("{} calls", self.calls().len())
    }

    fn forwarding_enabled(&self) -> Result<bool, BackendError> {
        Ok(self.forwarding.load(Ordering::SeqCst))
    }

    fn enable_forwarding(&mut self, _interface: &str) -> Result<(), BackendError> {
        self.record("forward", Call::EnableForwarding)?;
        self.forwarding.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn probe(origin: Option<&str>) -> Box<StaticProbe> {
    Box::new(StaticProbe {
        interface: Some("eth0".to_string()),
        origin: origin.map(|addr| addr.parse().expect("origin address")),
    })
}

/// Controller over the standard catalog, plus a handle on its fake backend.
pub fn controller() -> (ChaosController<FakeBackend>, FakeBackend) {
    controller_with(ProtectionSettings::default(), None)
}

pub fn controller_with(
    protection: ProtectionSettings,
    origin: Option<&str>,
) -> (ChaosController<FakeBackend>, FakeBackend) {
    let backend = FakeBackend::new();
    let controller = ChaosController::new(
        backend.clone(),
        Catalog::standard(),
        protection,
        probe(origin),
    );
    (controller, backend)
}
