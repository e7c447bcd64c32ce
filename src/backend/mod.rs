// SPDX-License-Identifier: PMPL-1.0-or-later

//! Traffic-shaping backends
//!
//! The controller never formats a `tc` or `iptables` line itself; it calls
//! through [`Backend`]. Two implementations exist: queueing-discipline
//! injection with tc/netem and rule injection with iptables, for hosts
//! whose kernel lacks the netem module.

pub mod command;
pub mod gateway;
pub mod iptables;
pub mod netem;

use crate::error::BackendError;
use crate::types::{BackendKind, DisruptionProfile, Scope};
use std::net::IpAddr;
use std::sync::Arc;

pub use command::{CommandOutput, CommandRunner, RecordingRunner, ShellCommand, SystemRunner};
pub use iptables::IptablesBackend;
pub use netem::NetemBackend;

/// Capability interface over the host's packet-manipulation facility.
///
/// Removal operations treat "nothing to remove" as success. Every other
/// operation reports the first failing command.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Check that the underlying tool is installed and runnable.
    fn preflight(&self) -> Result<(), BackendError>;

    /// Remove everything this backend may have installed on `interface`,
    /// drop rules before allow-list rules.
    fn clear_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError>;

    /// Install latency/jitter/loss or bandwidth shaping. Returns warnings
    /// for parameters the backend had to skip.
    fn apply_profile(
        &mut self,
        plan: &ShapingPlan,
        interface: &str,
        scope: &Scope,
    ) -> Result<Vec<String>, BackendError>;

    /// Exempt SSH and the given addresses from any later drop rule.
    fn protect_addresses(
        &mut self,
        addresses: &[IpAddr],
        interface: &str,
    ) -> Result<(), BackendError>;

    /// Drop all traffic in `scope`, except what `protect_addresses` exempted.
    fn drop_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError>;

    /// Opaque human-readable dump of the current rules.
    fn query_status(&self, interface: &str) -> String;

    fn forwarding_enabled(&self) -> Result<bool, BackendError>;

    /// Turn this host into a gateway (IP forwarding plus NAT).
    fn enable_forwarding(&mut self, interface: &str) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn preflight(&self) -> Result<(), BackendError> {
        (**self).preflight()
    }

    fn clear_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError> {
        (**self).clear_all(interface, scope)
    }

    fn apply_profile(
        &mut self,
        plan: &ShapingPlan,
        interface: &str,
        scope: &Scope,
    ) -> Result<Vec<String>, BackendError> {
        (**self).apply_profile(plan, interface, scope)
    }

    fn protect_addresses(
        &mut self,
        addresses: &[IpAddr],
        interface: &str,
    ) -> Result<(), BackendError> {
        (**self).protect_addresses(addresses, interface)
    }

    fn drop_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError> {
        (**self).drop_all(interface, scope)
    }

    fn query_status(&self, interface: &str) -> String {
        (**self).query_status(interface)
    }

    fn forwarding_enabled(&self) -> Result<bool, BackendError> {
        (**self).forwarding_enabled()
    }

    fn enable_forwarding(&mut self, interface: &str) -> Result<(), BackendError> {
        (**self).enable_forwarding(interface)
    }
}

/// Construct the backend selected by configuration.
pub fn build(kind: BackendKind, runner: Arc<dyn CommandRunner>) -> Box<dyn Backend> {
    match kind {
        BackendKind::Netem => Box::new(NetemBackend::new(runner)),
        BackendKind::Iptables => Box::new(IptablesBackend::new(runner)),
    }
}

/// Parameters actually handed to a backend for a partial degradation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapingPlan {
    pub latency_ms: u32,
    pub jitter_ms: u32,
    pub loss_pct: u8,
    pub bandwidth_kbps: Option<u32>,
}

impl ShapingPlan {
    /// Latency/loss shaping and bandwidth limiting are not combined in one
    /// qdisc; when both are requested latency/loss win and the cap is
    /// dropped with a warning.
    pub fn from_profile(profile: &DisruptionProfile) -> (Self, Option<String>) {
        let mut plan = Self {
            latency_ms: profile.latency_ms,
            jitter_ms: if profile.latency_ms > 0 {
                profile.jitter_ms
            } else {
                0
            },
            loss_pct: profile.packet_loss_pct,
            bandwidth_kbps: profile.bandwidth_kbps,
        };
        let mut warning = None;
        if plan.has_delay_or_loss() {
            if let Some(kbps) = plan.bandwidth_kbps.take() {
                warning = Some(format!(
                    "bandwidth limit of {} kbps skipped: not combined with latency/loss shaping",
                    kbps
                ));
            }
        }
        (plan, warning)
    }

    pub fn has_delay_or_loss(&self) -> bool {
        self.latency_ms > 0 || self.loss_pct > 0
    }

    /// netem arguments, e.g. `["delay", "300ms", "50ms", "loss", "8%"]`.
    pub fn netem_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.latency_ms > 0 {
            args.push("delay".to_string());
            args.push(format!("{}ms", self.latency_ms));
            if self.jitter_ms > 0 {
                args.push(format!("{}ms", self.jitter_ms));
            }
        }
        if self.loss_pct > 0 {
            args.push("loss".to_string());
            args.push(format!("{}%", self.loss_pct));
        }
        args
    }
}
