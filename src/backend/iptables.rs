// SPDX-License-Identifier: PMPL-1.0-or-later

//! iptables backend for hosts without the netem kernel module
//!
//! Only packet loss can be expressed (via the `statistic` match).
//! Everything lives in one dedicated chain so a clear is a matter of
//! unhooking and flushing it. Allow-list rules are appended before any
//! drop rule, and rules in a chain are evaluated in order.

use super::command::{CommandRunner, ShellCommand};
use super::{gateway, Backend, ShapingPlan};
use crate::error::BackendError;
use crate::types::{BackendKind, Scope};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const CHAIN: &str = "RUCKUS_CHAOS";
const STATUS_LINES: usize = 50;

pub struct IptablesBackend {
    runner: Arc<dyn CommandRunner>,
    chain_ready: bool,
    hooked: bool,
}

impl IptablesBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            chain_ready: false,
            hooked: false,
        }
    }

    fn iptables(&self) -> ShellCommand {
        ShellCommand::new("iptables")
    }

    fn ensure_chain(&mut self) -> Result<(), BackendError> {
        if self.chain_ready {
            return Ok(());
        }
        // -N fails when the chain survived a crash; the flush empties it.
        self.runner.run_tolerant(&self.iptables().args(["-N", CHAIN]))?;
        self.runner.run_checked(&self.iptables().args(["-F", CHAIN]))?;
        self.chain_ready = true;
        Ok(())
    }

    fn append(&self, rule: &[&str]) -> Result<(), BackendError> {
        let cmd = self.iptables().args(["-A", CHAIN]).args(rule.iter().copied());
        self.runner.run_checked(&cmd).map(|_| ())
    }

    fn hook(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError> {
        if self.hooked {
            return Ok(());
        }
        let input = self.iptables().args(["-I", "INPUT", "-i", interface, "-j", CHAIN]);
        self.runner.run_checked(&input)?;
        let output = self.iptables().args(["-I", "OUTPUT", "-o", interface, "-j", CHAIN]);
        self.runner.run_checked(&output)?;
        if matches!(scope, Scope::NetworkWide) {
            let forward = self.iptables().args(["-I", "FORWARD", "-j", CHAIN]);
            self.runner.run_checked(&forward)?;
        }
        self.hooked = true;
        Ok(())
    }
}

impl Backend for IptablesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Iptables
    }

    fn preflight(&self) -> Result<(), BackendError> {
        self.runner
            .run_checked(&self.iptables().arg("--version"))
            .map(|_| ())
    }

    fn clear_all(&mut self, interface: &str, _scope: &Scope) -> Result<(), BackendError> {
        // The previous apply may have used another scope, so every hook goes.
        for hook in [
            vec!["-D", "INPUT", "-i", interface, "-j", CHAIN],
            vec!["-D", "OUTPUT", "-o", interface, "-j", CHAIN],
            vec!["-D", "FORWARD", "-j", CHAIN],
        ] {
            self.runner.run_tolerant(&self.iptables().args(hook))?;
        }
        self.runner.run_tolerant(&self.iptables().args(["-F", CHAIN]))?;
        self.runner.run_tolerant(&self.iptables().args(["-X", CHAIN]))?;
        self.chain_ready = false;
        self.hooked = false;
        Ok(())
    }

    fn apply_profile(
        &mut self,
        plan: &ShapingPlan,
        interface: &str,
        scope: &Scope,
    ) -> Result<Vec<String>, BackendError> {
        let mut warnings = Vec::new();
        if plan.latency_ms > 0 {
            warnings.push(format!(
                "latency of {}ms skipped: iptables cannot delay packets",
                plan.latency_ms
            ));
        }
        if let Some(kbps) = plan.bandwidth_kbps {
            warnings.push(format!(
                "bandwidth limit of {} kbps skipped: iptables cannot shape bandwidth",
                kbps
            ));
        }
        if plan.loss_pct == 0 {
            return Ok(warnings);
        }

        self.ensure_chain()?;
        let probability = format!("{:.2}", f64::from(plan.loss_pct) / 100.0);
        let statistic = [
            "-m",
            "statistic",
            "--mode",
            "random",
            "--probability",
            probability.as_str(),
            "-j",
            "DROP",
        ];
        match scope {
            Scope::Targeted(target) => {
                let addr = target.to_string();
                for direction in ["-s", "-d"] {
                    let mut rule = vec![direction, addr.as_str()];
                    rule.extend(statistic);
                    self.append(&rule)?;
                }
            }
            Scope::Local | Scope::NetworkWide => self.append(&statistic)?,
        }
        self.hook(interface, scope)?;
        info!(interface, scope = %scope, probability = %probability, "iptables loss installed");
        Ok(warnings)
    }

    fn protect_addresses(
        &mut self,
        addresses: &[IpAddr],
        interface: &str,
    ) -> Result<(), BackendError> {
        self.ensure_chain()?;
        self.append(&["-p", "tcp", "--dport", "22", "-j", "ACCEPT"])?;
        self.append(&["-p", "tcp", "--sport", "22", "-j", "ACCEPT"])?;
        for address in addresses {
            if address.is_ipv6() {
                warn!(%address, "iptables allow-list is IPv4 only; address not protected");
                continue;
            }
            let addr = address.to_string();
            self.append(&["-s", addr.as_str(), "-j", "ACCEPT"])?;
            self.append(&["-d", addr.as_str(), "-j", "ACCEPT"])?;
        }
        info!(interface, count = addresses.len(), "allow-list installed");
        Ok(())
    }

    fn drop_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError> {
        self.ensure_chain()?;
        match scope {
            Scope::Targeted(target) => {
                let addr = target.to_string();
                self.append(&["-s", addr.as_str(), "-j", "DROP"])?;
                self.append(&["-d", addr.as_str(), "-j", "DROP"])?;
            }
            Scope::Local | Scope::NetworkWide => self.append(&["-j", "DROP"])?,
        }
        self.hook(interface, scope)?;
        info!(interface, scope = %scope, "total outage installed");
        Ok(())
    }

    fn query_status(&self, _interface: &str) -> String {
        match self.runner.run(&self.iptables().args(["-L", "-n", "-v"])) {
            Ok(output) => output
                .stdout
                .lines()
                .take(STATUS_LINES)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => err.to_string(),
        }
    }

    fn forwarding_enabled(&self) -> Result<bool, BackendError> {
        gateway::forwarding_enabled(self.runner.as_ref())
    }

    fn enable_forwarding(&mut self, interface: &str) -> Result<(), BackendError> {
        gateway::enable(self.runner.as_ref(), interface)
    }
}
