// SPDX-License-Identifier: PMPL-1.0-or-later

//! tc/netem backend
//!
//! Untargeted shaping hangs a single netem (or tbf) qdisc off the root.
//! Targeted shaping and total outage use a three-band `prio` root whose
//! priomap sends all unclassified traffic to the middle band, so only
//! filtered traffic ever reaches a shaping leaf:
//!
//! ```text
//! root 1: prio ── 1:1  protected / targeted traffic
//!             ├── 1:2  everything else (untouched)
//!             └── 1:3  netem loss 100% (outage only)
//! ```

use super::command::{CommandRunner, ShellCommand};
use super::{gateway, Backend, ShapingPlan};
use crate::error::BackendError;
use crate::types::{BackendKind, Scope};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info};

const PRIORITY_PROTECT_V4: &str = "1";
const PRIORITY_PROTECT_V6: &str = "2";
const PRIORITY_TARGET: &str = "5";
const PRIORITY_DROP: &str = "10";

pub struct NetemBackend {
    runner: Arc<dyn CommandRunner>,
    /// The prio root exists on this interface (installed by protect/drop).
    prio_root: Option<String>,
}

impl NetemBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            prio_root: None,
        }
    }

    fn tc(&self) -> ShellCommand {
        ShellCommand::new("tc")
    }

    fn ensure_prio_root(&mut self, interface: &str) -> Result<(), BackendError> {
        if self.prio_root.as_deref() == Some(interface) {
            return Ok(());
        }
        let cmd = self
            .tc()
            .args(["qdisc", "add", "dev", interface, "root", "handle", "1:", "prio"])
            .args(["bands", "3", "priomap"])
            .args(std::iter::repeat("1").take(16));
        self.runner.run_checked(&cmd)?;
        self.prio_root = Some(interface.to_string());
        Ok(())
    }

    fn ip_filter(&self, interface: &str, priority: &str, selector: &[&str], flow: &str) -> ShellCommand {
        self.tc()
            .args(["filter", "add", "dev", interface, "protocol", "ip"])
            .args(["parent", "1:0", "prio", priority, "u32"])
            .args(selector.iter().copied())
            .args(["flowid", flow])
    }

    /// Leaf qdisc arguments for a plan: netem when delaying/dropping,
    /// otherwise a token bucket for a bandwidth-only cap.
    fn leaf_args(plan: &ShapingPlan) -> Option<Vec<String>> {
        if plan.has_delay_or_loss() {
            let mut args = vec!["netem".to_string()];
            args.extend(plan.netem_args());
            Some(args)
        } else {
            plan.bandwidth_kbps.map(|kbps| {
                vec![
                    "tbf".to_string(),
                    "rate".to_string(),
                    format!("{}kbit", kbps),
                    "burst".to_string(),
                    "32kbit".to_string(),
                    "latency".to_string(),
                    "400ms".to_string(),
                ]
            })
        }
    }

    fn shape_target(
        &mut self,
        leaf: Vec<String>,
        interface: &str,
        target: Ipv4Addr,
    ) -> Result<(), BackendError> {
        self.ensure_prio_root(interface)?;
        let qdisc = self
            .tc()
            .args(["qdisc", "add", "dev", interface, "parent", "1:1", "handle", "10:"])
            .args(leaf);
        self.runner.run_checked(&qdisc)?;
        let dst = target.to_string();
        let filter = self.ip_filter(
            interface,
            PRIORITY_TARGET,
            &["match", "ip", "dst", dst.as_str()],
            "1:1",
        );
        self.runner.run_checked(&filter)?;
        Ok(())
    }
}

impl Backend for NetemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Netem
    }

    fn preflight(&self) -> Result<(), BackendError> {
        self.runner.run_checked(&self.tc().arg("-V")).map(|_| ())
    }

    fn clear_all(&mut self, interface: &str, _scope: &Scope) -> Result<(), BackendError> {
        // Deleting the root removes the drop leaf, then the allow-list filters.
        let root = self.tc().args(["qdisc", "del", "dev", interface, "root"]);
        self.runner.run_tolerant(&root)?;
        self.prio_root = None;
        Ok(())
    }

    fn apply_profile(
        &mut self,
        plan: &ShapingPlan,
        interface: &str,
        scope: &Scope,
    ) -> Result<Vec<String>, BackendError> {
        let mut warnings = Vec::new();
        let Some(leaf) = Self::leaf_args(plan) else {
            warnings.push("profile has nothing to shape".to_string());
            return Ok(warnings);
        };
        if plan.has_delay_or_loss() && plan.bandwidth_kbps.is_some() {
            warnings.push("bandwidth limit not combined with netem shaping".to_string());
        }

        match scope {
            Scope::Targeted(target) => self.shape_target(leaf, interface, *target)?,
            Scope::Local | Scope::NetworkWide => {
                let cmd = self
                    .tc()
                    .args(["qdisc", "add", "dev", interface, "root"])
                    .args(leaf);
                self.runner.run_checked(&cmd)?;
            }
        }
        info!(interface, scope = %scope, "netem shaping installed");
        Ok(warnings)
    }

    fn protect_addresses(
        &mut self,
        addresses: &[IpAddr],
        interface: &str,
    ) -> Result<(), BackendError> {
        self.ensure_prio_root(interface)?;
        for port_match in [["sport", "22"], ["dport", "22"]] {
            let filter = self.ip_filter(
                interface,
                PRIORITY_PROTECT_V4,
                &["match", "ip", port_match[0], port_match[1], "0xffff"],
                "1:1",
            );
            self.runner.run_checked(&filter)?;
        }
        for address in addresses {
            let filter = match address {
                IpAddr::V4(v4) => {
                    let dst = format!("{}/32", v4);
                    self.ip_filter(
                        interface,
                        PRIORITY_PROTECT_V4,
                        &["match", "ip", "dst", dst.as_str()],
                        "1:1",
                    )
                }
                IpAddr::V6(v6) => self
                    .tc()
                    .args(["filter", "add", "dev", interface, "protocol", "ipv6"])
                    .args(["parent", "1:0", "prio", PRIORITY_PROTECT_V6, "u32"])
                    .args(["match", "ip6", "dst"])
                    .arg(format!("{}/128", v6))
                    .args(["flowid", "1:1"]),
            };
            self.runner.run_checked(&filter)?;
        }
        debug!(interface, count = addresses.len(), "allow-list installed");
        Ok(())
    }

    fn drop_all(&mut self, interface: &str, scope: &Scope) -> Result<(), BackendError> {
        self.ensure_prio_root(interface)?;
        let leaf = self
            .tc()
            .args(["qdisc", "add", "dev", interface, "parent", "1:3", "handle", "30:"])
            .args(["netem", "loss", "100%"]);
        self.runner.run_checked(&leaf)?;

        let filter = match scope {
            Scope::Targeted(target) => {
                let dst = target.to_string();
                self.ip_filter(
                    interface,
                    PRIORITY_DROP,
                    &["match", "ip", "dst", dst.as_str()],
                    "1:3",
                )
            }
            Scope::Local | Scope::NetworkWide => self
                .tc()
                .args(["filter", "add", "dev", interface, "protocol", "all"])
                .args(["parent", "1:0", "prio", PRIORITY_DROP, "u32"])
                .args(["match", "u32", "0", "0", "flowid", "1:3"]),
        };
        self.runner.run_checked(&filter)?;
        info!(interface, scope = %scope, "total outage installed");
        Ok(())
    }

    fn query_status(&self, interface: &str) -> String {
        let mut report = String::new();
        for what in ["qdisc", "filter"] {
            let cmd = self.tc().args([what, "show", "dev", interface]);
            match self.runner.run(&cmd) {
                Ok(output) if !output.stdout.trim().is_empty() => {
                    report.push_str(&output.stdout);
                }
                Ok(_) => {}
                Err(err) => report.push_str(&format!("{}\n", err)),
            }
        }
        if report.trim().is_empty() {
            "No qdisc configured (normal operation)".to_string()
        } else {
            report
        }
    }

    fn forwarding_enabled(&self) -> Result<bool, BackendError> {
        gateway::forwarding_enabled(self.runner.as_ref())
    }

    fn enable_forwarding(&mut self, interface: &str) -> Result<(), BackendError> {
        gateway::enable(self.runner.as_ref(), interface)
    }
}
