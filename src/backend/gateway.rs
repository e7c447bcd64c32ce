// SPDX-License-Identifier: PMPL-1.0-or-later

//! Gateway mode: IP forwarding and NAT for network-wide chaos

use super::command::{CommandRunner, ShellCommand};
use crate::error::BackendError;
use tracing::info;

pub fn forwarding_enabled(runner: &dyn CommandRunner) -> Result<bool, BackendError> {
    let output = runner.run_checked(&ShellCommand::parse("sysctl -n net.ipv4.ip_forward"))?;
    Ok(output.stdout.trim() == "1")
}

/// Enable forwarding and masquerade traffic leaving `interface`.
pub fn enable(runner: &dyn CommandRunner, interface: &str) -> Result<(), BackendError> {
    runner.run_checked(&ShellCommand::parse("sysctl -w net.ipv4.ip_forward=1"))?;

    let masquerade = ["POSTROUTING", "-o", interface, "-j", "MASQUERADE"];
    let check = ShellCommand::new("iptables")
        .args(["-t", "nat", "-C"])
        .args(masquerade);
    // -C exits non-zero when the rule is missing
    if !runner.run(&check)?.success {
        let add = ShellCommand::new("iptables")
            .args(["-t", "nat", "-A"])
            .args(masquerade);
        runner.run_checked(&add)?;
    }
    info!(interface, "gateway mode enabled");
    Ok(())
}
