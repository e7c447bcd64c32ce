// SPDX-License-Identifier: PMPL-1.0-or-later

//! Interface and operator-origin detection

use crate::backend::command::{CommandRunner, ShellCommand};
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;

pub const FALLBACK_INTERFACE: &str = "eth0";

/// Host lookups the controller needs but does not own.
pub trait HostProbe: Send {
    fn default_interface(&self) -> Option<String>;

    /// Address the operator is connected from, when this is a remote session.
    fn operator_origin(&self) -> Option<IpAddr>;
}

pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
}

impl SystemProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn stdout_of(&self, line: &str) -> Option<String> {
        self.runner
            .run(&ShellCommand::parse(line))
            .ok()
            .filter(|output| output.success)
            .map(|output| output.stdout)
    }
}

impl HostProbe for SystemProbe {
    fn default_interface(&self) -> Option<String> {
        self.stdout_of("ip route show default")
            .and_then(|out| interface_from_route(&out))
            .or_else(|| {
                self.stdout_of("ip link show")
                    .and_then(|out| first_up_interface(&out))
            })
    }

    fn operator_origin(&self) -> Option<IpAddr> {
        std::env::var("SSH_CLIENT")
            .ok()
            .and_then(|value| origin_from_ssh_client(&value))
            .or_else(|| {
                self.stdout_of("who am i")
                    .and_then(|out| origin_from_who(&out))
            })
    }
}

/// Fixed answers, for tests and `--interface`-only setups.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub interface: Option<String>,
    pub origin: Option<IpAddr>,
}

impl HostProbe for StaticProbe {
    fn default_interface(&self) -> Option<String> {
        self.interface.clone()
    }

    fn operator_origin(&self) -> Option<IpAddr> {
        self.origin
    }
}

/// `default via 192.168.1.1 dev eth0 proto dhcp ...` → `eth0`
pub fn interface_from_route(output: &str) -> Option<String> {
    let words: Vec<&str> = output.split_whitespace().collect();
    words
        .iter()
        .position(|word| *word == "dev")
        .and_then(|idx| words.get(idx + 1))
        .map(|name| name.to_string())
}

/// First non-loopback link reported `state UP` by `ip link show`.
pub fn first_up_interface(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains("state UP"))
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
        .find(|name| !name.is_empty() && name != "lo")
}

/// `SSH_CLIENT="10.0.0.9 51234 22"` → `10.0.0.9`
pub fn origin_from_ssh_client(value: &str) -> Option<IpAddr> {
    value.split_whitespace().next()?.parse().ok()
}

/// `alice pts/0 2025-01-01 10:00 (10.0.0.9)` → `10.0.0.9`
pub fn origin_from_who(output: &str) -> Option<IpAddr> {
    let pattern = Regex::new(r"\((\d{1,3}(?:\.\d{1,3}){3})\)").ok()?;
    pattern
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
