// SPDX-License-Identifier: PMPL-1.0-or-later

//! Interface byte counters and TCP retransmit rate

use regex::Regex;
use serde::Serialize;
use std::time::Duration;

pub const PROC_NET_DEV: &str = "/proc/net/dev";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

/// Find `interface` in the contents of `/proc/net/dev`.
pub fn parse_proc_net_dev(content: &str, interface: &str) -> Option<InterfaceCounters> {
    content.lines().find_map(|line| {
        let (name, fields) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        let values: Vec<u64> = fields
            .split_whitespace()
            .map(|field| field.parse().ok())
            .collect::<Option<_>>()?;
        if values.len() < 12 {
            return None;
        }
        Some(InterfaceCounters {
            rx_bytes: values[0],
            rx_packets: values[1],
            rx_errors: values[2],
            rx_dropped: values[3],
            tx_bytes: values[8],
            tx_packets: values[9],
            tx_errors: values[10],
            tx_dropped: values[11],
        })
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bandwidth {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

impl Bandwidth {
    /// Rate between two samples. Counter resets give zero, not a negative rate.
    pub fn between(previous: &InterfaceCounters, current: &InterfaceCounters, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Self::default();
        }
        let rate = |before: u64, after: u64| after.saturating_sub(before) as f64 * 8.0 / (secs * 1_000_000.0);
        Self {
            download_mbps: rate(previous.rx_bytes, current.rx_bytes),
            upload_mbps: rate(previous.tx_bytes, current.tx_bytes),
        }
    }

    pub fn total_mbps(&self) -> f64 {
        self.download_mbps + self.upload_mbps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Retransmits {
    pub sent: u64,
    pub retransmitted: u64,
}

impl Retransmits {
    pub fn rate_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.retransmitted as f64 / self.sent as f64 * 100.0
        }
    }
}

/// TCP segment counters from `netstat -s`.
pub fn parse_netstat(output: &str) -> Option<Retransmits> {
    let number = Regex::new(r"(\d+)").ok()?;
    let mut sent = None;
    let mut retransmitted = None;
    for line in output.lines() {
        let lower = line.to_lowercase();
        let value = || {
            number
                .captures(line)
                .and_then(|caps| caps[1].parse::<u64>().ok())
        };
        if lower.contains("segments sent out") {
            sent = value();
        } else if lower.contains("segments retransmitted") || lower.contains("segments retransmited") {
            retransmitted = value();
        }
    }
    match (sent, retransmitted) {
        (Some(sent), retransmitted) if sent > 0 => Some(Retransmits {
            sent,
            retransmitted: retransmitted.unwrap_or_default(),
        }),
        _ => None,
    }
}
