// SPDX-License-Identifier: PMPL-1.0-or-later

//! ping summary parsing

use crate::backend::command::{CommandRunner, ShellCommand};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PingStats {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    /// `mdev`, used as jitter.
    pub jitter_ms: f64,
    pub loss_pct: f64,
}

/// Outcome of one probe round. An unreachable target counts as 100% loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PingOutcome {
    Reachable(PingStats),
    Unreachable { loss_pct: f64 },
}

impl PingOutcome {
    pub fn loss_pct(&self) -> f64 {
        match self {
            PingOutcome::Reachable(stats) => stats.loss_pct,
            PingOutcome::Unreachable { loss_pct } => *loss_pct,
        }
    }
}

fn loss_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").ok())
        .as_ref()
}

fn rtt_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+)",
            )
            .ok()
        })
        .as_ref()
}

pub fn parse_ping(output: &str) -> PingOutcome {
    let loss_pct = loss_pattern()
        .and_then(|pattern| pattern.captures(output))
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .unwrap_or(100.0);
    let Some(caps) = rtt_pattern().and_then(|pattern| pattern.captures(output)) else {
        return PingOutcome::Unreachable { loss_pct: 100.0 };
    };
    let field = |idx: usize| caps[idx].parse::<f64>().unwrap_or_default();
    PingOutcome::Reachable(PingStats {
        min_ms: field(1),
        avg_ms: field(2),
        max_ms: field(3),
        jitter_ms: field(4),
        loss_pct,
    })
}

pub fn ping(runner: &dyn CommandRunner, address: &str, count: u32) -> PingOutcome {
    let cmd = ShellCommand::new("ping")
        .arg("-c")
        .arg(count.max(1).to_string())
        .args(["-i", "0.2", "-W", "1", address]);
    match runner.run(&cmd) {
        Ok(output) => parse_ping(&output.stdout),
        Err(_) => PingOutcome::Unreachable { loss_pct: 100.0 },
    }
}
