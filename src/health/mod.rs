// SPDX-License-Identifier: PMPL-1.0-or-later

//! Network health monitor behind `ruckus watch`.
//!
//! Each sample pings every target, reads the interface byte counters and
//! scores the connection. Histories keep the last 60 samples.

pub mod counters;
pub mod dashboard;
pub mod ping;
pub mod quality;

pub use counters::{Bandwidth, InterfaceCounters, Retransmits};
pub use ping::{PingOutcome, PingStats};
pub use quality::{quality_score, Alert, AlertThresholds, QualityBand};

use crate::backend::command::{CommandRunner, ShellCommand};
use crate::config::WatchTarget;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const HISTORY_SIZE: usize = 60;
/// Averages are only shown once this many samples exist.
pub const MIN_TREND_SAMPLES: usize = 5;

/// Fixed-capacity sample window; oldest values fall off.
#[derive(Debug, Clone, Default)]
pub struct History {
    values: VecDeque<f64>,
}

impl History {
    pub fn push(&mut self, value: f64) {
        if self.values.len() == HISTORY_SIZE {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.values.is_empty()).then(|| self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_loss_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub address: String,
    pub outcome: PingOutcome,
    /// Only for reachable targets.
    pub score: Option<f64>,
    pub band: Option<QualityBand>,
    pub alerts: Vec<Alert>,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandwidthReport {
    pub current: Bandwidth,
    pub average_mbps: Option<f64>,
    pub peak_mbps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub captured_at: String,
    pub interface: String,
    pub counters: Option<InterfaceCounters>,
    pub bandwidth: Option<BandwidthReport>,
    pub retransmits: Option<Retransmits>,
    pub targets: Vec<TargetReport>,
}

/// Where interface counters come from; `/proc/net/dev` outside tests.
pub trait CounterSource: Send {
    fn read(&self, interface: &str) -> Option<InterfaceCounters>;
}

pub struct ProcNetDev;

impl CounterSource for ProcNetDev {
    fn read(&self, interface: &str) -> Option<InterfaceCounters> {
        let content = fs::read_to_string(counters::PROC_NET_DEV).ok()?;
        counters::parse_proc_net_dev(&content, interface)
    }
}

#[derive(Default)]
struct TargetHistory {
    latency: History,
    loss: History,
}

pub struct HealthMonitor {
    runner: Arc<dyn CommandRunner>,
    counters: Box<dyn CounterSource>,
    interface: String,
    targets: Vec<WatchTarget>,
    thresholds: AlertThresholds,
    ping_count: u32,
    histories: BTreeMap<String, TargetHistory>,
    bandwidth_history: History,
    previous: Option<(InterfaceCounters, Instant)>,
}

impl HealthMonitor {
    pub fn new(runner: Arc<dyn CommandRunner>, interface: &str, targets: Vec<WatchTarget>) -> Self {
        Self {
            runner,
            counters: Box::new(ProcNetDev),
            interface: interface.to_string(),
            targets,
            thresholds: AlertThresholds::default(),
            ping_count: 5,
            histories: BTreeMap::new(),
            bandwidth_history: History::default(),
            previous: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_ping_count(mut self, count: u32) -> Self {
        self.ping_count = count.max(1);
        self
    }

    pub fn with_counter_source(mut self, source: Box<dyn CounterSource>) -> Self {
        self.counters = source;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn sample(&mut self) -> HealthReport {
        let counters = self.counters.read(&self.interface);
        let bandwidth = counters.map(|current| self.record_bandwidth(current));
        let retransmits = self
            .runner
            .run(&ShellCommand::parse("netstat -s"))
            .ok()
            .filter(|output| output.success)
            .and_then(|output| counters::parse_netstat(&output.stdout));

        let targets = self.targets.clone();
        let reports = targets
            .iter()
            .map(|target| self.probe(target))
            .collect();

        HealthReport {
            captured_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            interface: self.interface.clone(),
            counters,
            bandwidth,
            retransmits,
            targets: reports,
        }
    }

    fn record_bandwidth(&mut self, current: InterfaceCounters) -> BandwidthReport {
        let now = Instant::now();
        let rate = match self.previous {
            Some((previous, at)) => Bandwidth::between(&previous, &current, now.duration_since(at)),
            None => Bandwidth::default(),
        };
        self.previous = Some((current, now));
        self.bandwidth_history.push(rate.total_mbps());
        let trend = self.bandwidth_history.len() > MIN_TREND_SAMPLES;
        BandwidthReport {
            current: rate,
            average_mbps: trend.then(|| self.bandwidth_history.mean()).flatten(),
            peak_mbps: trend.then(|| self.bandwidth_history.max()).flatten(),
        }
    }

    fn probe(&mut self, target: &WatchTarget) -> TargetReport {
        let outcome = ping::ping(self.runner.as_ref(), &target.address, self.ping_count);
        debug!(target = %target.name, outcome = ?outcome, "ping");
        let history = self.histories.entry(target.name.clone()).or_default();

        let (score, band, alerts) = match &outcome {
            PingOutcome::Reachable(stats) => {
                history.latency.push(stats.avg_ms);
                history.loss.push(stats.loss_pct);
                let score = quality_score(stats.avg_ms, stats.loss_pct, stats.jitter_ms);
                let alerts = self
                    .thresholds
                    .evaluate(stats.avg_ms, stats.loss_pct, stats.jitter_ms, score);
                (Some(score), Some(QualityBand::from_score(score)), alerts)
            }
            PingOutcome::Unreachable { loss_pct } => {
                history.latency.push(0.0);
                history.loss.push(*loss_pct);
                (None, None, Vec::new())
            }
        };

        let trend = (history.latency.len() > MIN_TREND_SAMPLES).then(|| Trend {
            avg_latency_ms: history.latency.mean().unwrap_or_default(),
            max_latency_ms: history.latency.max().unwrap_or_default(),
            avg_loss_pct: history.loss.mean().unwrap_or_default(),
        });

        TargetReport {
            name: target.name.clone(),
            address: target.address.clone(),
            outcome,
            score,
            band,
            alerts,
            trend,
        }
    }
}
