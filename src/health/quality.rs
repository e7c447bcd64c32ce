// SPDX-License-Identifier: PMPL-1.0-or-later

//! Connection quality scoring and alerting

use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 0-100: starts at 100, minus latency above 20 ms (max 30), 5 per
/// percent of loss, and jitter above 10 ms (max 20).
pub fn quality_score(latency_ms: f64, loss_pct: f64, jitter_ms: f64) -> f64 {
    let mut score = 100.0;
    if latency_ms > 20.0 {
        score -= ((latency_ms - 20.0) * 0.5).min(30.0);
    }
    score -= loss_pct * 5.0;
    if jitter_ms > 10.0 {
        score -= ((jitter_ms - 10.0) * 0.5).min(20.0);
    }
    score.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityBand {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            QualityBand::Excellent
        } else if score >= 70.0 {
            QualityBand::Good
        } else if score >= 50.0 {
            QualityBand::Fair
        } else if score >= 30.0 {
            QualityBand::Poor
        } else {
            QualityBand::Critical
        }
    }

    pub fn colored(&self) -> ColoredString {
        let label = self.to_string();
        match self {
            QualityBand::Excellent => label.green().bold(),
            QualityBand::Good => label.green(),
            QualityBand::Fair => label.yellow(),
            QualityBand::Poor => label.red(),
            QualityBand::Critical => label.red().bold(),
        }
    }
}

impl fmt::Display for QualityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QualityBand::Excellent => "EXCELLENT",
            QualityBand::Good => "GOOD",
            QualityBand::Fair => "FAIR",
            QualityBand::Poor => "POOR",
            QualityBand::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub latency_ms: f64,
    pub loss_pct: f64,
    pub jitter_ms: f64,
    pub min_score: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_ms: 100.0,
            loss_pct: 5.0,
            jitter_ms: 50.0,
            min_score: 70.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Alert {
    HighLatency(f64),
    PacketLoss(f64),
    HighJitter(f64),
    PoorQuality(f64),
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::HighLatency(ms) => write!(f, "HIGH LATENCY ({:.0}ms)", ms),
            Alert::PacketLoss(pct) => write!(f, "PACKET LOSS ({:.0}%)", pct),
            Alert::HighJitter(ms) => write!(f, "HIGH JITTER ({:.0}ms)", ms),
            Alert::PoorQuality(score) => write!(f, "POOR QUALITY ({:.0}/100)", score),
        }
    }
}

impl AlertThresholds {
    /// Strictly-greater comparisons; a value at the threshold is fine.
    pub fn evaluate(&self, latency_ms: f64, loss_pct: f64, jitter_ms: f64, score: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if latency_ms > self.latency_ms {
            alerts.push(Alert::HighLatency(latency_ms));
        }
        if loss_pct > self.loss_pct {
            alerts.push(Alert::PacketLoss(loss_pct));
        }
        if jitter_ms > self.jitter_ms {
            alerts.push(Alert::HighJitter(jitter_ms));
        }
        if score < self.min_score {
            alerts.push(Alert::PoorQuality(score));
        }
        alerts
    }
}
