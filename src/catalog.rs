// SPDX-License-Identifier: PMPL-1.0-or-later

//! The 36 Chambers: ordered, fixed disruption presets.
//!
//! Every catalog starts with the baseline ("peace") and ends with the
//! total outage ("shaolin"). The netem catalog shapes latency, jitter,
//! loss and bandwidth; the iptables catalog only drops packets.

use crate::error::{CatalogError, ChaosError};
use crate::types::{BackendKind, DisruptionProfile};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    presets: Vec<DisruptionProfile>,
}

impl Catalog {
    /// Build a catalog, enforcing the baseline-first / outage-last layout.
    pub fn new(presets: Vec<DisruptionProfile>) -> Result<Self, CatalogError> {
        if presets.len() < 2 {
            return Err(CatalogError::TooShort);
        }
        for preset in &presets {
            if preset.packet_loss_pct > 100 {
                return Err(CatalogError::LossOutOfRange {
                    key: preset.key.clone(),
                    pct: preset.packet_loss_pct,
                });
            }
            // netem ignores jitter without a base delay, leaving nothing installed
            if preset.jitter_ms > 0 && preset.latency_ms == 0 {
                return Err(CatalogError::JitterWithoutLatency(preset.key.clone()));
            }
        }
        let baselines = presets.iter().filter(|p| p.is_baseline()).count();
        if baselines != 1 {
            return Err(CatalogError::BaselineCount(baselines));
        }
        let outages = presets.iter().filter(|p| p.is_total_outage()).count();
        if outages != 1 {
            return Err(CatalogError::OutageCount(outages));
        }
        let first = &presets[0];
        if !first.is_baseline() {
            return Err(CatalogError::FirstNotBaseline(first.key.clone()));
        }
        let last = &presets[presets.len() - 1];
        if !last.is_total_outage() {
            return Err(CatalogError::LastNotOutage(last.key.clone()));
        }
        let mut seen = HashSet::new();
        for preset in &presets {
            if !seen.insert(preset.key.to_lowercase()) {
                return Err(CatalogError::DuplicateKey(preset.key.clone()));
            }
        }
        Ok(Self { presets })
    }

    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Netem => Self::standard(),
            BackendKind::Iptables => Self::loss_only(),
        }
    }

    /// Full shaping ladder for tc/netem hosts.
    pub fn standard() -> Self {
        Self {
            presets: vec![
                peace(),
                DisruptionProfile::new("swarm", "Chamber 1: The Swarm (Light Disruption)")
                    .with_description("Noticeable but survivable degradation")
                    .with_latency(50, 10)
                    .with_loss(1)
                    .with_bandwidth(50_000),
                DisruptionProfile::new("mystery", "Chamber 9: The Mystery (Moderate Chaos)")
                    .with_description("Streams start stuttering")
                    .with_latency(150, 25)
                    .with_loss(3)
                    .with_bandwidth(10_000),
                DisruptionProfile::new("venoms", "Chamber 18: The Deadly Venoms (Heavy Ruckus)")
                    .with_description("Severe quality issues")
                    .with_latency(300, 50)
                    .with_loss(8)
                    .with_bandwidth(2_000),
                DisruptionProfile::new("swords", "Chamber 36: Liquid Swords (Extreme Chaos)")
                    .with_description("Connection barely usable")
                    .with_latency(500, 100)
                    .with_loss(15)
                    .with_bandwidth(512),
                shaolin(),
            ],
        }
    }

    /// Packet-loss-only ladder for hosts without the netem module.
    pub fn loss_only() -> Self {
        Self {
            presets: vec![
                peace(),
                DisruptionProfile::new("swarm", "The Swarm (Minor Disruption)")
                    .with_description("1% packet loss - annoying but survivable")
                    .with_loss(1),
                DisruptionProfile::new("mystery", "The Mystery (Moderate Chaos)")
                    .with_description("9% packet loss - streams start stuttering")
                    .with_loss(9),
                DisruptionProfile::new("venoms", "The 5 Deadly Venoms (Serious Degradation)")
                    .with_description("18% packet loss - severe quality issues")
                    .with_loss(18),
                DisruptionProfile::new("swords", "The 36 Swords (Heavy Chaos)")
                    .with_description("36% packet loss - connection barely usable")
                    .with_loss(36),
                shaolin(),
            ],
        }
    }

    pub fn presets(&self) -> &[DisruptionProfile] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DisruptionProfile> {
        self.presets.get(index)
    }

    pub fn baseline(&self) -> &DisruptionProfile {
        &self.presets[0]
    }

    pub fn total_outage(&self) -> &DisruptionProfile {
        &self.presets[self.presets.len() - 1]
    }

    /// Look up by catalog index (`"3"`) or key (`"venoms"`, case-insensitive).
    pub fn find(&self, selector: &str) -> Result<&DisruptionProfile, ChaosError> {
        let selector = selector.trim();
        let found = match selector.parse::<usize>() {
            Ok(index) => self.get(index),
            Err(_) => self
                .presets
                .iter()
                .find(|p| p.key.eq_ignore_ascii_case(selector)),
        };
        found.ok_or_else(|| ChaosError::UnknownPreset {
            selector: selector.to_string(),
        })
    }

}

fn peace() -> DisruptionProfile {
    DisruptionProfile::new("peace", "Chamber 0: Peace (Normal Network)")
        .with_description("Restore harmony to the network")
}

fn shaolin() -> DisruptionProfile {
    DisruptionProfile::new("shaolin", "Shaolin Shadow: Total Darkness (Complete Outage)")
        .with_description("100% packet loss - total network failure (SSH protected)")
        .with_loss(100)
}
