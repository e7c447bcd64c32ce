// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions for ruckus
//!
//! Profiles, scopes and the status snapshot shared by the controller,
//! the interactive session and the CLI.

use crate::error::ChaosError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// A named bundle of disruption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisruptionProfile {
    /// Short selector used on the command line (`--level venoms`).
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub latency_ms: u32,
    /// Only meaningful when `latency_ms > 0`.
    #[serde(default)]
    pub jitter_ms: u32,
    #[serde(default)]
    pub packet_loss_pct: u8,
    /// `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_kbps: Option<u32>,
}

impl DisruptionProfile {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            description: String::new(),
            latency_ms: 0,
            jitter_ms: 0,
            packet_loss_pct: 0,
            bandwidth_kbps: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_latency(mut self, latency_ms: u32, jitter_ms: u32) -> Self {
        self.latency_ms = latency_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_loss(mut self, packet_loss_pct: u8) -> Self {
        self.packet_loss_pct = packet_loss_pct.min(100);
        self
    }

    pub fn with_bandwidth(mut self, bandwidth_kbps: u32) -> Self {
        self.bandwidth_kbps = if bandwidth_kbps == 0 {
            None
        } else {
            Some(bandwidth_kbps)
        };
        self
    }

    /// The "no disruption" profile: every parameter zero, no cap.
    pub fn is_baseline(&self) -> bool {
        self.latency_ms == 0
            && self.jitter_ms == 0
            && self.packet_loss_pct == 0
            && self.bandwidth_kbps.is_none()
    }

    pub fn is_total_outage(&self) -> bool {
        self.packet_loss_pct == 100
    }

    pub fn phase(&self) -> ChaosPhase {
        if self.is_baseline() {
            ChaosPhase::Baseline
        } else if self.is_total_outage() {
            ChaosPhase::TotalOutage
        } else {
            ChaosPhase::Disrupted
        }
    }

    /// One-line parameter summary, e.g. `300ms ±50ms, 8% loss, 2000 kbps`.
    pub fn summary(&self) -> String {
        if self.is_baseline() {
            return "no disruption".to_string();
        }
        if self.is_total_outage() {
            return "100% loss (total outage)".to_string();
        }
        let mut parts = Vec::new();
        if self.latency_ms > 0 {
            if self.jitter_ms > 0 {
                parts.push(format!("{}ms ±{}ms", self.latency_ms, self.jitter_ms));
            } else {
                parts.push(format!("{}ms", self.latency_ms));
            }
        }
        if self.packet_loss_pct > 0 {
            parts.push(format!("{}% loss", self.packet_loss_pct));
        }
        if let Some(kbps) = self.bandwidth_kbps {
            parts.push(format!("{} kbps", kbps));
        }
        parts.join(", ")
    }
}

/// Derived controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosPhase {
    Baseline,
    Disrupted,
    TotalOutage,
}

/// Scope selector without its target; what callers ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Local,
    NetworkWide,
    Targeted,
}

/// Breadth of traffic affected by a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Local,
    NetworkWide,
    Targeted(Ipv4Addr),
}

impl Scope {
    /// Resolve a scope request, validating the target for `Targeted`.
    pub fn resolve(kind: ScopeKind, target: Option<&str>) -> Result<Self, ChaosError> {
        match kind {
            ScopeKind::Local => Ok(Scope::Local),
            ScopeKind::NetworkWide => Ok(Scope::NetworkWide),
            ScopeKind::Targeted => {
                let raw = target.unwrap_or("");
                parse_target(raw).map(Scope::Targeted)
            }
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Local => ScopeKind::Local,
            Scope::NetworkWide => ScopeKind::NetworkWide,
            Scope::Targeted(_) => ScopeKind::Targeted,
        }
    }

    pub fn target(&self) -> Option<Ipv4Addr> {
        match self {
            Scope::Targeted(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Local => write!(f, "local device only"),
            Scope::NetworkWide => write!(f, "entire network (gateway mode)"),
            Scope::Targeted(addr) => write!(f, "targeted {}", addr),
        }
    }
}

/// Strict dotted-quad IPv4 parsing: four decimal octets, each 0-255.
pub fn parse_target(input: &str) -> Result<Ipv4Addr, ChaosError> {
    let invalid = || ChaosError::InvalidTarget {
        input: input.to_string(),
    };
    let trimmed = input.trim();
    let octets: Vec<&str> = trimmed.split('.').collect();
    if octets.len() != 4 {
        return Err(invalid());
    }
    let mut parsed = [0u8; 4];
    for (slot, octet) in parsed.iter_mut().zip(&octets) {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u16 = octet.parse().map_err(|_| invalid())?;
        if value > 255 {
            return Err(invalid());
        }
        *slot = value as u8;
    }
    Ok(Ipv4Addr::from(parsed))
}

/// Which facility does the packet manipulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Netem,
    Iptables,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Netem => write!(f, "tc/netem"),
            BackendKind::Iptables => write!(f, "iptables"),
        }
    }
}

/// Point-in-time view of the controller for the shell and `--json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub captured_at: String,
    pub backend: BackendKind,
    pub profile_key: String,
    pub profile_name: String,
    pub phase: ChaosPhase,
    pub is_active: bool,
    pub scope: ScopeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub ssh_protection: bool,
    pub protected_addresses: Vec<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadman_remaining_secs: Option<u64>,
    pub deadman_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_fault: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing_accepts_dotted_quads() {
        assert_eq!(
            parse_target("10.0.0.5").expect("valid target"),
            Ipv4Addr::new(10, 0, 0, 5)
        );
        assert_eq!(
            parse_target(" 255.255.255.0 ").expect("valid target"),
            Ipv4Addr::new(255, 255, 255, 0)
        );
    }

    #[test]
    fn target_parsing_rejects_malformed_input() {
        for bad in ["999.1.1.1", "1.2.3", "1.2.3.4.5", "a.b.c.d", "", "1..2.3", "-1.2.3.4", "1.2.3.4/24"] {
            assert!(
                matches!(parse_target(bad), Err(ChaosError::InvalidTarget { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn targeted_scope_requires_a_target() {
        assert!(Scope::resolve(ScopeKind::Targeted, None).is_err());
        assert_eq!(
            Scope::resolve(ScopeKind::Local, Some("garbage")).expect("local ignores target"),
            Scope::Local
        );
    }

    #[test]
    fn phase_is_derived_from_parameters() {
        let peace = DisruptionProfile::new("peace", "Peace");
        let venoms = DisruptionProfile::new("venoms", "Venoms")
            .with_latency(300, 50)
            .with_loss(8);
        let shaolin = DisruptionProfile::new("shaolin", "Shaolin").with_loss(100);
        assert_eq!(peace.phase(), ChaosPhase::Baseline);
        assert_eq!(venoms.phase(), ChaosPhase::Disrupted);
        assert_eq!(shaolin.phase(), ChaosPhase::TotalOutage);
        assert_eq!(venoms.summary(), "300ms ±50ms, 8% loss");
    }

    #[test]
    fn zero_bandwidth_means_unlimited() {
        let profile = DisruptionProfile::new("x", "X").with_bandwidth(0);
        assert_eq!(profile.bandwidth_kbps, None);
    }
}
