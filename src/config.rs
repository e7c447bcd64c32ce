// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration file loading (`ruckus.yaml` / `ruckus.json`).

use crate::catalog::Catalog;
use crate::deadman::{DeadmanConfig, DEFAULT_GRACE_WINDOW, DEFAULT_WARNING_LEAD};
use crate::types::{BackendKind, DisruptionProfile};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuckusConfig {
    pub backend: BackendKind,
    pub interface: Option<String>,
    pub timeout_minutes: u64,
    pub ssh_protection: bool,
    pub management_addresses: Vec<IpAddr>,
    pub grace: bool,
    pub warning_lead_secs: u64,
    pub grace_window_secs: u64,
    /// Replaces the built-in catalog for the selected backend.
    pub presets: Option<Vec<DisruptionProfile>>,
    pub watch: WatchConfig,
}

impl Default for RuckusConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Netem,
            interface: None,
            timeout_minutes: 30,
            ssh_protection: true,
            management_addresses: Vec::new(),
            grace: true,
            warning_lead_secs: DEFAULT_WARNING_LEAD.as_secs(),
            grace_window_secs: DEFAULT_GRACE_WINDOW.as_secs(),
            presets: None,
            watch: WatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_secs: u64,
    pub ping_count: u32,
    pub targets: Vec<WatchTarget>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            ping_count: 5,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub name: String,
    pub address: String,
}

impl WatchTarget {
    /// `router=192.168.1.1`, or a bare address named after itself.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (name, address) = match spec.split_once('=') {
            Some((name, address)) => (name.trim(), address.trim()),
            None => (spec, spec),
        };
        if name.is_empty() || address.is_empty() {
            return Err(anyhow!("invalid watch target '{}': expected name=address", spec));
        }
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
        })
    }
}

impl RuckusConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parsing json config {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing yaml config {}", path.display()))?,
            _ => return Err(anyhow!("unsupported config extension for {}", path.display())),
        };
        config.validate()?;
        Ok(config)
    }

    /// File when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map(Self::load).unwrap_or_else(|| Ok(Self::default()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_minutes == 0 {
            return Err(anyhow!("timeout_minutes must be at least 1"));
        }
        if self.warning_lead_secs >= self.timeout_minutes.saturating_mul(60) {
            return Err(anyhow!(
                "warning_lead_secs ({}) must be shorter than the timeout",
                self.warning_lead_secs
            ));
        }
        if self.watch.interval_secs == 0 {
            return Err(anyhow!("watch.interval_secs must be at least 1"));
        }
        self.catalog().map(|_| ())
    }

    pub fn catalog(&self) -> Result<Catalog> {
        match &self.presets {
            Some(presets) => Catalog::new(presets.clone()).context("invalid custom presets"),
            None => Ok(Catalog::for_backend(self.backend)),
        }
    }

    pub fn deadman(&self) -> DeadmanConfig {
        let grace = self
            .grace
            .then(|| Duration::from_secs(self.grace_window_secs));
        DeadmanConfig::minutes(self.timeout_minutes)
            .with_warning_lead(Duration::from_secs(self.warning_lead_secs))
            .with_grace(grace)
    }
}
