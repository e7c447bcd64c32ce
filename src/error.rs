// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for chaos operations and backend commands

use std::fmt;
use thiserror::Error;

/// Failure of a single backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("could not run `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

/// Which step of an apply was running when the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    ClearBeforeApply,
    Shape,
    Protect,
    DropAll,
    EnableForwarding,
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApplyStage::ClearBeforeApply => "clearing previous rules",
            ApplyStage::Shape => "applying shaping rules",
            ApplyStage::Protect => "installing the SSH/management allow-list",
            ApplyStage::DropAll => "installing the drop-all rules",
            ApplyStage::EnableForwarding => "enabling IP forwarding",
        };
        f.write_str(label)
    }
}

/// What the compensating clear did after a failed destructive step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    NotAttempted,
    Completed,
    Failed(String),
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rollback::NotAttempted => f.write_str("no rollback needed"),
            Rollback::Completed => f.write_str("rolled back to baseline"),
            Rollback::Failed(reason) => write!(f, "rollback failed: {}", reason),
        }
    }
}

/// Distinguishable outcomes the shell can explain to the operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChaosError {
    #[error("backend failed while {stage}: {source} ({rollback})")]
    AdapterCommandFailed {
        stage: ApplyStage,
        #[source]
        source: BackendError,
        rollback: Rollback,
    },

    #[error("scope unavailable: {reason}")]
    ScopeUnavailable { reason: String },

    #[error("'{preset}' drops all traffic and needs explicit confirmation")]
    ConfirmationRequired { preset: String },

    #[error("invalid target address '{input}' (expected IPv4 a.b.c.d, octets 0-255)")]
    InvalidTarget { input: String },

    #[error("no preset matches '{selector}'")]
    UnknownPreset { selector: String },
}

impl ChaosError {
    /// Validation errors are raised before any backend call.
    pub fn is_validation(&self) -> bool {
        !matches!(self, ChaosError::AdapterCommandFailed { .. })
    }
}

/// Rejected catalog definitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog must contain at least a baseline and a total-outage preset")]
    TooShort,

    #[error("first preset '{0}' is not the baseline")]
    FirstNotBaseline(String),

    #[error("last preset '{0}' is not the total outage")]
    LastNotOutage(String),

    #[error("catalog has {0} baseline presets, expected exactly one")]
    BaselineCount(usize),

    #[error("catalog has {0} total-outage presets, expected exactly one")]
    OutageCount(usize),

    #[error("preset '{key}' asks for {pct}% packet loss, expected 0-100")]
    LossOutOfRange { key: String, pct: u8 },

    #[error("preset '{0}' sets jitter without latency")]
    JitterWithoutLatency(String),

    #[error("duplicate preset key '{0}'")]
    DuplicateKey(String),
}
