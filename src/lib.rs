// SPDX-License-Identifier: PMPL-1.0-or-later

//! ruckus: controlled network chaos with a deadman's switch.
//!
//! Injects latency, jitter, packet loss, bandwidth caps or a total outage
//! on a Linux host through tc/netem or iptables, and reverts everything
//! automatically when the operator stops interacting.
//!
//! PIECES:
//! 1. **Backend**: the only code that formats `tc`/`iptables` commands.
//! 2. **Controller**: validates and sequences apply/clear, keeps SSH
//!    reachable during a total outage.
//! 3. **Deadman**: monitor thread that clears chaos after inactivity.
//! 4. **Session**: the interactive menu; sole owner of operator input.
//! 5. **Health**: ping/bandwidth dashboard for watching the effect.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod deadman;
pub mod error;
pub mod health;
pub mod netinfo;
pub mod privilege;
pub mod session;
pub mod types;
