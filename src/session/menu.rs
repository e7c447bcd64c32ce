// SPDX-License-Identifier: PMPL-1.0-or-later

//! Menu, status and deadman notices for the interactive shell

use crate::catalog::Catalog;
use crate::deadman::{DeadmanEvent, ExpiryReason};
use crate::types::{ChaosPhase, ScopeKind, StatusSnapshot};
use colored::*;
use std::io::{self, Write};

const RULE_WIDTH: usize = 72;

pub fn render_menu(out: &mut impl Write, catalog: &Catalog, status: &StatusSnapshot) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(
        out,
        "{}",
        "              BRING DA RUCKUS - 36 Chambers of Chaos".bold().yellow()
    )?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(
        out,
        "Backend: {}   Scope: {}   Level: {}",
        status.backend.to_string().cyan(),
        scope_label(status).cyan(),
        level_label(status)
    )?;
    writeln!(out)?;
    writeln!(out, "{}", "Select your chamber:".bold())?;
    for (idx, preset) in catalog.presets().iter().enumerate() {
        let marker = if preset.key == status.profile_key { "*" } else { " " };
        writeln!(
            out,
            " {}{:>2}. {:<9} {}  {}",
            marker,
            idx,
            preset.key,
            preset.name,
            preset.summary().dimmed()
        )?;
    }
    writeln!(out)?;
    writeln!(out, "{}", "Commands:".bold())?;
    writeln!(out, "  o - set scope (local / network / targeted)")?;
    writeln!(out, "  t - set target IP (empty for all traffic)")?;
    writeln!(out, "  i - set network interface")?;
    writeln!(out, "  s - show status")?;
    writeln!(out, "  c - clear all ruckus")?;
    writeln!(out, "  d - show backend rules")?;
    writeln!(out, "  q - quit and clean up")?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    Ok(())
}

pub fn render_scope_menu(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Select scope:")?;
    writeln!(out, "  [1] Local device only (default)")?;
    writeln!(out, "  [2] Entire network (requires gateway mode)")?;
    writeln!(out, "  [3] Targeted IP address")?;
    Ok(())
}

pub fn render_status(out: &mut impl Write, status: &StatusSnapshot) -> io::Result<()> {
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out, "{}", "RUCKUS STATUS".bold())?;
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(out, "Current level:   {}", status.profile_name)?;
    writeln!(out, "Active:          {}", level_label(status))?;
    writeln!(
        out,
        "Interface:       {}",
        status.interface.as_deref().unwrap_or("auto-detect")
    )?;
    writeln!(out, "Scope:           {}", scope_label(status))?;
    writeln!(out, "Backend:         {}", status.backend)?;
    writeln!(
        out,
        "SSH protection:  {}",
        if status.ssh_protection { "on" } else { "OFF" }
    )?;
    if !status.protected_addresses.is_empty() {
        let addresses: Vec<String> = status
            .protected_addresses
            .iter()
            .map(ToString::to_string)
            .collect();
        writeln!(out, "Management:      {}", addresses.join(", "))?;
    }
    writeln!(out, "Deadman timeout: {} minutes", status.deadman_timeout_secs / 60)?;
    match status.deadman_remaining_secs {
        Some(left) => writeln!(out, "Deadman fires:   in {}m {:02}s", left / 60, left % 60)?,
        None => writeln!(out, "Deadman fires:   {}", "not armed".yellow())?,
    }
    if let Some(fault) = &status.monitor_fault {
        writeln!(out, "Monitor fault:   {}", fault.red())?;
    }
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    Ok(())
}

fn scope_label(status: &StatusSnapshot) -> String {
    match (status.scope, status.target) {
        (ScopeKind::Targeted, Some(target)) => format!("targeted {}", target),
        (ScopeKind::NetworkWide, _) => "entire network".to_string(),
        _ => "local device".to_string(),
    }
}

fn level_label(status: &StatusSnapshot) -> ColoredString {
    match status.phase {
        ChaosPhase::Baseline => "peace".green(),
        ChaosPhase::Disrupted => status.profile_key.as_str().yellow().bold(),
        ChaosPhase::TotalOutage => "TOTAL OUTAGE".red().bold(),
    }
}

/// Deadman notices for the terminal. Runs on the monitor thread.
pub fn announce(event: &DeadmanEvent) {
    let mut out = io::stdout();
    let _ = write_event(&mut out, event);
    let _ = out.flush();
}

pub fn write_event(out: &mut impl Write, event: &DeadmanEvent) -> io::Result<()> {
    match event {
        DeadmanEvent::Armed { timeout } => writeln!(
            out,
            "Deadman's switch armed: {} minutes of inactivity restores the network.",
            timeout.as_secs() / 60
        ),
        DeadmanEvent::Warning { remaining } => writeln!(
            out,
            "\n\n{}",
            format!(
                "WARNING: Deadman's switch will trigger in {} seconds!",
                remaining.as_secs()
            )
            .yellow()
            .bold()
        ),
        DeadmanEvent::GraceOpened { window } => write!(
            out,
            "Continue testing? (Y/N, {}s to answer): ",
            window.as_secs()
        ),
        DeadmanEvent::Continued => writeln!(out, "{}", "Timer reset. Continuing.".green()),
        DeadmanEvent::Expired { reason } => {
            let why = match reason {
                ExpiryReason::Timeout => "inactivity timeout",
                ExpiryReason::OperatorStop => "operator asked to stop",
                ExpiryReason::NoResponse => "no response",
            };
            writeln!(
                out,
                "\n{}",
                format!("EMERGENCY STOP ({}): clearing all ruckus", why)
                    .red()
                    .bold()
            )
        }
        DeadmanEvent::Fault { message } => writeln!(
            out,
            "{}",
            format!("Deadman monitor fault: {}", message).red()
        ),
        DeadmanEvent::Disarmed => Ok(()),
    }
}
