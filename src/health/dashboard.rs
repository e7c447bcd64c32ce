// SPDX-License-Identifier: PMPL-1.0-or-later

//! Full-screen health dashboard

use super::{HealthMonitor, HealthReport, PingOutcome};
use anyhow::Result;
use colored::*;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute, queue,
    terminal::{self, ClearType},
};
use std::io::{stdout, Write};
use std::time::{Duration, Instant};

pub struct Dashboard;

impl Dashboard {
    /// Refresh every `interval` until `q`, Esc or Ctrl-C.
    pub fn run(monitor: &mut HealthMonitor, interval: Duration) -> Result<()> {
        let mut out = stdout();
        terminal::enable_raw_mode()?;
        execute!(out, terminal::EnterAlternateScreen, cursor::Hide)?;
        let result = Self::run_inner(&mut out, monitor, interval);
        execute!(out, cursor::Show, terminal::LeaveAlternateScreen)?;
        terminal::disable_raw_mode()?;
        result
    }

    fn run_inner(out: &mut impl Write, monitor: &mut HealthMonitor, interval: Duration) -> Result<()> {
        loop {
            let report = monitor.sample();
            queue!(out, terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
            let mut frame = Vec::new();
            render(&mut frame, &report)?;
            // Raw mode does not translate \n into a carriage return.
            let text = String::from_utf8_lossy(&frame).replace('\n', "\r\n");
            out.write_all(text.as_bytes())?;
            out.flush()?;

            let deadline = Instant::now() + interval;
            while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                if !event::poll(left)? {
                    break;
                }
                if let Event::Key(KeyEvent { code, modifiers, .. }) = event::read()? {
                    match code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                            return Ok(())
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

pub fn render(out: &mut impl Write, report: &HealthReport) -> std::io::Result<()> {
    writeln!(out, "{}", "=".repeat(72))?;
    writeln!(
        out,
        "{}   {}",
        "MONITOR THE RUCKUS - Network Health".bold().cyan(),
        report.captured_at.dimmed()
    )?;
    writeln!(out, "{}", "=".repeat(72))?;
    writeln!(out, "Interface: {}", report.interface.cyan())?;

    match (&report.counters, &report.bandwidth) {
        (Some(counters), Some(bandwidth)) => {
            writeln!(
                out,
                "Bandwidth: down {:.2} Mbps  up {:.2} Mbps  total {:.2} Mbps",
                bandwidth.current.download_mbps,
                bandwidth.current.upload_mbps,
                bandwidth.current.total_mbps()
            )?;
            if let (Some(avg), Some(peak)) = (bandwidth.average_mbps, bandwidth.peak_mbps) {
                writeln!(out, "           avg {:.2} Mbps  peak {:.2} Mbps", avg, peak)?;
            }
            writeln!(
                out,
                "Errors:    rx {} / tx {}   Dropped: rx {} / tx {}",
                counters.rx_errors, counters.tx_errors, counters.rx_dropped, counters.tx_dropped
            )?;
        }
        _ => writeln!(out, "Bandwidth: {}", "interface counters unavailable".yellow())?,
    }
    if let Some(retransmits) = &report.retransmits {
        writeln!(
            out,
            "TCP retransmits: {:.2}% ({} of {} segments)",
            retransmits.rate_pct(),
            retransmits.retransmitted,
            retransmits.sent
        )?;
    }

    for target in &report.targets {
        writeln!(out)?;
        writeln!(out, "{} ({})", target.name.bold(), target.address)?;
        match &target.outcome {
            PingOutcome::Reachable(stats) => {
                writeln!(
                    out,
                    "   latency {:.1} ms (min {:.1} / max {:.1})  jitter {:.1} ms  loss {:.0}%",
                    stats.avg_ms, stats.min_ms, stats.max_ms, stats.jitter_ms, stats.loss_pct
                )?;
            }
            PingOutcome::Unreachable { .. } => {
                writeln!(out, "   {}", "UNREACHABLE".red().bold())?;
            }
        }
        if let (Some(score), Some(band)) = (target.score, target.band) {
            writeln!(out, "   quality {:.0}/100 - {}", score, band.colored())?;
        }
        if let Some(trend) = &target.trend {
            writeln!(
                out,
                "   trend: avg {:.1} ms, max {:.1} ms, avg loss {:.1}%",
                trend.avg_latency_ms, trend.max_latency_ms, trend.avg_loss_pct
            )?;
        }
        if !target.alerts.is_empty() {
            let alerts: Vec<String> = target.alerts.iter().map(ToString::to_string).collect();
            writeln!(out, "   {} {}", "ALERTS:".red().bold(), alerts.join(", "))?;
        }
    }
    writeln!(out)?;
    writeln!(out, "{}", "[q] quit".dimmed())?;
    Ok(())
}
