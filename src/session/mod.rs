// SPDX-License-Identifier: PMPL-1.0-or-later

//! Interactive shell
//!
//! The shell is the only reader of operator input. When the deadman
//! switch opens a grace window, the next line typed is routed to it as
//! the continue/stop answer instead of being treated as a command.

pub mod menu;

use crate::backend::Backend;
use crate::controller::{self, ApplyReport, SharedController};
use crate::deadman::{DeadmanSwitch, GraceResponse};
use crate::error::ChaosError;
use crate::types::{ChaosPhase, ScopeKind};
use anyhow::Result;
use colored::*;
use crossterm::{
    cursor, queue,
    terminal::{self, ClearType},
};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The phrase an operator must type before a total outage.
pub const CONFIRMATION_PHRASE: &str = "YES I AM SURE";
pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(3);

pub struct Session<B: Backend, R: BufRead, W: Write> {
    controller: SharedController<B>,
    deadman: Option<Arc<DeadmanSwitch>>,
    input: R,
    output: W,
    countdown: Duration,
    clear_screen: bool,
}

impl<B: Backend + 'static, R: BufRead, W: Write> Session<B, R, W> {
    pub fn new(controller: SharedController<B>, input: R, output: W) -> Self {
        Self {
            controller,
            deadman: None,
            input,
            output,
            countdown: DEFAULT_COUNTDOWN,
            clear_screen: false,
        }
    }

    pub fn with_deadman(mut self, deadman: Arc<DeadmanSwitch>) -> Self {
        self.deadman = Some(deadman);
        self
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// Clear the terminal before each menu (interactive terminals only).
    pub fn with_clear_screen(mut self, clear: bool) -> Self {
        self.clear_screen = clear;
        self
    }

    /// Run until `q` or end of input. Always leaves the network clear.
    pub fn run(&mut self) -> Result<()> {
        if let Some(deadman) = &self.deadman {
            deadman.start();
        }
        let result = self.run_loop();
        writeln!(self.output, "\nExiting and cleaning up...")?;
        self.clear();
        if let Some(deadman) = &self.deadman {
            deadman.stop();
        }
        self.output.flush()?;
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        self.show_menu()?;
        loop {
            write!(self.output, "\nEnter your choice: ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                return Ok(());
            };
            if self.answer_grace_prompt(&line) {
                continue;
            }
            if let Some(deadman) = &self.deadman {
                deadman.reset();
            }

            let choice = line.trim().to_lowercase();
            match choice.as_str() {
                "" => self.show_menu()?,
                "q" | "quit" | "exit" => return Ok(()),
                "s" => self.show_status()?,
                "c" => self.clear(),
                "d" => self.show_backend_status()?,
                "o" => self.choose_scope()?,
                "t" => self.choose_target()?,
                "i" => self.choose_interface()?,
                "m" | "?" | "h" => self.show_menu()?,
                selector => self.apply_selector(selector)?,
            }
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Prompted read; `None` on end of input.
    fn prompt(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        self.read_line()
    }

    fn answer_grace_prompt(&mut self, line: &str) -> bool {
        let Some(deadman) = &self.deadman else {
            return false;
        };
        let responder = deadman.responder();
        if !responder.awaiting() {
            return false;
        }
        responder.respond(GraceResponse::from_answer(line))
    }

    fn show_menu(&mut self) -> Result<()> {
        if self.clear_screen {
            queue!(self.output, terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
        }
        let ctl = controller::lock(&self.controller);
        menu::render_menu(&mut self.output, ctl.catalog(), &ctl.status())?;
        Ok(())
    }

    fn show_status(&mut self) -> Result<()> {
        let status = controller::lock(&self.controller).status();
        menu::render_status(&mut self.output, &status)?;
        Ok(())
    }

    fn show_backend_status(&mut self) -> Result<()> {
        let (interface, dump) = {
            let mut ctl = controller::lock(&self.controller);
            let dump = ctl.backend_status();
            (ctl.resolve_interface(), dump)
        };
        writeln!(self.output, "\nCurrent rules on {}:", interface.cyan())?;
        writeln!(self.output, "{}", "=".repeat(60))?;
        writeln!(self.output, "{}", dump.trim_end())?;
        writeln!(self.output, "{}", "=".repeat(60))?;
        Ok(())
    }

    fn clear(&mut self) {
        let report = controller::lock(&self.controller).clear();
        let _ = match &report.error {
            None => writeln!(
                self.output,
                "{} Network restored to normal on {}",
                "OK".green().bold(),
                report.interface
            ),
            Some(err) => writeln!(
                self.output,
                "{} clearing {}: {}",
                "FAILED".red().bold(),
                report.interface,
                err
            ),
        };
    }

    fn choose_scope(&mut self) -> Result<()> {
        menu::render_scope_menu(&mut self.output)?;
        let Some(choice) = self.prompt("Enter choice: ")? else {
            return Ok(());
        };
        match choice.trim() {
            "1" => self.set_scope(ScopeKind::Local, None),
            "2" => self.choose_network_scope(),
            "3" => self.choose_target(),
            other => {
                writeln!(self.output, "{} '{}'", "Invalid scope choice".red(), other)?;
                Ok(())
            }
        }
    }

    fn choose_network_scope(&mut self) -> Result<()> {
        let result = controller::lock(&self.controller).set_scope(ScopeKind::NetworkWide, None);
        let Err(err) = result else {
            writeln!(self.output, "Scope set to: {}", "entire network".cyan())?;
            return Ok(());
        };
        writeln!(self.output, "{} {}", "!".yellow(), err)?;
        let answer = self.prompt("Enable IP forwarding now? (Y/N): ")?;
        if answer.map(|a| GraceResponse::from_answer(&a)) != Some(GraceResponse::Continue) {
            writeln!(self.output, "Falling back to local scope.")?;
            return Ok(());
        }
        let enabled = controller::lock(&self.controller).enable_gateway();
        match enabled {
            Ok(()) => self.set_scope(ScopeKind::NetworkWide, None),
            Err(err) => {
                writeln!(self.output, "{} {}", "Gateway mode failed:".red(), err)?;
                Ok(())
            }
        }
    }

    fn choose_target(&mut self) -> Result<()> {
        let Some(ip) = self.prompt("Enter target IP address (empty for all traffic): ")? else {
            return Ok(());
        };
        if ip.trim().is_empty() {
            return self.set_scope(ScopeKind::Local, None);
        }
        self.set_scope(ScopeKind::Targeted, Some(ip.trim()))
    }

    fn set_scope(&mut self, kind: ScopeKind, target: Option<&str>) -> Result<()> {
        let result = controller::lock(&self.controller).set_scope(kind, target);
        match result {
            Ok(scope) => writeln!(self.output, "Scope set to: {}", scope.to_string().cyan())?,
            Err(err) => writeln!(self.output, "{} {}", "Error:".red().bold(), err)?,
        }
        Ok(())
    }

    fn choose_interface(&mut self) -> Result<()> {
        let Some(name) = self.prompt("Enter network interface name: ")? else {
            return Ok(());
        };
        if !name.trim().is_empty() {
            controller::lock(&self.controller).set_interface(&name);
            writeln!(self.output, "Interface set to: {}", name.trim().cyan())?;
        }
        Ok(())
    }

    fn apply_selector(&mut self, selector: &str) -> Result<()> {
        let profile = {
            let ctl = controller::lock(&self.controller);
            ctl.catalog().find(selector).cloned()
        };
        let profile = match profile {
            Ok(profile) => profile,
            Err(err) => {
                writeln!(self.output, "{} {}", "Invalid choice:".red(), err)?;
                return Ok(());
            }
        };

        let confirmed = if profile.phase() == ChaosPhase::TotalOutage {
            if !self.confirm_outage(&profile.name)? {
                writeln!(self.output, "Aborted. Network left as it was.")?;
                return Ok(());
            }
            true
        } else {
            false
        };

        writeln!(self.output, "\nEntering {}...", profile.name.bold())?;
        let result = controller::lock(&self.controller).apply_preset(&profile.key, confirmed);
        match result {
            Ok(report) => {
                self.print_report(&report)?;
                if let Some(deadman) = &self.deadman {
                    // Re-arms after an earlier expiry; no-op while running.
                    deadman.start();
                }
            }
            Err(err) => self.print_error(&err)?,
        }
        Ok(())
    }

    fn confirm_outage(&mut self, name: &str) -> Result<bool> {
        writeln!(
            self.output,
            "\n{}",
            format!("{} drops ALL traffic in the selected scope.", name)
                .red()
                .bold()
        )?;
        writeln!(
            self.output,
            "SSH (port 22) and your management address stay reachable while protection is on."
        )?;
        let prompt = format!("Type '{}' to continue: ", CONFIRMATION_PHRASE);
        let Some(answer) = self.prompt(&prompt)? else {
            return Ok(false);
        };
        if answer.trim() != CONFIRMATION_PHRASE {
            return Ok(false);
        }
        let seconds = self.countdown.as_secs();
        if seconds > 0 {
            write!(self.output, "Ctrl-C aborts. Total outage in")?;
            for left in (1..=seconds).rev() {
                write!(self.output, " {}...", left)?;
                self.output.flush()?;
                thread::sleep(Duration::from_secs(1));
            }
            writeln!(self.output)?;
        }
        Ok(true)
    }

    fn print_report(&mut self, report: &ApplyReport) -> Result<()> {
        let profile = &report.profile;
        if profile.is_baseline() {
            writeln!(self.output, "{} Peace restored on {}", "OK".green().bold(), report.interface)?;
            return Ok(());
        }
        writeln!(
            self.output,
            "{} {} on {} ({})",
            "ACTIVE".yellow().bold(),
            profile.summary(),
            report.interface,
            report.scope
        )?;
        if !profile.description.is_empty() {
            writeln!(self.output, "   {}", profile.description.dimmed())?;
        }
        for address in &report.protected {
            writeln!(self.output, "   protected: {}", address)?;
        }
        for warning in &report.warnings {
            writeln!(self.output, "   {} {}", "warning:".yellow(), warning)?;
        }
        Ok(())
    }

    fn print_error(&mut self, err: &ChaosError) -> Result<()> {
        writeln!(self.output, "{} {}", "Error:".red().bold(), err)?;
        if let ChaosError::ConfirmationRequired { .. } = err {
            writeln!(self.output, "   type '{}' when asked", CONFIRMATION_PHRASE)?;
        }
        Ok(())
    }
}
