// SPDX-License-Identifier: PMPL-1.0-or-later

//! ruckus: network chaos injection with a deadman's switch
//!
//! Interactive by default. `presets`, `status`, `clear` and `watch` are
//! one-shot subcommands.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use crossterm::tty::IsTty;
use ruckus::backend::{self, Backend, CommandRunner, RecordingRunner, SystemRunner};
use ruckus::catalog::Catalog;
use ruckus::config::{RuckusConfig, WatchTarget};
use ruckus::controller::{self, ChaosController, ProtectionSettings, SharedController};
use ruckus::deadman::DeadmanSwitch;
use ruckus::error::ChaosError;
use ruckus::health::{dashboard, HealthMonitor};
use ruckus::netinfo::{HostProbe, SystemProbe, FALLBACK_INTERFACE};
use ruckus::privilege;
use ruckus::session::{menu, Session};
use ruckus::types::{BackendKind, ScopeKind};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type DynController = ChaosController<Box<dyn Backend>>;

#[derive(Parser)]
#[command(name = "ruckus")]
#[command(version)]
#[command(about = "Network chaos injection with a deadman's switch")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    shell: ShellArgs,

    /// Network interface (default: auto-detect)
    #[arg(short, long, global = true)]
    interface: Option<String>,

    /// Packet manipulation backend
    #[arg(short, long, value_enum, global = true)]
    backend: Option<BackendArg>,

    /// Configuration file (.yaml, .yml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print backend commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chaos shell (default)
    Shell(ShellArgs),

    /// List the chaos presets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the rules currently installed
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove all chaos rules and exit
    Clear,

    /// Network health dashboard
    Watch {
        /// Target to ping, as name=ip (repeatable)
        #[arg(long = "target", value_name = "NAME=IP")]
        targets: Vec<String>,

        /// Seconds between samples
        #[arg(long)]
        interval: Option<u64>,

        /// Print a single sample and exit
        #[arg(long)]
        once: bool,

        /// With --once, output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Default)]
struct ShellArgs {
    /// Preset to apply at startup (key or number)
    #[arg(short, long)]
    level: Option<String>,

    /// Deadman's switch timeout in minutes (default: 30)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Only disrupt traffic to this IPv4 address
    #[arg(long)]
    target: Option<String>,

    /// Extra addresses kept reachable during a total outage
    #[arg(long, value_delimiter = ',')]
    management: Vec<IpAddr>,

    /// Do not protect SSH during a total outage
    #[arg(long)]
    no_ssh_protection: bool,

    /// Fire on timeout without asking to continue
    #[arg(long)]
    no_grace: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Netem,
    Iptables,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Netem => BackendKind::Netem,
            BackendArg::Iptables => BackendKind::Iptables,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = RuckusConfig::load_or_default(cli.config.as_deref())?;
    if let Some(kind) = cli.backend {
        config.backend = kind.into();
    }
    if cli.interface.is_some() {
        config.interface = cli.interface.clone();
    }
    let runner: Arc<dyn CommandRunner> = if cli.dry_run {
        Arc::new(RecordingRunner::echoing())
    } else {
        Arc::new(SystemRunner)
    };

    match cli.command {
        None => run_shell(config, cli.shell, runner, cli.dry_run),
        Some(Commands::Shell(args)) => run_shell(config, args, runner, cli.dry_run),
        Some(Commands::Presets { json }) => list_presets(&config.catalog()?, config.backend, json),
        Some(Commands::Status { json }) => show_status(&config, runner, json),
        Some(Commands::Clear) => clear_once(&config, runner, cli.dry_run),
        Some(Commands::Watch {
            targets,
            interval,
            once,
            json,
        }) => watch(config, runner, targets, interval, once, json),
    }
}

fn build_controller(config: &RuckusConfig, runner: Arc<dyn CommandRunner>) -> Result<DynController> {
    let protection = ProtectionSettings {
        ssh_protection: config.ssh_protection,
        management_addresses: config.management_addresses.clone(),
    };
    let mut controller = ChaosController::new(
        backend::build(config.backend, runner.clone()),
        config.catalog()?,
        protection,
        Box::new(SystemProbe::new(runner)),
    );
    if let Some(interface) = &config.interface {
        controller.set_interface(interface);
    }
    Ok(controller)
}

/// Refuse to mutate rules without root, but still try to clear first.
fn ensure_privileged(config: &RuckusConfig, runner: Arc<dyn CommandRunner>, dry_run: bool, action: &str) -> Result<()> {
    if dry_run || privilege::is_root() {
        return Ok(());
    }
    warn!("not running as root; attempting best-effort clear before exiting");
    if let Ok(mut controller) = build_controller(config, runner) {
        let _ = controller.clear();
    }
    privilege::require_root(action)
}

fn run_shell(mut config: RuckusConfig, args: ShellArgs, runner: Arc<dyn CommandRunner>, dry_run: bool) -> Result<()> {
    if let Some(minutes) = args.timeout {
        config.timeout_minutes = minutes;
    }
    if args.no_ssh_protection {
        config.ssh_protection = false;
    }
    if args.no_grace {
        config.grace = false;
    }
    for address in &args.management {
        if !config.management_addresses.contains(address) {
            config.management_addresses.push(*address);
        }
    }
    config.validate()?;
    ensure_privileged(&config, runner.clone(), dry_run, "the chaos shell")?;

    let controller = build_controller(&config, runner)?;
    controller
        .preflight()
        .with_context(|| format!("{} backend is not available on this host", config.backend))?;
    let shared = controller.into_shared();

    let deadman = Arc::new(
        DeadmanSwitch::new(config.deadman(), controller::emergency_clear(&shared))
            .with_observer(Arc::new(menu::announce)),
    );
    controller::lock(&shared).attach_clock(deadman.clock());
    install_signal_handler(shared.clone(), deadman.clone())?;

    print_banner(&config, &shared);
    startup_selection(&shared, &args)?;

    let stdin = io::stdin();
    let mut session = Session::new(shared, stdin.lock(), io::stdout())
        .with_deadman(deadman)
        .with_clear_screen(io::stdout().is_tty());
    session.run()
}

fn print_banner(config: &RuckusConfig, shared: &SharedController<Box<dyn Backend>>) {
    let interface = controller::lock(shared).resolve_interface();
    println!("{}", "Starting interactive mode...".bold());
    println!("Backend:   {}", config.backend.to_string().cyan());
    println!("Interface: {}", interface.cyan());
    println!("Deadman:   {} minutes", config.timeout_minutes);
    if !config.ssh_protection {
        println!("{}", "SSH protection is OFF: a total outage will drop this session".red().bold());
    }
}

fn startup_selection(shared: &SharedController<Box<dyn Backend>>, args: &ShellArgs) -> Result<()> {
    let mut ctl = controller::lock(shared);
    if let Some(target) = &args.target {
        let scope = ctl.set_scope(ScopeKind::Targeted, Some(target))?;
        println!("Scope:     {}", scope.to_string().cyan());
    }
    if let Some(level) = &args.level {
        match ctl.apply_preset(level, false) {
            Ok(report) => println!(
                "Level:     {} ({})",
                report.profile.name.bold(),
                report.profile.summary()
            ),
            Err(ChaosError::ConfirmationRequired { preset }) => println!(
                "{} {} must be confirmed from the menu",
                "!".yellow(),
                preset
            ),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Ctrl-C / SIGTERM: clear, disarm and exit.
fn install_signal_handler(shared: SharedController<Box<dyn Backend>>, deadman: Arc<DeadmanSwitch>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("registering signal handlers")?;
    std::thread::Builder::new()
        .name("ruckus-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                println!("\n\nInterrupted! Cleaning up...");
                info!(signal, "signal received");
                deadman.stop();
                let report = controller::lock(&shared).clear();
                let code = if report.is_clean() { 130 } else { 1 };
                std::process::exit(code);
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn list_presets(catalog: &Catalog, kind: BackendKind, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog.presets())?);
        return Ok(());
    }
    println!("{} ({})", "Chaos presets".bold(), kind);
    for (idx, preset) in catalog.presets().iter().enumerate() {
        println!("{:>3}. {:<9} {}", idx, preset.key.cyan(), preset.name);
        println!("     {}", preset.summary().dimmed());
    }
    Ok(())
}

fn show_status(config: &RuckusConfig, runner: Arc<dyn CommandRunner>, json: bool) -> Result<()> {
    let mut controller = build_controller(config, runner)?;
    let rules = controller.backend_status();
    let status = controller.status();
    if json {
        let value = serde_json::json!({ "status": status, "rules": rules });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!(
        "Rules on {} ({}):",
        status.interface.as_deref().unwrap_or(FALLBACK_INTERFACE).cyan(),
        status.backend
    );
    println!("{}", rules.trim_end());
    Ok(())
}

fn clear_once(config: &RuckusConfig, runner: Arc<dyn CommandRunner>, dry_run: bool) -> Result<()> {
    ensure_privileged(config, runner.clone(), dry_run, "clear")?;
    let mut controller = build_controller(config, runner)?;
    let report = controller.clear();
    match report.error {
        None => {
            println!("{} Network restored to normal on {}", "OK".green().bold(), report.interface);
            Ok(())
        }
        Some(err) => Err(anyhow!(err).context(format!("clearing rules on {}", report.interface))),
    }
}

fn watch(
    config: RuckusConfig,
    runner: Arc<dyn CommandRunner>,
    targets: Vec<String>,
    interval: Option<u64>,
    once: bool,
    json: bool,
) -> Result<()> {
    let mut watch_targets = config.watch.targets.clone();
    for spec in &targets {
        watch_targets.push(WatchTarget::parse(spec)?);
    }
    if watch_targets.is_empty() {
        return Err(anyhow!("no targets to watch; pass --target name=ip"));
    }
    let interface = config
        .interface
        .clone()
        .or_else(|| SystemProbe::new(runner.clone()).default_interface())
        .unwrap_or_else(|| FALLBACK_INTERFACE.to_string());
    let mut monitor = HealthMonitor::new(runner, &interface, watch_targets)
        .with_ping_count(config.watch.ping_count);

    if once {
        let report = monitor.sample();
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            dashboard::render(&mut io::stdout(), &report)?;
        }
        return Ok(());
    }
    let seconds = interval.unwrap_or(config.watch.interval_secs).max(1);
    dashboard::Dashboard::run(&mut monitor, Duration::from_secs(seconds))
}
