// SPDX-License-Identifier: PMPL-1.0-or-later

//! Command lines emitted by the tc/netem and iptables backends

use ruckus::backend::{
    Backend, CommandOutput, IptablesBackend, NetemBackend, RecordingRunner, ShapingPlan,
};
use ruckus::catalog::Catalog;
use ruckus::controller::{ChaosController, ProtectionSettings};
use ruckus::error::{ApplyStage, ChaosError};
use ruckus::netinfo::StaticProbe;
use ruckus::types::Scope;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

const PRIO_ROOT: &str =
    "tc qdisc add dev eth0 root handle 1: prio bands 3 priomap 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1";

fn netem() -> (NetemBackend, RecordingRunner) {
    let runner = RecordingRunner::new();
    (NetemBackend::new(Arc::new(runner.clone())), runner)
}

fn iptables() -> (IptablesBackend, RecordingRunner) {
    let runner = RecordingRunner::new();
    (IptablesBackend::new(Arc::new(runner.clone())), runner)
}

fn loss(pct: u8) -> ShapingPlan {
    ShapingPlan {
        loss_pct: pct,
        ..ShapingPlan::default()
    }
}

fn addresses() -> Vec<IpAddr> {
    vec![
        "10.9.8.7".parse().expect("v4"),
        "fe80::1".parse().expect("v6"),
    ]
}

#[test]
fn test_netem_local_shaping_is_a_single_root_qdisc() {
    let (mut backend, runner) = netem();
    let plan = ShapingPlan {
        latency_ms: 150,
        jitter_ms: 25,
        loss_pct: 3,
        bandwidth_kbps: None,
    };
    let warnings = backend
        .apply_profile(&plan, "eth0", &Scope::Local)
        .expect("shaping applies");
    assert!(warnings.is_empty());
    assert_eq!(
        runner.lines(),
        vec!["tc qdisc add dev eth0 root netem delay 150ms 25ms loss 3%"]
    );
}

#[test]
fn test_netem_bandwidth_only_uses_token_bucket() {
    let (mut backend, runner) = netem();
    let plan = ShapingPlan {
        bandwidth_kbps: Some(512),
        ..ShapingPlan::default()
    };
    backend
        .apply_profile(&plan, "eth0", &Scope::Local)
        .expect("cap applies");
    assert_eq!(
        runner.lines(),
        vec!["tc qdisc add dev eth0 root tbf rate 512kbit burst 32kbit latency 400ms"]
    );
}

#[test]
fn test_netem_targeted_shaping_leaves_other_traffic_alone() {
    let (mut backend, runner) = netem();
    let target = Scope::Targeted(Ipv4Addr::new(10, 0, 0, 5));
    backend
        .apply_profile(&loss(9), "eth0", &target)
        .expect("targeted shaping applies");
    assert_eq!(
        runner.lines(),
        vec![
            PRIO_ROOT,
            "tc qdisc add dev eth0 parent 1:1 handle 10: netem loss 9%",
            "tc filter add dev eth0 protocol ip parent 1:0 prio 5 u32 match ip dst 10.0.0.5 flowid 1:1",
        ]
    );
}

#[test]
fn test_netem_outage_protects_before_dropping() {
    let (mut backend, runner) = netem();
    backend
        .protect_addresses(&addresses(), "eth0")
        .expect("allow-list installs");
    backend
        .drop_all("eth0", &Scope::Local)
        .expect("drop installs");

    let lines = runner.lines();
    assert_eq!(lines.iter().filter(|line| line.as_str() == PRIO_ROOT).count(), 1);
    assert_eq!(lines[0], PRIO_ROOT);
    assert!(lines.contains(
        &"tc filter add dev eth0 protocol ip parent 1:0 prio 1 u32 match ip dport 22 0xffff flowid 1:1"
            .to_string()
    ));
    assert!(lines.contains(
        &"tc filter add dev eth0 protocol ip parent 1:0 prio 1 u32 match ip dst 10.9.8.7/32 flowid 1:1"
            .to_string()
    ));
    assert!(lines.contains(
        &"tc filter add dev eth0 protocol ipv6 parent 1:0 prio 2 u32 match ip6 dst fe80::1/128 flowid 1:1"
            .to_string()
    ));

    let last_protect = lines
        .iter()
        .rposition(|line| line.contains("flowid 1:1"))
        .expect("protect filters");
    let first_drop = lines
        .iter()
        .position(|line| line.contains("1:3"))
        .expect("drop band");
    assert!(last_protect < first_drop);
    assert_eq!(
        lines.last().map(String::as_str),
        Some("tc filter add dev eth0 protocol all parent 1:0 prio 10 u32 match u32 0 0 flowid 1:3")
    );
}

#[test]
fn test_netem_clear_tolerates_missing_qdisc_and_resets_root() {
    let (mut backend, runner) = netem();
    runner.fail_on("qdisc del");
    backend.drop_all("eth0", &Scope::Local).expect("drop installs");
    backend
        .clear_all("eth0", &Scope::Local)
        .expect("missing qdisc is not an error");
    backend
        .clear_all("eth0", &Scope::Local)
        .expect("clearing twice is fine");
    runner.clear_log();

    backend.drop_all("eth0", &Scope::Local).expect("drop reinstalls");
    assert_eq!(runner.lines()[0], PRIO_ROOT, "prio root is rebuilt after a clear");
}

#[test]
fn test_netem_status_reports_normal_operation_when_empty() {
    let (backend, runner) = netem();
    assert_eq!(
        backend.query_status("eth0"),
        "No qdisc configured (normal operation)"
    );
    runner.respond("qdisc show", CommandOutput::ok("qdisc netem 8001: root loss 9%\n"));
    assert!(backend.query_status("eth0").contains("loss 9%"));
}

#[test]
fn test_netem_preflight_fails_without_tc() {
    let (backend, runner) = netem();
    assert!(backend.preflight().is_ok());
    runner.fail_on("tc -V");
    assert!(backend.preflight().is_err());
}

#[test]
fn test_iptables_loss_builds_chain_and_hooks() {
    let (mut backend, runner) = iptables();
    let plan = ShapingPlan {
        latency_ms: 150,
        jitter_ms: 25,
        loss_pct: 9,
        bandwidth_kbps: Some(10_000),
    };
    let warnings = backend
        .apply_profile(&plan, "eth0", &Scope::Local)
        .expect("loss applies");
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].contains("latency of 150ms skipped"));
    assert!(warnings[1].contains("10000 kbps"));
    assert_eq!(
        runner.lines(),
        vec![
            "iptables -N RUCKUS_CHAOS",
            "iptables -F RUCKUS_CHAOS",
            "iptables -A RUCKUS_CHAOS -m statistic --mode random --probability 0.09 -j DROP",
            "iptables -I INPUT -i eth0 -j RUCKUS_CHAOS",
            "iptables -I OUTPUT -o eth0 -j RUCKUS_CHAOS",
        ]
    );
}

#[test]
fn test_iptables_latency_only_profile_installs_nothing() {
    let (mut backend, runner) = iptables();
    let plan = ShapingPlan {
        latency_ms: 300,
        ..ShapingPlan::default()
    };
    let warnings = backend
        .apply_profile(&plan, "eth0", &Scope::Local)
        .expect("nothing to do is fine");
    assert_eq!(warnings.len(), 1);
    assert!(runner.lines().is_empty());
}

#[test]
fn test_iptables_targeted_loss_matches_both_directions() {
    let (mut backend, runner) = iptables();
    let target = Scope::Targeted(Ipv4Addr::new(192, 168, 1, 20));
    backend
        .apply_profile(&loss(18), "eth0", &target)
        .expect("loss applies");
    let lines = runner.lines();
    assert!(lines.contains(
        &"iptables -A RUCKUS_CHAOS -s 192.168.1.20 -m statistic --mode random --probability 0.18 -j DROP"
            .to_string()
    ));
    assert!(lines.contains(
        &"iptables -A RUCKUS_CHAOS -d 192.168.1.20 -m statistic --mode random --probability 0.18 -j DROP"
            .to_string()
    ));
}

#[test]
fn test_iptables_outage_accepts_before_drop_and_hooks_forward() {
    let (mut backend, runner) = iptables();
    backend
        .protect_addresses(&addresses(), "eth0")
        .expect("allow-list installs");
    backend
        .drop_all("eth0", &Scope::NetworkWide)
        .expect("drop installs");

    let lines = runner.lines();
    let last_accept = lines
        .iter()
        .rposition(|line| line.ends_with("-j ACCEPT"))
        .expect("accept rules");
    let drop = lines
        .iter()
        .position(|line| line == "iptables -A RUCKUS_CHAOS -j DROP")
        .expect("drop rule");
    assert!(last_accept < drop);
    assert!(lines.contains(&"iptables -A RUCKUS_CHAOS -p tcp --dport 22 -j ACCEPT".to_string()));
    assert!(lines.contains(&"iptables -A RUCKUS_CHAOS -s 10.9.8.7 -j ACCEPT".to_string()));
    assert!(!lines.iter().any(|line| line.contains("fe80::1")), "IPv6 is skipped");
    assert!(lines.contains(&"iptables -I FORWARD -j RUCKUS_CHAOS".to_string()));
    assert_eq!(
        lines.iter().filter(|line| line.starts_with("iptables -N")).count(),
        1
    );
}

#[test]
fn test_iptables_clear_unhooks_then_removes_chain() {
    let (mut backend, runner) = iptables();
    runner.fail_on("-D FORWARD");
    backend
        .clear_all("eth0", &Scope::Local)
        .expect("clearing an absent chain is fine");
    assert_eq!(
        runner.lines(),
        vec![
            "iptables -D INPUT -i eth0 -j RUCKUS_CHAOS",
            "iptables -D OUTPUT -o eth0 -j RUCKUS_CHAOS",
            "iptables -D FORWARD -j RUCKUS_CHAOS",
            "iptables -F RUCKUS_CHAOS",
            "iptables -X RUCKUS_CHAOS",
        ]
    );
}

#[test]
fn test_iptables_protect_failure_never_installs_drop() {
    let runner = RecordingRunner::new();
    runner.fail_on("--dport 22");
    let mut controller = ChaosController::new(
        IptablesBackend::new(Arc::new(runner.clone())),
        Catalog::loss_only(),
        ProtectionSettings::default(),
        Box::new(StaticProbe {
            interface: Some("eth0".to_string()),
            origin: None,
        }),
    );

    let err = controller
        .apply_preset("shaolin", true)
        .expect_err("allow-list failure aborts the outage");
    assert!(matches!(
        err,
        ChaosError::AdapterCommandFailed {
            stage: ApplyStage::Protect,
            ..
        }
    ));
    assert!(!runner.lines().iter().any(|line| line.ends_with("-j DROP")));
    assert!(!controller.is_active());
    assert_eq!(
        runner.lines().last().map(String::as_str),
        Some("iptables -X RUCKUS_CHAOS"),
        "rollback clears the chain"
    );
}

#[test]
fn test_gateway_mode_adds_masquerade_once() {
    let (mut backend, runner) = netem();
    runner.respond("sysctl -n", CommandOutput::ok("0\n"));
    assert!(!backend.forwarding_enabled().expect("sysctl readable"));

    runner.respond("-t nat -C", CommandOutput::failed(1, "No chain/target/match by that name."));
    backend.enable_forwarding("eth0").expect("gateway mode");
    assert!(runner
        .lines()
        .contains(&"iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE".to_string()));

    runner.clear_log();
    runner.respond("-t nat -C", CommandOutput::ok(""));
    backend.enable_forwarding("eth0").expect("gateway mode again");
    assert!(!runner.lines().iter().any(|line| line.contains("-t nat -A")));
}
