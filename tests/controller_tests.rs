// SPDX-License-Identifier: PMPL-1.0-or-later

//! Chaos controller behaviour against a recording backend

mod common;

use common::{controller, controller_with, probe, Call};
use ruckus::backend::{NetemBackend, RecordingRunner, ShapingPlan};
use ruckus::catalog::Catalog;
use ruckus::controller::{self, ChaosController, ProtectionSettings};
use ruckus::deadman::{DeadmanConfig, DeadmanSwitch};
use ruckus::error::{ApplyStage, ChaosError, Rollback};
use ruckus::types::{ChaosPhase, Scope, ScopeKind};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_every_preset_round_trips_to_baseline() {
    let (mut ctl, backend) = controller();
    let presets = ctl.catalog().presets().to_vec();
    for preset in &presets {
        ctl.apply(preset, ScopeKind::Local, None, true)
            .unwrap_or_else(|err| panic!("{} should apply: {}", preset.key, err));
        assert_eq!(ctl.current_profile(), preset);
        assert_eq!(ctl.is_active(), !preset.is_baseline());

        let report = ctl.clear();
        assert!(report.is_clean());
        assert!(!ctl.is_active());
        assert_eq!(ctl.phase(), ChaosPhase::Baseline);
    }
    // one clear-before-apply plus one clear per preset
    assert_eq!(backend.clear_calls(), presets.len() * 2);
}

#[test]
fn test_clear_is_idempotent() {
    let (mut ctl, backend) = controller();
    ctl.apply_preset("mystery", false).expect("mystery applies");
    for _ in 0..3 {
        assert!(ctl.clear().is_clean());
        assert!(!ctl.is_active());
    }
    assert_eq!(ctl.current_profile().key, "peace");
    assert_eq!(backend.clear_calls(), 4);
}

#[test]
fn test_outage_requires_confirmation_and_changes_nothing() {
    let (mut ctl, backend) = controller();
    ctl.apply_preset("swarm", false).expect("swarm applies");
    let before = backend.calls();

    let err = ctl.apply_preset("shaolin", false).expect_err("outage needs confirmation");
    assert!(matches!(err, ChaosError::ConfirmationRequired { .. }));
    assert!(err.is_validation());
    assert_eq!(backend.calls(), before, "no backend call on validation failure");
    assert_eq!(ctl.current_profile().key, "swarm");
}

#[test]
fn test_invalid_target_makes_no_backend_calls() {
    let (mut ctl, backend) = controller();
    let venoms = ctl.catalog().find("venoms").expect("preset").clone();
    let err = ctl
        .apply(&venoms, ScopeKind::Targeted, Some("999.1.1.1"), false)
        .expect_err("octet out of range");
    assert_eq!(
        err,
        ChaosError::InvalidTarget {
            input: "999.1.1.1".to_string()
        }
    );
    assert!(backend.calls().is_empty());
    assert!(!ctl.is_active());
}

#[test]
fn test_validation_order() {
    let (mut ctl, backend) = controller();
    let outage = ctl.catalog().total_outage().clone();

    let err = ctl
        .apply(&outage, ScopeKind::Targeted, Some("1.2.3"), false)
        .expect_err("bad target wins");
    assert!(matches!(err, ChaosError::InvalidTarget { .. }));

    let err = ctl
        .apply(&outage, ScopeKind::NetworkWide, None, false)
        .expect_err("confirmation before scope");
    assert!(matches!(err, ChaosError::ConfirmationRequired { .. }));

    let err = ctl
        .apply(&outage, ScopeKind::NetworkWide, None, true)
        .expect_err("forwarding is off");
    assert!(matches!(err, ChaosError::ScopeUnavailable { .. }));
    assert!(backend.calls().is_empty());
}

#[test]
fn test_apply_resets_deadman_clock() {
    let (mut ctl, _backend) = controller();
    let deadman = DeadmanSwitch::new(DeadmanConfig::minutes(30), Arc::new(|| {}));
    ctl.attach_clock(deadman.clock());
    let clock = deadman.clock();

    let before = clock.last_activity();
    thread::sleep(Duration::from_millis(20));
    ctl.apply_preset("swarm", false).expect("swarm applies");
    let after_apply = clock.last_activity();
    assert!(after_apply > before);

    thread::sleep(Duration::from_millis(20));
    ctl.clear();
    assert!(clock.last_activity() > after_apply);

    // failed validation is not activity
    let after_clear = clock.last_activity();
    thread::sleep(Duration::from_millis(20));
    let _ = ctl.apply_preset("shaolin", false);
    assert_eq!(clock.last_activity(), after_clear);
}

#[test]
fn test_deadman_expiry_restores_baseline_once() {
    let (ctl, backend) = controller();
    let shared = ctl.into_shared();
    controller::lock(&shared)
        .apply_preset("venoms", false)
        .expect("venoms applies");

    let fired = Arc::new(AtomicUsize::new(0));
    let emergency = controller::emergency_clear(&shared);
    let counter = fired.clone();
    let config = DeadmanConfig::minutes(1)
        .with_timeout(Duration::from_millis(100))
        .with_warning_lead(Duration::from_millis(50))
        .with_grace(None)
        .with_poll_interval(Duration::from_millis(10));
    let deadman = DeadmanSwitch::new(
        config,
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            emergency();
        }),
    );
    controller::lock(&shared).attach_clock(deadman.clock());
    deadman.start();

    thread::sleep(Duration::from_millis(500));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!deadman.is_running());
    let ctl = controller::lock(&shared);
    assert!(!ctl.is_active());
    assert_eq!(backend.clear_calls(), 2);
}

#[test]
fn test_heavy_then_outage_then_clear_scenario() {
    let (mut ctl, backend) = controller_with(ProtectionSettings::default(), Some("10.9.8.7"));

    let heavy = ctl.apply_preset("venoms", false).expect("heavy applies");
    assert!(heavy.warnings.iter().any(|w| w.contains("2000 kbps")));
    assert_eq!(ctl.phase(), ChaosPhase::Disrupted);

    let outage = ctl.apply_preset("shaolin", true).expect("confirmed outage applies");
    assert_eq!(outage.protected, vec!["10.9.8.7".parse::<IpAddr>().expect("ip")]);
    assert_eq!(ctl.phase(), ChaosPhase::TotalOutage);

    assert!(ctl.clear().is_clean());
    assert_eq!(ctl.phase(), ChaosPhase::Baseline);

    assert_eq!(backend.clear_calls(), 3);
    let protect = backend
        .position(|call| matches!(call, Call::Protect(_)))
        .expect("protect issued");
    let drop = backend
        .position(|call| matches!(call, Call::Drop(_)))
        .expect("drop issued");
    assert!(protect < drop, "allow-list must precede drop rules");
    assert!(matches!(backend.calls().last(), Some(Call::Clear(_))));
}

#[test]
fn test_targeted_apply_passes_target_through() {
    let (mut ctl, backend) = controller();
    let swarm = ctl.catalog().find("swarm").expect("preset").clone();
    let report = ctl
        .apply(&swarm, ScopeKind::Targeted, Some("10.0.0.5"), false)
        .expect("targeted apply");
    let target = Scope::Targeted(Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(report.scope, target);
    let (plan, _) = ShapingPlan::from_profile(&swarm);
    assert!(backend.calls().contains(&Call::Apply(plan, target)));

    let status = ctl.status();
    assert_eq!(status.scope, ScopeKind::Targeted);
    assert_eq!(status.target, Some(Ipv4Addr::new(10, 0, 0, 5)));

    // later presets keep the selected scope
    ctl.apply_preset("mystery", false).expect("mystery applies");
    assert_eq!(ctl.scope(), target);
}

#[test]
fn test_network_scope_needs_forwarding() {
    let (mut ctl, backend) = controller();
    ctl.set_scope(ScopeKind::Targeted, Some("10.0.0.9")).expect("target scope");

    let err = ctl
        .set_scope(ScopeKind::NetworkWide, None)
        .expect_err("forwarding disabled");
    assert!(matches!(err, ChaosError::ScopeUnavailable { .. }));
    assert_eq!(ctl.scope(), Scope::Local, "falls back to local");

    ctl.enable_gateway().expect("gateway mode");
    assert_eq!(backend.calls(), vec![Call::EnableForwarding]);
    assert_eq!(
        ctl.set_scope(ScopeKind::NetworkWide, None).expect("now available"),
        Scope::NetworkWide
    );
    ctl.apply_preset("swarm", false).expect("network-wide swarm");
    assert!(matches!(backend.calls().last(), Some(Call::Apply(_, Scope::NetworkWide))));
}

#[test]
fn test_protect_failure_never_reaches_drop() {
    let (mut ctl, backend) = controller();
    ctl.apply_preset("swords", false).expect("swords applies");
    backend.fail_on("protect");

    let err = ctl.apply_preset("shaolin", true).expect_err("protect fails");
    assert_eq!(
        err,
        ChaosError::AdapterCommandFailed {
            stage: ApplyStage::Protect,
            source: ruckus::error::BackendError::CommandFailed {
                command: "fake protect".to_string(),
                status: "status 2".to_string(),
                stderr: "simulated".to_string(),
            },
            rollback: Rollback::Completed,
        }
    );
    assert!(backend.position(|call| matches!(call, Call::Drop(_))).is_none());
    assert_eq!(ctl.phase(), ChaosPhase::Baseline);
    // clear-before-swords, clear-before-shaolin, rollback
    assert_eq!(backend.clear_calls(), 3);
}

#[test]
fn test_drop_failure_rolls_back() {
    let (mut ctl, backend) = controller();
    backend.fail_on("drop");
    let err = ctl.apply_preset("shaolin", true).expect_err("drop fails");
    let ChaosError::AdapterCommandFailed { stage, rollback, .. } = err else {
        panic!("expected adapter failure");
    };
    assert_eq!(stage, ApplyStage::DropAll);
    assert_eq!(rollback, Rollback::Completed);
    assert!(!ctl.is_active());
}

#[test]
fn test_failed_rollback_is_reported() {
    let (mut ctl, backend) = controller();
    backend.fail_on("apply");
    backend.fail_clears_after(1);

    let err = ctl.apply_preset("mystery", false).expect_err("shaping fails");
    let ChaosError::AdapterCommandFailed { stage, rollback, .. } = err else {
        panic!("expected adapter failure");
    };
    assert_eq!(stage, ApplyStage::Shape);
    assert!(matches!(rollback, Rollback::Failed(_)));
    assert!(!ctl.is_active());

    let err = ctl.apply_preset("shaolin", true).expect_err("clear before apply fails");
    assert!(matches!(
        err,
        ChaosError::AdapterCommandFailed {
            stage: ApplyStage::ClearBeforeApply,
            rollback: Rollback::NotAttempted,
            ..
        }
    ));
    assert!(backend.position(|call| matches!(call, Call::Protect(_))).is_none());

    let report = ctl.clear();
    assert!(!report.is_clean(), "clear reports the failure instead of raising it");
    backend.heal();
    assert!(ctl.clear().is_clean());
}

#[test]
fn test_management_addresses_join_operator_origin() {
    let protection = ProtectionSettings {
        ssh_protection: true,
        management_addresses: vec![
            "10.1.1.1".parse().expect("ip"),
            "192.168.0.2".parse().expect("ip"),
        ],
    };
    let (mut ctl, backend) = controller_with(protection, Some("10.1.1.1"));
    ctl.apply_preset("shaolin", true).expect("outage applies");
    assert!(backend.calls().contains(&Call::Protect(vec![
        "10.1.1.1".parse().expect("ip"),
        "192.168.0.2".parse().expect("ip"),
    ])));
}

#[test]
fn test_disabled_ssh_protection_skips_allow_list() {
    let protection = ProtectionSettings {
        ssh_protection: false,
        management_addresses: Vec::new(),
    };
    let (mut ctl, backend) = controller_with(protection, Some("10.1.1.1"));
    let report = ctl.apply_preset("shaolin", true).expect("outage applies");
    assert!(report.protected.is_empty());
    assert!(backend.position(|call| matches!(call, Call::Protect(_))).is_none());
    assert!(backend.position(|call| matches!(call, Call::Drop(Scope::Local))).is_some());
    assert!(!ctl.status().ssh_protection);
}

#[test]
fn test_unknown_preset_is_rejected() {
    let (mut ctl, backend) = controller();
    let err = ctl.apply_preset("ghostface", false).expect_err("no such preset");
    assert_eq!(
        err,
        ChaosError::UnknownPreset {
            selector: "ghostface".to_string()
        }
    );
    assert!(backend.calls().is_empty());
    assert!(ctl.apply_preset("1", false).is_ok(), "numeric index selects swarm");
    assert_eq!(ctl.current_profile().key, "swarm");
}

#[test]
fn test_status_snapshot_serializes() {
    let (mut ctl, _backend) = controller();
    let deadman = DeadmanSwitch::new(DeadmanConfig::minutes(15), Arc::new(|| {}));
    ctl.attach_clock(deadman.clock());
    ctl.apply_preset("venoms", false).expect("venoms applies");

    let status = ctl.status();
    assert_eq!(status.profile_key, "venoms");
    assert_eq!(status.phase, ChaosPhase::Disrupted);
    assert_eq!(status.deadman_timeout_secs, 900);
    assert_eq!(status.deadman_remaining_secs, None, "switch not started");
    assert_eq!(status.interface.as_deref(), Some("eth0"));

    let json = serde_json::to_value(&status).expect("serializes");
    assert_eq!(json["phase"], "disrupted");
    assert_eq!(json["scope"], "local");
    assert!(json.get("target").is_none());
}

#[test]
fn test_emergency_clear_survives_poisoned_lock() {
    let (ctl, backend) = controller();
    let shared = ctl.into_shared();
    controller::lock(&shared)
        .apply_preset("swarm", false)
        .expect("swarm applies");

    let poisoner = Arc::clone(&shared);
    let _ = thread::spawn(move || {
        let _guard = poisoner.lock().expect("first lock");
        panic!("shell crashed while holding the controller");
    })
    .join();
    assert!(shared.is_poisoned());

    let emergency = controller::emergency_clear(&shared);
    emergency();
    assert!(!controller::lock(&shared).is_active());
    assert_eq!(backend.clear_calls(), 2);
}

fn netem_controller() -> (ChaosController<NetemBackend>, RecordingRunner) {
    let runner = RecordingRunner::new();
    let ctl = ChaosController::new(
        NetemBackend::new(Arc::new(runner.clone())),
        Catalog::standard(),
        ProtectionSettings::default(),
        probe(None),
    );
    (ctl, runner)
}

#[test]
fn test_clear_reaches_rules_after_interface_change() {
    let (mut ctl, runner) = netem_controller();
    ctl.apply_preset("venoms", false).expect("venoms applies");
    assert!(runner
        .lines()
        .contains(&"tc qdisc add dev eth0 root netem delay 300ms 50ms loss 8%".to_string()));

    ctl.set_interface("wlan0");
    runner.clear_log();
    let report = ctl.clear();
    assert!(report.is_clean());
    assert_eq!(report.interface, "eth0");
    assert_eq!(runner.lines(), vec!["tc qdisc del dev eth0 root"]);

    // nothing installed any more, so the new selection applies
    runner.clear_log();
    ctl.clear();
    assert_eq!(runner.lines(), vec!["tc qdisc del dev wlan0 root"]);
}

#[test]
fn test_apply_after_interface_change_clears_old_interface() {
    let (mut ctl, runner) = netem_controller();
    ctl.apply_preset("swarm", false).expect("swarm applies");
    ctl.set_interface("wlan0");
    runner.clear_log();

    let report = ctl.apply_preset("mystery", false).expect("mystery applies");
    assert_eq!(report.interface, "wlan0");
    assert_eq!(
        runner.lines(),
        vec![
            "tc qdisc del dev eth0 root",
            "tc qdisc add dev wlan0 root netem delay 150ms 25ms loss 3%",
        ]
    );

    runner.clear_log();
    ctl.clear();
    assert_eq!(runner.lines(), vec!["tc qdisc del dev wlan0 root"]);
}

#[test]
fn test_emergency_clear_follows_installed_interface() {
    let (mut ctl, runner) = netem_controller();
    ctl.apply_preset("swords", false).expect("swords applies");
    ctl.set_interface("wlan0");
    let shared = ctl.into_shared();
    runner.clear_log();

    controller::emergency_clear(&shared)();
    assert_eq!(runner.lines(), vec!["tc qdisc del dev eth0 root"]);
    assert!(!controller::lock(&shared).is_active());
}
