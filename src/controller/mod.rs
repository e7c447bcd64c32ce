// SPDX-License-Identifier: PMPL-1.0-or-later

//! Chaos controller: validates and sequences every change to the host's
//! traffic rules.
//!
//! Each apply issues exactly one `clear_all` before installing anything,
//! so repeated applies never stack rules. State is only updated once every
//! backend call for the apply has returned.

use crate::backend::{Backend, ShapingPlan};
use crate::catalog::Catalog;
use crate::deadman::{ActivityClock, EmergencyCallback};
use crate::error::{ApplyStage, BackendError, ChaosError, Rollback};
use crate::netinfo::{HostProbe, FALLBACK_INTERFACE};
use crate::types::{ChaosPhase, DisruptionProfile, Scope, ScopeKind, StatusSnapshot};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

pub type SharedController<B> = Arc<Mutex<ChaosController<B>>>;

/// Lock the controller even if a previous holder panicked; an emergency
/// clear must always get through.
pub fn lock<B: Backend>(shared: &Mutex<ChaosController<B>>) -> MutexGuard<'_, ChaosController<B>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The deadman callback: clear whatever is installed.
pub fn emergency_clear<B: Backend + 'static>(shared: &SharedController<B>) -> EmergencyCallback {
    let shared = Arc::clone(shared);
    Arc::new(move || {
        let report = lock(&shared).clear();
        if let Some(err) = &report.error {
            error!(error = %err, "emergency clear failed; check rules manually");
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSettings {
    /// Keep SSH and the operator's address reachable during a total outage.
    pub ssh_protection: bool,
    pub management_addresses: Vec<IpAddr>,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            ssh_protection: true,
            management_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub profile: DisruptionProfile,
    pub scope: Scope,
    pub interface: String,
    /// Parameters that were requested but could not be installed.
    pub warnings: Vec<String>,
    /// Addresses exempted from a total outage.
    pub protected: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub interface: String,
    pub was_active: bool,
    pub error: Option<BackendError>,
}

impl ClearReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
struct ChaosState {
    current_profile: DisruptionProfile,
    scope: Scope,
    interface: Option<String>,
    /// Where the installed rules live. Outlives interface and scope
    /// changes so a clear always reaches them.
    installed: Option<(String, Scope)>,
}

pub struct ChaosController<B: Backend> {
    backend: B,
    catalog: Catalog,
    protection: ProtectionSettings,
    probe: Box<dyn HostProbe>,
    clock: Option<ActivityClock>,
    state: ChaosState,
}

impl<B: Backend> ChaosController<B> {
    pub fn new(
        backend: B,
        catalog: Catalog,
        protection: ProtectionSettings,
        probe: Box<dyn HostProbe>,
    ) -> Self {
        let state = ChaosState {
            current_profile: catalog.baseline().clone(),
            scope: Scope::Local,
            interface: None,
            installed: None,
        };
        Self {
            backend,
            catalog,
            protection,
            probe,
            clock: None,
            state,
        }
    }

    /// Successful applies and clears will reset this clock.
    pub fn attach_clock(&mut self, clock: ActivityClock) {
        self.clock = Some(clock);
    }

    pub fn into_shared(self) -> SharedController<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn protection(&self) -> &ProtectionSettings {
        &self.protection
    }

    pub fn current_profile(&self) -> &DisruptionProfile {
        &self.state.current_profile
    }

    pub fn scope(&self) -> Scope {
        self.state.scope
    }

    pub fn interface(&self) -> Option<&str> {
        self.state.interface.as_deref()
    }

    pub fn is_active(&self) -> bool {
        !self.state.current_profile.is_baseline()
    }

    pub fn phase(&self) -> ChaosPhase {
        self.state.current_profile.phase()
    }

    pub fn preflight(&self) -> Result<(), BackendError> {
        self.backend.preflight()
    }

    pub fn set_interface(&mut self, interface: &str) {
        let interface = interface.trim();
        if !interface.is_empty() {
            if let Some((active, _)) = &self.state.installed {
                if active != interface {
                    warn!(active = %active, interface, "rules stay on the previous interface until cleared");
                }
            }
            info!(interface, "interface selected");
            self.state.interface = Some(interface.to_string());
            self.touch();
        }
    }

    /// Interface in use: the selected one, else the host default route,
    /// else `eth0`. The answer is remembered.
    pub fn resolve_interface(&mut self) -> String {
        if let Some(interface) = &self.state.interface {
            return interface.clone();
        }
        let interface = self.probe.default_interface().unwrap_or_else(|| {
            warn!(fallback = FALLBACK_INTERFACE, "could not detect default interface");
            FALLBACK_INTERFACE.to_string()
        });
        self.state.interface = Some(interface.clone());
        interface
    }

    /// Select the scope used by later preset applies. Network-wide needs IP
    /// forwarding; without it the scope falls back to local.
    pub fn set_scope(&mut self, kind: ScopeKind, target: Option<&str>) -> Result<Scope, ChaosError> {
        let scope = Scope::resolve(kind, target)?;
        if scope == Scope::NetworkWide {
            if let Err(err) = self.require_forwarding() {
                self.state.scope = Scope::Local;
                return Err(err);
            }
        }
        info!(scope = %scope, "scope selected");
        self.state.scope = scope;
        self.touch();
        Ok(scope)
    }

    pub fn forwarding_enabled(&self) -> Result<bool, BackendError> {
        self.backend.forwarding_enabled()
    }

    /// Turn on IP forwarding and NAT so network-wide scope becomes available.
    pub fn enable_gateway(&mut self) -> Result<(), ChaosError> {
        let interface = self.resolve_interface();
        self.backend
            .enable_forwarding(&interface)
            .map_err(|source| ChaosError::AdapterCommandFailed {
                stage: ApplyStage::EnableForwarding,
                source,
                rollback: Rollback::NotAttempted,
            })?;
        self.touch();
        Ok(())
    }

    /// Apply a catalog preset (by index or key) with the current scope.
    pub fn apply_preset(&mut self, selector: &str, confirmed: bool) -> Result<ApplyReport, ChaosError> {
        let profile = self.catalog.find(selector)?.clone();
        let scope = self.state.scope;
        let target = scope.target().map(|addr| addr.to_string());
        self.apply(&profile, scope.kind(), target.as_deref(), confirmed)
    }

    pub fn apply(
        &mut self,
        profile: &DisruptionProfile,
        scope_kind: ScopeKind,
        target: Option<&str>,
        confirmed: bool,
    ) -> Result<ApplyReport, ChaosError> {
        let scope = Scope::resolve(scope_kind, target)?;
        if profile.is_total_outage() && !confirmed {
            return Err(ChaosError::ConfirmationRequired {
                preset: profile.name.clone(),
            });
        }
        if scope == Scope::NetworkWide {
            self.require_forwarding()?;
        }

        let (installed_interface, installed_scope) = self.installed_location();
        self.backend
            .clear_all(&installed_interface, &installed_scope)
            .map_err(|source| ChaosError::AdapterCommandFailed {
                stage: ApplyStage::ClearBeforeApply,
                source,
                rollback: Rollback::NotAttempted,
            })?;
        self.state.installed = None;
        let interface = self.resolve_interface();

        let mut warnings = Vec::new();
        let mut protected = Vec::new();
        match profile.phase() {
            ChaosPhase::Baseline => {}
            ChaosPhase::TotalOutage => {
                protected = self.install_outage(&interface, &scope)?;
            }
            ChaosPhase::Disrupted => {
                let (plan, skipped) = ShapingPlan::from_profile(profile);
                warnings.extend(skipped);
                match self.backend.apply_profile(&plan, &interface, &scope) {
                    Ok(backend_warnings) => warnings.extend(backend_warnings),
                    Err(source) => {
                        return Err(self.roll_back(ApplyStage::Shape, source, &interface, &scope))
                    }
                }
            }
        }
        for warning in &warnings {
            warn!(preset = %profile.key, "{}", warning);
        }

        self.state.current_profile = profile.clone();
        self.state.scope = scope;
        if !profile.is_baseline() {
            self.state.installed = Some((interface.clone(), scope));
        }
        self.touch();
        info!(
            preset = %profile.key,
            phase = ?profile.phase(),
            scope = %scope,
            interface = %interface,
            "chaos level applied"
        );
        Ok(ApplyReport {
            profile: profile.clone(),
            scope,
            interface,
            warnings,
            protected,
        })
    }

    /// Return to baseline. Never fails; a backend error is logged and
    /// carried in the report.
    pub fn clear(&mut self) -> ClearReport {
        let (interface, scope) = self.installed_location();
        let was_active = self.is_active();
        let error = self.backend.clear_all(&interface, &scope).err();
        match &error {
            None => {
                self.state.installed = None;
                info!(interface = %interface, was_active, "chaos cleared")
            }
            Some(err) => error!(interface = %interface, error = %err, "clear failed"),
        }
        self.state.current_profile = self.catalog.baseline().clone();
        self.touch();
        ClearReport {
            interface,
            was_active,
            error,
        }
    }

    /// Human-readable dump of the installed rules.
    pub fn backend_status(&mut self) -> String {
        let interface = self.resolve_interface();
        self.backend.query_status(&interface)
    }

    pub fn status(&self) -> StatusSnapshot {
        let profile = &self.state.current_profile;
        StatusSnapshot {
            captured_at: chrono::Utc::now().to_rfc3339(),
            backend: self.backend.kind(),
            profile_key: profile.key.clone(),
            profile_name: profile.name.clone(),
            phase: profile.phase(),
            is_active: self.is_active(),
            scope: self.state.scope.kind(),
            target: self.state.scope.target(),
            interface: self.state.interface.clone(),
            ssh_protection: self.protection.ssh_protection,
            protected_addresses: self.protection.management_addresses.clone(),
            deadman_remaining_secs: self
                .clock
                .as_ref()
                .and_then(ActivityClock::remaining)
                .map(|left| left.as_secs()),
            deadman_timeout_secs: self
                .clock
                .as_ref()
                .map(|clock| clock.timeout().as_secs())
                .unwrap_or_default(),
            monitor_fault: self.clock.as_ref().and_then(ActivityClock::fault),
        }
    }

    /// Interface and scope of the installed rules, else the current selection.
    fn installed_location(&mut self) -> (String, Scope) {
        match &self.state.installed {
            Some(installed) => installed.clone(),
            None => (self.resolve_interface(), self.state.scope),
        }
    }

    fn touch(&self) {
        if let Some(clock) = &self.clock {
            clock.reset();
        }
    }

    fn require_forwarding(&self) -> Result<(), ChaosError> {
        match self.backend.forwarding_enabled() {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChaosError::ScopeUnavailable {
                reason: "IP forwarding is disabled; enable gateway mode first".to_string(),
            }),
            Err(err) => Err(ChaosError::ScopeUnavailable {
                reason: format!("cannot determine IP forwarding state: {}", err),
            }),
        }
    }

    /// Operator origin first, then configured management addresses.
    fn protected_addresses(&self) -> Vec<IpAddr> {
        let mut addresses = Vec::new();
        if let Some(origin) = self.probe.operator_origin() {
            addresses.push(origin);
        }
        for address in &self.protection.management_addresses {
            if !addresses.contains(address) {
                addresses.push(*address);
            }
        }
        addresses
    }

    /// Allow-list strictly before the drop rules.
    fn install_outage(&mut self, interface: &str, scope: &Scope) -> Result<Vec<IpAddr>, ChaosError> {
        let mut protected = Vec::new();
        if self.protection.ssh_protection {
            protected = self.protected_addresses();
            if let Err(source) = self.backend.protect_addresses(&protected, interface) {
                return Err(self.roll_back(ApplyStage::Protect, source, interface, scope));
            }
            info!(interface, addresses = ?protected, "SSH protection installed");
        } else {
            warn!(interface, "SSH protection disabled; remote sessions will drop");
        }
        if let Err(source) = self.backend.drop_all(interface, scope) {
            return Err(self.roll_back(ApplyStage::DropAll, source, interface, scope));
        }
        Ok(protected)
    }

    /// Undo a partially installed apply and leave the controller at baseline.
    fn roll_back(
        &mut self,
        stage: ApplyStage,
        source: BackendError,
        interface: &str,
        scope: &Scope,
    ) -> ChaosError {
        error!(stage = %stage, error = %source, "apply failed; rolling back");
        let rollback = match self.backend.clear_all(interface, scope) {
            Ok(()) => Rollback::Completed,
            Err(err) => {
                error!(error = %err, "rollback failed; rules may remain installed");
                self.state.installed = Some((interface.to_string(), *scope));
                Rollback::Failed(err.to_string())
            }
        };
        self.state.current_profile = self.catalog.baseline().clone();
        ChaosError::AdapterCommandFailed {
            stage,
            source,
            rollback,
        }
    }
}
