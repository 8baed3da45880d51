//! Pure state derivation for catalog entries.
//!
//! Nothing here performs I/O: callers hand in the current snapshots and get
//! back the state the console should display.

use crate::model::AuthLevel;
use serde::Serialize;
use std::collections::BTreeSet;

pub type PackageSet = BTreeSet<String>;

/// True when every required package is in the installed snapshot.
///
/// An empty requirement is never satisfied.
pub fn is_satisfied(required: &[String], installed: &PackageSet) -> bool {
    !required.is_empty() && required.iter().all(|p| installed.contains(p))
}

/// True when the package manager can currently see every required package.
///
/// An empty requirement has nothing to provide and counts as unavailable.
pub fn is_available(required: &[String], available: &PackageSet) -> bool {
    !required.is_empty() && required.iter().all(|p| available.contains(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// Not offered by the package manager right now.
    Locked,
    /// Admin-only and the session has not been elevated.
    RequiresAuth,
    Installable,
    Installed,
}

impl AppState {
    pub fn label(self) -> &'static str {
        match self {
            AppState::Locked => "locked",
            AppState::RequiresAuth => "requires auth",
            AppState::Installable => "installable",
            AppState::Installed => "installed",
        }
    }
}

/// Snapshots an application is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct PackageContext<'a> {
    pub installed: &'a PackageSet,
    pub available: &'a PackageSet,
    pub elevated: bool,
}

pub fn resolve_app(required: &[String], level: AuthLevel, ctx: PackageContext<'_>) -> AppState {
    if !is_available(required, ctx.available) {
        return AppState::Locked;
    }
    if is_satisfied(required, ctx.installed) {
        return AppState::Installed;
    }
    if level == AuthLevel::RequiresAdmin && !ctx.elevated {
        AppState::RequiresAuth
    } else {
        AppState::Installable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Assigned,
    /// Forced by policy; not revocable from this console.
    Inflicted,
    Available,
}

impl DeviceState {
    pub fn label(self) -> &'static str {
        match self {
            DeviceState::Assigned => "assigned",
            DeviceState::Inflicted => "inflicted",
            DeviceState::Available => "available",
        }
    }
}

/// Server-reported binding ids for this computer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentSnapshot {
    pub assigned: BTreeSet<u64>,
    pub inflicted: BTreeSet<u64>,
}

impl AssignmentSnapshot {
    pub fn classify(&self, binding_id: u64) -> DeviceState {
        classify(binding_id, &self.assigned, &self.inflicted)
    }
}

/// Assigned wins over inflicted, inflicted over available.
pub fn classify(binding_id: u64, assigned: &BTreeSet<u64>, inflicted: &BTreeSet<u64>) -> DeviceState {
    if assigned.contains(&binding_id) {
        DeviceState::Assigned
    } else if inflicted.contains(&binding_id) {
        DeviceState::Inflicted
    } else {
        DeviceState::Available
    }
}

/// Display filters toggled from the console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visibility {
    pub only_installed: bool,
    pub only_assigned: bool,
}

impl Visibility {
    pub fn shows_app(self, installed: bool) -> bool {
        !self.only_installed || installed
    }

    pub fn shows_binding(self, state: DeviceState) -> bool {
        !self.only_assigned || state != DeviceState::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> PackageSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn pkgs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_requirement_is_never_satisfied() {
        assert!(!is_satisfied(&[], &set(&[])));
        assert!(!is_satisfied(&[], &set(&["a", "b"])));
    }

    #[test]
    fn satisfaction_ignores_order_and_duplicates() {
        let installed = set(&["a", "b", "c"]);
        assert!(is_satisfied(&pkgs(&["c", "a"]), &installed));
        assert!(is_satisfied(&pkgs(&["a", "a", "b"]), &installed));
        assert!(!is_satisfied(&pkgs(&["a", "d"]), &installed));
        assert!(!is_satisfied(&pkgs(&["d", "d"]), &installed));
    }

    #[test]
    fn unavailable_entries_are_locked_even_when_installed() {
        let installed = set(&["a"]);
        let available = set(&[]);
        let ctx = PackageContext {
            installed: &installed,
            available: &available,
            elevated: true,
        };
        assert_eq!(resolve_app(&pkgs(&["a"]), AuthLevel::Unrestricted, ctx), AppState::Locked);
        assert_eq!(resolve_app(&[], AuthLevel::Unrestricted, ctx), AppState::Locked);
    }

    #[test]
    fn admin_entries_require_auth_until_elevated() {
        let installed = set(&[]);
        let available = set(&["a"]);
        let mut ctx = PackageContext {
            installed: &installed,
            available: &available,
            elevated: false,
        };
        let required = pkgs(&["a"]);
        assert_eq!(resolve_app(&required, AuthLevel::RequiresAdmin, ctx), AppState::RequiresAuth);
        assert_eq!(resolve_app(&required, AuthLevel::Unrestricted, ctx), AppState::Installable);
        ctx.elevated = true;
        assert_eq!(resolve_app(&required, AuthLevel::RequiresAdmin, ctx), AppState::Installable);
    }

    #[test]
    fn install_then_uninstall_scenario() {
        let required = pkgs(&["pkg-a"]);
        let available = set(&["pkg-a"]);
        let resolve = |installed: &PackageSet| {
            resolve_app(
                &required,
                AuthLevel::Unrestricted,
                PackageContext {
                    installed,
                    available: &available,
                    elevated: false,
                },
            )
        };
        assert_eq!(resolve(&set(&[])), AppState::Installable);
        assert_eq!(resolve(&set(&["pkg-a"])), AppState::Installed);
        assert_eq!(resolve(&set(&[])), AppState::Installable);
    }

    #[test]
    fn assigned_takes_precedence_over_inflicted() {
        let snapshot = AssignmentSnapshot {
            assigned: [1, 2].into_iter().collect(),
            inflicted: [2, 3].into_iter().collect(),
        };
        assert_eq!(snapshot.classify(1), DeviceState::Assigned);
        assert_eq!(snapshot.classify(2), DeviceState::Assigned);
        assert_eq!(snapshot.classify(3), DeviceState::Inflicted);
        assert_eq!(snapshot.classify(4), DeviceState::Available);
    }

    #[test]
    fn only_assigned_hides_available_bindings() {
        let v = Visibility {
            only_assigned: true,
            ..Default::default()
        };
        assert!(v.shows_binding(DeviceState::Assigned));
        assert!(v.shows_binding(DeviceState::Inflicted));
        assert!(!v.shows_binding(DeviceState::Available));
        assert!(Visibility::default().shows_binding(DeviceState::Available));
        assert!(!Visibility { only_installed: true, ..Default::default() }.shows_app(false));
    }
}
