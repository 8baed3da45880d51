//! Decides what a UI trigger turns into, given the current session.
//!
//! Decisions are plain values; the controller carries them out.

use super::session::Session;
use crate::client::MigasfreeClient;
use crate::model::{ActionRequest, AuthLevel, BindingKey, Intent, Notice, RunIcon, Slot};
use crate::resolver::{is_satisfied, AppState, DeviceState};
use crate::runner::CommandSpec;

/// What to do once a run succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Refresh the available-package snapshot.
    Synced,
    /// Re-query installed packages and report the settled state of `request`.
    Settle(ActionRequest),
}

/// A run ready to be handed to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub slot: Slot,
    pub label: String,
    pub icon: RunIcon,
    pub command: CommandSpec,
    /// Shown once the runner accepted the run, before the process starts.
    pub before: Option<Notice>,
    pub follow_up: FollowUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run(RunPlan),
    /// Admin-only entry; ask for credentials first.
    NeedsAuth { label: String },
    /// Nothing to run; tell the user why.
    Notify(Notice),
}

pub fn sync_plan(client: &MigasfreeClient) -> RunPlan {
    RunPlan {
        slot: Slot::sync(),
        label: "synchronization".to_string(),
        icon: RunIcon::Sync,
        command: client.sync_command(),
        before: Some(Notice::info("synchronizing...")),
        follow_up: FollowUp::Synced,
    }
}

/// Warning for entries the package manager cannot provide right now.
pub fn on_demand_notice(label: &str, helpdesk: &str) -> Notice {
    let mut text = format!("{label} not available");
    if !helpdesk.is_empty() {
        text.push_str(": ");
        text.push_str(helpdesk);
    }
    Notice::warning(text)
}

pub fn decide_app(
    session: &Session,
    client: &MigasfreeClient,
    name: &str,
    intent: Intent,
) -> Decision {
    let Some(app) = session.find_app(name) else {
        return Decision::Notify(Notice::warning(format!("{name} is not in the catalog")));
    };
    let request = app.request();

    match (session.app_state(app), intent) {
        (AppState::Locked, _) => Decision::Notify(on_demand_notice(name, &session.helpdesk())),
        (AppState::RequiresAuth, _) => Decision::NeedsAuth {
            label: request.label,
        },
        (AppState::Installable, Intent::Install) => Decision::Run(RunPlan {
            slot: request.slot(),
            label: request.label.clone(),
            icon: RunIcon::Install,
            command: client.install_command(&request.packages),
            before: Some(Notice::info(format!("installing {}...", request.label))),
            follow_up: FollowUp::Settle(request),
        }),
        (AppState::Installed, Intent::Uninstall) => {
            if request.level == AuthLevel::RequiresAdmin && !session.elevated {
                return Decision::NeedsAuth {
                    label: request.label,
                };
            }
            Decision::Run(RunPlan {
                slot: request.slot(),
                label: request.label.clone(),
                icon: RunIcon::Delete,
                command: client.uninstall_command(&request.packages),
                before: Some(Notice::info(format!("deleting {}...", request.label))),
                follow_up: FollowUp::Settle(request),
            })
        }
        (AppState::Installed, Intent::Install) => {
            Decision::Notify(Notice::info(format!("{name} is already installed")))
        }
        (AppState::Installable, Intent::Uninstall) => {
            Decision::Notify(Notice::info(format!("{name} is not installed")))
        }
    }
}

/// Toggle: uninstall what is installed, install anything else.
pub fn primary_intent(session: &Session, name: &str) -> Intent {
    match session.find_app(name).map(|app| session.app_state(app)) {
        Some(AppState::Installed) => Intent::Uninstall,
        _ => Intent::Install,
    }
}

/// Success notice once the installed snapshot was refreshed after a run.
pub fn settle_notice(request: &ActionRequest, installed: &crate::resolver::PackageSet) -> Notice {
    if is_satisfied(&request.packages, installed) {
        Notice::success(format!("{} installed", request.label))
    } else {
        Notice::success(format!("{} deleted", request.label))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDecision {
    /// Add (`bind`) or remove the computer attribute on the binding.
    Mutate {
        key: BindingKey,
        attribute: u64,
        bind: bool,
    },
    Notify(Notice),
}

pub fn decide_device(session: &Session, key: &BindingKey, bind: bool) -> DeviceDecision {
    if session.find_binding(key).is_none() {
        return DeviceDecision::Notify(Notice::warning(format!(
            "{} {} is not in the catalog",
            key.device, key.feature
        )));
    }
    let Some(attribute) = session.cid_attribute else {
        return DeviceDecision::Notify(Notice::error(
            "this computer has no CID attribute on the server",
        ));
    };

    match (session.binding_state(key), bind) {
        (DeviceState::Available, true) | (DeviceState::Assigned, false) => DeviceDecision::Mutate {
            key: key.clone(),
            attribute,
            bind,
        },
        (DeviceState::Assigned, true) => {
            DeviceDecision::Notify(Notice::info(format!("{} is already assigned", key.feature)))
        }
        (DeviceState::Inflicted, _) => DeviceDecision::Notify(Notice::warning(format!(
            "{} is inflicted by policy and cannot be changed here",
            key.feature
        ))),
        (DeviceState::Available, false) => {
            DeviceDecision::Notify(Notice::info(format!("{} is not assigned", key.feature)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::session::tests::{session, set};
    use super::*;
    use crate::model::NoticeLevel;

    fn client() -> MigasfreeClient {
        MigasfreeClient::new("migasfree", "python3")
    }

    fn key(id: u64) -> BindingKey {
        BindingKey {
            device: "PRN-01".into(),
            feature: if id == 1 { "BW".into() } else { "COLOR".into() },
            binding_id: id,
        }
    }

    #[test]
    fn installable_entries_run_the_install_verb() {
        let s = session();
        let Decision::Run(plan) = decide_app(&s, &client(), "Firefox", Intent::Install) else {
            panic!("expected a run");
        };
        assert_eq!(plan.slot, Slot::action("Firefox"));
        assert_eq!(plan.icon, RunIcon::Install);
        assert_eq!(plan.command.args, vec!["-ip", "firefox"]);
        assert_eq!(plan.before, Some(Notice::info("installing Firefox...")));
        assert!(matches!(plan.follow_up, FollowUp::Settle(ref r) if r.packages == ["firefox"]));
    }

    #[test]
    fn locked_entries_report_the_helpdesk() {
        let s = session();
        let decision = decide_app(&s, &client(), "Ghost", Intent::Install);
        assert_eq!(
            decision,
            Decision::Notify(Notice::warning("Ghost not available: Call 555-0100 PC-42"))
        );
    }

    #[test]
    fn admin_entries_need_auth_until_elevated() {
        let mut s = session();
        assert_eq!(
            decide_app(&s, &client(), "GIMP", Intent::Install),
            Decision::NeedsAuth {
                label: "GIMP".into()
            }
        );
        s.elevated = true;
        assert!(matches!(
            decide_app(&s, &client(), "GIMP", Intent::Install),
            Decision::Run(_)
        ));
    }

    #[test]
    fn uninstalling_admin_entries_also_needs_auth() {
        let mut s = session();
        s.installed = set(&["gimp", "gimp-data"]);
        assert!(matches!(
            decide_app(&s, &client(), "GIMP", Intent::Uninstall),
            Decision::NeedsAuth { .. }
        ));
        s.elevated = true;
        let Decision::Run(plan) = decide_app(&s, &client(), "GIMP", Intent::Uninstall) else {
            panic!("expected a run");
        };
        assert_eq!(plan.command.args, vec!["-rp", "gimp gimp-data"]);
        assert_eq!(plan.icon, RunIcon::Delete);
    }

    #[test]
    fn primary_intent_toggles_on_installed_state() {
        let mut s = session();
        assert_eq!(primary_intent(&s, "Firefox"), Intent::Install);
        s.installed = set(&["firefox"]);
        assert_eq!(primary_intent(&s, "Firefox"), Intent::Uninstall);
        let Decision::Notify(n) = decide_app(&s, &client(), "Firefox", Intent::Install) else {
            panic!("expected a notice");
        };
        assert_eq!(n.level, NoticeLevel::Info);
    }

    #[test]
    fn settle_notice_reflects_refreshed_snapshot() {
        let s = session();
        let request = s.find_app("GIMP").expect("app").request();
        assert_eq!(
            settle_notice(&request, &set(&["gimp", "gimp-data"])).text,
            "GIMP installed"
        );
        assert_eq!(settle_notice(&request, &set(&["gimp"])).text, "GIMP deleted");
    }

    #[test]
    fn device_transitions_follow_assignment_state() {
        let mut s = session();
        assert_eq!(
            decide_device(&s, &key(1), true),
            DeviceDecision::Mutate {
                key: key(1),
                attribute: 900,
                bind: true
            }
        );
        assert!(matches!(decide_device(&s, &key(1), false), DeviceDecision::Notify(_)));

        s.assignments.assigned.insert(1);
        s.assignments.inflicted.insert(1);
        s.assignments.inflicted.insert(2);
        assert!(matches!(
            decide_device(&s, &key(1), false),
            DeviceDecision::Mutate { bind: false, .. }
        ));
        let DeviceDecision::Notify(n) = decide_device(&s, &key(2), false) else {
            panic!("inflicted bindings are not revocable");
        };
        assert_eq!(n.level, NoticeLevel::Warning);

        s.cid_attribute = None;
        assert!(matches!(decide_device(&s, &key(1), false), DeviceDecision::Notify(_)));
    }

    #[test]
    fn sync_plan_uses_the_sync_slot() {
        let plan = sync_plan(&client());
        assert!(plan.slot.is_sync());
        assert_eq!(plan.command.args, vec!["-u"]);
        assert_eq!(plan.follow_up, FollowUp::Synced);
    }
}
