use crate::config::Settings;
use crate::model::{
    AppView, BindingView, ComputerLabel, DeviceView, Notice, RunId, RunRecord, Slot, UiEvent,
};
use crate::orchestrator::{CatalogFilter, Window};
use crate::resolver::DeviceState;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// How long a non-persistent notice stays in the status bar.
pub const NOTICE_TTL: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Applications,
    Devices,
    Details,
    Help,
}

impl Tab {
    pub fn title(self) -> &'static str {
        match self {
            Tab::Applications => "Applications",
            Tab::Devices => "Devices",
            Tab::Details => "Details",
            Tab::Help => "Help",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    User,
    Password,
}

/// Credential prompt shown when an admin-only entry is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPrompt {
    pub label: String,
    pub user: String,
    pub password: String,
    pub field: LoginField,
}

impl LoginPrompt {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            user: String::new(),
            password: String::new(),
            field: LoginField::User,
        }
    }

    pub fn input(&mut self) -> &mut String {
        match self.field {
            LoginField::User => &mut self.user,
            LoginField::Password => &mut self.password,
        }
    }

    pub fn toggle_field(&mut self) {
        self.field = match self.field {
            LoginField::User => LoginField::Password,
            LoginField::Password => LoginField::User,
        };
    }
}

pub struct UiState {
    pub tabs: Vec<Tab>,
    pub tab: usize,
    /// The console is on screen. Hidden consoles only track events.
    pub visible: bool,
    pub label: Option<ComputerLabel>,
    pub elevated: bool,

    pub apps: Vec<AppView>,
    pub app_selected: usize,
    pub devices: Vec<DeviceView>,
    /// Index into the flattened binding list.
    pub binding_selected: usize,

    pub transcript: BTreeMap<RunId, RunRecord>,
    /// Index into the transcript, newest first.
    pub run_selected: usize,
    pub detail_scroll: u16,
    pub busy: BTreeSet<Slot>,

    pub notice: Option<(Notice, Instant)>,
    pub info: String,

    pub filter: CatalogFilter,
    pub search_editing: bool,
    pub search_input: String,
    pub login: Option<LoginPrompt>,
    pub last_exported_path: Option<String>,
}

impl UiState {
    pub fn new(settings: &Settings, window: Window, filter: CatalogFilter) -> Self {
        let mut tabs = Vec::new();
        if settings.show_apps_menu {
            tabs.push(Tab::Applications);
        }
        if settings.show_devices_menu {
            tabs.push(Tab::Devices);
        }
        if settings.show_details_menu {
            tabs.push(Tab::Details);
        }
        if settings.show_help_menu || tabs.is_empty() {
            tabs.push(Tab::Help);
        }
        Self {
            tabs,
            tab: 0,
            visible: window == Window::Shown,
            label: None,
            elevated: false,
            apps: Vec::new(),
            app_selected: 0,
            devices: Vec::new(),
            binding_selected: 0,
            transcript: BTreeMap::new(),
            run_selected: 0,
            detail_scroll: 0,
            busy: BTreeSet::new(),
            notice: None,
            info: String::new(),
            search_input: filter.search.clone(),
            filter,
            search_editing: false,
            login: None,
            last_exported_path: None,
        }
    }

    pub fn current_tab(&self) -> Tab {
        self.tabs.get(self.tab).copied().unwrap_or(Tab::Help)
    }

    pub fn next_tab(&mut self) {
        self.tab = (self.tab + 1) % self.tabs.len();
    }

    pub fn prev_tab(&mut self) {
        self.tab = (self.tab + self.tabs.len() - 1) % self.tabs.len();
    }

    /// Switch to `tab` if it is enabled.
    pub fn show_tab(&mut self, tab: Tab) -> bool {
        match self.tabs.iter().position(|t| *t == tab) {
            Some(i) => {
                self.tab = i;
                true
            }
            None => false,
        }
    }

    pub fn selected_app(&self) -> Option<&AppView> {
        self.apps.get(self.app_selected)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&DeviceView, &BindingView)> {
        self.devices
            .iter()
            .flat_map(|d| d.bindings.iter().map(move |b| (d, b)))
    }

    pub fn selected_binding(&self) -> Option<&BindingView> {
        self.bindings().nth(self.binding_selected).map(|(_, b)| b)
    }

    /// Runs newest first.
    pub fn runs(&self) -> impl Iterator<Item = (&RunId, &RunRecord)> {
        self.transcript.iter().rev()
    }

    pub fn selected_run(&self) -> Option<(RunId, &RunRecord)> {
        self.runs()
            .nth(self.run_selected)
            .map(|(id, record)| (*id, record))
    }

    pub fn is_busy(&self, slot: &Slot) -> bool {
        self.busy.contains(slot)
    }

    pub fn move_selection(&mut self, down: bool) {
        let (len, cursor) = match self.current_tab() {
            Tab::Applications => (self.apps.len(), &mut self.app_selected),
            Tab::Devices => {
                let len: usize = self.devices.iter().map(|d| d.bindings.len()).sum();
                (len, &mut self.binding_selected)
            }
            Tab::Details => (self.transcript.len(), &mut self.run_selected),
            Tab::Help => return,
        };
        if down {
            if *cursor + 1 < len {
                *cursor += 1;
            }
        } else {
            *cursor = cursor.saturating_sub(1);
        }
        if self.current_tab() == Tab::Details {
            self.detail_scroll = 0;
        }
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.notice = Some((notice, Instant::now()));
    }

    /// Drop an expired non-persistent notice.
    pub fn expire_notice(&mut self, now: Instant) {
        if let Some((notice, at)) = &self.notice {
            if !notice.persistent && now.duration_since(*at) >= NOTICE_TTL {
                self.notice = None;
            }
        }
    }

    /// Apply a controller event. Returns `true` when the UI should exit.
    pub fn apply(&mut self, ev: UiEvent) -> bool {
        match ev {
            UiEvent::Transcript(records) => {
                self.transcript = records;
                self.run_selected = 0;
            }
            UiEvent::RunOpened { id, record } => {
                self.transcript.insert(id, record);
                // Follow the new run unless the user is browsing older ones.
                if self.run_selected == 0 {
                    self.detail_scroll = 0;
                } else {
                    self.run_selected += 1;
                }
            }
            UiEvent::RunOutput { id, body } => {
                if let Some(record) = self.transcript.get_mut(&id) {
                    record.body = body;
                }
            }
            UiEvent::RunClosed { .. } => {}
            UiEvent::SlotBusy { slot, busy } => {
                if busy {
                    self.busy.insert(slot);
                } else {
                    self.busy.remove(&slot);
                }
            }
            UiEvent::Notice(notice) => self.set_notice(notice),
            UiEvent::Label(label) => self.label = Some(label),
            UiEvent::Apps(apps) => {
                self.apps = apps;
                self.app_selected = self.app_selected.min(self.apps.len().saturating_sub(1));
            }
            UiEvent::Devices(devices) => {
                self.devices = devices;
                let len: usize = self.devices.iter().map(|d| d.bindings.len()).sum();
                self.binding_selected = self.binding_selected.min(len.saturating_sub(1));
            }
            UiEvent::AuthRequired { label } => {
                self.login = Some(LoginPrompt::new(label));
            }
            UiEvent::Elevated => {
                self.elevated = true;
                self.login = None;
                self.info = "administrator session".into();
            }
            UiEvent::Raise => {
                self.visible = true;
                self.show_tab(Tab::Details);
                self.run_selected = 0;
            }
            UiEvent::Exit => return true,
        }
        false
    }

    /// Whether Enter on the selected binding should bind (true) or unbind.
    pub fn binding_toggle(&self) -> Option<bool> {
        self.selected_binding()
            .map(|b| b.state != DeviceState::Assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthLevel, BindingKey, NoticeLevel, RunIcon};
    use crate::resolver::AppState;

    fn record(header: &str) -> RunRecord {
        RunRecord {
            date: "2024-05-01 10:00:00".into(),
            icon: RunIcon::Sync,
            header: header.into(),
            body: String::new(),
        }
    }

    fn state() -> UiState {
        UiState::new(&Settings::default(), Window::Shown, CatalogFilter::default())
    }

    #[test]
    fn tabs_follow_menu_settings() {
        let settings = Settings {
            show_devices_menu: false,
            show_help_menu: false,
            ..Settings::default()
        };
        let s = UiState::new(&settings, Window::Hidden, CatalogFilter::default());
        assert_eq!(s.tabs, vec![Tab::Applications, Tab::Details]);
        assert!(!s.visible);

        let none = Settings {
            show_apps_menu: false,
            show_devices_menu: false,
            show_details_menu: false,
            show_help_menu: false,
            ..Settings::default()
        };
        let s = UiState::new(&none, Window::Shown, CatalogFilter::default());
        assert_eq!(s.tabs, vec![Tab::Help]);
    }

    #[test]
    fn raise_shows_the_console_on_details() {
        let mut s = UiState::new(&Settings::default(), Window::Hidden, CatalogFilter::default());
        assert!(!s.apply(UiEvent::Raise));
        assert!(s.visible);
        assert_eq!(s.current_tab(), Tab::Details);
        assert!(s.apply(UiEvent::Exit));
    }

    #[test]
    fn run_events_update_the_transcript_mirror() {
        let mut s = state();
        s.apply(UiEvent::Transcript(BTreeMap::from([(RunId(1), record("old"))])));
        s.apply(UiEvent::RunOpened {
            id: RunId(2),
            record: record("synchronization"),
        });
        s.apply(UiEvent::RunOutput {
            id: RunId(2),
            body: "ok<br />".into(),
        });
        let (id, rec) = s.selected_run().expect("run");
        assert_eq!(id, RunId(2));
        assert_eq!(rec.body, "ok<br />");

        s.apply(UiEvent::SlotBusy {
            slot: Slot::sync(),
            busy: true,
        });
        assert!(s.is_busy(&Slot::sync()));
        s.apply(UiEvent::SlotBusy {
            slot: Slot::sync(),
            busy: false,
        });
        assert!(s.busy.is_empty());
    }

    #[test]
    fn notices_expire_unless_persistent() {
        let mut s = state();
        s.apply(UiEvent::Notice(Notice::info("synchronizing...")));
        let later = Instant::now() + NOTICE_TTL;
        s.expire_notice(later);
        assert!(s.notice.is_none());

        s.apply(UiEvent::Notice(Notice::persistent_error("error: 1 migasfree -u")));
        s.expire_notice(later + NOTICE_TTL);
        let (notice, _) = s.notice.as_ref().expect("kept");
        assert_eq!(notice.level, NoticeLevel::Error);
    }

    #[test]
    fn selection_is_clamped_to_lists() {
        let mut s = state();
        let app = |name: &str| AppView {
            name: name.into(),
            category: String::new(),
            summary: String::new(),
            packages: vec![name.into()],
            level: AuthLevel::Unrestricted,
            installed: false,
            state: AppState::Installable,
        };
        s.apply(UiEvent::Apps(vec![app("a"), app("b")]));
        s.move_selection(true);
        s.move_selection(true);
        assert_eq!(s.app_selected, 1);
        s.apply(UiEvent::Apps(vec![app("a")]));
        assert_eq!(s.selected_app().map(|a| a.name.as_str()), Some("a"));

        s.show_tab(Tab::Devices);
        s.apply(UiEvent::Devices(vec![DeviceView {
            name: "Reception".into(),
            model: String::new(),
            connection: String::new(),
            location: None,
            bindings: vec![BindingView {
                key: BindingKey {
                    device: "PRN-01".into(),
                    feature: "BW".into(),
                    binding_id: 1,
                },
                name: "BW".into(),
                state: DeviceState::Assigned,
            }],
        }]));
        s.move_selection(true);
        assert_eq!(s.binding_selected, 0);
        assert_eq!(s.binding_toggle(), Some(false));
    }

    #[test]
    fn auth_prompt_opens_and_closes_on_elevation() {
        let mut s = state();
        s.apply(UiEvent::AuthRequired {
            label: "GIMP".into(),
        });
        let prompt = s.login.as_mut().expect("prompt");
        prompt.input().push_str("ana");
        prompt.toggle_field();
        prompt.input().push_str("secret");
        assert_eq!(prompt.user, "ana");
        assert_eq!(prompt.password, "secret");
        s.apply(UiEvent::Elevated);
        assert!(s.login.is_none() && s.elevated);
    }
}
