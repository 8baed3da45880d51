use crate::resolver::{AppState, DeviceState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sequence number of an executed run within the transcript.
///
/// Persisted as `_run_<n>` keys so transcripts stay readable by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl RunId {
    pub fn key(self) -> String {
        format!("_run_{}", self.0)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        key.strip_prefix("_run_")?.parse().ok().map(RunId)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of the UI element that reflects a run's busy state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(String);

impl Slot {
    pub const SYNC: &'static str = "sync";

    pub fn sync() -> Self {
        Self(Self::SYNC.to_string())
    }

    pub fn action(name: &str) -> Self {
        Self(format!("action-{}", slugify(name)))
    }

    pub fn is_sync(&self) -> bool {
        self.0 == Self::SYNC
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, dash-separated form of a display name (used for slot ids).
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut dash = false;
    for c in value.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '_' {
            if dash && !out.is_empty() {
                out.push('-');
            }
            dash = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' {
            dash = true;
        }
    }
    out
}

/// Kind marker stored with each run; the strings match the icon names the
/// transcript file has always used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunIcon {
    Sync,
    Install,
    Delete,
    Other(String),
}

impl RunIcon {
    pub fn as_str(&self) -> &str {
        match self {
            RunIcon::Sync => "sync",
            RunIcon::Install => "get_app",
            RunIcon::Delete => "delete",
            RunIcon::Other(s) => s,
        }
    }
}

impl From<String> for RunIcon {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sync" => RunIcon::Sync,
            "get_app" => RunIcon::Install,
            "delete" => RunIcon::Delete,
            _ => RunIcon::Other(s),
        }
    }
}

impl From<RunIcon> for String {
    fn from(icon: RunIcon) -> Self {
        icon.as_str().to_string()
    }
}

/// One executed external command and its captured, colour-annotated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub date: String,
    pub icon: RunIcon,
    pub header: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    Unrestricted,
    RequiresAdmin,
}

impl AuthLevel {
    /// Map the catalog's level id (`"U"` user, `"A"` admin).
    pub fn from_level_id(id: &str) -> Self {
        if id.eq_ignore_ascii_case("A") {
            AuthLevel::RequiresAdmin
        } else {
            AuthLevel::Unrestricted
        }
    }
}

/// "Install/uninstall this application": what the UI hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub label: String,
    pub packages: Vec<String>,
    pub level: AuthLevel,
}

impl ActionRequest {
    pub fn new(label: impl Into<String>, packages: Vec<String>, level: AuthLevel) -> Self {
        Self {
            label: label.into(),
            packages,
            level,
        }
    }

    pub fn slot(&self) -> Slot {
        Slot::action(&self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Install,
    Uninstall,
}

/// A logical device binding addressed from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    pub device: String,
    pub feature: String,
    pub binding_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Toast-like message for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    /// Persistent notices stay until replaced by the next one.
    pub persistent: bool,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, text, false)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, text, false)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, text, false)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text, false)
    }

    pub fn persistent_error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text, true)
    }

    fn new(level: NoticeLevel, text: impl Into<String>, persistent: bool) -> Self {
        Self {
            level,
            text: text.into(),
            persistent,
        }
    }
}

/// Resolved application entry, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppView {
    pub name: String,
    pub category: String,
    pub summary: String,
    pub packages: Vec<String>,
    pub level: AuthLevel,
    pub installed: bool,
    pub state: AppState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingView {
    pub key: BindingKey,
    pub name: String,
    pub state: DeviceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    pub name: String,
    pub model: String,
    pub connection: String,
    pub location: Option<String>,
    pub bindings: Vec<BindingView>,
}

/// Computer information shown in the console header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerLabel {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub helpdesk: String,
    #[serde(default)]
    pub server: Option<String>,
}

/// Events emitted by the controller and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Full transcript, sent once at startup (recovered or fresh).
    Transcript(BTreeMap<RunId, RunRecord>),
    RunOpened { id: RunId, record: RunRecord },
    RunOutput { id: RunId, body: String },
    RunClosed { id: RunId },
    SlotBusy { slot: Slot, busy: bool },
    Notice(Notice),
    Label(ComputerLabel),
    Apps(Vec<AppView>),
    Devices(Vec<DeviceView>),
    /// An admin-only entry was triggered without an elevated session.
    AuthRequired { label: String },
    Elevated,
    /// Bring the console to the foreground.
    Raise,
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_keys_round_trip() {
        assert_eq!(RunId(12).key(), "_run_12");
        assert_eq!(RunId::parse_key("_run_12"), Some(RunId(12)));
        assert_eq!(RunId::parse_key("run_12"), None);
        assert_eq!(RunId::parse_key("_run_x"), None);
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  LibreOffice  Writer "), "libreoffice-writer");
        assert_eq!(slugify("HP LaserJet (2nd floor)"), "hp-laserjet-2nd-floor");
        assert_eq!(slugify("a--b"), "a-b");
        assert_eq!(Slot::action("Firefox ESR").to_string(), "action-firefox-esr");
        assert!(Slot::sync().is_sync());
    }

    #[test]
    fn unknown_icons_survive_deserialization() {
        let record: RunRecord =
            serde_json::from_str(r#"{"date":"d","icon":"person","header":"h","body":""}"#)
                .expect("must parse");
        assert_eq!(record.icon, RunIcon::Other("person".into()));
        let back = serde_json::to_value(&record).expect("must serialize");
        assert_eq!(back["icon"], "person");
    }

    #[test]
    fn level_ids_map_to_auth_levels() {
        assert_eq!(AuthLevel::from_level_id("A"), AuthLevel::RequiresAdmin);
        assert_eq!(AuthLevel::from_level_id("U"), AuthLevel::Unrestricted);
    }
}
