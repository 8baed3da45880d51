use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Files the console keeps in its data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// `override_dir`, else `<local data dir>/migasfree-play`.
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self> {
        let root = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::data_local_dir()
                .context("no local data directory for this user")?
                .join("migasfree-play"),
        };
        Ok(Self { root })
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("create {}", self.root.display()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn transcript(&self) -> PathBuf {
        self.root.join("console.json")
    }

    pub fn token(&self) -> PathBuf {
        self.root.join("token")
    }

    pub fn log(&self) -> PathBuf {
        self.root.join("migasfree-play.log")
    }

    pub fn exports(&self) -> PathBuf {
        self.root.join("exports")
    }
}

fn enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    DAY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Show the console while an unattended sync runs.
    #[serde(default)]
    pub show_sync_details: bool,
    #[serde(default = "enabled")]
    pub show_apps_menu: bool,
    #[serde(default = "enabled")]
    pub show_devices_menu: bool,
    #[serde(default = "enabled")]
    pub show_details_menu: bool,
    #[serde(default = "enabled")]
    pub show_help_menu: bool,
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub sync_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_sync_details: false,
            show_apps_menu: true,
            show_devices_menu: true,
            show_details_menu: true,
            show_help_menu: true,
            sync_interval: DAY,
        }
    }
}

impl Settings {
    /// Load settings, filling missing keys with defaults.
    ///
    /// The file is (re)written whenever it is missing or incomplete. An
    /// unreadable file is reported and replaced by defaults in memory only.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };

        let Some(raw) = raw else {
            let settings = Settings::default();
            settings.save(path)?;
            info!(path = %path.display(), "default settings written");
            return Ok(settings);
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), "ignoring malformed settings: {e}");
                return Ok(Settings::default());
            }
        };
        let settings: Settings = match serde_json::from_value(value.clone()) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), "ignoring invalid settings: {e}");
                return Ok(Settings::default());
            }
        };

        let complete = serde_json::to_value(&settings)
            .ok()
            .and_then(|full| full.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>()))
            .map(|keys| keys.iter().all(|k| value.get(k).is_some()))
            .unwrap_or(true);
        if !complete {
            settings.save(path)?;
            info!(path = %path.display(), "settings completed with defaults");
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let settings = Settings::load_or_init(&path).expect("load");
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
    }

    #[test]
    fn missing_keys_are_filled_and_written_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"show_sync_details": true}"#).expect("write");

        let settings = Settings::load_or_init(&path).expect("load");
        assert!(settings.show_sync_details);
        assert!(settings.show_apps_menu);
        assert_eq!(settings.sync_interval, DAY);

        let rewritten: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(rewritten["show_help_menu"], true);
        assert_eq!(rewritten["sync_interval"], "1day");
    }

    #[test]
    fn interval_accepts_humantime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sync_interval": "6h"}"#).expect("write");
        let settings = Settings::load_or_init(&path).expect("load");
        assert_eq!(settings.sync_interval, Duration::from_secs(6 * 3600));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{oops").expect("write");
        assert_eq!(Settings::load_or_init(&path).expect("load"), Settings::default());
    }

    #[test]
    fn paths_live_under_the_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::resolve(Some(dir.path())).expect("paths");
        assert_eq!(paths.transcript(), dir.path().join("console.json"));
        assert_eq!(paths.token(), dir.path().join("token"));
    }
}
