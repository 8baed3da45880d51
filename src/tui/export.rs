use crate::model::{RunId, RunRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

#[derive(Serialize)]
struct RunExport<'a> {
    run: u64,
    #[serde(flatten)]
    record: &'a RunRecord,
    /// Body without markup, for reading outside the console.
    text: String,
}

/// File name for an exported run, e.g. `migasfree-play-run-3-2024-05-01_10-00-00.json`.
fn export_name(id: RunId, record: &RunRecord) -> String {
    let stamp: String = record
        .date
        .chars()
        .map(|c| match c {
            ' ' => '_',
            ':' => '-',
            c if c.is_ascii_alphanumeric() || c == '-' => c,
            _ => '_',
        })
        .collect();
    format!("migasfree-play-run-{}-{}.json", id.0, stamp)
}

/// Export one transcript run as JSON into `dir`.
/// Returns the path of the exported file.
pub fn export_run_json(dir: &Path, id: RunId, record: &RunRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(export_name(id, record));
    let export = RunExport {
        run: id.0,
        record,
        text: crate::markup::to_plain(&record.body),
    };
    let json = serde_json::to_string_pretty(&export).context("serialize run")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Initialize the clipboard manager thread if not already initialized.
/// This creates a background thread that processes clipboard operations sequentially,
/// keeping each clipboard instance alive for a sufficient duration.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        // Clipboard managers on Linux read lazily from the owner.
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Copy text to clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunIcon;

    #[test]
    fn exported_run_carries_markup_and_plain_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = RunRecord {
            date: "2024-05-01 10:00:00".into(),
            icon: RunIcon::Install,
            header: "GIMP".into(),
            body: "<span class='console-section'>done</span><br /><hr />".into(),
        };
        let path = export_run_json(&dir.path().join("exports"), RunId(3), &record).expect("export");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("migasfree-play-run-3-2024-05-01_10-00-00.json")
        );

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["run"], 3);
        assert_eq!(value["header"], "GIMP");
        assert_eq!(value["icon"], "get_app");
        assert_eq!(value["text"], "done\n\n");
    }
}
