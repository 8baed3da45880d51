//! Run transcript: the in-memory history of executed runs and its durable copy.
//!
//! The file is a JSON object keyed by run id (`"_run_<n>"`), each value
//! `{date, icon, header, body}`. It is always rewritten whole.

use crate::model::{RunIcon, RunId, RunRecord};
use anyhow::{Context, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub type History = BTreeMap<RunId, RunRecord>;

/// Ordered run history plus the id counter for new runs.
#[derive(Debug, Default)]
pub struct Transcript {
    records: History,
    last_index: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt recovered records. New ids continue after the highest recovered one.
    pub fn from_records(records: History) -> Self {
        let highest = records.keys().next_back().map(|id| id.0).unwrap_or(0);
        let last_index = highest.max(records.len() as u64);
        Self {
            records,
            last_index,
        }
    }

    /// Create a new, empty record and return its id.
    pub fn open(&mut self, date: String, icon: RunIcon, header: String) -> RunId {
        self.last_index += 1;
        let id = RunId(self.last_index);
        self.records.insert(
            id,
            RunRecord {
                date,
                icon,
                header,
                body: String::new(),
            },
        );
        id
    }

    /// Append markup to a record's body, returning the updated body.
    pub fn append(&mut self, id: RunId, markup: &str) -> Option<&str> {
        let record = self.records.get_mut(&id)?;
        record.body.push_str(markup);
        Some(record.body.as_str())
    }

    pub fn get(&self, id: RunId) -> Option<&RunRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> &History {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Serializes a history in run order with `_run_<n>` keys.
struct KeyedHistory<'a>(&'a History);

impl Serialize for KeyedHistory<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, record) in self.0 {
            map.serialize_entry(&id.key(), record)?;
        }
        map.end()
    }
}

/// Durable copy of the transcript.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    path: PathBuf,
}

impl TranscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored transcript. A missing file is an empty history.
    pub fn load(&self) -> Result<History> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(History::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        parse_history(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    /// Overwrite the stored transcript with `records`.
    pub fn save(&self, records: &History) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = serde_json::to_vec(&KeyedHistory(records)).context("serialize transcript")?;
        // Write-then-rename so a crash mid-write never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), runs = records.len(), "transcript saved");
        Ok(())
    }

    /// Delete the stored transcript. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

fn parse_history(raw: &str) -> Result<History> {
    if raw.trim().is_empty() {
        return Ok(History::new());
    }
    let keyed: BTreeMap<String, RunRecord> = serde_json::from_str(raw)?;
    let mut history = History::new();
    for (key, record) in keyed {
        match RunId::parse_key(&key) {
            Some(id) => {
                history.insert(id, record);
            }
            None => warn!(key = %key, "skipping transcript entry with unrecognised key"),
        }
    }
    Ok(history)
}

/// Startup recovery of the transcript.
///
/// A fresh synchronization session deletes the stored file and starts empty;
/// any other launch adopts what is on disk.
pub fn recover(store: &TranscriptStore, fresh_sync: bool) -> Transcript {
    if fresh_sync {
        match store.reset() {
            Ok(true) => debug!(path = %store.path().display(), "previous transcript removed"),
            Ok(false) => {}
            Err(e) => warn!("could not remove previous transcript: {e:#}"),
        }
        return Transcript::new();
    }
    match store.load() {
        Ok(records) => Transcript::from_records(records),
        Err(e) => {
            warn!("ignoring unreadable transcript: {e:#}");
            Transcript::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> TranscriptStore {
        TranscriptStore::new(dir.path().join("console.json"))
    }

    #[test]
    fn ids_are_sequential_and_bodies_append() {
        let mut t = Transcript::new();
        let a = t.open("d".into(), RunIcon::Sync, "synchronization".into());
        let b = t.open("d".into(), RunIcon::Install, "gimp".into());
        assert_eq!((a, b), (RunId(1), RunId(2)));
        assert_eq!(t.append(a, "one"), Some("one"));
        assert_eq!(t.append(a, "<br />two"), Some("one<br />two"));
        assert_eq!(t.append(RunId(9), "x"), None);
    }

    #[test]
    fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let mut t = Transcript::new();
        for n in 0..12 {
            let id = t.open(format!("2024-01-01 00:00:{n:02}"), RunIcon::Delete, format!("run {n}"));
            t.append(
                id,
                &crate::markup::translate(&format!("\u{1b}[91mline {n}\u{1b}[0m <&>\n")),
            );
        }
        store.save(t.records()).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(&loaded, t.records());
        let ids: Vec<u64> = loaded.keys().map(|id| id.0).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn file_layout_uses_run_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let mut t = Transcript::new();
        let id = t.open("2024-05-01 10:00:00".into(), RunIcon::Sync, "synchronization".into());
        t.append(id, "ok");
        store.save(t.records()).expect("save");

        let raw = std::fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            value["_run_1"],
            serde_json::json!({
                "date": "2024-05-01 10:00:00",
                "icon": "sync",
                "header": "synchronization",
                "body": "ok"
            })
        );
    }

    #[test]
    fn recovered_counter_does_not_collide() {
        let mut records = History::new();
        for n in [1, 2, 5] {
            records.insert(
                RunId(n),
                RunRecord {
                    date: String::new(),
                    icon: RunIcon::Sync,
                    header: String::new(),
                    body: String::new(),
                },
            );
        }
        let mut t = Transcript::from_records(records);
        assert_eq!(t.open(String::new(), RunIcon::Sync, String::new()), RunId(6));
    }

    #[test]
    fn fresh_sync_deletes_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let mut t = Transcript::new();
        t.open("d".into(), RunIcon::Sync, "old".into());
        store.save(t.records()).expect("save");
        assert!(store.path().exists());

        let recovered = recover(&store, true);
        assert!(recovered.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn normal_launch_recovers_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let mut t = Transcript::new();
        t.open("d".into(), RunIcon::Sync, "a".into());
        t.open("d".into(), RunIcon::Install, "b".into());
        store.save(t.records()).expect("save");

        let mut recovered = recover(&store, false);
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.open("d".into(), RunIcon::Sync, "c".into()), RunId(3));
    }

    #[test]
    fn malformed_file_recovers_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").expect("write");
        assert!(store.load().is_err());
        assert!(recover(&store, false).is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(store_in(&dir).load().expect("load").is_empty());
    }
}
