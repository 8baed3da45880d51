//! Single-flight runner for external package-manager commands.
//!
//! At most one run is open at a time. A run is started in two steps:
//! [`ProcessRunner::begin`] takes the lock and opens the transcript record,
//! [`ProcessRunner::launch`] spawns the child. Anything the caller does between
//! the two happens strictly before the process exists.
//!
//! Output arrives as [`ProcessEvent`]s on the channel handed to the runner and
//! is fed back through [`ProcessRunner::handle`], which keeps all transcript
//! mutation on the caller's task.

mod command;
mod stream;

pub use command::{capture, CommandSpec};

use crate::markup::{self, AnsiTranslator, SEPARATOR};
use crate::model::{RunIcon, RunId, Slot};
use crate::transcript::{Transcript, TranscriptStore};
use bytes::{Bytes, BytesMut};
use stream::Utf8Stream;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("please wait, other process is running!!!")]
    Busy { slot: Slot },
    #[error("failed to start {command}: {source}")]
    Spawn {
        id: RunId,
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw output and lifecycle of the spawned child.
#[derive(Debug)]
pub enum ProcessEvent {
    Stdout { id: RunId, bytes: Bytes },
    Stderr { id: RunId, bytes: Bytes },
    Exited { id: RunId, code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Exit code 0 with something written to stderr.
    SoftFailure { stderr: String },
    /// Non-zero exit code, or no exit code at all (killed by a signal).
    HardFailure { code: Option<i32> },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Exit code 0 is only a success when stderr stayed empty.
pub fn classify(code: Option<i32>, stderr: &str) -> RunOutcome {
    match code {
        Some(0) if stderr.is_empty() => RunOutcome::Success,
        Some(0) => RunOutcome::SoftFailure {
            stderr: stderr.to_string(),
        },
        code => RunOutcome::HardFailure { code },
    }
}

/// Everything the caller needs once a run has been finalized.
#[derive(Debug)]
pub struct RunCompletion<T> {
    pub id: RunId,
    pub slot: Slot,
    pub label: String,
    pub command: String,
    pub outcome: RunOutcome,
    /// Caller payload, handed back untouched.
    pub after: T,
}

#[derive(Debug)]
pub enum RunUpdate<T> {
    /// The open record's body changed.
    Output { id: RunId, body: String },
    Finished(RunCompletion<T>),
    /// Event for a run that is no longer open.
    Ignored,
}

/// Proof that the lock is held and a record is open. Consumed by `launch`.
#[must_use = "a permit holds the runner lock until launched"]
#[derive(Debug)]
pub struct RunPermit {
    id: RunId,
}

impl RunPermit {
    pub fn id(&self) -> RunId {
        self.id
    }
}

struct OpenRun<T> {
    id: RunId,
    slot: Slot,
    label: String,
    command: String,
    stdout: Utf8Stream,
    stderr_text: Utf8Stream,
    markup: AnsiTranslator,
    stderr_markup: AnsiTranslator,
    stderr: String,
    after: Option<T>,
}

pub struct ProcessRunner<T> {
    transcript: Transcript,
    store: TranscriptStore,
    open: Option<OpenRun<T>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl<T> ProcessRunner<T> {
    pub fn new(
        transcript: Transcript,
        store: TranscriptStore,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self {
            transcript,
            store,
            open: None,
            events,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.open.is_some()
    }

    pub fn busy_slot(&self) -> Option<&Slot> {
        self.open.as_ref().map(|run| &run.slot)
    }

    /// Take the lock and open a new record. Rejected outright while busy.
    pub fn begin(
        &mut self,
        slot: Slot,
        label: &str,
        icon: RunIcon,
    ) -> Result<RunPermit, RunnerError> {
        if let Some(run) = &self.open {
            debug!(slot = %slot, busy_slot = %run.slot, "run rejected, runner busy");
            return Err(RunnerError::Busy {
                slot: run.slot.clone(),
            });
        }
        let id = self.transcript.open(timestamp(), icon, label.to_string());
        self.open = Some(OpenRun {
            id,
            slot,
            label: label.to_string(),
            command: String::new(),
            stdout: Utf8Stream::new(),
            stderr_text: Utf8Stream::new(),
            markup: AnsiTranslator::new(),
            stderr_markup: AnsiTranslator::new(),
            stderr: String::new(),
            after: None,
        });
        Ok(RunPermit { id })
    }

    /// Spawn the command for an open record.
    ///
    /// A spawn failure finalizes the record and releases the lock.
    pub fn launch(
        &mut self,
        permit: RunPermit,
        spec: &CommandSpec,
        after: T,
    ) -> Result<RunId, RunnerError> {
        let id = permit.id;
        let command = spec.to_string();
        if let Some(run) = self.open.as_mut().filter(|run| run.id == id) {
            run.command = command.clone();
            run.after = Some(after);
        }

        match spec.to_command().spawn() {
            Ok(child) => {
                info!(run_id = id.0, command = %command, "process started");
                tokio::spawn(pump(id, child, spec.stdin.clone(), self.events.clone()));
                Ok(id)
            }
            Err(source) => {
                warn!(run_id = id.0, command = %command, "spawn failed: {source}");
                self.transcript
                    .append(id, &markup::stderr_span(&format!("{source}\n")));
                self.open = None;
                self.persist(id);
                Err(RunnerError::Spawn {
                    id,
                    command,
                    source,
                })
            }
        }
    }

    pub fn handle(&mut self, event: ProcessEvent) -> RunUpdate<T> {
        let id = match &event {
            ProcessEvent::Stdout { id, .. }
            | ProcessEvent::Stderr { id, .. }
            | ProcessEvent::Exited { id, .. } => *id,
        };
        let Some(run) = self.open.as_mut().filter(|run| run.id == id) else {
            debug!(run_id = id.0, "event for closed run ignored");
            return RunUpdate::Ignored;
        };

        let appended = match event {
            ProcessEvent::Stdout { bytes, .. } => {
                let text = run.stdout.push(&bytes);
                run.markup.push(&text)
            }
            ProcessEvent::Stderr { bytes, .. } => {
                let text = run.stderr_text.push(&bytes);
                run.stderr.push_str(&text);
                let translated = run.stderr_markup.push_balanced(&text);
                if translated.is_empty() {
                    String::new()
                } else {
                    markup::stderr_wrap(&translated)
                }
            }
            ProcessEvent::Exited { code, .. } => return self.finish(id, code),
        };

        if appended.is_empty() {
            return RunUpdate::Ignored;
        }
        match self.transcript.append(id, &appended) {
            Some(body) => RunUpdate::Output {
                id,
                body: body.to_string(),
            },
            None => RunUpdate::Ignored,
        }
    }

    fn finish(&mut self, id: RunId, code: Option<i32>) -> RunUpdate<T> {
        let Some(mut run) = self.open.take() else {
            return RunUpdate::Ignored;
        };

        let mut tail = run.markup.push(&run.stdout.finish());
        tail.push_str(&run.markup.finish());
        let rest = run.stderr_text.finish();
        run.stderr.push_str(&rest);
        let mut err = run.stderr_markup.push_balanced(&rest);
        err.push_str(&run.stderr_markup.finish_balanced());
        if !err.is_empty() {
            tail.push_str(&markup::stderr_wrap(&err));
        }
        self.transcript.append(id, &tail);

        let outcome = classify(code, &run.stderr);
        info!(
            run_id = id.0,
            slot = %run.slot,
            exit_code = ?code,
            success = outcome.is_success(),
            "process finished"
        );

        self.persist(id);
        match run.after {
            Some(after) => RunUpdate::Finished(RunCompletion {
                id,
                slot: run.slot,
                label: run.label,
                command: run.command,
                outcome,
                after,
            }),
            None => RunUpdate::Ignored,
        }
    }

    /// Append the separator and write the whole transcript out.
    fn persist(&mut self, id: RunId) {
        self.transcript.append(id, SEPARATOR);
        if let Err(e) = self.store.save(self.transcript.records()) {
            warn!(run_id = id.0, "could not persist transcript: {e:#}");
        }
    }
}

/// Local wall-clock time in the transcript's `yyyy-mm-dd HH:MM:SS` form.
pub fn timestamp() -> String {
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&format).unwrap_or_default()
}

async fn pump(
    id: RunId,
    mut child: Child,
    input: Option<String>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let feed = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(run_id = id.0, "stdin closed early: {e}");
            }
        }
    };
    tokio::join!(
        feed,
        forward(stdout, &events, |bytes| ProcessEvent::Stdout { id, bytes }),
        forward(stderr, &events, |bytes| ProcessEvent::Stderr { id, bytes }),
    );

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(run_id = id.0, "wait failed: {e}");
            None
        }
    };
    let _ = events.send(ProcessEvent::Exited { id, code });
}

async fn forward<R, F>(reader: Option<R>, events: &mpsc::UnboundedSender<ProcessEvent>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(Bytes) -> ProcessEvent,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if events.send(wrap(buf.split().freeze())).is_err() {
                    break;
                }
                buf.reserve(READ_CHUNK);
            }
            Err(e) => {
                debug!("output stream closed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_and_stderr_matrix() {
        assert_eq!(classify(Some(0), ""), RunOutcome::Success);
        assert_eq!(
            classify(Some(0), "boom"),
            RunOutcome::SoftFailure {
                stderr: "boom".into()
            }
        );
        assert_eq!(classify(Some(7), ""), RunOutcome::HardFailure { code: Some(7) });
        assert_eq!(classify(Some(7), "boom"), RunOutcome::HardFailure { code: Some(7) });
        assert_eq!(classify(None, ""), RunOutcome::HardFailure { code: None });
    }

    fn runner_in(
        dir: &tempfile::TempDir,
    ) -> (
        ProcessRunner<&'static str>,
        mpsc::UnboundedReceiver<ProcessEvent>,
        TranscriptStore,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = TranscriptStore::new(dir.path().join("console.json"));
        (ProcessRunner::new(Transcript::new(), store.clone(), tx), rx, store)
    }

    async fn drive(
        runner: &mut ProcessRunner<&'static str>,
        rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    ) -> (RunCompletion<&'static str>, usize) {
        let mut outputs = 0;
        while let Some(event) = rx.recv().await {
            match runner.handle(event) {
                RunUpdate::Output { .. } => outputs += 1,
                RunUpdate::Finished(done) => return (done, outputs),
                RunUpdate::Ignored => {}
            }
        }
        panic!("event channel closed before the run finished");
    }

    fn bash(script: &str) -> CommandSpec {
        CommandSpec::new("bash").arg("-c").arg(script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_streams_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::sync(), "synchronization", RunIcon::Sync)
            .expect("idle runner");
        let id = runner
            .launch(permit, &bash("printf '\\033[92mok\\033[0m\\n'"), "after-sync")
            .expect("spawn");
        assert!(runner.is_busy());

        let (done, outputs) = drive(&mut runner, &mut rx).await;
        assert_eq!(done.id, id);
        assert_eq!(done.outcome, RunOutcome::Success);
        assert_eq!(done.after, "after-sync");
        assert!(outputs >= 1);
        assert!(!runner.is_busy());

        let body = &runner.transcript().get(id).expect("record").body;
        assert_eq!(body, "<span class='console-section'>ok</span><br /><hr />");
        let saved = store.load().expect("load");
        assert_eq!(saved.get(&id).map(|r| r.body.as_str()), Some(body.as_str()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_run_is_rejected_while_one_is_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, _store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::action("gimp"), "gimp", RunIcon::Install)
            .expect("idle runner");
        runner
            .launch(permit, &bash("sleep 0.2"), "first")
            .expect("spawn");

        let err = runner
            .begin(Slot::sync(), "synchronization", RunIcon::Sync)
            .expect_err("runner is busy");
        assert!(matches!(err, RunnerError::Busy { ref slot } if slot == &Slot::action("gimp")));
        assert_eq!(err.to_string(), "please wait, other process is running!!!");
        assert_eq!(runner.transcript().len(), 1);

        let (done, _) = drive(&mut runner, &mut rx).await;
        assert_eq!(done.after, "first");
        assert!(runner.begin(Slot::sync(), "synchronization", RunIcon::Sync).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_makes_a_zero_exit_a_soft_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, _store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::action("vlc"), "vlc", RunIcon::Install)
            .expect("idle runner");
        let id = runner
            .launch(permit, &bash("echo out; echo boom >&2"), "x")
            .expect("spawn");

        let (done, _) = drive(&mut runner, &mut rx).await;
        assert_eq!(
            done.outcome,
            RunOutcome::SoftFailure {
                stderr: "boom\n".into()
            }
        );
        let body = &runner.transcript().get(id).expect("record").body;
        assert!(body.contains("<span class='red'>boom<br /></span>"));
        assert!(body.ends_with(SEPARATOR));
    }

    #[test]
    fn stderr_escape_split_across_reads_renders_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, _rx, _store) = runner_in(&dir);
        let id = runner
            .begin(Slot::action("vlc"), "vlc", RunIcon::Install)
            .expect("idle runner")
            .id();

        let events = [
            ProcessEvent::Stdout {
                id,
                bytes: Bytes::from_static(b"\x1b[92mok\x1b[0m\n"),
            },
            ProcessEvent::Stderr {
                id,
                bytes: Bytes::from_static(b"\x1b[9"),
            },
            ProcessEvent::Stderr {
                id,
                bytes: Bytes::from_static(b"1mboom\x1b[0m\n"),
            },
            ProcessEvent::Exited { id, code: Some(0) },
        ];
        for event in events {
            runner.handle(event);
        }

        let body = &runner.transcript().get(id).expect("record").body;
        assert_eq!(
            body,
            "<span class='console-section'>ok</span><br />\
             <span class='red'><span class='console-error'>boom</span><br /></span><hr />"
        );
        assert_eq!(markup::to_plain(body), "ok\nboom\n\n");
        assert!(!runner.is_busy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_hard_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, _store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::sync(), "synchronization", RunIcon::Sync)
            .expect("idle runner");
        runner.launch(permit, &bash("exit 7"), "x").expect("spawn");

        let (done, _) = drive(&mut runner, &mut rx).await;
        assert_eq!(done.outcome, RunOutcome::HardFailure { code: Some(7) });
        assert_eq!(done.command, "bash -c 'exit 7'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_is_fed_to_the_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, _store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::action("gimp"), "gimp", RunIcon::Install)
            .expect("idle runner");
        let id = runner
            .launch(permit, &bash("read answer; echo \"answer=$answer\"").stdin("y\n"), "x")
            .expect("spawn");

        let (done, _) = drive(&mut runner, &mut rx).await;
        assert!(done.outcome.is_success());
        let body = &runner.transcript().get(id).expect("record").body;
        assert!(body.starts_with("answer=y<br />"));
    }

    #[tokio::test]
    async fn spawn_failure_releases_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, _rx, store) = runner_in(&dir);

        let permit = runner
            .begin(Slot::sync(), "synchronization", RunIcon::Sync)
            .expect("idle runner");
        let err = runner
            .launch(permit, &CommandSpec::new("no-such-program-1337"), "x")
            .expect_err("spawn fails");
        assert!(matches!(err, RunnerError::Spawn { .. }));
        assert!(!runner.is_busy());
        assert_eq!(store.load().expect("load").len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sequential_runs_reload_losslessly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut runner, mut rx, store) = runner_in(&dir);

        for n in 0..3 {
            let permit = runner
                .begin(Slot::sync(), "synchronization", RunIcon::Sync)
                .expect("idle runner");
            runner
                .launch(permit, &bash(&format!("printf 'run {n}\\n\\033[91merr\\033[0m\\n'")), "x")
                .expect("spawn");
            drive(&mut runner, &mut rx).await;
        }

        let reloaded = store.load().expect("load");
        assert_eq!(reloaded.len(), 3);
        assert_eq!(&reloaded, runner.transcript().records());
    }
}
