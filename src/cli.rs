use crate::client::MigasfreeClient;
use crate::config::{AppPaths, Settings};
use crate::model::{NoticeLevel, RunId, UiEvent};
use crate::orchestrator::{
    self, run_controller, CatalogFilter, ControllerConfig, IdentityOverrides, UiCommand, Window,
};
use crate::resolver::Visibility;
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "migasfree-play",
    version,
    about = "Software and device self-service console for migasfree clients"
)]
pub struct Cli {
    /// migasfree server (host[:port]); discovered from the client when omitted
    #[arg(long)]
    pub server: Option<String>,

    /// Synchronize now and every sync interval; exit after a successful hidden sync
    #[arg(long, conflicts_with = "list")]
    pub sync: bool,

    /// Print the resolved catalog and exit (no TUI)
    #[arg(long)]
    pub list: bool,

    /// With --list: print JSON instead of text
    #[arg(long, requires = "list")]
    pub json: bool,

    /// migasfree client program
    #[arg(long, default_value = "migasfree")]
    pub client: String,

    /// Python interpreter used for client queries
    #[arg(long, default_value = "python3")]
    pub python: String,

    /// Computer uuid (overrides discovery)
    #[arg(long)]
    pub uuid: Option<String>,

    /// Project name (overrides discovery)
    #[arg(long)]
    pub project: Option<String>,

    /// Graphic user name (overrides discovery)
    #[arg(long)]
    pub user: Option<String>,

    /// Directory for settings, transcript, token and log
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Catalog search text
    #[arg(long, default_value = "")]
    pub search: String,

    /// Catalog category id (0 = all)
    #[arg(long)]
    pub category: Option<u64>,

    /// Only show installed applications
    #[arg(long)]
    pub only_installed: bool,

    /// Only show devices assigned to this computer
    #[arg(long)]
    pub only_assigned: bool,

    /// Time between scheduled synchronizations (defaults to the settings file, 24h)
    #[arg(long)]
    pub sync_interval: Option<humantime::Duration>,

    /// Timeout for server requests
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,
}

impl Cli {
    fn filter(&self) -> CatalogFilter {
        CatalogFilter {
            search: self.search.clone(),
            category: self.category,
            visibility: Visibility {
                only_installed: self.only_installed,
                only_assigned: self.only_assigned,
            },
        }
    }

    fn overrides(&self) -> IdentityOverrides {
        IdentityOverrides {
            server: self.server.clone(),
            uuid: self.uuid.clone(),
            project: self.project.clone(),
            user: self.user.clone(),
        }
    }
}

/// Whether the console would take over the terminal for this invocation.
fn wants_tui(args: &Cli) -> bool {
    cfg!(feature = "tui") && !args.list && std::io::stdout().is_terminal()
}

/// Route logs to the data directory while the console owns the terminal.
fn init_logging(paths: &AppPaths, to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if to_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(paths.log())
        {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .try_init();
                return;
            }
            Err(e) => eprintln!("log_file_error: {e}"),
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(args: Cli) -> Result<()> {
    let paths = AppPaths::resolve(args.data_dir.as_deref())?;
    paths.ensure()?;
    let tui = wants_tui(&args);
    init_logging(&paths, tui);

    let settings = Settings::load_or_init(&paths.settings()).unwrap_or_else(|e| {
        warn!("using default settings: {e:#}");
        Settings::default()
    });

    if args.list {
        return run_list(&args, &paths).await;
    }

    let window = if args.sync && !settings.show_sync_details {
        Window::Hidden
    } else {
        Window::Shown
    };
    let cfg = ControllerConfig {
        client: MigasfreeClient::new(&args.client, &args.python),
        paths,
        overrides: args.overrides(),
        request_timeout: Duration::from(args.request_timeout),
        sync_mode: args.sync,
        sync_interval: args
            .sync_interval
            .map(Duration::from)
            .unwrap_or(settings.sync_interval),
        window,
        filter: args.filter(),
    };
    info!(
        sync = cfg.sync_mode,
        window = ?cfg.window,
        data_dir = %cfg.paths.root().display(),
        "starting"
    );

    if tui {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(cfg, settings).await;
        }
    }
    run_headless(cfg).await
}

/// Controller without a console: notices go to stderr, finished runs to stdout.
async fn run_headless(cfg: ControllerConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<UiEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let handle = tokio::spawn(run_controller(cfg, evt_tx, cmd_rx));

    let quit_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(UiCommand::Quit);
        }
    });

    let mut bodies: BTreeMap<RunId, String> = BTreeMap::new();
    while let Some(ev) = evt_rx.recv().await {
        match ev {
            UiEvent::RunOpened { id, record } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "== {} {} ({}) ==",
                    record.date, record.header, id
                )));
                bodies.insert(id, record.body);
            }
            UiEvent::RunOutput { id, body } => {
                if let Some(entry) = bodies.get_mut(&id) {
                    *entry = body;
                }
            }
            UiEvent::RunClosed { id } => {
                if let Some(body) = bodies.remove(&id) {
                    for line in crate::markup::to_plain(&body).lines() {
                        let _ = out_tx.send(OutputLine::Stdout(line.to_string()));
                    }
                }
            }
            UiEvent::Notice(notice) => {
                let tag = match notice.level {
                    NoticeLevel::Info => "info",
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Warning => "warning",
                    NoticeLevel::Error => "error",
                };
                let _ = out_tx.send(OutputLine::Stderr(format!("[{tag}] {}", notice.text)));
            }
            UiEvent::Label(label) => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "{} (CID-{}) {}",
                    label.name, label.id, label.helpdesk
                )));
            }
            UiEvent::AuthRequired { label } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "{label} requires administrator credentials"
                )));
            }
            UiEvent::Raise => {
                info!("console raise requested without a terminal");
            }
            UiEvent::Exit => break,
            UiEvent::Transcript(_)
            | UiEvent::SlotBusy { .. }
            | UiEvent::Apps(_)
            | UiEvent::Devices(_)
            | UiEvent::Elevated => {}
        }
    }

    drop(cmd_tx);
    handle.await.context("controller task failed")??;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// One-shot catalog listing.
async fn run_list(args: &Cli, paths: &AppPaths) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let client = MigasfreeClient::new(&args.client, &args.python);
    let listing = orchestrator::list_catalog(
        &client,
        &args.overrides(),
        &paths.token(),
        Duration::from(args.request_timeout),
        &args.filter(),
    )
    .await?;

    if args.json {
        let out = serde_json::to_string_pretty(&listing)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&listing).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
