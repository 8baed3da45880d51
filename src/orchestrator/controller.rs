//! Session controller.
//!
//! Owns the runner and the session, turns UI commands into runs or catalog
//! mutations, and emits events for presentation layers.

use super::dispatcher::{
    decide_app, decide_device, on_demand_notice, primary_intent, settle_notice, sync_plan,
    Decision, DeviceDecision, FollowUp, RunPlan,
};
use super::loader::{self, Bootstrap, IdentityOverrides};
use super::post_process::{process_run_completion, Refresh};
use super::session::{CatalogApp, CatalogDevice, CatalogFilter, Session, Window};
use crate::catalog::{CatalogClient, CatalogError};
use crate::client::MigasfreeClient;
use crate::config::AppPaths;
use crate::model::{ActionRequest, BindingKey, Intent, Notice, UiEvent};
use crate::resolver::{AssignmentSnapshot, PackageSet};
use crate::runner::{ProcessEvent, ProcessRunner, RunUpdate, RunnerError};
use crate::transcript::{self, TranscriptStore};
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Install(String),
    Uninstall(String),
    /// Install or uninstall, whichever the entry's state calls for.
    Activate(String),
    Sync,
    BindDevice(BindingKey),
    UnbindDevice(BindingKey),
    Elevate { user: String, password: String },
    OnDemand(String),
    Refresh(CatalogFilter),
    Quit,
}

/// Settings the controller runs with.
#[derive(Debug, Clone)]
pub(crate) struct ControllerConfig {
    pub client: MigasfreeClient,
    pub paths: AppPaths,
    pub overrides: IdentityOverrides,
    pub request_timeout: Duration,
    /// Unattended mode: fresh transcript, sync right away.
    pub sync_mode: bool,
    pub sync_interval: Duration,
    pub window: Window,
    pub filter: CatalogFilter,
}

/// Results of background tasks, fed back into the loop.
enum Internal {
    Bootstrapped(Result<Bootstrap>),
    /// Replies carry the generation of the refresh that asked for them.
    Apps {
        generation: u64,
        result: Result<Vec<CatalogApp>, CatalogError>,
    },
    Devices {
        generation: u64,
        result: Result<Vec<CatalogDevice>, CatalogError>,
    },
    Assignments(Result<AssignmentSnapshot, CatalogError>),
    Available(Result<PackageSet>),
    Installed {
        result: Result<PackageSet>,
        settle: Option<ActionRequest>,
    },
    DeviceChanged {
        key: BindingKey,
        bind: bool,
        result: Result<(), CatalogError>,
    },
    Elevation(Result<bool>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Controller {
    cfg: ControllerConfig,
    events: UnboundedSender<UiEvent>,
    internal: UnboundedSender<Internal>,
    session: Session,
    runner: ProcessRunner<FollowUp>,
    catalog: Option<CatalogClient>,
    /// Bumped on every catalog refresh; older replies are dropped.
    catalog_generation: u64,
    /// The UI went away; exit as soon as no run is open.
    detached: bool,
}

impl Controller {
    fn new(
        cfg: ControllerConfig,
        events: UnboundedSender<UiEvent>,
    ) -> (
        Self,
        UnboundedReceiver<ProcessEvent>,
        UnboundedReceiver<Internal>,
    ) {
        let store = TranscriptStore::new(cfg.paths.transcript());
        let recovered = transcript::recover(&store, cfg.sync_mode);
        let _ = events.send(UiEvent::Transcript(recovered.records().clone()));

        let (proc_tx, proc_rx) = mpsc::unbounded_channel::<ProcessEvent>();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel::<Internal>();
        let ctl = Controller {
            session: Session::new(cfg.window, cfg.filter.clone()),
            runner: ProcessRunner::new(recovered, store, proc_tx),
            cfg,
            events,
            internal: internal_tx,
            catalog: None,
            catalog_generation: 0,
            detached: false,
        };
        (ctl, proc_rx, internal_rx)
    }

    fn bootstrap(&self) {
        let client = self.cfg.client.clone();
        let overrides = self.cfg.overrides.clone();
        let token = self.cfg.paths.token();
        let timeout = self.cfg.request_timeout;
        self.spawn_internal(async move {
            Internal::Bootstrapped(loader::bootstrap(&client, &overrides, &token, timeout).await)
        });
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }

    fn notify(&self, notice: Notice) {
        debug!(level = ?notice.level, text = %notice.text, "notice");
        self.emit(UiEvent::Notice(notice));
    }

    fn raise(&mut self) {
        self.session.window = Window::Shown;
        self.emit(UiEvent::Raise);
    }

    fn spawn_internal<F>(&self, fut: F)
    where
        F: Future<Output = Internal> + Send + 'static,
    {
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    fn publish_apps(&self) {
        self.emit(UiEvent::Apps(self.session.app_views()));
    }

    fn publish_devices(&self) {
        self.emit(UiEvent::Devices(self.session.device_views()));
    }

    fn start(&mut self, plan: RunPlan) {
        let permit = match self.runner.begin(plan.slot.clone(), &plan.label, plan.icon.clone()) {
            Ok(permit) => permit,
            Err(e) => {
                self.notify(Notice::warning(e.to_string()));
                return;
            }
        };
        let id = permit.id();
        if let Some(record) = self.runner.transcript().get(id) {
            self.emit(UiEvent::RunOpened {
                id,
                record: record.clone(),
            });
        }
        self.emit(UiEvent::SlotBusy {
            slot: plan.slot.clone(),
            busy: true,
        });
        if let Some(before) = plan.before {
            self.notify(before);
        }

        if let Err(e) = self.runner.launch(permit, &plan.command, plan.follow_up) {
            if let Some(record) = self.runner.transcript().get(id) {
                self.emit(UiEvent::RunOutput {
                    id,
                    body: record.body.clone(),
                });
            }
            self.emit(UiEvent::RunClosed { id });
            self.emit(UiEvent::SlotBusy {
                slot: plan.slot,
                busy: false,
            });
            self.notify(Notice::persistent_error(e.to_string()));
            self.raise();
        }
    }

    fn decide(&mut self, decision: Decision) {
        match decision {
            Decision::Run(plan) => self.start(plan),
            Decision::NeedsAuth { label } => self.emit(UiEvent::AuthRequired { label }),
            Decision::Notify(notice) => self.notify(notice),
        }
    }

    fn on_command(&mut self, cmd: UiCommand) -> Flow {
        match cmd {
            UiCommand::Install(name) => {
                let d = decide_app(&self.session, &self.cfg.client, &name, Intent::Install);
                self.decide(d);
            }
            UiCommand::Uninstall(name) => {
                let d = decide_app(&self.session, &self.cfg.client, &name, Intent::Uninstall);
                self.decide(d);
            }
            UiCommand::Activate(name) => {
                let intent = primary_intent(&self.session, &name);
                let d = decide_app(&self.session, &self.cfg.client, &name, intent);
                self.decide(d);
            }
            UiCommand::Sync => self.start(sync_plan(&self.cfg.client)),
            UiCommand::BindDevice(key) => self.change_device(&key, true),
            UiCommand::UnbindDevice(key) => self.change_device(&key, false),
            UiCommand::Elevate { user, password } => {
                let client = self.cfg.client.clone();
                self.spawn_internal(async move {
                    Internal::Elevation(client.check_user(&user, &password).await)
                });
            }
            UiCommand::OnDemand(name) => {
                self.notify(on_demand_notice(&name, &self.session.helpdesk()));
            }
            UiCommand::Refresh(filter) => {
                self.session.filter = filter;
                self.publish_apps();
                self.publish_devices();
                self.refresh_catalog();
            }
            UiCommand::Quit => match self.runner.busy_slot().cloned() {
                Some(slot) => self.notify(Notice::warning(RunnerError::Busy { slot }.to_string())),
                None => return Flow::Exit,
            },
        }
        Flow::Continue
    }

    fn change_device(&mut self, key: &BindingKey, bind: bool) {
        match decide_device(&self.session, key, bind) {
            DeviceDecision::Notify(notice) => self.notify(notice),
            DeviceDecision::Mutate {
                key,
                attribute,
                bind,
            } => {
                let Some(catalog) = self.catalog.clone() else {
                    self.notify(Notice::error("not connected to the server"));
                    return;
                };
                info!(binding = key.binding_id, bind, "changing device binding");
                self.spawn_internal(async move {
                    let result = if bind {
                        catalog.bind(key.binding_id, attribute).await
                    } else {
                        catalog.unbind(key.binding_id, attribute).await
                    };
                    Internal::DeviceChanged { key, bind, result }
                });
            }
        }
    }

    fn on_process(&mut self, event: ProcessEvent) -> Flow {
        match self.runner.handle(event) {
            RunUpdate::Output { id, body } => self.emit(UiEvent::RunOutput { id, body }),
            RunUpdate::Ignored => {}
            RunUpdate::Finished(done) => {
                if let Some(record) = self.runner.transcript().get(done.id) {
                    self.emit(UiEvent::RunOutput {
                        id: done.id,
                        body: record.body.clone(),
                    });
                }
                self.emit(UiEvent::RunClosed { id: done.id });
                self.emit(UiEvent::SlotBusy {
                    slot: done.slot.clone(),
                    busy: false,
                });

                let processed = process_run_completion(&done, self.session.window);
                for notice in processed.notices {
                    self.notify(notice);
                }
                if processed.raise {
                    self.raise();
                }
                for refresh in processed.refresh {
                    self.refresh_snapshot(refresh);
                }
                if processed.exit {
                    info!("unattended synchronization finished");
                    self.emit(UiEvent::Exit);
                    return Flow::Exit;
                }
                if self.detached {
                    return Flow::Exit;
                }
            }
        }
        Flow::Continue
    }

    fn refresh_snapshot(&self, refresh: Refresh) {
        let client = self.cfg.client.clone();
        match refresh {
            Refresh::Available => self.spawn_internal(async move {
                Internal::Available(client.available_packages().await)
            }),
            Refresh::Installed { settle } => {
                let candidates = match &settle {
                    // Always include the settled request, even if the catalog moved on.
                    Some(request) => {
                        let mut c = self.session.catalog_packages();
                        c.extend(request.packages.iter().cloned());
                        c
                    }
                    None => self.session.catalog_packages(),
                };
                self.spawn_internal(async move {
                    Internal::Installed {
                        result: client.installed_packages(&candidates).await,
                        settle,
                    }
                });
            }
        }
    }

    fn refresh_catalog(&mut self) {
        self.catalog_generation += 1;
        let generation = self.catalog_generation;
        let (Some(catalog), Some(cid)) = (self.catalog.clone(), self.session.cid()) else {
            return;
        };
        let project = self.session.identity.project.clone();
        let filter = self.session.filter.clone();
        let apps_catalog = catalog.clone();
        self.spawn_internal(async move {
            Internal::Apps {
                generation,
                result: loader::fetch_apps(&apps_catalog, cid, &project, &filter).await,
            }
        });
        let devices_catalog = catalog.clone();
        let search = self.session.filter.search.clone();
        self.spawn_internal(async move {
            Internal::Devices {
                generation,
                result: loader::fetch_devices(&devices_catalog, cid, &search).await,
            }
        });
        self.refresh_assignments();
    }

    fn refresh_assignments(&self) {
        let (Some(catalog), Some(cid)) = (self.catalog.clone(), self.session.cid()) else {
            return;
        };
        self.spawn_internal(async move {
            Internal::Assignments(loader::fetch_assignments(&catalog, cid).await)
        });
    }

    fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Apps { generation, .. } | Internal::Devices { generation, .. }
                if generation != self.catalog_generation =>
            {
                debug!(generation, current = self.catalog_generation, "stale catalog reply dropped");
            }
            Internal::Bootstrapped(Ok(boot)) => {
                self.session.identity = boot.identity;
                self.session.label = Some(boot.label.clone());
                self.session.cid_attribute = boot.cid_attribute;
                self.session.categories = boot.categories;
                self.catalog = Some(boot.catalog);
                self.emit(UiEvent::Label(boot.label));
                self.refresh_catalog();
                self.refresh_snapshot(Refresh::Available);
            }
            Internal::Bootstrapped(Err(e)) => {
                warn!("bootstrap failed: {e:#}");
                self.notify(Notice::persistent_error(format!("server unavailable: {e:#}")));
            }
            Internal::Apps { result: Ok(apps), .. } => {
                self.session.apps = apps;
                self.publish_apps();
                self.refresh_snapshot(Refresh::Installed { settle: None });
            }
            Internal::Devices {
                result: Ok(devices), ..
            } => {
                self.session.devices = devices;
                self.publish_devices();
            }
            Internal::Assignments(Ok(snapshot)) => {
                self.session.assignments = snapshot;
                self.publish_devices();
            }
            Internal::Available(Ok(available)) => {
                self.session.available = available;
                self.publish_apps();
            }
            Internal::Installed { result, settle } => match result {
                Ok(installed) => {
                    self.session.installed = installed;
                    self.publish_apps();
                    if let Some(request) = settle {
                        self.notify(settle_notice(&request, &self.session.installed));
                    }
                }
                Err(e) => {
                    warn!("installed package query failed: {e:#}");
                    self.notify(Notice::error(format!("installed packages: {e:#}")));
                }
            },
            Internal::DeviceChanged { key, bind, result } => match result {
                Ok(()) => {
                    let verb = if bind { "assigned" } else { "removed" };
                    self.notify(Notice::success(format!("{} {verb}", key.feature)));
                    self.refresh_assignments();
                }
                Err(e) => {
                    warn!(binding = key.binding_id, "binding change failed: {e}");
                    self.notify(Notice::error(e.to_string()));
                }
            },
            Internal::Elevation(Ok(true)) => {
                info!("session elevated");
                self.session.elevated = true;
                self.emit(UiEvent::Elevated);
                self.publish_apps();
            }
            Internal::Elevation(result) => {
                if let Err(e) = result {
                    warn!("credential check failed: {e:#}");
                }
                self.notify(Notice::persistent_error("authentication error"));
            }
            Internal::Apps { result: Err(e), .. }
            | Internal::Devices { result: Err(e), .. }
            | Internal::Assignments(Err(e)) => {
                warn!("catalog query failed: {e}");
                self.notify(Notice::error(e.to_string()));
            }
            Internal::Available(Err(e)) => {
                warn!("available package query failed: {e:#}");
                self.notify(Notice::error(format!("available packages: {e:#}")));
            }
        }
    }
}

/// Drive the session until the user quits or an unattended sync completes.
pub(crate) async fn run_controller(
    cfg: ControllerConfig,
    event_tx: UnboundedSender<UiEvent>,
    cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let (ctl, proc_rx, internal_rx) = Controller::new(cfg, event_tx);
    ctl.bootstrap();
    serve(ctl, cmd_rx, proc_rx, internal_rx).await
}

async fn serve(
    mut ctl: Controller,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    mut proc_rx: UnboundedReceiver<ProcessEvent>,
    mut internal_rx: UnboundedReceiver<Internal>,
) -> Result<()> {
    let period = ctl.cfg.sync_interval.max(Duration::from_secs(1));
    let first = if ctl.cfg.sync_mode {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut timer = tokio::time::interval_at(first, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !ctl.detached => {
                match cmd {
                    Some(cmd) => {
                        if ctl.on_command(cmd) == Flow::Exit {
                            break;
                        }
                    }
                    None => {
                        // The UI is gone. A running process still finishes and is recorded.
                        if !ctl.runner.is_busy() {
                            break;
                        }
                        ctl.detached = true;
                    }
                }
            }
            Some(event) = proc_rx.recv() => {
                if ctl.on_process(event) == Flow::Exit {
                    break;
                }
            }
            Some(msg) = internal_rx.recv() => ctl.on_internal(msg),
            _ = timer.tick() => {
                debug!("scheduled synchronization");
                ctl.start(sync_plan(&ctl.cfg.client));
            }
        }
    }

    Ok(())
}
