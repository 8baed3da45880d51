//! Network and client queries that populate the session.

use super::session::{CatalogApp, CatalogDevice, CatalogFilter, Session, Window};
use crate::catalog::{CatalogClient, CatalogResult};
use crate::client::{Identity, MigasfreeClient};
use crate::model::{AppView, ComputerLabel, DeviceView};
use crate::resolver::AssignmentSnapshot;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Identity values given on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct IdentityOverrides {
    pub server: Option<String>,
    pub uuid: Option<String>,
    pub project: Option<String>,
    pub user: Option<String>,
}

impl IdentityOverrides {
    fn complete(&self) -> bool {
        self.server.is_some() && self.uuid.is_some() && self.project.is_some()
    }

    fn apply(&self, mut identity: Identity) -> Identity {
        if let Some(v) = &self.server {
            identity.server = v.clone();
        }
        if let Some(v) = &self.uuid {
            identity.uuid = v.clone();
        }
        if let Some(v) = &self.project {
            identity.project = v.clone();
        }
        if let Some(v) = &self.user {
            identity.user = v.clone();
        }
        if identity.server.is_empty() {
            identity.server = "localhost".to_string();
        }
        identity
    }
}

/// Everything learned before the catalog can be queried.
#[derive(Debug, Clone)]
pub(crate) struct Bootstrap {
    pub identity: Identity,
    pub catalog: CatalogClient,
    pub label: ComputerLabel,
    pub cid_attribute: Option<u64>,
    pub categories: BTreeMap<u64, String>,
}

pub(crate) async fn resolve_identity(
    client: &MigasfreeClient,
    overrides: &IdentityOverrides,
) -> Result<Identity> {
    let discovered = if overrides.complete() {
        Identity::default()
    } else {
        client
            .discover_identity()
            .await
            .context("query identity from the migasfree client")?
    };
    Ok(overrides.apply(discovered))
}

pub(crate) async fn bootstrap(
    client: &MigasfreeClient,
    overrides: &IdentityOverrides,
    token_file: &Path,
    timeout: Duration,
) -> Result<Bootstrap> {
    let identity = resolve_identity(client, overrides).await?;
    let mut catalog = CatalogClient::new(&identity.server, timeout)?;
    catalog.ensure_token(token_file).await?;

    let mut label = catalog
        .computer_label(&identity.uuid)
        .await
        .context("fetch computer label")?;
    label.server.get_or_insert_with(|| identity.server.clone());
    info!(cid = label.id, computer = %label.name, server = %identity.server, "computer identified");

    let cid_attribute = catalog.cid_attribute(label.id).await.unwrap_or_else(|e| {
        warn!("could not look up the CID attribute: {e}");
        None
    });
    let categories = catalog.categories().await.unwrap_or_else(|e| {
        warn!("could not fetch categories: {e}");
        BTreeMap::new()
    });

    Ok(Bootstrap {
        identity,
        catalog,
        label,
        cid_attribute,
        categories,
    })
}

pub(crate) async fn fetch_apps(
    catalog: &CatalogClient,
    cid: u64,
    project: &str,
    filter: &CatalogFilter,
) -> CatalogResult<Vec<CatalogApp>> {
    let entries = catalog
        .available_apps(cid, &filter.search, filter.category)
        .await?;
    Ok(CatalogApp::from_entries(&entries, project, filter.category))
}

pub(crate) async fn fetch_devices(
    catalog: &CatalogClient,
    cid: u64,
    search: &str,
) -> CatalogResult<Vec<CatalogDevice>> {
    let devices = catalog.available_devices(cid, search).await?;
    let logicals = futures::future::try_join_all(
        devices
            .iter()
            .map(|dev| catalog.logical_devices(cid, dev.id)),
    )
    .await?;
    Ok(devices
        .iter()
        .zip(logicals.iter())
        .map(|(dev, logicals)| CatalogDevice::from_parts(dev, logicals))
        .collect())
}

pub(crate) async fn fetch_assignments(
    catalog: &CatalogClient,
    cid: u64,
) -> CatalogResult<AssignmentSnapshot> {
    catalog.assignments(cid).await
}

/// Resolved catalog for one-shot output.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Listing {
    pub computer: ComputerLabel,
    pub project: String,
    pub apps: Vec<AppView>,
    pub devices: Vec<DeviceView>,
}

/// Fetch and resolve the whole catalog once, without running anything.
pub(crate) async fn list_catalog(
    client: &MigasfreeClient,
    overrides: &IdentityOverrides,
    token_file: &Path,
    timeout: Duration,
    filter: &CatalogFilter,
) -> Result<Listing> {
    let boot = bootstrap(client, overrides, token_file, timeout).await?;
    let cid = boot.label.id;
    let mut session = Session::new(Window::Hidden, filter.clone());

    session.apps = fetch_apps(&boot.catalog, cid, &boot.identity.project, filter)
        .await
        .context("fetch applications")?;
    session.devices = fetch_devices(&boot.catalog, cid, &filter.search)
        .await
        .context("fetch devices")?;
    session.assignments = fetch_assignments(&boot.catalog, cid)
        .await
        .context("fetch device assignments")?;
    session.available = client
        .available_packages()
        .await
        .context("query available packages")?;
    session.installed = client
        .installed_packages(&session.catalog_packages())
        .await
        .context("query installed packages")?;

    Ok(Listing {
        apps: session.app_views(),
        devices: session.device_views(),
        computer: boot.label,
        project: boot.identity.project,
    })
}
