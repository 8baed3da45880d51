//! Session context: identity, snapshots and the last fetched catalog.
//!
//! Snapshots are only ever replaced wholesale.

use crate::catalog::{AppEntry, Device, LogicalDevice};
use crate::client::Identity;
use crate::model::{
    ActionRequest, AppView, AuthLevel, BindingKey, BindingView, ComputerLabel, DeviceView,
};
use crate::resolver::{
    resolve_app, AppState, AssignmentSnapshot, DeviceState, PackageContext, PackageSet, Visibility,
};
use std::collections::BTreeMap;

/// Whether the console is currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hidden,
    Shown,
}

/// Catalog query parameters and display filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    pub search: String,
    /// `None` (or 0) means every category.
    pub category: Option<u64>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogApp {
    pub name: String,
    pub category: String,
    pub summary: String,
    pub packages: Vec<String>,
    pub level: AuthLevel,
}

impl CatalogApp {
    /// Catalog entries that target `project`, in server order.
    pub fn from_entries(entries: &[AppEntry], project: &str, category: Option<u64>) -> Vec<Self> {
        entries
            .iter()
            .filter(|e| match category {
                Some(c) if c != 0 => e.category.id == c,
                _ => true,
            })
            .filter_map(|e| {
                let packages = e.packages_for(project)?;
                Some(Self {
                    name: e.name.clone(),
                    category: e.category.name.clone(),
                    summary: e.summary(),
                    packages,
                    level: AuthLevel::from_level_id(&e.level.id),
                })
            })
            .collect()
    }

    pub fn request(&self) -> ActionRequest {
        ActionRequest::new(self.name.clone(), self.packages.clone(), self.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogBinding {
    pub key: BindingKey,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDevice {
    pub name: String,
    pub model: String,
    pub connection: String,
    pub location: Option<String>,
    pub bindings: Vec<CatalogBinding>,
}

impl CatalogDevice {
    pub fn from_parts(device: &Device, logicals: &[LogicalDevice]) -> Self {
        Self {
            name: device.display_name(),
            model: device.model_name(),
            connection: device.connection.name.clone(),
            location: device.location(),
            bindings: logicals
                .iter()
                .map(|l| CatalogBinding {
                    key: BindingKey {
                        device: if l.device.name.is_empty() {
                            device.name.clone()
                        } else {
                            l.device.name.clone()
                        },
                        feature: l.feature.name.clone(),
                        binding_id: l.id,
                    },
                    name: l.display_name().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub label: Option<ComputerLabel>,
    /// Attribute id that marks a binding as assigned to this computer.
    pub cid_attribute: Option<u64>,
    pub categories: BTreeMap<u64, String>,
    pub installed: PackageSet,
    pub available: PackageSet,
    pub assignments: AssignmentSnapshot,
    /// Admin credentials were confirmed during this session.
    pub elevated: bool,
    pub window: Window,
    pub filter: CatalogFilter,
    pub apps: Vec<CatalogApp>,
    pub devices: Vec<CatalogDevice>,
}

impl Session {
    pub fn new(window: Window, filter: CatalogFilter) -> Self {
        Self {
            identity: Identity::default(),
            label: None,
            cid_attribute: None,
            categories: BTreeMap::new(),
            installed: PackageSet::new(),
            available: PackageSet::new(),
            assignments: AssignmentSnapshot::default(),
            elevated: false,
            window,
            filter,
            apps: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn cid(&self) -> Option<u64> {
        self.label.as_ref().map(|l| l.id)
    }

    pub fn helpdesk(&self) -> String {
        match &self.label {
            Some(label) => format!("{} {}", label.helpdesk, label.name).trim().to_string(),
            None => String::new(),
        }
    }

    /// Every package named by the current catalog, for the installed query.
    pub fn catalog_packages(&self) -> PackageSet {
        self.apps
            .iter()
            .flat_map(|a| a.packages.iter().cloned())
            .collect()
    }

    pub fn find_app(&self, name: &str) -> Option<&CatalogApp> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn find_binding(&self, key: &BindingKey) -> Option<&CatalogBinding> {
        self.devices
            .iter()
            .flat_map(|d| d.bindings.iter())
            .find(|b| &b.key == key)
    }

    pub fn package_context(&self) -> PackageContext<'_> {
        PackageContext {
            installed: &self.installed,
            available: &self.available,
            elevated: self.elevated,
        }
    }

    pub fn app_state(&self, app: &CatalogApp) -> AppState {
        resolve_app(&app.packages, app.level, self.package_context())
    }

    pub fn binding_state(&self, key: &BindingKey) -> DeviceState {
        self.assignments.classify(key.binding_id)
    }

    pub fn app_views(&self) -> Vec<AppView> {
        let visibility = self.filter.visibility;
        self.apps
            .iter()
            .filter_map(|app| {
                let installed = crate::resolver::is_satisfied(&app.packages, &self.installed);
                if !visibility.shows_app(installed) {
                    return None;
                }
                Some(AppView {
                    name: app.name.clone(),
                    category: app.category.clone(),
                    summary: app.summary.clone(),
                    packages: app.packages.clone(),
                    level: app.level,
                    installed,
                    state: self.app_state(app),
                })
            })
            .collect()
    }

    /// Devices with their visible bindings; devices left without any are dropped.
    pub fn device_views(&self) -> Vec<DeviceView> {
        let visibility = self.filter.visibility;
        self.devices
            .iter()
            .filter_map(|dev| {
                let bindings: Vec<BindingView> = dev
                    .bindings
                    .iter()
                    .map(|b| BindingView {
                        key: b.key.clone(),
                        name: b.name.clone(),
                        state: self.binding_state(&b.key),
                    })
                    .filter(|b| visibility.shows_binding(b.state))
                    .collect();
                if bindings.is_empty() && visibility.only_assigned {
                    return None;
                }
                Some(DeviceView {
                    name: dev.name.clone(),
                    model: dev.model.clone(),
                    connection: dev.connection.clone(),
                    location: dev.location.clone(),
                    bindings,
                })
            })
            .collect()
    }
}
