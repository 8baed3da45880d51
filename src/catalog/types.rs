//! Wire types of the migasfree REST API (only the fields the console reads).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeRef {
    pub id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectPackages {
    #[serde(default)]
    pub project: NamedRef,
    #[serde(default)]
    pub packages_to_install: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppEntry {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub category: NamedRef,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub packages_by_project: Vec<ProjectPackages>,
}

impl AppEntry {
    /// Packages this application installs on `project`, if it targets it.
    pub fn packages_for(&self, project: &str) -> Option<Vec<String>> {
        let mut found = None;
        for pkgs in &self.packages_by_project {
            if pkgs.project.name == project {
                found
                    .get_or_insert_with(Vec::new)
                    .extend(pkgs.packages_to_install.iter().cloned());
            }
        }
        found
    }

    /// First line of the description.
    pub fn summary(&self) -> String {
        self.description
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceModel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manufacturer: NamedRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub connection: NamedRef,
    #[serde(default)]
    pub model: DeviceModel,
    /// JSON-encoded connection data (`NAME`, `LOCATION`, `IP`...).
    #[serde(default)]
    pub data: Option<String>,
}

impl Device {
    fn data_fields(&self) -> BTreeMap<String, serde_json::Value> {
        self.data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    fn data_text(&self, key: &str) -> Option<String> {
        match self.data_fields().get(key) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    pub fn model_name(&self) -> String {
        format!("{} {}", self.model.manufacturer.name, self.model.name)
            .trim()
            .to_string()
    }

    /// `NAME` from the device data, else the manufacturer and model.
    pub fn display_name(&self) -> String {
        self.data_text("NAME").unwrap_or_else(|| self.model_name())
    }

    pub fn location(&self) -> Option<String> {
        self.data_text("LOCATION")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogicalDevice {
    pub id: u64,
    #[serde(default)]
    pub device: NamedRef,
    #[serde(default)]
    pub feature: NamedRef,
    #[serde(default)]
    pub alternative_feature_name: Option<String>,
    #[serde(default)]
    pub attributes: Vec<u64>,
}

impl LogicalDevice {
    pub fn display_name(&self) -> &str {
        match self.alternative_feature_name.as_deref() {
            Some(alt) if !alt.is_empty() => alt,
            _ => &self.feature.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ComputerDevices {
    #[serde(default)]
    pub assigned_logical_devices_to_cid: Vec<AttributeRef>,
    #[serde(default)]
    pub inflicted_logical_devices: Vec<AttributeRef>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AttributesPatch<'a> {
    pub attributes: &'a [u64],
}

/// Attribute list with `attribute` present exactly once.
pub fn with_attribute(mut attributes: Vec<u64>, attribute: u64) -> Vec<u64> {
    if !attributes.contains(&attribute) {
        attributes.push(attribute);
    }
    attributes
}

/// Attribute list with every occurrence of `attribute` removed.
pub fn without_attribute(mut attributes: Vec<u64>, attribute: u64) -> Vec<u64> {
    attributes.retain(|a| *a != attribute);
    attributes
}
