//! Client for the migasfree server's REST catalog.

mod types;

pub use types::{AppEntry, Device, LogicalDevice};

use crate::model::ComputerLabel;
use crate::resolver::AssignmentSnapshot;
use anyhow::Context;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use types::{
    with_attribute, without_attribute, AttributeRef, AttributesPatch, ComputerDevices, Page,
    TokenRequest, TokenResponse,
};

pub const DEFAULT_USERNAME: &str = "migasfree-play";
pub const DEFAULT_PASSWORD: &str = "migasfree-play";

/// Upper bound on followed `next` links for one listing.
const MAX_PAGES: usize = 500;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("computer {uuid} is not registered on the server")]
    NotRegistered { uuid: String },
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

/// `http://<server>` unless the server already carries a scheme.
pub fn base_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("http://{server}")
    }
}

impl CatalogClient {
    pub fn new(server: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("migasfree-play/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self::with_http(server, http))
    }

    fn with_http(server: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base: base_url(server),
            token: None,
        }
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1/token{}", self.base, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(header::AUTHORIZATION, format!("token {token}")),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> CatalogResult<T> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|source| CatalogError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status,
            });
        }
        resp.json().await.map_err(|source| CatalogError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<T> {
        debug!(url, "GET");
        self.send(url, self.http.get(url).query(query)).await
    }

    /// Collect every page of a listing, following `next` links.
    async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<Vec<T>> {
        let mut page: Page<T> = self.get(url, query).await?;
        let mut items = std::mem::take(&mut page.results);
        let mut followed = 0;
        while let Some(next) = page.next.take().filter(|n| !n.is_empty()) {
            followed += 1;
            if followed > MAX_PAGES {
                break;
            }
            page = self.get(&next, &[]).await?;
            items.append(&mut page.results);
        }
        Ok(items)
    }

    pub async fn obtain_token(&self, username: &str, password: &str) -> CatalogResult<String> {
        let url = format!("{}/token-auth/", self.base);
        let req = self.http.post(&url).json(&TokenRequest { username, password });
        let resp: TokenResponse = self.send(&url, req).await?;
        Ok(resp.token)
    }

    /// Use the cached token file, or request a token and cache it.
    pub async fn ensure_token(&mut self, token_file: &Path) -> anyhow::Result<()> {
        if let Ok(cached) = tokio::fs::read_to_string(token_file).await {
            let cached = cached.trim();
            if !cached.is_empty() {
                self.set_token(cached);
                return Ok(());
            }
        }
        let token = self
            .obtain_token(DEFAULT_USERNAME, DEFAULT_PASSWORD)
            .await
            .context("obtain api token")?;
        if let Some(parent) = token_file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        tokio::fs::write(token_file, &token)
            .await
            .with_context(|| format!("write {}", token_file.display()))?;
        info!(path = %token_file.display(), "api token cached");
        self.set_token(token);
        Ok(())
    }

    pub async fn computer_label(&self, uuid: &str) -> CatalogResult<ComputerLabel> {
        let url = format!("{}/get_computer_info/", self.base);
        let label: ComputerLabel = self.get(&url, &[("uuid", uuid.to_string())]).await?;
        if label.id == 0 {
            return Err(CatalogError::NotRegistered {
                uuid: uuid.to_string(),
            });
        }
        Ok(label)
    }

    /// Id of the `CID` attribute identifying this computer, when unique.
    pub async fn cid_attribute(&self, cid: u64) -> CatalogResult<Option<u64>> {
        let page: Page<AttributeRef> = self
            .get(
                &self.api("/attributes/"),
                &[
                    ("property_att__prefix", "CID".to_string()),
                    ("value", cid.to_string()),
                ],
            )
            .await?;
        let count = page.count.unwrap_or(page.results.len() as u64);
        Ok(match (count, page.results.first()) {
            (1, Some(attr)) => Some(attr.id),
            _ => None,
        })
    }

    pub async fn categories(&self) -> CatalogResult<BTreeMap<u64, String>> {
        let raw: BTreeMap<String, String> = self.get(&self.api("/catalog/apps/categories/"), &[]).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, name)| id.parse().ok().map(|id| (id, name)))
            .collect())
    }

    pub async fn available_apps(
        &self,
        cid: u64,
        search: &str,
        category: Option<u64>,
    ) -> CatalogResult<Vec<AppEntry>> {
        let mut query = vec![("cid", cid.to_string()), ("q", search.to_string())];
        if let Some(category) = category.filter(|c| *c != 0) {
            query.push(("category", category.to_string()));
        }
        self.get_all(&self.api("/catalog/apps/available/"), &query).await
    }

    pub async fn available_devices(&self, cid: u64, search: &str) -> CatalogResult<Vec<Device>> {
        self.get_all(
            &self.api("/devices/devices/available/"),
            &[("cid", cid.to_string()), ("q", search.to_string())],
        )
        .await
    }

    pub async fn logical_devices(&self, cid: u64, device: u64) -> CatalogResult<Vec<LogicalDevice>> {
        self.get_all(
            &self.api("/devices/logical/available/"),
            &[("cid", cid.to_string()), ("did", device.to_string())],
        )
        .await
    }

    pub async fn assignments(&self, cid: u64) -> CatalogResult<AssignmentSnapshot> {
        let devices: ComputerDevices = self
            .get(&self.api(&format!("/computers/{cid}/devices/")), &[])
            .await?;
        Ok(AssignmentSnapshot {
            assigned: devices
                .assigned_logical_devices_to_cid
                .iter()
                .map(|d| d.id)
                .collect(),
            inflicted: devices.inflicted_logical_devices.iter().map(|d| d.id).collect(),
        })
    }

    pub async fn logical_attributes(&self, binding: u64) -> CatalogResult<Vec<u64>> {
        let logical: LogicalDevice = self
            .get(&self.api(&format!("/devices/logical/{binding}/")), &[])
            .await?;
        Ok(logical.attributes)
    }

    pub async fn set_logical_attributes(
        &self,
        binding: u64,
        attributes: &[u64],
    ) -> CatalogResult<()> {
        let url = self.api(&format!("/devices/logical/{binding}/"));
        debug!(url, ?attributes, "PATCH");
        let req = self.http.patch(&url).json(&AttributesPatch { attributes });
        let _: serde_json::Value = self.send(&url, req).await?;
        Ok(())
    }

    /// Add `attribute` to a binding (no-op when already present).
    pub async fn bind(&self, binding: u64, attribute: u64) -> CatalogResult<()> {
        let current = self.logical_attributes(binding).await?;
        self.set_logical_attributes(binding, &with_attribute(current, attribute))
            .await
    }

    pub async fn unbind(&self, binding: u64, attribute: u64) -> CatalogResult<()> {
        let current = self.logical_attributes(binding).await?;
        self.set_logical_attributes(binding, &without_attribute(current, attribute))
            .await
    }
}
