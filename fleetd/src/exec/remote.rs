//! HTTP client of the periphery agent protocol

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::CoreError;

/// Connection details of a remote node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub server_id: String,
    pub address: String,
    pub passkey: Option<String>,
    pub enabled: bool,
}

/// Request timeouts of the periphery client
#[derive(Debug, Clone, Copy)]
pub struct PeripheryTimeouts {
    pub connect: Duration,
    /// Queries and container control
    pub request: Duration,
    /// Reachability probe
    pub probe: Duration,
}

impl Default for PeripheryTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(15),
            probe: Duration::from_millis(500),
        }
    }
}

/// How long a request may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Probe,
    Request,
    /// Clone, pull, build and deploy may run for minutes
    Unbounded,
}

/// Client for periphery agents
#[derive(Debug, Clone)]
pub struct PeripheryClient {
    client: Client,
    default_passkey: Option<String>,
    timeouts: PeripheryTimeouts,
}

impl PeripheryClient {
    pub fn new(default_passkey: Option<String>, timeouts: PeripheryTimeouts) -> Result<Self, CoreError> {
        let client = Client::builder().connect_timeout(timeouts.connect).build()?;

        Ok(Self {
            client,
            default_passkey,
            timeouts,
        })
    }

    pub fn timeouts(&self) -> &PeripheryTimeouts {
        &self.timeouts
    }

    fn url(&self, node: &RemoteNode, path: &str, query: &[(&str, String)]) -> Result<Url, CoreError> {
        let base = node.address.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| CoreError::ConfigError(format!("invalid address '{}': {}", node.address, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorize(&self, node: &RemoteNode, request: RequestBuilder, budget: Budget) -> RequestBuilder {
        let passkey = node
            .passkey
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.default_passkey.as_deref());
        let request = match passkey {
            Some(passkey) => request.header(header::AUTHORIZATION, passkey),
            None => request,
        };
        match budget {
            Budget::Probe => request.timeout(self.timeouts.probe),
            Budget::Request => request.timeout(self.timeouts.request),
            Budget::Unbounded => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T, CoreError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Periphery request {} failed: {} - {}", url, status, body);
            return Err(CoreError::PeripheryError {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        node: &RemoteNode,
        path: &str,
        query: &[(&str, String)],
        budget: Budget,
    ) -> Result<T, CoreError> {
        let url = self.url(node, path, query)?;
        debug!("GET {}", url);
        let request = self.authorize(node, self.client.get(url.clone()), budget);
        self.send(request, &url).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        node: &RemoteNode,
        path: &str,
        query: &[(&str, String)],
        body: &B,
        budget: Budget,
    ) -> Result<T, CoreError> {
        let url = self.url(node, path, query)?;
        debug!("POST {}", url);
        let request = self.authorize(node, self.client.post(url.clone()).json(body), budget);
        self.send(request, &url).await
    }

    /// `GET /status` under the probe timeout; any failure means unreachable
    pub async fn probe(&self, node: &RemoteNode) -> bool {
        match self
            .get::<periphery_api::StatusResponse>(node, "/status", &[], Budget::Probe)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Server {} unreachable: {}", node.server_id, e);
                false
            }
        }
    }
}
