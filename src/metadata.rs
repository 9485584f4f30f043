//! Node → physical source resolution.

use crate::error::FetchError;
use crate::model::PhysicalSource;
use crate::source::{with_auth, BasicAuth};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;

pub trait MetadataResolver: Send + Sync {
    /// Physical sources feeding `node`. An empty list is returned as is; the
    /// aggregator rejects it.
    fn resolve(
        &self,
        node: &str,
    ) -> impl Future<Output = Result<Vec<PhysicalSource>, FetchError>> + Send;
}

/// Fixed source list, e.g. from `--source` flags.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    sources: Vec<PhysicalSource>,
}

impl StaticResolver {
    pub fn new(sources: Vec<PhysicalSource>) -> Self {
        Self { sources }
    }
}

impl MetadataResolver for StaticResolver {
    async fn resolve(&self, _node: &str) -> Result<Vec<PhysicalSource>, FetchError> {
        Ok(self.sources.clone())
    }
}

/// What the `sensors.power.via.pdu` entries of a node document point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// SNMP PDUs: each uid is looked up in the site's PDU list for its address
    /// and the outlet wired to the node.
    PduOutlets,
    /// Wattmeters: the entry itself carries the uid and port.
    WattmeterPorts,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    #[serde(default)]
    sensors: Option<Sensors>,
}

#[derive(Debug, Deserialize)]
struct Sensors {
    #[serde(default)]
    power: Option<PowerSensor>,
}

#[derive(Debug, Deserialize)]
struct PowerSensor {
    #[serde(default)]
    via: Option<PowerVia>,
}

#[derive(Debug, Deserialize)]
struct PowerVia {
    #[serde(default)]
    pdu: Option<Vec<PduRef>>,
}

#[derive(Debug, Deserialize)]
struct PduRef {
    uid: String,
    #[serde(default)]
    port: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PduDoc {
    ip: String,
    #[serde(default)]
    ports: HashMap<String, serde_json::Value>,
}

impl NodeDoc {
    fn power_pdus(self) -> Option<Vec<PduRef>> {
        self.sensors?.power?.via?.pdu
    }
}

/// Outlet of `pdu` wired to `node`; the lowest one if several are.
fn outlet_for(pdu: &PduDoc, node: &str) -> Option<u32> {
    pdu.ports
        .iter()
        .filter(|(_, value)| value.as_str() == Some(node))
        .filter_map(|(port, _)| port.parse::<u32>().ok())
        .min()
}

/// `nova-3` → `nova`.
pub fn cluster_of(node: &str) -> &str {
    node.split_once('-').map_or(node, |(cluster, _)| cluster)
}

/// Resolves sources from the testbed reference API.
#[derive(Debug, Clone)]
pub struct ReferenceApiResolver {
    http: Client,
    api_base: String,
    site: String,
    cluster: Option<String>,
    auth: Option<BasicAuth>,
    mode: LookupMode,
}

impl ReferenceApiResolver {
    pub fn new(
        http: Client,
        api_base: impl Into<String>,
        site: impl Into<String>,
        auth: Option<BasicAuth>,
        mode: LookupMode,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            site: site.into(),
            cluster: None,
            auth,
            mode,
        }
    }

    /// Overrides the cluster otherwise derived from the node name.
    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster;
        self
    }

    fn node_url(&self, node: &str) -> String {
        let cluster = self.cluster.as_deref().unwrap_or_else(|| cluster_of(node));
        format!(
            "{}/sites/{}/clusters/{}/nodes/{}.json",
            self.api_base, self.site, cluster, node
        )
    }

    fn pdu_url(&self, uid: &str) -> String {
        format!("{}/sites/{}/pdus/{}.json", self.api_base, self.site, uid)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = with_auth(self.http.get(url), self.auth.as_ref())
            .send()
            .await
            .map_err(|err| FetchError::unavailable(url, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::not_monitored(url, "reference entry"));
        }
        response
            .error_for_status()
            .map_err(|err| FetchError::unavailable(url, err))?
            .json()
            .await
            .map_err(|err| FetchError::unavailable(url, err))
    }
}

impl MetadataResolver for ReferenceApiResolver {
    async fn resolve(&self, node: &str) -> Result<Vec<PhysicalSource>, FetchError> {
        let url = self.node_url(node);
        let doc: NodeDoc = self.get_json(&url).await?;
        let pdus = doc
            .power_pdus()
            .ok_or_else(|| FetchError::not_monitored(&url, format!("power sensor of {node}")))?;

        let mut sources = Vec::with_capacity(pdus.len());
        match self.mode {
            LookupMode::WattmeterPorts => {
                for pdu in pdus {
                    match pdu.port {
                        Some(port) => sources.push(PhysicalSource::port(pdu.uid, port)),
                        None => {
                            tracing::warn!(node, pdu = %pdu.uid, "wattmeter entry has no port; skipped");
                        }
                    }
                }
            }
            LookupMode::PduOutlets => {
                for pdu in pdus {
                    let doc: PduDoc = self.get_json(&self.pdu_url(&pdu.uid)).await?;
                    match outlet_for(&doc, node) {
                        Some(port) => sources.push(PhysicalSource::port(doc.ip, port)),
                        None => {
                            tracing::warn!(node, pdu = %pdu.uid, "pdu lists no outlet for node; skipped");
                        }
                    }
                }
            }
        }

        tracing::debug!(node, sources = sources.len(), "resolved power sources");
        Ok(sources)
    }
}
