//! Built-in probes and the registry that builds them from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;

use crate::check::{CheckResult, HealthCheck};
use crate::config::ProbeSpec;
use crate::error::HealthError;

pub type ProbeParams = Map<String, Value>;

type ProbeConstructor =
    Box<dyn Fn(&str, &ProbeParams) -> Result<Arc<dyn HealthCheck>, HealthError> + Send + Sync>;

/// Maps a probe type tag (`"tcp"`, `"http"`) to a constructor.
pub struct ProbeRegistry {
    constructors: HashMap<String, ProbeConstructor>,
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProbeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry knowing the `tcp` and `http` probes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", |name, params| {
            Ok(Arc::new(TcpProbe::from_params(name, params)?))
        });
        registry.register("http", |name, params| {
            Ok(Arc::new(HttpProbe::from_params(name, params)?))
        });
        registry
    }

    /// Add or replace the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&str, &ProbeParams) -> Result<Arc<dyn HealthCheck>, HealthError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(kind.to_lowercase(), Box::new(constructor));
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn build(&self, name: &str, spec: &ProbeSpec) -> Result<Arc<dyn HealthCheck>, HealthError> {
        let constructor = self
            .constructors
            .get(&spec.kind.to_lowercase())
            .ok_or_else(|| HealthError::UnknownProbeType(spec.kind.clone()))?;
        constructor(name, &spec.params)
    }
}

fn parse_params<T: DeserializeOwned>(name: &str, params: &ProbeParams) -> Result<T, HealthError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| HealthError::InvalidProbe {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    2000
}

#[derive(Deserialize)]
struct TcpParams {
    host: String,
    port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

/// Healthy when a TCP connection to `host:port` opens within the connect timeout.
pub struct TcpProbe {
    address: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            connect_timeout,
        }
    }

    fn from_params(name: &str, params: &ProbeParams) -> Result<Self, HealthError> {
        let params: TcpParams = parse_params(name, params)?;
        Ok(Self::new(
            &params.host,
            params.port,
            Duration::from_millis(params.connect_timeout_ms),
        ))
    }
}

#[async_trait]
impl HealthCheck for TcpProbe {
    async fn check(&self) -> anyhow::Result<CheckResult> {
        let connect = TcpStream::connect(self.address.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_)) => Ok(CheckResult::Healthy),
            Ok(Err(e)) => Ok(CheckResult::unhealthy(format!(
                "failed to connect to {}: {e}",
                self.address
            ))),
            Err(_) => Ok(CheckResult::unhealthy(format!(
                "connecting to {} timed out after {}ms",
                self.address,
                self.connect_timeout.as_millis()
            ))),
        }
    }
}

#[derive(Deserialize)]
struct HttpParams {
    url: String,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    read_timeout_ms: u64,
}

/// Healthy when a GET on `url` answers with a 2xx status.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(
        name: &str,
        url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .user_agent("health-check")
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout + read_timeout)
            .build()
            .map_err(|e| HealthError::InvalidProbe {
                name: name.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            url: url.to_owned(),
            client,
        })
    }

    fn from_params(name: &str, params: &ProbeParams) -> Result<Self, HealthError> {
        let params: HttpParams = parse_params(name, params)?;
        Self::new(
            name,
            &params.url,
            Duration::from_millis(params.connect_timeout_ms),
            Duration::from_millis(params.read_timeout_ms),
        )
    }
}

#[async_trait]
impl HealthCheck for HttpProbe {
    async fn check(&self) -> anyhow::Result<CheckResult> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(CheckResult::Healthy)
        } else {
            Ok(CheckResult::unhealthy(format!(
                "{} answered with status {status}",
                self.url
            )))
        }
    }
}
