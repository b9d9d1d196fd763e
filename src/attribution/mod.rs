//! Client for the host-to-company attribution service.
//!
//! Wire contract: `POST <endpoint>/hosts` with `{"hostNames": [...]}` and a
//! single company mapping object in the response body. The service accepts a
//! batch of hostnames but answers with one mapping, so callers send one
//! hostname per request.

pub mod geo;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::Span;

use crate::config::AttributionConfig;

/// Request body for the attribution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRequest {
    #[serde(rename = "hostNames")]
    pub host_names: Vec<String>,
}

/// Company record returned for a hostname.
///
/// `hostName`, `companyName` and `companyID` must be present; a 2xx body
/// without them is a decode error, not an empty mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMapping {
    #[serde(rename = "hostName")]
    pub host_name: String,
    #[serde(rename = "hostID", default)]
    pub host_id: i64,
    #[serde(rename = "companyName")]
    pub company_name: String,
    #[serde(rename = "companyID")]
    pub company_id: i64,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl CompanyMapping {
    fn decode(bytes: &[u8]) -> Result<Self, AttributionError> {
        let mapping: Self =
            serde_json::from_slice(bytes).map_err(|err| AttributionError::Decode(err.to_string()))?;
        if mapping.company_id <= 0 {
            return Err(AttributionError::Decode(format!(
                "mapping for '{}' has no company id",
                mapping.host_name
            )));
        }
        Ok(mapping)
    }
}

#[derive(Debug, Error)]
pub enum AttributionError {
    /// Connection refused, timeout, or the body could not be read.
    #[error("attribution request failed: {0}")]
    Transport(String),

    #[error("attribution service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("couldn't decode attribution response: {0}")]
    Decode(String),
}

impl AttributionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for AttributionError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Resolves hostnames to the company that operates them.
pub trait CompanyResolver {
    fn map_hosts(&self, host_names: &[String]) -> Result<CompanyMapping, AttributionError>;
}

#[derive(Debug, Clone)]
pub struct AttributionClient {
    http: Client,
    url: String,
    max_attempts: u32,
    retry_backoff: Duration,
    span: Span,
}

impl AttributionClient {
    /// Build a client for the configured endpoint.
    pub fn new(config: &AttributionConfig, span: Span) -> Result<Self, AttributionError> {
        // The attribution service is an internal endpoint; never send it
        // through an environment proxy.
        let http = Client::builder()
            .timeout(config.timeout())
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/hosts", config.endpoint.trim_end_matches('/')),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
            span,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_once(&self, body: &MappingRequest) -> Result<CompanyMapping, AttributionError> {
        let response = self.http.post(&self.url).json(body).send()?;
        let status = response.status();
        // Reading the body to the end hands the connection back to the pool on
        // every branch below.
        let bytes = response.bytes()?;
        if !status.is_success() {
            return Err(AttributionError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }
        CompanyMapping::decode(&bytes)
    }
}

impl CompanyResolver for AttributionClient {
    fn map_hosts(&self, host_names: &[String]) -> Result<CompanyMapping, AttributionError> {
        let _enter = self.span.enter();
        let body = MappingRequest {
            host_names: host_names.to_vec(),
        };

        let mut attempt = 1;
        loop {
            match self.request_once(&body) {
                Ok(mapping) => {
                    tracing::debug!(
                        company = %mapping.company_name,
                        host = %mapping.host_name,
                        "mapped host"
                    );
                    return Ok(mapping);
                }
                Err(err) if attempt < self.max_attempts && err.is_retryable() => {
                    tracing::debug!(attempt, error = %err, "retrying attribution request");
                    attempt += 1;
                    thread::sleep(self.retry_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
