//! Best-effort geolocation of the servers behind a hostname.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::Span;
use url::Url;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::setops;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoLocation {
    pub ip: String,
    pub country_code: String,
    pub country_name: String,
    pub region_code: String,
    pub region_name: String,
    pub city: String,
    pub zip_code: String,
    pub time_zone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub metro_code: i64,
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("couldn't resolve '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid geoip url '{0}'")]
    InvalidUrl(String),

    #[error("geoip request failed: {0}")]
    Request(String),

    #[error("got status {0} while attempting to get geoip data")]
    Status(u16),

    #[error("couldn't decode geoip response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GeoError {
    fn from(value: reqwest::Error) -> Self {
        Self::Request(value.to_string())
    }
}

/// Hostname to address resolution.
pub trait Resolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// The operating system's resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let mut addrs: Vec<IpAddr> = (host, 0).to_socket_addrs()?.map(|addr| addr.ip()).collect();
        setops::dedup(&mut addrs);
        Ok(addrs)
    }
}

pub struct GeoLocator<R = SystemResolver> {
    http: Client,
    geoip_host: String,
    resolver: R,
    span: Span,
}

impl GeoLocator<SystemResolver> {
    pub fn new(geoip_host: impl Into<String>, span: Span) -> Result<Self, GeoError> {
        Self::with_resolver(geoip_host, SystemResolver, span)
    }
}

impl<R: Resolver> GeoLocator<R> {
    pub fn with_resolver(
        geoip_host: impl Into<String>,
        resolver: R,
        span: Span,
    ) -> Result<Self, GeoError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            geoip_host: geoip_host.into(),
            resolver,
            span,
        })
    }

    /// Resolve `host` and geolocate every address it maps to.
    ///
    /// Only a resolution failure is an error. Addresses whose lookup fails are
    /// logged and left out, so the result may be shorter than the address list.
    pub fn lookup(&self, host: &str) -> Result<Vec<GeoLocation>, GeoError> {
        let _enter = self.span.enter();
        let addrs = self.resolver.resolve(host).map_err(|source| GeoError::Resolve {
            host: host.to_string(),
            source,
        })?;

        let mut out = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let result = self
                .address_url(&addr)
                .and_then(|url| get_json::<GeoLocation>(&self.http, url));
            match result {
                Ok(info) => out.push(info),
                Err(err) => {
                    tracing::warn!(host, ip = %addr, error = %err, "couldn't look up geoip info");
                }
            }
        }
        Ok(out)
    }

    fn address_url(&self, addr: &IpAddr) -> Result<Url, GeoError> {
        let mut url =
            Url::parse(&self.geoip_host).map_err(|_| GeoError::InvalidUrl(self.geoip_host.clone()))?;
        url.path_segments_mut()
            .map_err(|_| GeoError::InvalidUrl(self.geoip_host.clone()))?
            .pop_if_empty()
            .push(&addr.to_string());
        Ok(url)
    }
}

/// Geolocate `host` against `geoip_host` with the system resolver.
pub fn geo_lookup(geoip_host: &str, host: &str) -> Result<Vec<GeoLocation>, GeoError> {
    GeoLocator::new(geoip_host, Span::current())?.lookup(host)
}

/// GET `url` and decode the JSON body. Anything but 200 is an error.
pub fn get_json<T: DeserializeOwned>(http: &Client, url: Url) -> Result<T, GeoError> {
    let response = http.get(url).send()?;
    let status = response.status();
    let bytes = response.bytes()?;
    if status != reqwest::StatusCode::OK {
        return Err(GeoError::Status(status.as_u16()));
    }
    serde_json::from_slice(&bytes).map_err(|err| GeoError::Decode(err.to_string()))
}
