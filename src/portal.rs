use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};

use crate::config::PortalConfig;
use crate::domain::PortalMode;
use crate::error::SyncError;

/// Key the portal uses to route a POST to a record profile.
pub const PROFILE_KEY: &str = "_profile";
/// Key naming the record a PATCH addresses.
pub const IDENTIFIER_KEY: &str = "_identifier";

/// Outcome of an outward call. Dry-run no-ops and portal-side lookup
/// misses are distinct outcomes, not two spellings of an empty map.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalResponse {
    Submitted(Map<String, Value>),
    NotFound,
    DryRun,
}

/// Picks the stable identifier out of a portal record: accession first,
/// then the first alias, then the UUID.
pub fn response_identifier(record: &Map<String, Value>) -> Option<String> {
    if let Some(accession) = record.get("accession").and_then(|v| v.as_str()) {
        return Some(accession.to_string());
    }
    if let Some(alias) = record
        .get("aliases")
        .and_then(|v| v.as_array())
        .and_then(|aliases| aliases.first())
        .and_then(|v| v.as_str())
    {
        return Some(alias.to_string());
    }
    record
        .get("uuid")
        .and_then(|v| v.as_str())
        .map(|uuid| uuid.to_string())
}

/// Narrow interface onto the publication portal.
pub trait PortalClient: Send + Sync {
    fn post(&self, profile: &str, payload: &Value) -> Result<PortalResponse, SyncError>;

    /// Updates the record addressed by `upstream`. A portal-side miss comes
    /// back as `NotFound`. When `raise_forbidden` is false an authorization
    /// failure degrades to the record's current portal state instead of an
    /// error.
    fn patch(
        &self,
        upstream: &str,
        payload: &Value,
        raise_forbidden: bool,
    ) -> Result<PortalResponse, SyncError>;

    fn is_production(&self) -> bool;
}

#[derive(Clone)]
pub struct PortalHttpClient {
    client: Client,
    api_url: String,
    key: String,
    secret: String,
    mode: PortalMode,
    dry_run: bool,
}

impl PortalHttpClient {
    pub fn new(config: &PortalConfig) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::PortalHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::PortalHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            secret: config.secret.clone(),
            mode: config.mode,
            dry_run: config.dry_run,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req()
                .basic_auth(&self.key, Some(&self.secret))
                .send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::PortalHttp(err.to_string()));
                }
            }
        }
    }

    fn parse_record(response: reqwest::blocking::Response) -> Result<Map<String, Value>, SyncError> {
        let value: Value = response
            .json()
            .map_err(|err| SyncError::PortalHttp(err.to_string()))?;
        // Some portal endpoints wrap the record in a `@graph` envelope.
        let record = value
            .get("@graph")
            .and_then(|v| v.as_array())
            .and_then(|graph| graph.first())
            .unwrap_or(&value);
        match record.as_object() {
            Some(map) => Ok(map.clone()),
            None => Err(SyncError::PortalHttp(
                "portal response is not a JSON object".to_string(),
            )),
        }
    }

    fn fetch_current(&self, upstream: &str) -> Result<PortalResponse, SyncError> {
        let url = format!("{}/{}", self.api_url, upstream);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 404 {
            return Ok(PortalResponse::NotFound);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "portal read-back failed".to_string());
            return Err(SyncError::PortalStatus { status, message });
        }
        Ok(PortalResponse::Submitted(Self::parse_record(response)?))
    }
}

impl PortalClient for PortalHttpClient {
    fn post(&self, profile: &str, payload: &Value) -> Result<PortalResponse, SyncError> {
        if self.dry_run {
            tracing::debug!(profile, "dry run, skipping portal POST");
            return Ok(PortalResponse::DryRun);
        }
        let mut body = payload.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert(PROFILE_KEY.to_string(), Value::String(profile.to_string()));
        }
        let url = format!("{}/{}", self.api_url, profile);
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let status = response.status().as_u16();
        if status == 403 {
            let message = response.text().unwrap_or_default();
            return Err(SyncError::PortalForbidden(message));
        }
        if !response.status().is_success() && status != 409 {
            let message = response
                .text()
                .unwrap_or_else(|_| "portal POST failed".to_string());
            return Err(SyncError::PortalStatus { status, message });
        }
        // A conflict means the record already exists; the portal returns
        // its current state either way.
        Ok(PortalResponse::Submitted(Self::parse_record(response)?))
    }

    fn patch(
        &self,
        upstream: &str,
        payload: &Value,
        raise_forbidden: bool,
    ) -> Result<PortalResponse, SyncError> {
        if self.dry_run {
            tracing::debug!(upstream, "dry run, skipping portal PATCH");
            return Ok(PortalResponse::DryRun);
        }
        let mut body = payload.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert(
                IDENTIFIER_KEY.to_string(),
                Value::String(upstream.to_string()),
            );
        }
        let url = format!("{}/{}", self.api_url, upstream);
        let response = self.send_with_retries(|| self.client.patch(&url).json(&body))?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(PortalResponse::NotFound);
        }
        if status == 403 {
            let message = response.text().unwrap_or_default();
            if raise_forbidden {
                return Err(SyncError::PortalForbidden(message));
            }
            tracing::warn!(upstream, "portal PATCH forbidden, reading current state");
            return self.fetch_current(upstream);
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "portal PATCH failed".to_string());
            return Err(SyncError::PortalStatus { status, message });
        }
        Ok(PortalResponse::Submitted(Self::parse_record(response)?))
    }

    fn is_production(&self) -> bool {
        self.mode == PortalMode::Production
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
