use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::SyncError;
use crate::records::EntityType;

/// Narrow interface onto the LIMS registry: typed-collection CRUD over
/// string-keyed JSON records, plus raw document download for attachment
/// building.
pub trait RegistryClient: Send + Sync {
    fn get(&self, entity: EntityType, id: u64) -> Result<Value, SyncError>;
    fn post(&self, entity: EntityType, payload: &Value) -> Result<Value, SyncError>;
    fn patch(&self, entity: EntityType, id: u64, payload: &Value) -> Result<Value, SyncError>;
    fn download_document(&self, id: u64) -> Result<Vec<u8>, SyncError>;
}

#[derive(Clone)]
pub struct RegistryHttpClient {
    client: Client,
    api_url: String,
}

impl RegistryHttpClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::RegistryHttp(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|err| SyncError::RegistryHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn record_url(&self, entity: EntityType, id: u64) -> String {
        format!("{}/{}/{}", self.api_url, entity.path(), id)
    }

    fn collection_url(&self, entity: EntityType) -> String {
        format!("{}/{}", self.api_url, entity.path())
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
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
                    return Err(SyncError::RegistryHttp(err.to_string()));
                }
            }
        }
    }

    fn parse_json(
        response: reqwest::blocking::Response,
        entity: EntityType,
        id: Option<u64>,
    ) -> Result<Value, SyncError> {
        if response.status().as_u16() == 404 {
            return Err(SyncError::RecordNotFound {
                entity,
                id: id.unwrap_or_default(),
            });
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registry request failed".to_string());
            return Err(SyncError::RegistryStatus { status, message });
        }
        response
            .json()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))
    }
}

impl RegistryClient for RegistryHttpClient {
    fn get(&self, entity: EntityType, id: u64) -> Result<Value, SyncError> {
        let url = self.record_url(entity, id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        Self::parse_json(response, entity, Some(id))
    }

    fn post(&self, entity: EntityType, payload: &Value) -> Result<Value, SyncError> {
        let url = self.collection_url(entity);
        let response = self.send_with_retries(|| self.client.post(&url).json(payload))?;
        Self::parse_json(response, entity, None)
    }

    fn patch(&self, entity: EntityType, id: u64, payload: &Value) -> Result<Value, SyncError> {
        let url = self.record_url(entity, id);
        let response = self.send_with_retries(|| self.client.patch(&url).json(payload))?;
        Self::parse_json(response, entity, Some(id))
    }

    fn download_document(&self, id: u64) -> Result<Vec<u8>, SyncError> {
        let url = format!("{}/download", self.record_url(EntityType::Document, id));
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 404 {
            return Err(SyncError::RecordNotFound {
                entity: EntityType::Document,
                id,
            });
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "document download failed".to_string());
            return Err(SyncError::RegistryStatus { status, message });
        }
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
