use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::SyncError;

/// Single-hit name lookup over the registry's search index. A phrase query
/// is expected to match at most one document; more than one is a
/// distinguished error so callers can tell it apart from a plain miss.
pub trait SearchClient: Send + Sync {
    fn record_by_name(&self, index: &str, name: &str) -> Result<Option<Value>, SyncError>;
}

#[derive(Clone)]
pub struct SearchHttpClient {
    client: Client,
    url: String,
    username: String,
    password: String,
}

impl SearchHttpClient {
    pub fn new(config: &SearchConfig) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SyncError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

impl SearchClient for SearchHttpClient {
    fn record_by_name(&self, index: &str, name: &str) -> Result<Option<Value>, SyncError> {
        let url = format!("{}/{}/_search", self.url, index);
        let body = json!({
            "query": {
                "match_phrase": {
                    "name": name,
                }
            }
        });
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|err| SyncError::SearchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "search request failed".to_string());
            return Err(SyncError::SearchStatus { status, message });
        }
        let result: Value = response
            .json()
            .map_err(|err| SyncError::SearchHttp(err.to_string()))?;
        let hits = result
            .get("hits")
            .and_then(|v| v.get("hits"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        match hits.len() {
            0 => Ok(None),
            1 => Ok(hits[0].get("_source").cloned()),
            _ => Err(SyncError::MultipleHits {
                index: index.to_string(),
                name: name.to_string(),
            }),
        }
    }
}
