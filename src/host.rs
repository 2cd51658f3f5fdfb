use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::HostConfig;
use crate::error::SyncError;

/// A project at the sequencing host: one delivered batch of run results,
/// with a flat string property bag populated by the sequencing facility.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// One FASTQ file inside a host project, tagged with per-file properties
/// (barcode, read number).
#[derive(Debug, Clone, Deserialize)]
pub struct FastqFile {
    pub project_id: String,
    pub file_id: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl FastqFile {
    /// Stable composite locator persisted into sequencing results.
    pub fn locator(&self) -> String {
        format!("{}:{}", self.project_id, self.file_id)
    }
}

/// Narrow interface onto the sequencing host's project metadata.
pub trait HostClient: Send + Sync {
    fn describe_project(&self, project_id: &str) -> Result<ProjectDescription, SyncError>;
    fn fastq_files(&self, project_id: &str, barcode: &str) -> Result<Vec<FastqFile>, SyncError>;
    fn sample_stats(&self, project_id: &str, barcode: &str) -> Result<Value, SyncError>;
}

#[derive(Clone)]
pub struct HostHttpClient {
    client: Client,
    api_url: String,
}

impl HostHttpClient {
    pub fn new(config: &HostConfig) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::HostHttp(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|err| SyncError::HostHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::HostHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
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
                    return Err(SyncError::HostHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "sequencing host request failed".to_string());
        Err(SyncError::HostStatus { status, message })
    }
}

impl HostClient for HostHttpClient {
    fn describe_project(&self, project_id: &str) -> Result<ProjectDescription, SyncError> {
        let url = format!("{}/projects/{}", self.api_url, project_id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SyncError::HostHttp(err.to_string()))
    }

    fn fastq_files(&self, project_id: &str, barcode: &str) -> Result<Vec<FastqFile>, SyncError> {
        let url = format!("{}/projects/{}/fastq_files", self.api_url, project_id);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("barcode", barcode)]))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SyncError::HostHttp(err.to_string()))
    }

    fn sample_stats(&self, project_id: &str, barcode: &str) -> Result<Value, SyncError> {
        let url = format!("{}/projects/{}/sample_stats", self.api_url, project_id);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("barcode", barcode)]))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SyncError::HostHttp(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fastq_file_locator() {
        let file = FastqFile {
            project_id: "project-8XQ4V200".to_string(),
            file_id: "file-20VkZq".to_string(),
            properties: HashMap::new(),
        };
        assert_eq!(file.locator(), "project-8XQ4V200:file-20VkZq");
    }
}
