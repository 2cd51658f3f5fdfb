use std::env;

use crate::domain::PortalMode;
use crate::error::SyncError;

/// Connection settings for the three external systems and the search
/// index. Loaded from the environment; clients take these by value so test
/// doubles and parallel configurations stay possible.
#[derive(Debug, Clone)]
pub struct Config {
    pub registry: RegistryConfig,
    pub host: HostConfig,
    pub portal: PortalConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub api_url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub api_url: String,
    pub token: String,
    /// Name of the registry's storage-provider record for this host.
    pub provider_name: String,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub api_url: String,
    pub key: String,
    pub secret: String,
    pub mode: PortalMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String, SyncError> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| SyncError::MissingEnv(name.to_string()))
        };

        let mode = required("PORTAL_MODE")?.parse::<PortalMode>()?;
        let dry_run = lookup("PORTAL_DRY_RUN")
            .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            registry: RegistryConfig {
                api_url: required("REGISTRY_API_URL")?,
                token: required("REGISTRY_TOKEN")?,
            },
            host: HostConfig {
                api_url: required("SEQHOST_API_URL")?,
                token: required("SEQHOST_TOKEN")?,
                provider_name: required("SEQHOST_PROVIDER")?,
            },
            portal: PortalConfig {
                api_url: required("PORTAL_API_URL")?,
                key: required("PORTAL_API_KEY")?,
                secret: required("PORTAL_SECRET_KEY")?,
                mode,
                dry_run,
            },
            search: SearchConfig {
                url: required("SEARCH_URL")?,
                username: required("SEARCH_USER")?,
                password: required("SEARCH_PASSWORD")?,
            },
        })
    }
}
