use miette::Diagnostic;
use thiserror::Error;

use crate::records::EntityType;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid request identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid portal mode: {0} (expected 'production' or 'sandbox')")]
    InvalidPortalMode(String),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("no {entity} record with id {id}")]
    RecordNotFound { entity: EntityType, id: u64 },

    #[error("failed to parse {entity} record: {message}")]
    RecordParse { entity: EntityType, message: String },

    #[error("sequencing host request failed: {0}")]
    HostHttp(String),

    #[error("sequencing host returned status {status}: {message}")]
    HostStatus { status: u16, message: String },

    #[error("portal request failed: {0}")]
    PortalHttp(String),

    #[error("portal returned status {status}: {message}")]
    PortalStatus { status: u16, message: String },

    #[error("portal denied authorization: {0}")]
    PortalForbidden(String),

    #[error("portal response carries no accession, alias, or uuid")]
    MissingPortalIdentifier,

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("name search found multiple records matching '{name}' in index '{index}'")]
    MultipleHits { index: String, name: String },

    #[error("malformed upstream data: {0}")]
    MalformedUpstream(String),

    #[error("no storage provider record named '{0}'")]
    UnknownProvider(String),

    #[error("entity type is not submittable: {0}")]
    NotSubmittable(EntityType),

    #[error("{entity} record {id} has never been submitted; nothing to patch")]
    NeverSubmitted { entity: EntityType, id: u64 },
}
