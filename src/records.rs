use std::fmt;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::RunStatus;
use crate::error::SyncError;

/// Registry entity types this pipeline reads or writes. The registry and
/// the search index address each type by its collection path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum EntityType {
    SequencingRequest,
    SequencingRun,
    DataStorage,
    DataStorageProvider,
    Library,
    SequencingResult,
    Biosample,
    Donor,
    Vendor,
    Document,
    CrisprModification,
    Treatment,
}

impl EntityType {
    /// Collection path segment in the registry API, also the name of the
    /// corresponding search index.
    pub fn path(&self) -> &'static str {
        match self {
            EntityType::SequencingRequest => "sequencing_requests",
            EntityType::SequencingRun => "sequencing_runs",
            EntityType::DataStorage => "data_storages",
            EntityType::DataStorageProvider => "data_storage_providers",
            EntityType::Library => "libraries",
            EntityType::SequencingResult => "sequencing_results",
            EntityType::Biosample => "biosamples",
            EntityType::Donor => "donors",
            EntityType::Vendor => "vendors",
            EntityType::Document => "documents",
            EntityType::CrisprModification => "crispr_modifications",
            EntityType::Treatment => "treatments",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Deserializes a raw registry record into a typed struct, attributing
/// parse failures to the entity type for diagnostics.
pub fn parse_record<T: DeserializeOwned>(entity: EntityType, value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value).map_err(|err| SyncError::RecordParse {
        entity,
        message: err.to_string(),
    })
}

/// A unit of experimental work requesting sequencing. `paired_end` is never
/// downgraded once true, even if a later upstream run reports single-end.
#[derive(Debug, Clone, Deserialize)]
pub struct SequencingRequest {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub paired_end: Option<bool>,
    #[serde(default)]
    pub library_ids: Vec<u64>,
    #[serde(default)]
    pub sequencing_run_ids: Vec<u64>,
}

/// One physical sequencing execution, linked to at most one storage
/// location.
#[derive(Debug, Clone, Deserialize)]
pub struct SequencingRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub sequencing_request_id: Option<u64>,
    #[serde(default)]
    pub data_storage_id: Option<u64>,
    #[serde(default)]
    pub sequencing_result_ids: Vec<u64>,
}

/// Pointer to where a run's raw data lives at the external provider,
/// matched idempotently by the provider's project identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct DataStorage {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub project_identifier: Option<String>,
    #[serde(default)]
    pub data_storage_provider_id: Option<u64>,
}

/// A sequenceable sample unit. Read-only here; its barcode is the join key
/// against upstream FASTQ files.
#[derive(Debug, Clone, Deserialize)]
pub struct Library {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub barcode_sequence: Option<String>,
}

/// One per (library, sequencing run) pair. Append-only; absence of one
/// mate is legal.
#[derive(Debug, Clone, Deserialize)]
pub struct SequencingResult {
    pub id: u64,
    #[serde(default)]
    pub library_id: Option<u64>,
    #[serde(default)]
    pub sequencing_run_id: Option<u64>,
    #[serde(default)]
    pub read1_uri: Option<String>,
    #[serde(default)]
    pub read2_uri: Option<String>,
    #[serde(default)]
    pub read1_count: Option<u64>,
    #[serde(default)]
    pub read2_count: Option<u64>,
}
