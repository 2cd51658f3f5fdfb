use serde::Serialize;
use serde_json::json;

use crate::domain::RunStatus;
use crate::error::SyncError;
use crate::host::{HostClient, ProjectDescription};
use crate::normalize;
use crate::records::{
    self, DataStorage, EntityType, Library, SequencingRequest, SequencingRun, SequencingResult,
};
use crate::registry::RegistryClient;
use crate::resolve;
use crate::search::SearchClient;

/// What one pass over one upstream project did to the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub request_id: u64,
    pub run_id: u64,
    pub created_run: bool,
    pub created_storage: bool,
    pub finalized: bool,
    pub paired_end_raised: bool,
    pub results_created: usize,
    pub results_skipped: usize,
}

/// Materializes registry state from an upstream project: resolves the
/// owning sequencing request, gets or creates the run and its storage
/// location, settles the request's paired-end flag, and records
/// per-library results. Re-running against reconciled state is a no-op.
pub struct Reconciler<'c, R, H, S>
where
    R: RegistryClient,
    H: HostClient,
    S: SearchClient,
{
    registry: &'c R,
    host: &'c H,
    search: &'c S,
    provider_name: &'c str,
}

impl<'c, R, H, S> Reconciler<'c, R, H, S>
where
    R: RegistryClient,
    H: HostClient,
    S: SearchClient,
{
    pub fn new(registry: &'c R, host: &'c H, search: &'c S, provider_name: &'c str) -> Self {
        Self {
            registry,
            host,
            search,
            provider_name,
        }
    }

    /// Returns `Ok(None)` when the project's identifier resolves to no
    /// sequencing request; that is an expected skip, not a failure.
    pub fn reconcile_project(&self, project_id: &str) -> Result<Option<ProjectOutcome>, SyncError> {
        let project = self.host.describe_project(project_id)?;
        let library_name =
            normalize::required_property(&project.properties, normalize::LIBRARY_NAME_PROP)?;

        let Some(request) = resolve::resolve_request(self.search, self.registry, library_name)?
        else {
            tracing::debug!(
                project_id,
                library_name,
                "no sequencing request for upstream project"
            );
            return Ok(None);
        };

        let run_name =
            normalize::required_property(&project.properties, normalize::RUN_NAME_PROP)?;

        let (run, created_run) = match self.find_run(&request, run_name, &project.id)? {
            Some(run) => {
                tracing::debug!(run_id = run.id, "matched existing sequencing run");
                (run, false)
            }
            None => {
                let run = self.create_run(&request, run_name)?;
                tracing::info!(run_id = run.id, run_name, "created sequencing run");
                (run, true)
            }
        };

        let (run, created_storage) = self.attach_storage(run, &project)?;
        let (run, finalized) = self.finalize_status(run)?;
        let paired_end_raised = self.reconcile_paired_end(&request, &project)?;
        let (results_created, results_skipped) =
            self.create_results(&request, &run, &project.id)?;

        Ok(Some(ProjectOutcome {
            project_id: project.id,
            request_id: request.id,
            run_id: run.id,
            created_run,
            created_storage,
            finalized,
            paired_end_raised,
            results_created,
            results_skipped,
        }))
    }

    /// A linked run matches by name, or by its storage location pointing
    /// at the same provider project. First match in link order wins.
    fn find_run(
        &self,
        request: &SequencingRequest,
        run_name: &str,
        project_id: &str,
    ) -> Result<Option<SequencingRun>, SyncError> {
        for run_id in &request.sequencing_run_ids {
            let record = self.registry.get(EntityType::SequencingRun, *run_id)?;
            let run: SequencingRun = records::parse_record(EntityType::SequencingRun, record)?;
            if run.name.as_deref() == Some(run_name) {
                return Ok(Some(run));
            }
            if let Some(storage_id) = run.data_storage_id {
                let record = self.registry.get(EntityType::DataStorage, storage_id)?;
                let storage: DataStorage = records::parse_record(EntityType::DataStorage, record)?;
                if storage.project_identifier.as_deref() == Some(project_id) {
                    return Ok(Some(run));
                }
            }
        }
        Ok(None)
    }

    fn create_run(
        &self,
        request: &SequencingRequest,
        run_name: &str,
    ) -> Result<SequencingRun, SyncError> {
        let payload = json!({
            "name": run_name,
            "sequencing_request_id": request.id,
            "status": RunStatus::Started,
        });
        let record = self.registry.post(EntityType::SequencingRun, &payload)?;
        records::parse_record(EntityType::SequencingRun, record)
    }

    /// Creates the storage location for a run that lacks one and patches
    /// the run's storage link and lane index in one go.
    fn attach_storage(
        &self,
        run: SequencingRun,
        project: &ProjectDescription,
    ) -> Result<(SequencingRun, bool), SyncError> {
        if run.data_storage_id.is_some() {
            return Ok((run, false));
        }

        let provider_id = self.provider_id()?;
        let payload = json!({
            "name": project.name,
            "project_identifier": project.id,
            "data_storage_provider_id": provider_id,
        });
        let record = self.registry.post(EntityType::DataStorage, &payload)?;
        let storage: DataStorage = records::parse_record(EntityType::DataStorage, record)?;
        tracing::info!(
            storage_id = storage.id,
            project_id = %project.id,
            "created data storage"
        );

        let mut patch = json!({ "data_storage_id": storage.id });
        if let Some(lane) = normalize::lane_index(&project.properties) {
            patch["lane"] = json!(lane);
        }
        let record = self
            .registry
            .patch(EntityType::SequencingRun, run.id, &patch)?;
        let run = records::parse_record(EntityType::SequencingRun, record)?;
        Ok((run, true))
    }

    fn provider_id(&self) -> Result<u64, SyncError> {
        let doc = self
            .search
            .record_by_name(EntityType::DataStorageProvider.path(), self.provider_name)?
            .ok_or_else(|| SyncError::UnknownProvider(self.provider_name.to_string()))?;
        doc.get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SyncError::UnknownProvider(self.provider_name.to_string()))
    }

    /// Arrival of the transferred project is the completion signal; any
    /// run that is not yet `finished` becomes so, including runs created
    /// manually in the past with a stale status.
    fn finalize_status(&self, run: SequencingRun) -> Result<(SequencingRun, bool), SyncError> {
        if run.status == RunStatus::Finished {
            return Ok((run, false));
        }
        let payload = json!({ "status": RunStatus::Finished });
        let record = self
            .registry
            .patch(EntityType::SequencingRun, run.id, &payload)?;
        let run = records::parse_record(EntityType::SequencingRun, record)?;
        Ok((run, true))
    }

    /// The request may have gone in as single-end while the facility ran
    /// it paired. The flag is only ever raised, never lowered.
    fn reconcile_paired_end(
        &self,
        request: &SequencingRequest,
        project: &ProjectDescription,
    ) -> Result<bool, SyncError> {
        if request.paired_end.unwrap_or(false) {
            return Ok(false);
        }
        if !normalize::paired_end(&project.properties) {
            return Ok(false);
        }
        let payload = json!({ "paired_end": true });
        self.registry
            .patch(EntityType::SequencingRequest, request.id, &payload)?;
        tracing::info!(request_id = request.id, "raised paired_end from upstream evidence");
        Ok(true)
    }

    /// One result per (library, run), populated with whichever mates the
    /// host delivered. All files for a library are validated before any
    /// result is written.
    fn create_results(
        &self,
        request: &SequencingRequest,
        run: &SequencingRun,
        project_id: &str,
    ) -> Result<(usize, usize), SyncError> {
        let mut created = 0usize;
        let mut skipped = 0usize;

        for library_id in &request.library_ids {
            let record = self.registry.get(EntityType::Library, *library_id)?;
            let library: Library = records::parse_record(EntityType::Library, record)?;
            let Some(barcode) = library.barcode_sequence.as_deref() else {
                tracing::warn!(library_id, "library has no barcode sequence, skipping");
                continue;
            };

            let files = self.host.fastq_files(project_id, barcode)?;
            if files.is_empty() {
                tracing::debug!(library_id, barcode, "no FASTQ files for barcode");
                continue;
            }

            if self.result_exists(run, *library_id)? {
                tracing::debug!(
                    library_id,
                    run_id = run.id,
                    "sequencing result already recorded"
                );
                skipped += 1;
                continue;
            }

            let stats = self.host.sample_stats(project_id, barcode)?;
            let mut read1: Option<(String, u64)> = None;
            let mut read2: Option<(String, u64)> = None;
            for file in &files {
                let read = normalize::read_number(&file.properties)?;
                let count = normalize::post_filter_reads(&stats, read)?;
                match read {
                    crate::domain::ReadNumber::R1 => read1 = Some((file.locator(), count)),
                    crate::domain::ReadNumber::R2 => read2 = Some((file.locator(), count)),
                }
            }

            let mut payload = json!({
                "library_id": library_id,
                "sequencing_run_id": run.id,
            });
            if let Some((uri, count)) = read1 {
                payload["read1_uri"] = json!(uri);
                payload["read1_count"] = json!(count);
            }
            if let Some((uri, count)) = read2 {
                payload["read2_uri"] = json!(uri);
                payload["read2_count"] = json!(count);
            }
            self.registry.post(EntityType::SequencingResult, &payload)?;
            created += 1;
        }

        Ok((created, skipped))
    }

    fn result_exists(&self, run: &SequencingRun, library_id: u64) -> Result<bool, SyncError> {
        for result_id in &run.sequencing_result_ids {
            let record = self.registry.get(EntityType::SequencingResult, *result_id)?;
            let result: SequencingResult =
                records::parse_record(EntityType::SequencingResult, record)?;
            if result.library_id == Some(library_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
