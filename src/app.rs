use serde::Serialize;

use crate::error::SyncError;
use crate::host::HostClient;
use crate::portal::PortalClient;
use crate::reconcile::{ProjectOutcome, Reconciler};
use crate::records::EntityType;
use crate::registry::RegistryClient;
use crate::search::SearchClient;
use crate::submit::{SubmitOutcome, Submitter};

#[derive(Debug, Clone, Serialize)]
pub struct ProjectFailure {
    pub project_id: String,
    pub error: String,
}

/// Summary of one batch pass over upstream projects.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub reconciled: Vec<ProjectOutcome>,
    pub skipped: Vec<String>,
    pub failures: Vec<ProjectFailure>,
    pub finished_at: String,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct App<R, H, P, S>
where
    R: RegistryClient,
    H: HostClient,
    P: PortalClient,
    S: SearchClient,
{
    registry: R,
    host: H,
    portal: P,
    search: S,
    provider_name: String,
}

impl<R, H, P, S> App<R, H, P, S>
where
    R: RegistryClient,
    H: HostClient,
    P: PortalClient,
    S: SearchClient,
{
    pub fn new(registry: R, host: H, portal: P, search: S, provider_name: String) -> Self {
        Self {
            registry,
            host,
            portal,
            search,
            provider_name,
        }
    }

    /// Reconciles each upstream project in turn. One bad unit never stops
    /// the batch: resolution misses are skips, everything else is logged
    /// and collected.
    pub fn sync_projects(&self, project_ids: &[String]) -> SyncReport {
        let reconciler = Reconciler::new(
            &self.registry,
            &self.host,
            &self.search,
            &self.provider_name,
        );

        let mut reconciled = Vec::new();
        let mut skipped = Vec::new();
        let mut failures = Vec::new();

        for project_id in project_ids {
            match reconciler.reconcile_project(project_id) {
                Ok(Some(outcome)) => reconciled.push(outcome),
                Ok(None) => skipped.push(project_id.clone()),
                Err(err) => {
                    tracing::error!(%project_id, error = %err, "failed to reconcile project");
                    failures.push(ProjectFailure {
                        project_id: project_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        SyncReport {
            reconciled,
            skipped,
            failures,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Submits (or patches) one record and its dependency graph.
    pub fn submit_entity(
        &self,
        entity: EntityType,
        id: u64,
        patch: bool,
        raise_forbidden: bool,
    ) -> Result<SubmitOutcome, SyncError> {
        let submitter = Submitter::new(&self.registry, &self.portal);
        if patch {
            submitter.patch(entity, id, raise_forbidden)
        } else {
            submitter.submit(entity, id)
        }
    }
}
