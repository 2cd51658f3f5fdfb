use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::{json, Map, Value};

use seqsync::error::SyncError;
use seqsync::portal::{PortalClient, PortalResponse};
use seqsync::records::EntityType;
use seqsync::registry::RegistryClient;
use seqsync::submit::{SubmitOutcome, Submitter, UPSTREAM_KEY};

#[derive(Default)]
struct MockRegistry {
    records: Mutex<HashMap<(EntityType, u64), Value>>,
    patches: Mutex<Vec<(EntityType, u64, Value)>>,
    documents: HashMap<u64, Vec<u8>>,
}

impl MockRegistry {
    fn seed(&self, entity: EntityType, id: u64, record: Value) {
        self.records.lock().unwrap().insert((entity, id), record);
    }

    fn upstream_writes(&self) -> Vec<(EntityType, u64, String)> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(entity, id, payload)| {
                payload
                    .get(UPSTREAM_KEY)
                    .and_then(|v| v.as_str())
                    .map(|upstream| (*entity, *id, upstream.to_string()))
            })
            .collect()
    }
}

impl RegistryClient for MockRegistry {
    fn get(&self, entity: EntityType, id: u64) -> Result<Value, SyncError> {
        self.records
            .lock()
            .unwrap()
            .get(&(entity, id))
            .cloned()
            .ok_or(SyncError::RecordNotFound { entity, id })
    }

    fn post(&self, entity: EntityType, _payload: &Value) -> Result<Value, SyncError> {
        unreachable!("submission never creates registry records, got POST to {entity}");
    }

    fn patch(&self, entity: EntityType, id: u64, payload: &Value) -> Result<Value, SyncError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(entity, id))
            .ok_or(SyncError::RecordNotFound { entity, id })?;
        if let Some(updates) = payload.as_object() {
            for (key, value) in updates {
                record[key] = value.clone();
            }
        }
        let updated = record.clone();
        drop(records);
        self.patches
            .lock()
            .unwrap()
            .push((entity, id, payload.clone()));
        Ok(updated)
    }

    fn download_document(&self, id: u64) -> Result<Vec<u8>, SyncError> {
        self.documents
            .get(&id)
            .cloned()
            .ok_or(SyncError::RecordNotFound {
                entity: EntityType::Document,
                id,
            })
    }
}

enum PatchBehavior {
    Succeed,
    NotFound,
    Forbidden,
}

struct MockPortal {
    production: bool,
    dry_run: bool,
    accessions: Mutex<VecDeque<String>>,
    posts: Mutex<Vec<(String, Value)>>,
    patches: Mutex<Vec<(String, Value)>>,
    patch_behavior: PatchBehavior,
}

impl MockPortal {
    fn production(accessions: &[&str]) -> Self {
        Self {
            production: true,
            dry_run: false,
            accessions: Mutex::new(accessions.iter().map(|a| a.to_string()).collect()),
            posts: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
            patch_behavior: PatchBehavior::Succeed,
        }
    }

    fn sandbox(accessions: &[&str]) -> Self {
        Self {
            production: false,
            ..Self::production(accessions)
        }
    }

    fn posted_profiles(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(profile, _)| profile.clone())
            .collect()
    }

    fn posted_payload(&self, index: usize) -> Value {
        self.posts.lock().unwrap()[index].1.clone()
    }
}

impl PortalClient for MockPortal {
    fn post(&self, profile: &str, payload: &Value) -> Result<PortalResponse, SyncError> {
        if self.dry_run {
            return Ok(PortalResponse::DryRun);
        }
        self.posts
            .lock()
            .unwrap()
            .push((profile.to_string(), payload.clone()));
        let accession = self
            .accessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("ACC{}", self.posts.lock().unwrap().len()));
        let mut record = Map::new();
        record.insert("accession".to_string(), json!(accession));
        Ok(PortalResponse::Submitted(record))
    }

    fn patch(
        &self,
        upstream: &str,
        payload: &Value,
        raise_forbidden: bool,
    ) -> Result<PortalResponse, SyncError> {
        if self.dry_run {
            return Ok(PortalResponse::DryRun);
        }
        self.patches
            .lock()
            .unwrap()
            .push((upstream.to_string(), payload.clone()));
        match self.patch_behavior {
            PatchBehavior::Succeed => {
                let mut record = Map::new();
                record.insert("accession".to_string(), json!(upstream));
                Ok(PortalResponse::Submitted(record))
            }
            PatchBehavior::NotFound => Ok(PortalResponse::NotFound),
            PatchBehavior::Forbidden => {
                if raise_forbidden {
                    Err(SyncError::PortalForbidden("permission denied".to_string()))
                } else {
                    let mut record = Map::new();
                    record.insert("accession".to_string(), json!(upstream));
                    record.insert("status".to_string(), json!("released"));
                    Ok(PortalResponse::Submitted(record))
                }
            }
        }
    }

    fn is_production(&self) -> bool {
        self.production
    }
}

fn registry_with_biosample_graph() -> MockRegistry {
    let registry = MockRegistry {
        documents: HashMap::from([(8, b"example".to_vec())]),
        ..MockRegistry::default()
    };
    registry.seed(
        EntityType::Donor,
        3,
        json!({"id": 3, "name": "D-3", "sex": "female", "age": "31"}),
    );
    registry.seed(
        EntityType::Vendor,
        4,
        json!({"id": 4, "name": "V-4", "url": "https://vendors.example.org/4"}),
    );
    registry.seed(
        EntityType::Document,
        8,
        json!({
            "id": 8,
            "name": "protocol.pdf",
            "description": "Culture protocol",
            "content_type": "application/pdf",
            "document_type": {"name": "growth protocol"}
        }),
    );
    registry.seed(
        EntityType::Biosample,
        1,
        json!({
            "id": 1,
            "name": "B-1",
            "tube_label": "tube-9",
            "description": "Chronic myelogenous leukemia cell line",
            "biosample_term_name": {"name": "K562", "accession": "EFO:0002067"},
            "biosample_type": {"name": "cell line"},
            "donor": {"id": 3},
            "vendor": {"id": 4},
            "documents": [{"id": 8}],
            "treatments": [],
            "pooled_from_biosamples": [],
            "part_of_biosample_id": null
        }),
    );
    registry
}

#[test]
fn submitted_record_returns_identifier_with_no_outward_call() {
    let registry = registry_with_biosample_graph();
    registry.seed(
        EntityType::Biosample,
        1,
        json!({"id": 1, "name": "B-1", UPSTREAM_KEY: "ENCBS999XYZ"}),
    );
    let portal = MockPortal::production(&[]);
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.submit(EntityType::Biosample, 1).unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted("ENCBS999XYZ".to_string()));
    assert!(portal.posts.lock().unwrap().is_empty());
    assert!(registry.patches.lock().unwrap().is_empty());
}

#[test]
fn dependencies_are_submitted_first_and_embedded() {
    let registry = registry_with_biosample_graph();
    let portal = MockPortal::production(&[
        "ENCDC111AAA",
        "ENCDO001AAA",
        "ENCSO333AAA",
        "ENCBS123ABC",
    ]);
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.submit(EntityType::Biosample, 1).unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted("ENCBS123ABC".to_string()));
    assert_eq!(
        portal.posted_profiles(),
        vec!["document", "donor", "source", "biosample"]
    );

    let biosample = portal.posted_payload(3);
    assert_eq!(biosample["donor"], json!("ENCDO001AAA"));
    assert_eq!(biosample["source"], json!("ENCSO333AAA"));
    assert_eq!(biosample["documents"], json!(["ENCDC111AAA"]));
    assert_eq!(biosample["aliases"], json!(["B-1", "tube-9"]));
    assert_eq!(biosample["biosample_term_name"], json!("K562"));
    assert_eq!(biosample["biosample_term_id"], json!("EFO:0002067"));
    assert_eq!(biosample["biosample_type"], json!("cell line"));
    assert_eq!(biosample["organism"], json!("human"));

    // Production mode writes every identifier back to the registry.
    let writes = registry.upstream_writes();
    assert_eq!(writes.len(), 4);
    assert!(writes.contains(&(EntityType::Donor, 3, "ENCDO001AAA".to_string())));
    assert!(writes.contains(&(EntityType::Biosample, 1, "ENCBS123ABC".to_string())));
}

#[test]
fn sandbox_identifiers_stay_in_memory() {
    let registry = registry_with_biosample_graph();
    let portal = MockPortal::sandbox(&[
        "TSTDC111AAA",
        "TSTDO001AAA",
        "TSTSO333AAA",
        "TSTBS123ABC",
    ]);
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.submit(EntityType::Biosample, 1).unwrap();
    assert_eq!(outcome, SubmitOutcome::Submitted("TSTBS123ABC".to_string()));
    assert!(registry.upstream_writes().is_empty());

    // The in-memory layer still memoizes within the run: resubmitting
    // performs no further POSTs.
    let again = submitter.submit(EntityType::Biosample, 1).unwrap();
    assert_eq!(again, SubmitOutcome::Submitted("TSTBS123ABC".to_string()));
    assert_eq!(portal.posts.lock().unwrap().len(), 4);
}

#[test]
fn dry_run_is_a_tagged_noop() {
    let registry = registry_with_biosample_graph();
    let portal = MockPortal {
        dry_run: true,
        ..MockPortal::production(&[])
    };
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.submit(EntityType::Biosample, 1).unwrap();

    assert_eq!(outcome, SubmitOutcome::DryRun);
    assert!(portal.posts.lock().unwrap().is_empty());
    assert!(registry.patches.lock().unwrap().is_empty());
}

#[test]
fn document_payload_carries_data_uri_attachment() {
    let registry = registry_with_biosample_graph();
    let portal = MockPortal::production(&["ENCDC111AAA"]);
    let submitter = Submitter::new(&registry, &portal);

    submitter.submit(EntityType::Document, 8).unwrap();

    let payload = portal.posted_payload(0);
    assert_eq!(payload["aliases"], json!(["protocol.pdf"]));
    assert_eq!(payload["document_type"], json!("growth protocol"));
    assert_eq!(payload["attachment"]["download"], json!("protocol.pdf"));
    assert_eq!(payload["attachment"]["type"], json!("application/pdf"));
    assert_eq!(
        payload["attachment"]["href"],
        json!("data:application/pdf;base64,ZXhhbXBsZQ==")
    );
}

#[test]
fn deep_graph_submits_in_post_order() {
    let registry = MockRegistry::default();
    registry.seed(EntityType::Donor, 3, json!({"id": 3, "name": "D-3"}));
    registry.seed(
        EntityType::Biosample,
        1,
        json!({"id": 1, "name": "B-1", "donor": {"id": 3}}),
    );
    registry.seed(
        EntityType::Biosample,
        2,
        json!({"id": 2, "name": "B-2", "part_of_biosample_id": 1}),
    );
    let portal = MockPortal::production(&["ENCDO001AAA", "ENCBS001AAA", "ENCBS002AAA"]);
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.submit(EntityType::Biosample, 2).unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted("ENCBS002AAA".to_string()));
    assert_eq!(
        portal.posted_profiles(),
        vec!["donor", "biosample", "biosample"]
    );
    let parent_payload = portal.posted_payload(1);
    assert_eq!(parent_payload["donor"], json!("ENCDO001AAA"));
    let child_payload = portal.posted_payload(2);
    assert_eq!(child_payload["part_of"], json!("ENCBS001AAA"));
}

#[test]
fn patch_of_missing_portal_record_is_a_warning() {
    let registry = registry_with_biosample_graph();
    registry.seed(
        EntityType::Donor,
        3,
        json!({"id": 3, "name": "D-3", UPSTREAM_KEY: "ENCDO001AAA"}),
    );
    let portal = MockPortal {
        patch_behavior: PatchBehavior::NotFound,
        ..MockPortal::production(&[])
    };
    let submitter = Submitter::new(&registry, &portal);

    let outcome = submitter.patch(EntityType::Donor, 3, true).unwrap();

    assert_eq!(outcome, SubmitOutcome::Submitted("ENCDO001AAA".to_string()));
}

#[test]
fn patch_of_unsubmitted_record_errors() {
    let registry = registry_with_biosample_graph();
    let portal = MockPortal::production(&[]);
    let submitter = Submitter::new(&registry, &portal);

    let err = submitter.patch(EntityType::Donor, 3, true).unwrap_err();
    assert_matches!(
        err,
        SyncError::NeverSubmitted {
            entity: EntityType::Donor,
            id: 3
        }
    );
}

#[test]
fn forbidden_patch_is_fatal_unless_suppressed() {
    let registry = registry_with_biosample_graph();
    registry.seed(
        EntityType::Donor,
        3,
        json!({"id": 3, "name": "D-3", UPSTREAM_KEY: "ENCDO001AAA"}),
    );

    let portal = MockPortal {
        patch_behavior: PatchBehavior::Forbidden,
        ..MockPortal::production(&[])
    };
    let submitter = Submitter::new(&registry, &portal);
    let err = submitter.patch(EntityType::Donor, 3, true).unwrap_err();
    assert_matches!(err, SyncError::PortalForbidden(_));

    let portal = MockPortal {
        patch_behavior: PatchBehavior::Forbidden,
        ..MockPortal::production(&[])
    };
    let submitter = Submitter::new(&registry, &portal);
    let outcome = submitter.patch(EntityType::Donor, 3, false).unwrap();
    assert_eq!(outcome, SubmitOutcome::Submitted("ENCDO001AAA".to_string()));
}
