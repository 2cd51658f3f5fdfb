use std::cell::RefCell;
use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{json, Map, Value};

use crate::domain::SubmissionState;
use crate::error::SyncError;
use crate::portal::{self, PortalClient, PortalResponse};
use crate::records::EntityType;
use crate::registry::RegistryClient;

/// Registry attribute holding the portal identifier once a record has been
/// submitted. Set once, never overwritten.
pub const UPSTREAM_KEY: &str = "upstream_identifier";

/// Scalar copy from a registry record into the outward payload. `from`
/// supports dot paths into nested records (`biosample_term_name.name`).
pub struct FieldCopy {
    pub from: &'static str,
    pub to: &'static str,
}

/// A reference to another submittable record (or set of records). The
/// referenced entities are submitted first and their returned identifiers
/// take the field's place in the payload.
pub struct ReferenceField {
    pub from: &'static str,
    pub to: &'static str,
    pub target: EntityType,
    pub many: bool,
}

/// Declarative outward mapping for one entity type: which portal profile
/// it posts to, which record fields feed the payload, and which fields
/// are dependency edges.
pub struct ProfileSchema {
    pub entity: EntityType,
    pub profile: &'static str,
    pub aliases: &'static [&'static str],
    pub fields: &'static [FieldCopy],
    pub constants: &'static [(&'static str, &'static str)],
    pub references: &'static [ReferenceField],
}

const fn copy(from: &'static str, to: &'static str) -> FieldCopy {
    FieldCopy { from, to }
}

static SCHEMAS: &[ProfileSchema] = &[
    ProfileSchema {
        entity: EntityType::Biosample,
        profile: "biosample",
        aliases: &["name", "tube_label"],
        fields: &[
            copy("biosample_term_name.name", "biosample_term_name"),
            copy("biosample_term_name.accession", "biosample_term_id"),
            copy("biosample_type.name", "biosample_type"),
            copy("date_biosample_taken", "culture_harvest_date"),
            copy("description", "description"),
            copy("lot_identifier", "lot_id"),
            copy(
                "nih_institutional_certification",
                "nih_institutional_certification",
            ),
            copy("passage_number", "passage_number"),
            copy("starting_amount", "starting_amount"),
            copy("starting_amount_units", "starting_amount_units"),
            copy("submitter_comments", "submitter_comments"),
            copy("tissue_preservation_method", "tissue_preservation_method"),
            copy("vendor_product_identifier", "vendor_product_identifier"),
        ],
        constants: &[("organism", "human")],
        references: &[
            ReferenceField {
                from: "crispr_modification",
                to: "genetic_modifications",
                target: EntityType::CrisprModification,
                many: true,
            },
            ReferenceField {
                from: "documents",
                to: "documents",
                target: EntityType::Document,
                many: true,
            },
            ReferenceField {
                from: "donor",
                to: "donor",
                target: EntityType::Donor,
                many: false,
            },
            ReferenceField {
                from: "part_of_biosample_id",
                to: "part_of",
                target: EntityType::Biosample,
                many: false,
            },
            ReferenceField {
                from: "pooled_from_biosamples",
                to: "pooled_from",
                target: EntityType::Biosample,
                many: true,
            },
            ReferenceField {
                from: "vendor",
                to: "source",
                target: EntityType::Vendor,
                many: false,
            },
            ReferenceField {
                from: "treatments",
                to: "treatments",
                target: EntityType::Treatment,
                many: true,
            },
        ],
    },
    ProfileSchema {
        entity: EntityType::Donor,
        profile: "donor",
        aliases: &["name"],
        fields: &[
            copy("description", "description"),
            copy("age", "age"),
            copy("sex", "sex"),
        ],
        constants: &[],
        references: &[],
    },
    ProfileSchema {
        entity: EntityType::Vendor,
        profile: "source",
        aliases: &["name"],
        fields: &[copy("description", "description"), copy("url", "url")],
        constants: &[],
        references: &[],
    },
    ProfileSchema {
        entity: EntityType::Document,
        profile: "document",
        aliases: &["name"],
        fields: &[
            copy("description", "description"),
            copy("document_type.name", "document_type"),
        ],
        constants: &[],
        references: &[],
    },
    ProfileSchema {
        entity: EntityType::CrisprModification,
        profile: "genetic_modification",
        aliases: &["name"],
        fields: &[
            copy("description", "description"),
            copy("category", "category"),
            copy("purpose", "purpose"),
        ],
        constants: &[("method", "CRISPR")],
        references: &[ReferenceField {
            from: "documents",
            to: "documents",
            target: EntityType::Document,
            many: true,
        }],
    },
    ProfileSchema {
        entity: EntityType::Treatment,
        profile: "treatment",
        aliases: &["name"],
        fields: &[
            copy("treatment_term_name", "treatment_term_name"),
            copy("treatment_type", "treatment_type"),
            copy("concentration", "amount"),
            copy("concentration_units", "amount_units"),
            copy("duration", "duration"),
            copy("duration_units", "duration_units"),
        ],
        constants: &[],
        references: &[ReferenceField {
            from: "documents",
            to: "documents",
            target: EntityType::Document,
            many: true,
        }],
    },
];

pub fn schema_for(entity: EntityType) -> Option<&'static ProfileSchema> {
    SCHEMAS.iter().find(|schema| schema.entity == entity)
}

/// Follows a dot path into a record.
fn extract_path<'v>(record: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Result of a submission attempt. In dry-run mode nothing leaves the
/// process and no identifier exists to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(String),
    DryRun,
}

impl SubmitOutcome {
    pub fn identifier(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Submitted(upstream) => Some(upstream),
            SubmitOutcome::DryRun => None,
        }
    }
}

/// Tracks which records have been submitted. The record's
/// `upstream_identifier` attribute is the durable marker; an in-memory map
/// layered over it carries identifiers from non-production submissions so
/// the current run can wire its graph without poisoning the registry with
/// sandbox accessions. Single-threaded by design; concurrent submitters
/// would need a claim on the upstream attribute.
pub struct SubmissionTracker {
    production: bool,
    seen: RefCell<HashMap<(EntityType, u64), String>>,
}

impl SubmissionTracker {
    pub fn new(production: bool) -> Self {
        Self {
            production,
            seen: RefCell::new(HashMap::new()),
        }
    }

    pub fn state(&self, entity: EntityType, id: u64, record: &Value) -> SubmissionState {
        if let Some(upstream) = self.seen.borrow().get(&(entity, id)) {
            return SubmissionState::Submitted(upstream.clone());
        }
        SubmissionState::from_field(record.get(UPSTREAM_KEY).and_then(|v| v.as_str()))
    }

    /// Remembers a fresh submission. Only production identifiers are
    /// persisted onto the registry record.
    pub fn record_submission<R: RegistryClient>(
        &self,
        registry: &R,
        entity: EntityType,
        id: u64,
        upstream: &str,
    ) -> Result<(), SyncError> {
        self.seen
            .borrow_mut()
            .insert((entity, id), upstream.to_string());
        if self.production {
            tracing::info!(%entity, id, upstream, "writing upstream identifier back to registry");
            let payload = json!({ UPSTREAM_KEY: upstream });
            registry.patch(entity, id, &payload)?;
        } else {
            tracing::debug!(%entity, id, upstream, "non-production mode, identifier kept in memory");
        }
        Ok(())
    }
}

/// Submits registry records to the portal, dependencies first. Every
/// reference field is resolved by recursively submitting its target and
/// substituting the returned identifier, so submission order is always a
/// valid post-order of the dependency graph.
pub struct Submitter<'c, R, P>
where
    R: RegistryClient,
    P: PortalClient,
{
    registry: &'c R,
    portal: &'c P,
    tracker: SubmissionTracker,
}

impl<'c, R, P> Submitter<'c, R, P>
where
    R: RegistryClient,
    P: PortalClient,
{
    pub fn new(registry: &'c R, portal: &'c P) -> Self {
        let tracker = SubmissionTracker::new(portal.is_production());
        Self {
            registry,
            portal,
            tracker,
        }
    }

    /// Submits one record, creating its unsubmitted dependencies first.
    /// Already-submitted records return their identifier with no outward
    /// call.
    pub fn submit(&self, entity: EntityType, id: u64) -> Result<SubmitOutcome, SyncError> {
        let schema = schema_for(entity).ok_or(SyncError::NotSubmittable(entity))?;
        let record = self.registry.get(entity, id)?;

        if let SubmissionState::Submitted(upstream) = self.tracker.state(entity, id, &record) {
            tracing::debug!(%entity, id, %upstream, "already submitted, skipping");
            return Ok(SubmitOutcome::Submitted(upstream));
        }

        let payload = self.build_payload(schema, &record, id)?;
        let response = self.portal.post(schema.profile, &payload)?;
        match response {
            PortalResponse::DryRun => Ok(SubmitOutcome::DryRun),
            PortalResponse::NotFound => Err(SyncError::PortalHttp(
                "unexpected not-found response to POST".to_string(),
            )),
            PortalResponse::Submitted(returned) => {
                let upstream = portal::response_identifier(&returned)
                    .ok_or(SyncError::MissingPortalIdentifier)?;
                self.tracker
                    .record_submission(self.registry, entity, id, &upstream)?;
                tracing::info!(%entity, id, %upstream, profile = schema.profile, "submitted");
                Ok(SubmitOutcome::Submitted(upstream))
            }
        }
    }

    /// Re-sends an already-submitted record's payload as a PATCH. A
    /// portal-side miss is a warning, not a failure.
    pub fn patch(
        &self,
        entity: EntityType,
        id: u64,
        raise_forbidden: bool,
    ) -> Result<SubmitOutcome, SyncError> {
        let schema = schema_for(entity).ok_or(SyncError::NotSubmittable(entity))?;
        let record = self.registry.get(entity, id)?;
        let upstream = record
            .get(UPSTREAM_KEY)
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.to_string())
            .ok_or(SyncError::NeverSubmitted { entity, id })?;

        let payload = self.build_payload(schema, &record, id)?;
        match self.portal.patch(&upstream, &payload, raise_forbidden)? {
            PortalResponse::DryRun => Ok(SubmitOutcome::DryRun),
            PortalResponse::NotFound => {
                tracing::warn!(
                    %entity,
                    id,
                    %upstream,
                    "upstream identifier not found on portal, nothing patched"
                );
                Ok(SubmitOutcome::Submitted(upstream))
            }
            PortalResponse::Submitted(_) => Ok(SubmitOutcome::Submitted(upstream)),
        }
    }

    fn build_payload(
        &self,
        schema: &ProfileSchema,
        record: &Value,
        id: u64,
    ) -> Result<Value, SyncError> {
        let mut payload = Map::new();

        let aliases: Vec<Value> = schema
            .aliases
            .iter()
            .filter_map(|field| record.get(*field))
            .filter_map(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(|v| Value::String(v.to_string()))
            .collect();
        if !aliases.is_empty() {
            payload.insert("aliases".to_string(), Value::Array(aliases));
        }

        for field in schema.fields {
            if let Some(value) = extract_path(record, field.from) {
                if !value.is_null() {
                    payload.insert(field.to.to_string(), value.clone());
                }
            }
        }

        for (key, value) in schema.constants {
            payload.insert(key.to_string(), Value::String(value.to_string()));
        }

        for reference in schema.references {
            let Some(value) = record.get(reference.from) else {
                continue;
            };
            let ref_ids = reference_ids(value);
            if ref_ids.is_empty() {
                continue;
            }
            let mut upstreams = Vec::new();
            for ref_id in ref_ids {
                match self.submit(reference.target, ref_id)? {
                    SubmitOutcome::Submitted(upstream) => {
                        upstreams.push(Value::String(upstream));
                    }
                    // The whole graph is a no-op in dry-run mode; there is
                    // no identifier to wire in.
                    SubmitOutcome::DryRun => {}
                }
            }
            if upstreams.is_empty() {
                continue;
            }
            let value = if reference.many {
                Value::Array(upstreams)
            } else {
                upstreams.remove(0)
            };
            payload.insert(reference.to.to_string(), value);
        }

        if schema.entity == EntityType::Document {
            let attachment = self.document_attachment(record, id)?;
            payload.insert("attachment".to_string(), attachment);
        }

        Ok(Value::Object(payload))
    }

    /// Documents travel as data-URI attachments: the registry's stored
    /// bytes, base64-encoded, with the record's content type.
    fn document_attachment(&self, record: &Value, id: u64) -> Result<Value, SyncError> {
        let content_type = record
            .get("content_type")
            .and_then(|v| v.as_str())
            .unwrap_or("application/octet-stream");
        let download = record.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let bytes = self.registry.download_document(id)?;
        let encoded = BASE64.encode(&bytes);
        Ok(json!({
            "download": download,
            "type": content_type,
            "href": format!("data:{content_type};base64,{encoded}"),
        }))
    }
}

/// Ids referenced by a record field, whether it embeds the related record,
/// stores a bare id, or holds an array of either.
fn reference_ids(value: &Value) -> Vec<u64> {
    match value {
        Value::Number(n) => n.as_u64().into_iter().collect(),
        Value::Object(map) => map
            .get("id")
            .and_then(|v| v.as_u64())
            .into_iter()
            .collect(),
        Value::Array(items) => items.iter().flat_map(reference_ids).collect(),
        _ => Vec::new(),
    }
}
