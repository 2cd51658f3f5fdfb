use crate::domain::RequestIdentifier;
use crate::error::SyncError;
use crate::records::{self, EntityType, SequencingRequest};
use crate::registry::RegistryClient;
use crate::search::SearchClient;

/// Resolves the identifier a lab member attached to an upstream project
/// into a sequencing request.
///
/// Name lookup always runs first: requests backported from the previous
/// tracking system kept their legacy names, whose numeric segment no
/// longer equals the record's id. Only the residual set falls through to
/// lookup by id. Neither matching is an error; many upstream projects have
/// no registry counterpart and the caller simply skips them.
pub fn resolve_request<S, R>(
    search: &S,
    registry: &R,
    raw: &str,
) -> Result<Option<SequencingRequest>, SyncError>
where
    S: SearchClient + ?Sized,
    R: RegistryClient + ?Sized,
{
    let index = EntityType::SequencingRequest.path();
    if let Some(doc) = search.record_by_name(index, raw)? {
        let request = records::parse_record(EntityType::SequencingRequest, doc)?;
        return Ok(Some(request));
    }

    let Ok(identifier) = raw.parse::<RequestIdentifier>() else {
        tracing::debug!(raw, "identifier is not of the composite form, skipping id fallback");
        return Ok(None);
    };

    match registry.get(EntityType::SequencingRequest, identifier.numeric_id()) {
        Ok(record) => {
            let request = records::parse_record(EntityType::SequencingRequest, record)?;
            Ok(Some(request))
        }
        Err(SyncError::RecordNotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}
