use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Composite identifier supplied by lab members when naming upstream
/// projects, of the form `<PREFIX>-<NUMERIC_ID>`. Requests backported from
/// the previous tracking system may carry extra trailing segments, and
/// their numeric segment does not necessarily equal the record's current
/// database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentifier {
    raw: String,
    prefix: String,
    numeric_id: u64,
}

impl RequestIdentifier {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The numeric segment, used as the fallback primary-id lookup when no
    /// record matches the full string by name.
    pub fn numeric_id(&self) -> u64 {
        self.numeric_id
    }
}

impl fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for RequestIdentifier {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let identifier_re = Regex::new(r"^([A-Za-z]+)-(\d+)(?:-.*)?$").unwrap();
        let captures = identifier_re
            .captures(trimmed)
            .ok_or_else(|| SyncError::InvalidIdentifier(value.to_string()))?;
        let numeric_id = captures[2]
            .parse::<u64>()
            .map_err(|_| SyncError::InvalidIdentifier(value.to_string()))?;
        Ok(Self {
            raw: trimmed.to_string(),
            prefix: captures[1].to_string(),
            numeric_id,
        })
    }
}

/// Lifecycle states of a sequencing run. The set is closed: runs are
/// created `started` and end `finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Finished,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Started => write!(f, "started"),
            RunStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Read number declared on an upstream FASTQ file. Anything other than 1
/// or 2 is a data-integrity error in the upstream pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadNumber {
    R1,
    R2,
}

impl ReadNumber {
    pub fn from_property(value: &str) -> Result<Self, SyncError> {
        match value.trim() {
            "1" => Ok(ReadNumber::R1),
            "2" => Ok(ReadNumber::R2),
            other => Err(SyncError::MalformedUpstream(format!(
                "unknown read number '{other}', expected 1 or 2"
            ))),
        }
    }

    /// Key of this read's sub-object in the upstream statistics blob.
    pub fn stats_key(&self) -> &'static str {
        match self {
            ReadNumber::R1 => "Read 1",
            ReadNumber::R2 => "Read 2",
        }
    }
}

/// Whether a registry record has been submitted to the portal. Derived
/// from the record's `upstream_identifier` attribute, which is set once on
/// first successful submission and never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Unsubmitted,
    Submitted(String),
}

impl SubmissionState {
    pub fn from_field(value: Option<&str>) -> Self {
        match value {
            Some(upstream) if !upstream.trim().is_empty() => {
                SubmissionState::Submitted(upstream.to_string())
            }
            _ => SubmissionState::Unsubmitted,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            SubmissionState::Submitted(upstream) => Some(upstream),
            SubmissionState::Unsubmitted => None,
        }
    }
}

/// Target environment of the publication portal. Identifiers returned by
/// non-production servers are never written back to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalMode {
    Production,
    Sandbox,
}

impl fmt::Display for PortalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalMode::Production => write!(f, "production"),
            PortalMode::Sandbox => write!(f, "sandbox"),
        }
    }
}

impl FromStr for PortalMode {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(PortalMode::Production),
            "sandbox" | "test" => Ok(PortalMode::Sandbox),
            _ => Err(SyncError::InvalidPortalMode(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_request_identifier() {
        let id: RequestIdentifier = "SREQ-42".parse().unwrap();
        assert_eq!(id.prefix(), "SREQ");
        assert_eq!(id.numeric_id(), 42);
        assert_eq!(id.as_str(), "SREQ-42");
    }

    #[test]
    fn parse_request_identifier_legacy_suffix() {
        let id: RequestIdentifier = "SREQ-117-batch2".parse().unwrap();
        assert_eq!(id.numeric_id(), 117);
        assert_eq!(id.as_str(), "SREQ-117-batch2");
    }

    #[test]
    fn parse_request_identifier_invalid() {
        let err = "no delimiter".parse::<RequestIdentifier>().unwrap_err();
        assert_matches!(err, SyncError::InvalidIdentifier(_));

        let err = "SREQ-notanumber".parse::<RequestIdentifier>().unwrap_err();
        assert_matches!(err, SyncError::InvalidIdentifier(_));
    }

    #[test]
    fn read_number_from_property() {
        assert_eq!(ReadNumber::from_property("1").unwrap(), ReadNumber::R1);
        assert_eq!(ReadNumber::from_property("2").unwrap(), ReadNumber::R2);
        let err = ReadNumber::from_property("3").unwrap_err();
        assert_matches!(err, SyncError::MalformedUpstream(_));
    }

    #[test]
    fn submission_state_from_field() {
        assert_eq!(
            SubmissionState::from_field(None),
            SubmissionState::Unsubmitted
        );
        assert_eq!(
            SubmissionState::from_field(Some("")),
            SubmissionState::Unsubmitted
        );
        assert_eq!(
            SubmissionState::from_field(Some("ENCBS123ABC")),
            SubmissionState::Submitted("ENCBS123ABC".to_string())
        );
    }

    #[test]
    fn portal_mode_round_trip() {
        let mode: PortalMode = "production".parse().unwrap();
        assert_eq!(mode, PortalMode::Production);
        assert_eq!(mode.to_string(), "production");
        let err = "staging".parse::<PortalMode>().unwrap_err();
        assert_matches!(err, SyncError::InvalidPortalMode(_));
    }
}
