//! Explicit envelope schemas, one struct per routing key, validated on
//! decode. Per the Design Note on "arrays as envelopes": we never pass the
//! raw JSON `Value` into a stage handler — malformed envelopes are rejected
//! (no requeue) before `Stage::process` runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Decode(String),

    #[error("envelope field `{0}` must not be empty")]
    EmptyField(&'static str),
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.trim().is_empty() {
        Err(EnvelopeError::EmptyField(field))
    } else {
        Ok(())
    }
}

/// Decode and validate a routing-key-specific envelope from a raw message body.
pub fn decode<T>(body: &[u8]) -> Result<T, EnvelopeError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let value: T =
        serde_json::from_slice(body).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
    value.validate()?;
    Ok(value)
}

pub trait Validate {
    fn validate(&self) -> Result<(), EnvelopeError>;
}

/// `download.http` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadHttpEnvelope {
    pub project: String,
    #[serde(rename = "versionId")]
    pub version_id: String,
    #[serde(rename = "filenamePrefix")]
    pub filename_prefix: String,
    #[serde(rename = "filenamePostfix")]
    pub filename_postfix: String,
}

impl Validate for DownloadHttpEnvelope {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require_non_empty("project", &self.project)?;
        require_non_empty("versionId", &self.version_id)?;
        Ok(())
    }
}

/// `extract.targz` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractTargzEnvelope {
    pub project: String,
    #[serde(rename = "versionId")]
    pub version_id: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

impl Validate for ExtractTargzEnvelope {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require_non_empty("project", &self.project)?;
        require_non_empty("versionId", &self.version_id)?;
        require_non_empty("filePath", &self.file_path)?;
        Ok(())
    }
}

/// `download.git` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadGitEnvelope {
    pub project: String,
    #[serde(rename = "gitwebId")]
    pub gitweb_id: String,
}

impl Validate for DownloadGitEnvelope {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require_non_empty("project", &self.project)?;
        require_non_empty("gitwebId", &self.gitweb_id)?;
        Ok(())
    }
}

/// `analysis.*` envelope consumed by every analyzer stage. Extract.Targz
/// publishes the `{recordId, sourceDir}` shape; Download.Git publishes
/// `{gitwebId, checkoutDir}` on the wire (see `CvsAnalyEnvelope` below) but
/// the aliases here let this same struct decode either one, so an analyzer
/// implementation never needs to know which upstream stage produced its
/// input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisEnvelope {
    pub project: String,
    #[serde(rename = "recordId", alias = "gitwebId")]
    pub record_id: String,
    #[serde(rename = "sourceDir", alias = "checkoutDir")]
    pub source_dir: String,
}

impl Validate for AnalysisEnvelope {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require_non_empty("project", &self.project)?;
        require_non_empty("recordId", &self.record_id)?;
        require_non_empty("sourceDir", &self.source_dir)?;
        Ok(())
    }
}

/// `analysis.cvsanaly` envelope as published by Download.Git. CVSAnaly
/// reads full commit history rather than a source snapshot, so its wire
/// body names the gitweb row and checkout path directly instead of the
/// generic `recordId`/`sourceDir` pair other analyzers get.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CvsAnalyEnvelope {
    pub project: String,
    #[serde(rename = "gitwebId")]
    pub gitweb_id: String,
    #[serde(rename = "checkoutDir")]
    pub checkout_dir: String,
}

impl Validate for CvsAnalyEnvelope {
    fn validate(&self) -> Result<(), EnvelopeError> {
        require_non_empty("project", &self.project)?;
        require_non_empty("gitwebId", &self.gitweb_id)?;
        require_non_empty("checkoutDir", &self.checkout_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_download_http_envelope() {
        let body = br#"{"project":"TYPO3","versionId":"7","filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let env: DownloadHttpEnvelope = decode(body).expect("decode");
        assert_eq!(env.version_id, "7");
    }

    #[test]
    fn rejects_envelope_missing_required_field() {
        let body = br#"{"project":"TYPO3","filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let err = decode::<DownloadHttpEnvelope>(body).unwrap_err();
        assert!(matches!(err, EnvelopeError::Decode(_)));
    }

    #[test]
    fn rejects_envelope_with_empty_field() {
        let body = br#"{"project":"","versionId":"7","filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let err = decode::<DownloadHttpEnvelope>(body).unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyField("project"));
    }

    #[test]
    fn analysis_envelope_decodes_cvsanaly_wire_shape_via_aliases() {
        let body = br#"{"project":"TYPO3","gitwebId":"9","checkoutDir":"/data/git/core"}"#;
        let env: AnalysisEnvelope = decode(body).expect("decode");
        assert_eq!(env.record_id, "9");
        assert_eq!(env.source_dir, "/data/git/core");
    }

    #[test]
    fn cvsanaly_envelope_serializes_to_the_pinned_wire_shape() {
        let env = CvsAnalyEnvelope {
            project: "TYPO3".to_string(),
            gitweb_id: "9".to_string(),
            checkout_dir: "/data/git/core".to_string(),
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"project":"TYPO3","gitwebId":"9","checkoutDir":"/data/git/core"})
        );
    }
}
