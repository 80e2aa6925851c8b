//! Digest-verified report artifacts on disk.
//!
//! Layout: `<dir>/<report_id>/report.json` plus `report.digest` holding the
//! SHA-256 of the JSON bytes.

use std::path::{Path, PathBuf};

use feedback_state::ContentDigest;

use crate::domain::{CodegateError, Report, Result};

/// Write `<dir>/<report_id>/report.json` and its digest.
pub fn write_report_artifact(report: &Report, dir: &Path) -> Result<PathBuf> {
    let report_dir = dir.join(report.id.to_string());
    std::fs::create_dir_all(&report_dir)?;

    let artifact_path = report_dir.join("report.json");
    let digest_path = report_dir.join("report.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_str().as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<report_id>/report.json`, verifying it against its digest.
pub fn read_report_artifact(report_id: &str, dir: &Path) -> Result<Report> {
    let report_dir = dir.join(report_id);
    let json = std::fs::read(report_dir.join("report.json"))?;
    let expected = std::fs::read_to_string(report_dir.join("report.digest"))?;
    let actual = ContentDigest::from_bytes(&json).as_str().to_string();
    if expected.trim() != actual {
        return Err(CodegateError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
