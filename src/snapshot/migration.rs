//! One-shot import of legacy flat-file snapshots.
//!
//! Re-running is safe: snapshot ids are derived from the period, so a file
//! that was already migrated overwrites its earlier copy.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::service::SnapshotService;
use super::types::AnalysisType;
use crate::error::{SnapshotError, SnapshotResult};

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    /// `(file, snapshot_id)` for every re-saved file.
    pub migrated: Vec<(PathBuf, String)>,
    pub failed: Vec<MigrationFailure>,
}

/// A legacy file that could not be re-saved.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl MigrationReport {
    pub fn total(&self) -> usize {
        self.migrated.len() + self.failed.len()
    }
}

/// Re-save every `*.json` file directly inside `dir` as a snapshot.
///
/// A file's own `analysis_type` key wins over `default_type`. Symlinks are
/// followed; entries that cannot be read and writes the store rejects are
/// reported as failures.
pub async fn migrate_legacy_snapshots(
    service: &SnapshotService,
    dir: &Path,
    default_type: AnalysisType,
) -> SnapshotResult<MigrationReport> {
    if !dir.is_dir() {
        return Err(SnapshotError::LegacyDirectory {
            path: dir.display().to_string(),
            message: "not a directory".to_string(),
        });
    }

    let mut report = MigrationReport::default();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
                warn!(path = %path.display(), error = %e, "Unreadable legacy entry");
                report.failed.push(MigrationFailure {
                    path,
                    reason: format!("unreadable entry: {}", e),
                });
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().map_or(false, |ext| ext == "json") {
            continue;
        }

        let legacy = match read_legacy_file(path).await {
            Ok(value) => value,
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "Skipping legacy snapshot");
                report.failed.push(MigrationFailure {
                    path: path.to_path_buf(),
                    reason,
                });
                continue;
            }
        };

        let analysis_type = legacy
            .get("analysis_type")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_type);

        match service.try_save_snapshot(&legacy, analysis_type).await {
            Ok(snapshot_id) => report.migrated.push((path.to_path_buf(), snapshot_id)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Legacy snapshot was not stored");
                report.failed.push(MigrationFailure {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        dir = %dir.display(),
        migrated = report.migrated.len(),
        failed = report.failed.len(),
        "Legacy snapshot migration finished"
    );
    Ok(report)
}

async fn read_legacy_file(path: &Path) -> Result<Value, String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("read failed: {}", e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| format!("invalid JSON: {}", e))?;
    if !value.is_object() {
        return Err("top-level value is not an object".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MockSnapshotStore;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;

    fn legacy_week() -> String {
        json!({
            "week_id": "2024_W23",
            "total_conversations": 4,
            "topic_volumes": {"Billing": 4}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_rejected_write_is_a_failure() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_snapshot().times(1).returning(|_| {
            Err(StorageError::Query {
                message: "database is locked".to_string(),
            })
        });
        let service = SnapshotService::new(Arc::new(store));
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("w.json"), legacy_week()).unwrap();

        let report = migrate_legacy_snapshots(&service, dir.path(), AnalysisType::Weekly)
            .await
            .unwrap();

        assert!(report.migrated.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].path.ends_with("w.json"));
        assert!(report.failed[0].reason.contains("database is locked"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_link_is_reported() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_snapshot().times(1).returning(|_| Ok(()));
        let service = SnapshotService::new(Arc::new(store));
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), legacy_week()).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.json"), dir.path().join("b.json"))
            .unwrap();

        let report = migrate_legacy_snapshots(&service, dir.path(), AnalysisType::Weekly)
            .await
            .unwrap();

        assert_eq!(report.migrated.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].path.ends_with("b.json"));
        assert!(report.failed[0].reason.starts_with("unreadable entry"));
    }
}
