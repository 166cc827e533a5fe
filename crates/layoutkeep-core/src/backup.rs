//! Backup and restore of the whole arrangement store.
//!
//! A backup is one JSON file holding every key's history at the time it was
//! taken. Restoring either replaces the store contents or merges into them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::{ArrangementRecord, ArrangementStore};
use crate::Result;

/// Backup unit format version written by this build.
pub const BACKUP_VERSION: u32 = 1;

const BACKUP_PREFIX: &str = "layoutkeep-backup-";

/// Backup settings (`[backup]` in layoutkeep.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup directory. Defaults to a sibling of the data dir.
    pub dir: Option<PathBuf>,
    /// Backups kept by `prune_backups` when no count is given.
    pub keep: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self { dir: None, keep: 10 }
    }
}

/// Contents of one backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupUnit {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Number of keys, not records.
    pub arrangement_count: usize,
    pub arrangements: BTreeMap<String, Vec<ArrangementRecord>>,
}

/// A backup file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub arrangement_count: usize,
}

/// How a backup is applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Drop current contents first.
    Replace,
    /// Keep current records; add ones with unseen timestamps.
    Merge,
}

/// Summary of a prune pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub removed: usize,
    pub kept: usize,
}

/// Write a backup of `store` into `dir`.
pub async fn create_backup(store: &ArrangementStore, dir: &Path) -> Result<BackupEntry> {
    create_backup_at(store, dir, Utc::now()).await
}

/// [`create_backup`] with an explicit creation time.
pub async fn create_backup_at(
    store: &ArrangementStore,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<BackupEntry> {
    let arrangements = store.export_all().await?;
    let unit = BackupUnit {
        version: BACKUP_VERSION,
        created_at: now,
        arrangement_count: arrangements.len(),
        arrangements,
    };

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "{BACKUP_PREFIX}{}.json",
        now.format("%Y%m%d-%H%M%S-%3f")
    ));
    let data = serde_json::to_string_pretty(&unit)?;
    tokio::fs::write(&path, data).await?;

    info!(
        path = %path.display(),
        arrangements = unit.arrangement_count,
        "backup created"
    );
    Ok(BackupEntry {
        path,
        created_at: unit.created_at,
        arrangement_count: unit.arrangement_count,
    })
}

/// Parse one backup file.
pub fn read_backup(path: &Path) -> Result<BackupUnit> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::BackupNotFound(path.display().to_string()).into());
        }
        Err(e) => return Err(e.into()),
    };

    let value: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| corrupt(path, &e.to_string()))?;
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| corrupt(path, "missing version"))?;
    if version > u64::from(BACKUP_VERSION) {
        return Err(StoreError::UnsupportedBackupVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: BACKUP_VERSION,
        }
        .into());
    }
    serde_json::from_value(value).map_err(|e| corrupt(path, &e.to_string()).into())
}

fn corrupt(path: &Path, details: &str) -> StoreError {
    StoreError::Corrupt {
        key: path.display().to_string(),
        details: details.to_string(),
    }
}

/// Backups in `dir`, newest first. Unreadable files are skipped.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"));
        if !is_backup {
            continue;
        }
        match read_backup(&path) {
            Ok(unit) => entries.push(BackupEntry {
                path,
                created_at: unit.created_at,
                arrangement_count: unit.arrangement_count,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable backup"),
        }
    }
    entries.sort_by(compare_newest_first);
    Ok(entries)
}

fn compare_newest_first(a: &BackupEntry, b: &BackupEntry) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.path.cmp(&a.path))
}

/// Apply a backup to the store. Returns the number of keys in the backup.
pub async fn restore_backup(
    store: &ArrangementStore,
    unit: BackupUnit,
    mode: RestoreMode,
) -> Result<usize> {
    let count = unit.arrangements.len();
    match mode {
        RestoreMode::Replace => store.replace_all(unit.arrangements).await?,
        RestoreMode::Merge => store.merge_all(unit.arrangements).await?,
    }
    info!(keys = count, mode = ?mode, "backup restored");
    Ok(count)
}

/// Delete all but the newest `keep` backups.
pub fn prune_backups(dir: &Path, keep: usize) -> Result<PruneSummary> {
    let entries = list_backups(dir)?;
    let mut removed = 0_usize;
    for entry in entries.iter().skip(keep) {
        if let Err(e) = fs::remove_file(&entry.path) {
            warn!(path = %entry.path.display(), error = %e, "failed to remove old backup");
        } else {
            removed += 1;
        }
    }
    let kept = list_backups(dir)?.len();
    Ok(PruneSummary { removed, kept })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::snapshot::{LayoutNode, Snapshot, Tab, WindowState};
    use crate::store::{MemoryBackend, StoreConfig};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn snap(path: &str) -> Snapshot {
        Snapshot::new(
            WindowState::new(LayoutNode::tab_group(vec![Tab::new(path)])),
            1,
        )
    }

    fn store() -> ArrangementStore {
        ArrangementStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn backup_round_trip_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let source = store();
        source.set_at("a.md", snap("a.md"), None, 1).await.unwrap();
        source.set_at("b.md", snap("b.md"), None, 2).await.unwrap();

        let entry = create_backup_at(&source, dir.path(), at(0)).await.unwrap();
        assert_eq!(entry.arrangement_count, 2);

        let target = store();
        target.set_at("stale.md", snap("x.md"), None, 9).await.unwrap();
        let unit = read_backup(&entry.path).unwrap();
        assert_eq!(restore_backup(&target, unit, RestoreMode::Replace).await.unwrap(), 2);
        assert_eq!(target.keys().await.unwrap(), vec!["a.md", "b.md"]);
        target.cleanup().await.unwrap();
        source.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn merge_keeps_existing_and_caps_history() {
        let dir = tempfile::tempdir().unwrap();
        let source = store();
        for ts in 1..=4 {
            source.set_at("doc", snap("a.md"), Some(5), ts).await.unwrap();
        }
        let entry = create_backup_at(&source, dir.path(), at(0)).await.unwrap();

        let target = store();
        target.set_at("doc", snap("b.md"), Some(5), 10).await.unwrap();
        target.set_at("doc", snap("b.md"), Some(5), 11).await.unwrap();
        let unit = read_backup(&entry.path).unwrap();
        restore_backup(&target, unit, RestoreMode::Merge).await.unwrap();

        let saved: Vec<u64> = target
            .get_all("doc")
            .await
            .unwrap()
            .iter()
            .map(|r| r.saved_at)
            .collect();
        assert_eq!(saved, vec![11, 10, 4, 3, 2]);
        target.cleanup().await.unwrap();
        source.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn list_is_newest_first_and_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let source = store();
        for secs in [0, 60, 120] {
            create_backup_at(&source, dir.path(), at(secs)).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = list_backups(dir.path()).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].created_at, at(120));

        let summary = prune_backups(dir.path(), 1).unwrap();
        assert_eq!(summary, PruneSummary { removed: 2, kept: 1 });
        assert_eq!(list_backups(dir.path()).unwrap()[0].created_at, at(120));
    }

    #[test]
    fn missing_backup_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn read_rejects_missing_and_future_versions() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_backup(&dir.path().join("gone.json")).unwrap_err();
        assert!(matches!(missing, Error::Store(StoreError::BackupNotFound(_))));

        let future = dir.path().join("future.json");
        std::fs::write(
            &future,
            r#"{"version":7,"createdAt":"2024-01-01T00:00:00Z","arrangementCount":0,"arrangements":{}}"#,
        )
        .unwrap();
        let err = read_backup(&future).unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::UnsupportedBackupVersion { found: 7, supported: 1 })
        ));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "[1,2").unwrap();
        assert!(matches!(
            read_backup(&garbage).unwrap_err(),
            Error::Store(StoreError::Corrupt { .. })
        ));
    }
}
