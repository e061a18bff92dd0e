//! Atomic file writes: write to a sibling `.tmp` path, then `rename` over
//! the destination. POSIX guarantees `rename(2)` within a filesystem is
//! atomic, so readers (including a crashed-and-restarted process running
//! stale-session recovery) never observe a half-written session or index
//! file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use crate::error::{OublietteError, OublietteResult};

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> OublietteResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes).await
}

/// Atomically replaces `path` with `bytes`.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> OublietteResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, bytes).await?;

    fs::rename(&tmp_path, path).await.map_err(|e| {
        OublietteError::Io(std::io::Error::new(
            e.kind(),
            format!("rename {} -> {} failed: {e}", tmp_path.display(), path.display()),
        ))
    })?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("tmp");
    path.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        atomic_write_json(&path, &json!({"a": 1})).await.unwrap();
        let read: serde_json::Value = serde_json::from_slice(&fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(read, json!({"a": 1}));
    }

    #[tokio::test]
    async fn overwrite_replaces_contents_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        atomic_write_json(&path, &json!({"a": 1})).await.unwrap();
        atomic_write_json(&path, &json!({"a": 2})).await.unwrap();
        let read: serde_json::Value = serde_json::from_slice(&fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(read, json!({"a": 2}));
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("thing.json");
        atomic_write_json(&path, &json!({"ok": true})).await.unwrap();
        assert!(path.exists());
    }
}
