//! Filesystem checkpoint store with a sharded layout and atomic writes.
//!
//! Layout: `<root>/states/<xx>/<contract_id>/<height>.json`, where `xx`
//! is the first two characters of the sanitized contract id. One file
//! per checkpoint, written via temp-file-then-rename so a crash mid-write
//! never leaves a torn checkpoint behind.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::warn;

use weave_types::ids::ContractId;
use weave_types::CacheEntry;

/// Restrict a contract id to filesystem-safe characters. Ids are
/// base64url on the wire, so this is normally the identity.
pub fn sanitize_contract_id(contract_id: &ContractId) -> String {
    contract_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Shard directory component for a sanitized id.
fn shard(sanitized: &str) -> String {
    let mut shard: String = sanitized.chars().take(2).collect();
    while shard.len() < 2 {
        shard.push('_');
    }
    shard
}

/// Directory holding all checkpoints for one contract.
pub fn contract_dir(root: &Path, contract_id: &ContractId) -> PathBuf {
    let sanitized = sanitize_contract_id(contract_id);
    root.join("states").join(shard(&sanitized)).join(sanitized)
}

/// Full path of one checkpoint file.
pub fn checkpoint_path(root: &Path, contract_id: &ContractId, height: u64) -> PathBuf {
    contract_dir(root, contract_id).join(format!("{}.json", height))
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("failed to create directory {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Write a file atomically (write to .tmp, then rename).
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| anyhow!("failed to write temp file {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        anyhow!(
            "failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(())
}

/// Filesystem-backed checkpoint store.
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| anyhow!("failed to create cache root {}: {}", root.display(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one checkpoint. Overwrites an existing file for the same
    /// height, which is safe: replay is deterministic, so a rewrite holds
    /// identical content.
    pub fn save(&self, contract_id: &ContractId, entry: &CacheEntry) -> Result<()> {
        let path = checkpoint_path(&self.root, contract_id, entry.block_height);
        let json = serde_json::to_vec(entry)
            .map_err(|e| anyhow!("failed to serialize checkpoint: {}", e))?;
        atomic_write(&path, &json)
    }

    /// Load every checkpoint stored for a contract, unordered. Files that
    /// fail to parse are skipped with a warning rather than poisoning the
    /// whole contract.
    pub fn load_contract(&self, contract_id: &ContractId) -> Result<Vec<CacheEntry>> {
        let dir = contract_dir(&self.root, contract_id);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow!(
                    "failed to read checkpoint dir {}: {}",
                    dir.display(),
                    err
                ))
            }
        };

        let mut entries = Vec::new();
        for dirent in read_dir {
            let path = dirent
                .map_err(|e| anyhow!("failed to list {}: {}", dir.display(), e))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint");
                    continue;
                }
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping corrupt checkpoint");
                }
            }
        }
        Ok(entries)
    }

    /// Delete one checkpoint file. Missing files are not an error; the
    /// pruner may race an external cleanup.
    pub fn remove(&self, contract_id: &ContractId, height: u64) -> Result<()> {
        let path = checkpoint_path(&self.root, contract_id, height);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow!(
                "failed to remove checkpoint {}: {}",
                path.display(),
                err
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use weave_types::EvaluationState;

    fn entry(height: u64) -> CacheEntry {
        CacheEntry::new(
            height,
            None,
            EvaluationState::initial(json!({"height": height})),
        )
    }

    #[test]
    fn save_and_load_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsCheckpointStore::new(temp_dir.path())?;
        let contract = ContractId::new("contract-abc");

        store.save(&contract, &entry(10))?;
        store.save(&contract, &entry(20))?;

        let mut loaded = store.load_contract(&contract)?;
        loaded.sort_by_key(|e| e.block_height);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].block_height, 10);
        assert_eq!(loaded[1].state.state, json!({"height": 20}));

        assert!(store.load_contract(&ContractId::new("unknown"))?.is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_files_are_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsCheckpointStore::new(temp_dir.path())?;
        let contract = ContractId::new("contract-abc");
        store.save(&contract, &entry(10))?;

        let bad = checkpoint_path(store.root(), &contract, 20);
        std::fs::write(&bad, b"{not json")?;

        let loaded = store.load_contract(&contract)?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].block_height, 10);
        Ok(())
    }

    #[test]
    fn remove_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsCheckpointStore::new(temp_dir.path())?;
        let contract = ContractId::new("contract-abc");
        store.save(&contract, &entry(10))?;

        store.remove(&contract, 10)?;
        store.remove(&contract, 10)?;
        assert!(store.load_contract(&contract)?.is_empty());
        Ok(())
    }

    #[test]
    fn ids_with_unsafe_characters_are_sanitized() {
        let contract = ContractId::new("../../etc/passwd");
        let sanitized = sanitize_contract_id(&contract);
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('.'));
        let path = checkpoint_path(Path::new("/cache"), &contract, 5);
        assert!(path.starts_with("/cache/states"));
    }
}
