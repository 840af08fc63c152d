//! Opaque blob storage.
//!
//! One flat directory per node; the filename is the blob's hex identifier
//! with no extension. The sweep ignores anything whose name is not plain
//! alphanumeric hex, so stray files cannot be mistaken for blobs or smuggle
//! path separators into the store.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use ostinato_transport::tls::SecureChannel;
use ostinato_transport::FILE_CHUNK_SIZE;

use crate::{Result, RingError};

/// Directory-backed store of owned and backup blobs.
#[derive(Clone, Debug)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| RingError::Io(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `blob_id` can name a file in this store.
    fn is_valid_id(blob_id: &str) -> bool {
        !blob_id.is_empty() && blob_id.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    /// Filesystem path for a blob, or `None` for an invalid identifier.
    pub fn path(&self, blob_id: &str) -> Option<PathBuf> {
        Self::is_valid_id(blob_id).then(|| self.dir.join(blob_id))
    }

    /// Whether the store holds `blob_id`.
    pub fn contains(&self, blob_id: &str) -> bool {
        self.path(blob_id).is_some_and(|p| p.is_file())
    }

    /// Size in bytes of a stored blob.
    pub fn size(&self, blob_id: &str) -> Option<u64> {
        let path = self.path(blob_id)?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    /// All blob identifiers currently stored. Non-alphanumeric names are
    /// skipped.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| RingError::Io(format!("read {}: {e}", self.dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| RingError::Io(e.to_string()))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if Self::is_valid_id(name) {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    /// Persist a blob locally. Propagation to replicas happens on the next
    /// stabilization sweep.
    pub async fn store(&self, blob_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self
            .path(blob_id)
            .ok_or_else(|| RingError::InvalidBlobId(blob_id.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RingError::Io(format!("write {}: {e}", path.display())))?;
        debug!(blob = blob_id, size = bytes.len(), "blob stored");
        Ok(())
    }

    /// Receive `size` raw bytes from `chan` into the store.
    ///
    /// Returns `Ok(true)` on a complete transfer. A short read deletes the
    /// partial file and returns `Ok(false)`; the sender's next sweep will
    /// retry.
    pub async fn receive(
        &self,
        blob_id: &str,
        size: u64,
        chan: &mut SecureChannel,
    ) -> Result<bool> {
        let path = self
            .path(blob_id)
            .ok_or_else(|| RingError::InvalidBlobId(blob_id.to_string()))?;

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| RingError::Io(format!("create {}: {e}", path.display())))?;

        let mut remaining = size;
        let mut buf = [0u8; FILE_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(FILE_CHUNK_SIZE as u64) as usize;
            let n = chan.recv_chunk(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| RingError::Io(format!("write {}: {e}", path.display())))?;
            remaining -= n as u64;
        }
        file.flush()
            .await
            .map_err(|e| RingError::Io(e.to_string()))?;
        drop(file);

        if remaining > 0 {
            warn!(
                blob = blob_id,
                missing = remaining,
                "short blob transfer, removing partial file"
            );
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| RingError::Io(format!("remove {}: {e}", path.display())))?;
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path().join("blobs")).expect("open");
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let (_guard, store) = open_store();
        store.store("ab12cd", b"payload").await.expect("store");

        assert!(store.contains("ab12cd"));
        assert_eq!(store.size("ab12cd"), Some(7));
        assert_eq!(store.ids().expect("ids"), vec!["ab12cd".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_identifiers_rejected() {
        let (_guard, store) = open_store();
        assert!(store.store("../escape", b"x").await.is_err());
        assert!(store.store("", b"x").await.is_err());
        assert!(!store.contains("no/slashes"));
        assert_eq!(store.path("a.b"), None);
    }

    #[tokio::test]
    async fn test_non_alphanumeric_files_ignored() {
        let (_guard, store) = open_store();
        store.store("deadbeef", b"blob").await.expect("store");
        std::fs::write(store.dir().join("notes.txt"), b"junk").expect("write");
        std::fs::write(store.dir().join(".hidden"), b"junk").expect("write");

        assert_eq!(store.ids().expect("ids"), vec!["deadbeef".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_is_idempotent() {
        let (_guard, store) = open_store();
        store.store("cafe", b"one").await.expect("store");
        store.store("cafe", b"two").await.expect("store again");
        assert_eq!(store.size("cafe"), Some(3));
        assert_eq!(store.ids().expect("ids").len(), 1);
    }
}
