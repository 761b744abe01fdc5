//! Content-addressed blob storage on the local filesystem.
//!
//! Blobs live at `blobs/<d0d1>/<d2d3>/<digest>` under the store root. Uploads
//! are streamed into a temporary file in `tmp/` (same filesystem, so the final
//! rename is atomic) while the SHA-256 digest is computed in the same pass.

use std::{
    fs,
    io::Write,
    path::PathBuf,
};

use anyhow::{bail, Result};
use futures_util::{Stream, StreamExt};
use rand::{seq::SliceRandom, thread_rng};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Failure modes while consuming an upload body.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Cumulative bytes crossed the configured cap; the partial file is gone.
    #[error("blob of at least {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    /// Local write failure.
    #[error("writing blob to temporary file: {0}")]
    Io(#[from] std::io::Error),
    /// The request body stream itself failed.
    #[error(transparent)]
    Body(anyhow::Error),
}

/// A fully received upload, staged in a temporary file.
///
/// Dropping a `StagedBlob` removes the temporary file, so every rejection
/// path after receive cleans up for free.
#[derive(Debug)]
pub struct StagedBlob {
    file: NamedTempFile,
    /// Number of bytes received.
    pub size: u64,
    /// Lowercase hex SHA-256 of the received bytes.
    pub digest: String,
}

/// Store for content-addressed blob files rooted at `root`.
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["blobs", "tmp"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Consume a request body stream into a staged temporary file, hashing and
    /// counting as bytes arrive. Aborts with [`ReceiveError::TooLarge`] the
    /// moment the running total crosses `limit`; the payload is never
    /// buffered in memory and a rejected upload leaves no file behind.
    pub async fn receive<S, B, E>(&self, mut body: S, limit: u64) -> Result<StagedBlob, ReceiveError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Into<anyhow::Error>,
    {
        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir)?;
        let mut file = NamedTempFile::new_in(&tmp_dir)?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ReceiveError::Body(e.into()))?;
            let data = chunk.as_ref();
            size += data.len() as u64;
            if size > limit {
                return Err(ReceiveError::TooLarge { size, limit });
            }
            hasher.update(data);
            file.write_all(data)?;
        }
        Ok(StagedBlob {
            file,
            size,
            digest: hex::encode(hasher.finalize()),
        })
    }

    /// Move a staged blob into its content-addressed home.
    ///
    /// If a file for this digest already exists the staged copy is discarded;
    /// the bytes are identical by definition of content addressing, which is
    /// what makes concurrent uploads of the same content race-safe without a
    /// lock.
    pub fn commit(&self, staged: StagedBlob) -> Result<PathBuf> {
        let path = self.blob_path(&staged.digest);
        if path.exists() {
            return Ok(path);
        }
        let parent = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        staged.file.persist(&path)?;
        Ok(path)
    }

    /// Open a stored blob for streaming reads.
    pub async fn open(&self, digest: &str) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.blob_path(digest)).await
    }

    /// Size of a stored blob, or `None` when absent (read-path errors are
    /// treated as misses).
    pub fn stat(&self, digest: &str) -> Option<u64> {
        fs::metadata(self.blob_path(digest)).ok().map(|m| m.len())
    }

    /// Remove the file for `digest`. Idempotent: deleting a blob that is
    /// already gone succeeds.
    pub fn delete(&self, digest: &str) -> Result<()> {
        match fs::remove_file(self.blob_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-hash a random sample of stored blobs and check each file's content
    /// digest still matches its name.
    pub fn verify_sample(&self, sample: usize) -> Result<usize> {
        let mut paths = vec![];
        for entry in walkdir::WalkDir::new(self.root.join("blobs")) {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        let mut rng = thread_rng();
        paths.shuffle(&mut rng);
        let take = sample.min(paths.len());
        for p in paths.iter().take(take) {
            let data = fs::read(p)?;
            let digest = hex::encode(Sha256::digest(&data));
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if digest != name {
                bail!("blob {} does not match its digest", p.display());
            }
        }
        Ok(take)
    }

    /// Compute the canonical path for a blob digest.
    fn blob_path(&self, digest: &str) -> PathBuf {
        let sub1 = digest.get(0..2).unwrap_or("00");
        let sub2 = digest.get(2..4).unwrap_or("00");
        self.root.join("blobs").join(sub1).join(sub2).join(digest)
    }
}
