//! Content snapshots of file trees.
//!
//! A [`TreeSnapshot`] records the SHA-256 of every file under a root,
//! keyed by path relative to that root. Snapshots taken before and after a
//! shadow-run are diffed to discover exactly which files the command
//! changed; the merge resolver later compares the "before" hashes of
//! overlapping writes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::sandbox::isolation::should_skip;

/// A single file difference between two snapshots.
///
/// `before_hash` is `None` for a created file; `after_hash` is `None` for a
/// deleted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the snapshot root.
    pub path: PathBuf,
    /// Hash of the file before the run, if it existed.
    pub before_hash: Option<String>,
    /// Hash of the file after the run, if it still exists.
    pub after_hash: Option<String>,
}

impl FileChange {
    /// True if the change created the file.
    pub fn is_created(&self) -> bool {
        self.before_hash.is_none()
    }

    /// True if the change deleted the file.
    pub fn is_deleted(&self) -> bool {
        self.after_hash.is_none()
    }
}

/// SHA-256 content hashes for every file under a root.
///
/// Paths under [`crate::sandbox::isolation::SKIP_DIRS`] are excluded, so a
/// snapshot sees exactly the tree a workspace mirrors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    files: BTreeMap<PathBuf, String>,
}

impl TreeSnapshot {
    /// Capture a snapshot of the tree rooted at `root`.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if should_skip(&rel) {
                continue;
            }
            files.insert(rel, hash_file(entry.path())?);
        }
        Ok(Self { files })
    }

    /// Look up the recorded hash of a file.
    pub fn hash_of(&self, rel: &Path) -> Option<&str> {
        self.files.get(rel).map(|s| s.as_str())
    }

    /// Number of files in the snapshot.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Diff against a later snapshot of the same logical tree.
    ///
    /// Returns created, modified, and deleted files in path order.
    pub fn diff(&self, after: &TreeSnapshot) -> Vec<FileChange> {
        let mut changes = Vec::new();

        for (path, after_hash) in &after.files {
            match self.files.get(path) {
                Some(before_hash) if before_hash == after_hash => {}
                Some(before_hash) => changes.push(FileChange {
                    path: path.clone(),
                    before_hash: Some(before_hash.clone()),
                    after_hash: Some(after_hash.clone()),
                }),
                None => changes.push(FileChange {
                    path: path.clone(),
                    before_hash: None,
                    after_hash: Some(after_hash.clone()),
                }),
            }
        }

        for (path, before_hash) in &self.files {
            if !after.files.contains_key(path) {
                changes.push(FileChange {
                    path: path.clone(),
                    before_hash: Some(before_hash.clone()),
                    after_hash: None,
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }
}

/// SHA-256 of a file's contents, hex-encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
