//! Default filesystem-backed port implementations, plus in-memory ones for embedding and tests.

use crate::ports::{BlobLink, BlobSource, WritePort};
use anyhow::Context;
use blobfix_types::path::normalize_blob_path;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Every regular file below an extraction root. Links are reported, never followed.
#[derive(Debug, Clone)]
pub struct FsBlobSource {
    root: Utf8PathBuf,
}

#[derive(Default)]
struct Scan {
    files: Vec<String>,
    links: Vec<BlobLink>,
}

impl FsBlobSource {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn scan(&self) -> anyhow::Result<Scan> {
        debug!(root = %self.root, "scanning for blobs");
        let mut scan = Scan::default();
        self.walk(&self.root, &mut scan)?;
        scan.files.sort();
        scan.links.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(scan)
    }

    fn walk(&self, dir: &Utf8Path, scan: &mut Scan) -> anyhow::Result<()> {
        for entry in fs::read_dir(dir.as_std_path())? {
            let path = Utf8PathBuf::from_path_buf(entry?.path())
                .map_err(|p| anyhow::anyhow!("non UTF-8 blob path: {}", p.display()))?;
            let file_type = fs::symlink_metadata(&path)?.file_type();
            if file_type.is_symlink() {
                let target = Utf8PathBuf::from_path_buf(fs::read_link(&path)?)
                    .map_err(|p| anyhow::anyhow!("non UTF-8 link target: {}", p.display()))?;
                scan.links.push(BlobLink {
                    path: self.relative(&path)?,
                    target,
                });
            } else if file_type.is_dir() {
                self.walk(&path, scan)?;
            } else if file_type.is_file() {
                scan.files.push(self.relative(&path)?);
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Utf8Path) -> anyhow::Result<String> {
        let rel = path
            .strip_prefix(&self.root)
            .with_context(|| format!("{} is outside {}", path, self.root))?;
        Ok(normalize_blob_path(rel.as_str()))
    }
}

impl BlobSource for FsBlobSource {
    fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.scan()?.files)
    }

    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.root.join(path);
        fs::read(&full).with_context(|| format!("read {}", full))
    }

    fn links(&self) -> anyhow::Result<Vec<BlobLink>> {
        Ok(self.scan()?.links)
    }
}

/// Blobs held in memory, keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobSource {
    blobs: BTreeMap<String, Vec<u8>>,
    links: BTreeMap<String, Utf8PathBuf>,
}

impl InMemoryBlobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(normalize_blob_path(path), bytes.into());
        self
    }

    pub fn with_link(mut self, path: &str, target: impl Into<Utf8PathBuf>) -> Self {
        self.links.insert(normalize_blob_path(path), target.into());
        self
    }
}

impl BlobSource for InMemoryBlobSource {
    fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.blobs.keys().cloned().collect())
    }

    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .get(&normalize_blob_path(path))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no blob at {path}"))
    }

    fn links(&self) -> anyhow::Result<Vec<BlobLink>> {
        Ok(self
            .links
            .iter()
            .map(|(path, target)| BlobLink {
                path: path.clone(),
                target: target.clone(),
            })
            .collect())
    }
}

/// Filesystem write operations.
#[derive(Debug, Clone, Default)]
pub struct FsWritePort;

impl WritePort for FsWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent dir for {}", path))?;
        }
        fs::write(path, contents).with_context(|| format!("write {}", path))
    }

    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()> {
        fs::create_dir_all(path).with_context(|| format!("create_dir_all {}", path))
    }

    fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent dir for {}", path))?;
        }
        if let Ok(meta) = fs::symlink_metadata(path) {
            if meta.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
        }
        create_symlink(target, path).with_context(|| format!("link {} -> {}", path, target))
    }
}

#[cfg(unix)]
fn create_symlink(target: &Utf8Path, path: &Utf8Path) -> std::io::Result<()> {
    fs::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn create_symlink(target: &Utf8Path, path: &Utf8Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot create link {path} -> {target} on this platform"),
    ))
}

/// Discards every write. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct NullWritePort;

impl WritePort for NullWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        debug!(path = %path, bytes = contents.len(), "dry run: skipping write");
        Ok(())
    }

    fn create_dir_all(&self, _path: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> anyhow::Result<()> {
        debug!(path = %path, target = %target, "dry run: skipping link");
        Ok(())
    }
}

/// Keeps written files and links in memory.
#[derive(Debug, Default)]
pub struct MemoryWritePort {
    files: Mutex<BTreeMap<Utf8PathBuf, Vec<u8>>>,
    links: Mutex<BTreeMap<Utf8PathBuf, Utf8PathBuf>>,
}

impl MemoryWritePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Utf8Path) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        lock(&self.files).keys().cloned().collect()
    }

    pub fn link(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        lock(&self.links).get(path).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WritePort for MemoryWritePort {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()> {
        lock(&self.files).insert(path.to_owned(), contents.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Utf8Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> anyhow::Result<()> {
        lock(&self.links).insert(path.to_owned(), target.to_owned());
        Ok(())
    }
}
