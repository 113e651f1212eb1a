//! Date-partitioned artifact store.
//!
//! The store is the only code that reads or writes the output tree. Every
//! run date owns one directory:
//!
//! ```text
//! output/2026-10-18/
//! ├── .artifacts.json          # artifact index (hash, revision, timestamps)
//! ├── keywords.json            # normalized keyword set with trend context
//! ├── trends_data.json         # raw scrape snapshot
//! ├── images/<slug>.jpg
//! ├── metadata/<slug>.json
//! ├── upload_ready/<slug>.jpg  # bundle image copy
//! ├── upload_ready/<slug>.json # bundle manifest, written last
//! └── logs/<slug>.log, logs/summary.json
//! ```
//!
//! # Design
//!
//! Paths are a pure function of `(date, keyword, kind)`, so re-running a
//! stage overwrites in place and concurrent workers handling different
//! keywords never touch the same file. The artifact files themselves are
//! written outside any lock (temp file + rename); only the in-memory index
//! is behind a `Mutex`.
//!
//! ## Idempotent writes
//!
//! Each write hashes the content (SHA-256). If the index already records
//! that hash for the path and the file is still on disk, the write is a
//! no-op ([`WriteOutcome::Unchanged`]). Different content overwrites the
//! file and bumps a revision counter that exists only for logging.
//!
//! ## Index recovery
//!
//! The index is a convenience, not the source of truth for existence: an
//! entry only counts while its file is on disk. A missing, corrupt or
//! outdated index is rebuilt by walking the run directory and hashing what
//! is there, with keyword names recovered from `keywords.json`.

use crate::types::{Keyword, KeywordEntry};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use walkdir::WalkDir;

/// Name of the artifact index within a run directory.
const INDEX_FILENAME: &str = ".artifacts.json";

/// Bump to force an index rebuild when the format changes.
const INDEX_VERSION: u32 = 1;

/// Subdirectories created for every run.
pub const RUN_DIRS: [&str; 4] = ["images", "metadata", "upload_ready", "logs"];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no {kind} artifact for '{keyword}' in run {date}")]
    NotFound {
        date: NaiveDate,
        keyword: Keyword,
        kind: ArtifactKind,
    },
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The slot an artifact occupies for its keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Metadata,
    /// Image copy inside `upload_ready/`.
    BundleImage,
    /// Bundle manifest inside `upload_ready/`. Its presence marks the pair
    /// eligible for upload.
    Bundle,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Image,
        ArtifactKind::Metadata,
        ArtifactKind::BundleImage,
        ArtifactKind::Bundle,
    ];

    pub fn dir(self) -> &'static str {
        match self {
            ArtifactKind::Image => "images",
            ArtifactKind::Metadata => "metadata",
            ArtifactKind::BundleImage | ArtifactKind::Bundle => "upload_ready",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Image | ArtifactKind::BundleImage => "jpg",
            ArtifactKind::Metadata | ArtifactKind::Bundle => "json",
        }
    }

    /// Path of the artifact relative to its run directory.
    pub fn relative_path(self, slug: &str) -> String {
        format!("{}/{}.{}", self.dir(), slug, self.extension())
    }

    /// Inverse of [`relative_path`](Self::relative_path): `(kind, slug)`.
    fn parse_relative(dir: &str, file_name: &str) -> Option<(ArtifactKind, String)> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|k| k.dir() == dir && k.extension() == ext)
            .map(|k| (k, stem.to_string()))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Metadata => "metadata",
            ArtifactKind::BundleImage => "bundle image",
            ArtifactKind::Bundle => "bundle",
        })
    }
}

/// Index entry for one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub keyword: Keyword,
    pub kind: ArtifactKind,
    /// Hex SHA-256 of the file content.
    pub hash: String,
    pub size: u64,
    /// 1 on creation, incremented on every content change.
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a write did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    /// Identical content was already stored; nothing was touched.
    Unchanged,
    /// Content differed and was overwritten; carries the new revision.
    Revised(u32),
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, WriteOutcome::Unchanged)
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Created => f.write_str("created"),
            WriteOutcome::Unchanged => f.write_str("unchanged"),
            WriteOutcome::Revised(rev) => write!(f, "revised (rev {rev})"),
        }
    }
}

/// Run-level JSON documents that live beside the artifact slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDocument {
    Keywords,
    Trends,
    Summary,
}

impl RunDocument {
    pub fn relative_path(self) -> &'static str {
        match self {
            RunDocument::Keywords => "keywords.json",
            RunDocument::Trends => "trends_data.json",
            RunDocument::Summary => "logs/summary.json",
        }
    }
}

/// On-disk artifact index for one run, keyed by relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunIndex {
    version: u32,
    records: BTreeMap<String, ArtifactRecord>,
}

impl RunIndex {
    fn empty() -> Self {
        Self {
            version: INDEX_VERSION,
            records: BTreeMap::new(),
        }
    }

    /// Load the index, rebuilding it from the run tree when it is missing,
    /// unparsable or from another format version.
    fn load(run_dir: &Path) -> Self {
        let path = run_dir.join(INDEX_FILENAME);
        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<Self>(&content).ok());
        match parsed {
            Some(index) if index.version == INDEX_VERSION => index,
            _ => Self::rebuild(run_dir),
        }
    }

    fn rebuild(run_dir: &Path) -> Self {
        let mut index = Self::empty();
        if !run_dir.is_dir() {
            return index;
        }

        let by_slug: HashMap<String, Keyword> = read_json::<Vec<KeywordEntry>>(
            &run_dir.join(RunDocument::Keywords.relative_path()),
        )
        .ok()
        .flatten()
        .unwrap_or_default()
        .into_iter()
        .map(|entry| (entry.keyword.slug(), entry.keyword))
        .collect();

        for entry in WalkDir::new(run_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let dir = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let file_name = entry.file_name().to_string_lossy();
            let Some((kind, slug)) = ArtifactKind::parse_relative(dir, &file_name) else {
                continue;
            };
            let Some(keyword) = by_slug.get(&slug) else {
                tracing::warn!(path = %entry.path().display(), "skipping artifact with unknown keyword");
                continue;
            };
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            let now = Utc::now();
            index.records.insert(
                kind.relative_path(&slug),
                ArtifactRecord {
                    keyword: keyword.clone(),
                    kind,
                    hash: hash_bytes(&bytes),
                    size: bytes.len() as u64,
                    revision: 1,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        tracing::debug!(
            run = %run_dir.display(),
            artifacts = index.records.len(),
            "rebuilt artifact index"
        );
        index
    }

    fn save(&self, run_dir: &Path) -> Result<(), StoreError> {
        let path = run_dir.join(INDEX_FILENAME);
        let json = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json)
    }
}

/// Owner of the date-partitioned output tree.
///
/// Cheap to share by reference across worker threads: indexes are loaded
/// lazily per date and cached behind a mutex.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    indexes: Mutex<HashMap<NaiveDate, RunIndex>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format(DATE_FORMAT).to_string())
    }

    pub fn run_space_exists(&self, date: NaiveDate) -> bool {
        self.run_dir(date).is_dir()
    }

    pub fn artifact_path(&self, date: NaiveDate, keyword: &Keyword, kind: ArtifactKind) -> PathBuf {
        self.run_dir(date).join(kind.relative_path(&keyword.slug()))
    }

    /// Create the directory skeleton for a run. Safe to call repeatedly.
    pub fn ensure_run_space(&self, date: NaiveDate) -> Result<PathBuf, StoreError> {
        let run_dir = self.run_dir(date);
        for dir in RUN_DIRS {
            let path = run_dir.join(dir);
            fs::create_dir_all(&path).map_err(io_at(&path))?;
        }
        Ok(run_dir)
    }

    /// Persist an artifact, skipping the write when identical content is
    /// already stored at that path.
    pub fn write_artifact(
        &self,
        date: NaiveDate,
        keyword: &Keyword,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<WriteOutcome, StoreError> {
        let run_dir = self.run_dir(date);
        let relative = kind.relative_path(&keyword.slug());
        let path = run_dir.join(&relative);
        let hash = hash_bytes(bytes);
        let size = bytes.len() as u64;

        let previous = self.with_index(date, |index| index.records.get(&relative).cloned());
        if let Some(prev) = &previous
            && prev.hash == hash
            && prev.keyword == *keyword
            && fs::metadata(&path).is_ok_and(|m| m.len() == size)
        {
            return Ok(WriteOutcome::Unchanged);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        write_atomic(&path, bytes)?;

        let now = Utc::now();
        let (outcome, record) = match previous {
            Some(prev) => {
                let revision = prev.revision + 1;
                (
                    WriteOutcome::Revised(revision),
                    ArtifactRecord {
                        keyword: keyword.clone(),
                        kind,
                        hash,
                        size,
                        revision,
                        created_at: prev.created_at,
                        updated_at: now,
                    },
                )
            }
            None => (
                WriteOutcome::Created,
                ArtifactRecord {
                    keyword: keyword.clone(),
                    kind,
                    hash,
                    size,
                    revision: 1,
                    created_at: now,
                    updated_at: now,
                },
            ),
        };

        self.with_index(date, |index| {
            index.records.insert(relative, record);
            index.save(&run_dir)
        })?;
        tracing::trace!(%keyword, %kind, %outcome, "artifact write");
        Ok(outcome)
    }

    pub fn read_artifact(
        &self,
        date: NaiveDate,
        keyword: &Keyword,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.artifact_path(date, keyword, kind);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                date,
                keyword: keyword.clone(),
                kind,
            }),
            Err(e) => Err(io_at(&path)(e)),
        }
    }

    /// True when the artifact is recorded and its file is still on disk.
    pub fn exists(&self, date: NaiveDate, keyword: &Keyword, kind: ArtifactKind) -> bool {
        self.record(date, keyword, kind).is_some()
    }

    /// Index entry for an artifact whose file is still on disk.
    pub fn record(
        &self,
        date: NaiveDate,
        keyword: &Keyword,
        kind: ArtifactKind,
    ) -> Option<ArtifactRecord> {
        let relative = kind.relative_path(&keyword.slug());
        let record = self.with_index(date, |index| index.records.get(&relative).cloned())?;
        (record.keyword == *keyword && self.run_dir(date).join(&relative).is_file())
            .then_some(record)
    }

    /// Delete an artifact and its index entry. Returns whether anything
    /// was removed.
    pub fn remove_artifact(
        &self,
        date: NaiveDate,
        keyword: &Keyword,
        kind: ArtifactKind,
    ) -> Result<bool, StoreError> {
        let run_dir = self.run_dir(date);
        let relative = kind.relative_path(&keyword.slug());
        let path = run_dir.join(&relative);
        let removed_file = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_at(&path)(e)),
        };
        let removed_record = self.with_index(date, |index| {
            if index.records.remove(&relative).is_some() {
                index.save(&run_dir).map(|_| true)
            } else {
                Ok(false)
            }
        })?;
        Ok(removed_file || removed_record)
    }

    /// Keywords that have a persisted artifact of `kind`.
    ///
    /// The listing is a snapshot of the index taken now; each item is
    /// checked against the filesystem as the iterator advances. Clone the
    /// iterator to walk it again from the start.
    pub fn list_completed(&self, date: NaiveDate, kind: ArtifactKind) -> CompletedKeywords {
        let run_dir = self.run_dir(date);
        let items = self.with_index(date, |index| {
            index
                .records
                .iter()
                .filter(|(_, record)| record.kind == kind)
                .map(|(relative, record)| (record.keyword.clone(), run_dir.join(relative)))
                .collect()
        });
        CompletedKeywords { items, pos: 0 }
    }

    /// Write a run-level JSON document.
    pub fn write_document<T: Serialize + ?Sized>(
        &self,
        date: NaiveDate,
        doc: RunDocument,
        value: &T,
    ) -> Result<(), StoreError> {
        let path = self.run_dir(date).join(doc.relative_path());
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        write_atomic(&path, &json)
    }

    /// Read a run-level JSON document. `Ok(None)` when it does not exist.
    pub fn read_document<T: DeserializeOwned>(
        &self,
        date: NaiveDate,
        doc: RunDocument,
    ) -> Result<Option<T>, StoreError> {
        read_json(&self.run_dir(date).join(doc.relative_path()))
    }

    /// Append one timestamped line to the keyword's log.
    pub fn append_log(
        &self,
        date: NaiveDate,
        keyword: &Keyword,
        message: &str,
    ) -> Result<(), StoreError> {
        let path = self
            .run_dir(date)
            .join("logs")
            .join(format!("{}.log", keyword.slug()));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_at(&path))?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), message).map_err(io_at(&path))
    }

    /// All run dates present under the root, oldest first.
    pub fn list_runs(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_at(&self.root)(e)),
        };
        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name();
                NaiveDate::parse_from_str(name.to_str()?, DATE_FORMAT).ok()
            })
            .collect();
        dates.sort();
        Ok(dates)
    }

    /// Delete a whole run directory.
    pub fn remove_run(&self, date: NaiveDate) -> Result<(), StoreError> {
        let run_dir = self.run_dir(date);
        self.indexes().remove(&date);
        match fs::remove_dir_all(&run_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_at(&run_dir)(e)),
        }
    }

    /// Delete every run dated strictly before `cutoff`. Returns the
    /// removed dates, oldest first.
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<Vec<NaiveDate>, StoreError> {
        let expired: Vec<NaiveDate> = self
            .list_runs()?
            .into_iter()
            .filter(|d| *d < cutoff)
            .collect();
        for date in &expired {
            self.remove_run(*date)?;
            tracing::info!(%date, "pruned run");
        }
        Ok(expired)
    }

    fn indexes(&self) -> MutexGuard<'_, HashMap<NaiveDate, RunIndex>> {
        // A worker that panicked mid-update leaves at worst a stale entry,
        // which `record` already guards against.
        self.indexes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_index<R>(&self, date: NaiveDate, f: impl FnOnce(&mut RunIndex) -> R) -> R {
        let mut indexes = self.indexes();
        let index = indexes
            .entry(date)
            .or_insert_with(|| RunIndex::load(&self.run_dir(date)));
        f(index)
    }
}

/// Lazy, finite listing of keywords with a completed artifact.
///
/// Returned by [`ArtifactStore::list_completed`]. Cloning yields an
/// independent iterator starting from the current position.
#[derive(Debug, Clone)]
pub struct CompletedKeywords {
    items: Vec<(Keyword, PathBuf)>,
    pos: usize,
}

impl CompletedKeywords {
    /// Rewind to the first item.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for CompletedKeywords {
    type Item = Keyword;

    fn next(&mut self) -> Option<Keyword> {
        while let Some((keyword, path)) = self.items.get(self.pos) {
            self.pos += 1;
            if path.is_file() {
                return Some(keyword.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.items.len() - self.pos))
    }
}

/// SHA-256 of a byte slice as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write via a sibling temp file and rename so readers never see a
/// half-written artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes).map_err(io_at(&tmp))?;
    fs::rename(&tmp, path).map_err(io_at(path))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_at(path)(e)),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}
