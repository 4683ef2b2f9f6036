//! File mirror for [`LruDiskCache`](super::LruDiskCache).
//!
//! One pretty-printed JSON file per key, `<escaped-key>.cache`, plus a
//! `metadata.json` with lifetime request counters. Keys are escaped so any
//! string maps to a single flat file name: bytes outside `[A-Za-z0-9._-]`
//! become `%XX` (upper-case hex).
//!
//! ## Write ordering
//!
//! Writes may run on scheduler workers long after the `put` that caused them.
//! Every write is stamped with a sequence number issued under the cache lock
//! ([`DiskMirror::begin_write`]). The mirror remembers the latest sequence per
//! key; a write whose stamp is no longer current is skipped, and `remove` /
//! `clear` forget the key so pending writes for it become stale too. A key is
//! also forgotten once its latest write lands, so the map only holds keys with
//! a write in flight.
//!
//! Encoding happens outside the lock into `<escaped-key>.cache.<seq>.tmp`.
//! The stamp is checked again under the lock before the temp file is renamed
//! over the mirror file, so a write that went stale while encoding is
//! discarded.
//!
//! ```text
//!   put(k, v1) ─ seq 1 ─┐
//!   put(k, v2) ─ seq 2 ─┼──► latest[k] = 2
//!                       │
//!   worker: persist(k, seq 2) ──► encode tmp ──► rename, latest[k] removed
//!   worker: persist(k, seq 1) ──► skipped (stale)
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::traits::CacheValue;

/// Extension of per-key mirror files.
pub const CACHE_FILE_EXTENSION: &str = "cache";

/// Name of the counters file inside the cache directory.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Lifetime counters persisted across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub cache_hits: u64,
}

/// Escapes `key` into a file-name stem.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

/// Reverses [`escape_key`].
pub fn unescape_key(stem: &str) -> Result<String, PersistError> {
    let invalid = || PersistError::InvalidFileName(stem.to_string());
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3).ok_or_else(invalid)?;
                out.push(u8::from_str_radix(hex, 16).map_err(|_| invalid())?);
                i += 3;
            },
            byte => {
                out.push(byte);
                i += 1;
            },
        }
    }
    String::from_utf8(out).map_err(|_| invalid())
}

/// Directory-backed mirror of cache entries.
#[derive(Debug)]
pub struct DiskMirror {
    dir: PathBuf,
    next_seq: AtomicU64,
    // Held across the final rename and across deletes so a stale write cannot
    // land after the remove that superseded it. Never held while encoding.
    latest: Mutex<FxHashMap<String, u64>>,
}

impl DiskMirror {
    /// Opens `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_seq: AtomicU64::new(1),
            latest: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the mirror file for `key`.
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", escape_key(key), CACHE_FILE_EXTENSION))
    }

    fn temp_path(&self, key: &str, seq: u64) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{seq}.tmp", escape_key(key), CACHE_FILE_EXTENSION))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    /// Issues the sequence number for a new write of `key`.
    pub fn begin_write(&self, key: &str) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.latest.lock().insert(key.to_string(), seq);
        seq
    }

    /// Writes `value` if `seq` is still the latest write issued for `key`.
    ///
    /// Returns `Ok(false)` when the write was superseded and skipped, either
    /// before encoding or while it was in progress.
    pub fn persist<V: CacheValue>(&self, key: &str, seq: u64, value: &V) -> Result<bool, PersistError> {
        if self.latest.lock().get(key) != Some(&seq) {
            tracing::trace!(key, seq, "skipping superseded cache write");
            return Ok(false);
        }

        let tmp = self.temp_path(key, seq);
        if let Err(err) = write_json(&tmp, value) {
            discard_temp(&tmp);
            return Err(err);
        }

        let mut latest = self.latest.lock();
        if latest.get(key) != Some(&seq) {
            drop(latest);
            tracing::trace!(key, seq, "cache write superseded while encoding");
            discard_temp(&tmp);
            return Ok(false);
        }
        latest.remove(key);
        if let Err(err) = fs::rename(&tmp, self.file_path(key)) {
            drop(latest);
            discard_temp(&tmp);
            return Err(err.into());
        }
        Ok(true)
    }

    /// [`begin_write`](Self::begin_write) followed by an immediate
    /// [`persist`](Self::persist).
    pub fn persist_now<V: CacheValue>(&self, key: &str, value: &V) -> Result<bool, PersistError> {
        let seq = self.begin_write(key);
        self.persist(key, seq, value)
    }

    /// Decodes the mirror file at `path`.
    pub fn load_path<V: CacheValue>(&self, path: &Path) -> Result<V, PersistError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Decodes the mirror file for `key`, `Ok(None)` if there is none.
    pub fn load<V: CacheValue>(&self, key: &str) -> Result<Option<V>, PersistError> {
        match self.load_path(&self.file_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(PersistError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Deletes the mirror file for `key` and invalidates pending writes.
    ///
    /// Returns whether a file was deleted.
    pub fn remove(&self, key: &str) -> Result<bool, PersistError> {
        let mut latest = self.latest.lock();
        latest.remove(key);
        match fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes every mirror file in the directory and invalidates all
    /// pending writes. Other files are left alone.
    ///
    /// Returns the number of files deleted.
    pub fn clear(&self) -> Result<usize, PersistError> {
        let mut latest = self.latest.lock();
        latest.clear();
        let mut removed = 0;
        for (_, path) in self.mirror_files()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {},
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    /// Lists `(key, path)` for every mirror file. Names that do not unescape
    /// are logged and skipped.
    pub fn entries(&self) -> Result<Vec<(String, PathBuf)>, PersistError> {
        let mut entries = Vec::new();
        for (stem, path) in self.mirror_files()? {
            match unescape_key(&stem) {
                Ok(key) => entries.push((key, path)),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping cache file"),
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// `(stem, path)` of regular files named `<stem>.cache`. The stem may be
    /// empty, which `Path::extension` would not report.
    fn mirror_files(&self) -> Result<Vec<(String, PathBuf)>, PersistError> {
        let suffix = format!(".{CACHE_FILE_EXTENSION}");
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(suffix.as_str())) else {
                continue;
            };
            if entry.file_type()?.is_file() {
                files.push((stem.to_string(), entry.path()));
            }
        }
        Ok(files)
    }

    /// Reads `metadata.json`, `Ok(None)` if it does not exist.
    pub fn load_metadata(&self) -> Result<Option<CacheMetadata>, PersistError> {
        let file = match File::open(self.metadata_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    /// Writes `metadata.json`.
    pub fn save_metadata(&self, metadata: &CacheMetadata) -> Result<(), PersistError> {
        write_json(&self.metadata_path(), metadata)
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.latest.lock().len()
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn discard_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {},
        Err(err) if err.kind() == ErrorKind::NotFound => {},
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to delete temp cache file"),
    }
}
