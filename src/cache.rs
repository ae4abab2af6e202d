use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use miette::{Context, IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::types::MetadataDocument;

/// How long a fetched metadata document stays valid by default
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

const ENTRY_EXTENSION: &str = "json";

/// A metadata document along with the moment it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unix timestamp, in seconds
    pub fetched_at: i64,
    pub document: MetadataDocument,
}

impl CacheEntry {
    pub fn new(document: MetadataDocument) -> Self {
        Self {
            fetched_at: OffsetDateTime::now_utc().unix_timestamp(),
            document,
        }
    }

    fn is_fresh(&self, freshness: Duration) -> bool {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        // An entry from the future comes from a skewed clock or a hand edit
        match u64::try_from(now.saturating_sub(self.fetched_at)) {
            Ok(age) => age < freshness.as_secs(),
            Err(_) => false,
        }
    }
}

/// On-disk cache of metadata documents, one file per URL.
///
/// Reads never fail: a missing, expired or unreadable entry is simply a miss.
/// Entries are written to a temporary file then renamed over the previous one,
/// so concurrent readers either see the old or the new entry, never a partial one.
#[derive(Debug)]
pub struct MetadataCache {
    dir: PathBuf,
    freshness: Duration,
}

impl MetadataCache {
    pub fn new(dir: impl Into<PathBuf>, freshness: Duration) -> Self {
        Self {
            dir: dir.into(),
            freshness,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the cached document if it exists and is younger than the freshness window
    pub fn get(&self, url: &str) -> Option<MetadataDocument> {
        let path = self.entry_path(url);
        let entry = match Self::read_entry(&path) {
            Some(entry) => entry,
            None => {
                trace!("Cache miss for {url}");
                return None;
            }
        };

        if entry.is_fresh(self.freshness) {
            debug!("Cache hit for {url}");
            Some(entry.document)
        } else {
            debug!("Cache entry for {url} is expired");
            None
        }
    }

    /// Store the document, replacing any previous entry for the URL
    pub fn put(&self, url: &str, document: &MetadataDocument) -> Result<()> {
        self.put_entry(url, &CacheEntry::new(document.clone()))
    }

    /// Store an entry as-is, keeping its fetch time
    pub fn put_entry(&self, url: &str, entry: &CacheEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .into_diagnostic()
            .wrap_err("Could not create cache directory")?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .into_diagnostic()
            .wrap_err("Could not create temporary cache file")?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, entry)
                .into_diagnostic()
                .wrap_err("Could not serialize cache entry")?;
            writer
                .flush()
                .into_diagnostic()
                .wrap_err("Could not write cache entry")?;
        }

        let path = self.entry_path(url);
        tmp.persist(&path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not move cache entry to {}", path.display()))?;

        debug!("Cached metadata of {url} in {}", path.display());
        Ok(())
    }

    /// Remove every entry. Return the number of removed entries.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            std::fs::remove_file(&path)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not remove {}", path.display()))?;
            removed += 1;
        }

        debug!("Removed {removed} cache entries");
        Ok(removed)
    }

    /// Remove the expired and unreadable entries. Return the number of removed entries.
    pub fn prune(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            let keep = Self::read_entry(&path).is_some_and(|entry| entry.is_fresh(self.freshness));
            if !keep && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        debug!("Pruned {removed} cache entries");
        Ok(removed)
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.dir.join(format!("{digest:x}.{ENTRY_EXTENSION}"))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let entries = self
            .dir
            .read_dir()
            .into_diagnostic()
            .wrap_err("Could not read cache directory")?;

        Ok(entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
            })
            .collect())
    }

    fn read_entry(path: &Path) -> Option<CacheEntry> {
        let file = File::open(path).ok()?;
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Discarding corrupt cache entry {}: {err}", path.display());
                let _ = std::fs::remove_file(path);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> MetadataDocument {
        MetadataDocument::from_tool_json(
            r#"{"id": "dQw4w9WgXcQ", "title": "A", "duration": 10, "formats": [
                {"format_id": "18", "ext": "mp4", "vcodec": "avc1", "acodec": "mp4a", "width": 640, "height": 360}
            ]}"#,
        )
        .unwrap()
    }

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[test]
    fn put_then_get_returns_the_same_document() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), DEFAULT_FRESHNESS);

        assert_eq!(cache.get(URL), None);
        cache.put(URL, &document()).unwrap();
        assert_eq!(cache.get(URL), Some(document()));
        assert_eq!(cache.get("https://youtu.be/dQw4w9WgXcQ"), None);
    }

    #[test]
    fn expired_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), DEFAULT_FRESHNESS);

        let mut entry = CacheEntry::new(document());
        entry.fetched_at -= DEFAULT_FRESHNESS.as_secs() as i64 + 1;
        cache.put_entry(URL, &entry).unwrap();
        assert_eq!(cache.get(URL), None);

        entry.fetched_at += 120;
        cache.put_entry(URL, &entry).unwrap();
        assert_eq!(cache.get(URL), Some(document()));
    }

    #[test]
    fn entries_from_the_future_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), DEFAULT_FRESHNESS);

        let mut entry = CacheEntry::new(document());
        entry.fetched_at += 3600;
        cache.put_entry(URL, &entry).unwrap();
        assert_eq!(cache.get(URL), None);
        assert_eq!(cache.prune().unwrap(), 1);
    }

    #[test]
    fn corrupt_entries_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), DEFAULT_FRESHNESS);

        cache.put(URL, &document()).unwrap();
        let path = cache.entry_path(URL);
        std::fs::write(&path, b"{ not json").unwrap();

        assert_eq!(cache.get(URL), None);
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path().join("nope"), DEFAULT_FRESHNESS);
        assert_eq!(cache.get(URL), None);
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn clear_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path(), DEFAULT_FRESHNESS);

        let mut old = CacheEntry::new(document());
        old.fetched_at = 0;
        cache.put_entry("old", &old).unwrap();
        cache.put("fresh", &document()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(cache.prune().unwrap(), 1);
        assert!(cache.get("fresh").is_some());

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.get("fresh").is_none());
        assert!(dir.path().join("notes.txt").exists());
    }
}
