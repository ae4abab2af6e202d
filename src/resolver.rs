use std::{path::Path, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    cache::MetadataCache,
    outside::StreamDownloader,
    result::{Error, Result},
    types::MetadataDocument,
};

/// Fetch the metadata of videos, going through the cache first
#[derive(Debug)]
pub struct MetadataResolver<D> {
    downloader: Arc<D>,
    cache: Arc<MetadataCache>,
}

impl<D: StreamDownloader> MetadataResolver<D> {
    pub fn new(downloader: Arc<D>, cache: Arc<MetadataCache>) -> Self {
        Self { downloader, cache }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Return the metadata document of the single video at the URL.
    ///
    /// Live broadcasts are returned as any other video, with `is_live` set:
    /// refusing them is up to the caller.
    pub fn resolve(&self, url: &str, cookies: Option<&Path>) -> Result<MetadataDocument> {
        if let Some(document) = self.cache.get(url) {
            debug!("Using cached metadata of {url}");
            return Ok(document);
        }

        info!("Fetching metadata of {url}");
        let json = self.downloader.dump_metadata(url, cookies)?;

        let document = MetadataDocument::from_tool_json(&json)
            .map_err(|err| Error::MetadataFetch(format!("Could not parse tool output: {err}")))?;

        debug!("title    = {}", document.title);
        debug!("uploader = {}", document.uploader);
        debug!("duration = {:?}", document.duration);
        debug!("formats  = {}", document.formats.len());

        if let Err(err) = self.cache.put(url, &document) {
            warn!("Could not cache metadata of {url}: {err:?}");
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::OsString,
        process::Child,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use miette::miette;

    use super::*;
    use crate::cache::{CacheEntry, DEFAULT_FRESHNESS};

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    /// Downloader answering every metadata request with a fixed output
    struct FakeDownloader {
        output: std::result::Result<String, String>,
        calls: AtomicUsize,
    }

    impl FakeDownloader {
        fn new(output: std::result::Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                output: output.map(str::to_owned).map_err(str::to_owned),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StreamDownloader for FakeDownloader {
        fn dump_metadata(&self, _url: &str, _cookies: Option<&Path>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone().map_err(Error::MetadataFetch)
        }

        fn spawn_fetch(&self, _args: &[OsString]) -> Result<Child> {
            Err(miette!("not a fetching downloader").into())
        }
    }

    fn resolver(
        downloader: &Arc<FakeDownloader>,
    ) -> (tempfile::TempDir, MetadataResolver<FakeDownloader>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(MetadataCache::new(dir.path(), DEFAULT_FRESHNESS));
        (dir, MetadataResolver::new(downloader.clone(), cache))
    }

    #[test]
    fn fetches_once_then_uses_cache() {
        let dl = FakeDownloader::new(Ok(r#"{"id": "dQw4w9WgXcQ", "title": "T"}"#));
        let (_dir, resolver) = resolver(&dl);

        let first = resolver.resolve(URL, None).unwrap();
        let second = resolver.resolve(URL, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.title, "T");
        assert_eq!(dl.calls(), 1);
    }

    #[test]
    fn expired_entries_are_refetched() {
        let dl = FakeDownloader::new(Ok(r#"{"id": "dQw4w9WgXcQ", "title": "New"}"#));
        let (_dir, resolver) = resolver(&dl);

        let old_doc = MetadataDocument::from_tool_json(r#"{"id": "x", "title": "Old"}"#).unwrap();
        let mut old = CacheEntry::new(old_doc);
        old.fetched_at -= 25 * 60 * 60;
        resolver.cache().put_entry(URL, &old).unwrap();

        assert_eq!(resolver.resolve(URL, None).unwrap().title, "New");
        assert_eq!(dl.calls(), 1);
    }

    #[test]
    fn tool_failure_is_reported_verbatim() {
        let dl = FakeDownloader::new(Err("ERROR: [youtube] dQw4w9WgXcQ: Private video"));
        let (_dir, resolver) = resolver(&dl);

        match resolver.resolve(URL, None) {
            Err(Error::MetadataFetch(msg)) => {
                assert_eq!(msg, "ERROR: [youtube] dQw4w9WgXcQ: Private video")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(resolver.cache().get(URL).is_none());
    }

    #[test]
    fn unparseable_output_is_a_fetch_error() {
        let dl = FakeDownloader::new(Ok("[{\"id\": 1}"));
        let (_dir, resolver) = resolver(&dl);

        assert!(matches!(
            resolver.resolve(URL, None),
            Err(Error::MetadataFetch(_))
        ));
    }

    #[test]
    fn live_content_is_returned() {
        let dl = FakeDownloader::new(Ok(r#"{"id": "x", "title": "Live", "is_live": true}"#));
        let (_dir, resolver) = resolver(&dl);

        assert!(resolver.resolve(URL, None).unwrap().is_live);
    }
}
