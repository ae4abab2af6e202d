//! Single entry point of the presentation layer: resolve, download, then normalize.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::unbounded;
use miette::miette;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    cache::MetadataCache,
    catalog::{self, best_quality},
    engine::{DownloadEngine, DownloadEvent, Progress, SessionState},
    history::{HistoryDb, HistoryEntry, Outcome},
    outside::{StreamDownloader, StreamTransformer},
    resolver::MetadataResolver,
    result::{Error, Result},
    types::{Container, DownloadRequest, FormatId, MetadataDocument},
    video_url::VideoUrl,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Downloading,
    Normalizing,
}

/// Notification sent to the caller of [`Orchestrator::execute`].
///
/// The terminal outcome is not an event: it is the returned value.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Stage(Stage),
    Resolved(MetadataDocument),
    Progress(Progress),
}

/// Everything of a download request but its URL
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub video_format: Option<FormatId>,
    pub audio_format: Option<FormatId>,
    pub output_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub prefer_normalized: bool,
}

impl DownloadOptions {
    pub fn into_request(self, url: VideoUrl) -> DownloadRequest {
        DownloadRequest::new(url, self.output_dir)
            .with_formats(self.video_format, self.audio_format)
            .with_cookies(self.cookies)
            .prefer_normalized(self.prefer_normalized)
    }
}

pub struct Orchestrator<D, T> {
    resolver: MetadataResolver<D>,
    engine: DownloadEngine<D>,
    transcoder: Arc<T>,
    history: Option<Arc<dyn HistoryDb>>,
    normalized: Container,
    keep_source: bool,
}

impl<D: StreamDownloader, T: StreamTransformer> Orchestrator<D, T> {
    pub fn new(downloader: Arc<D>, transcoder: Arc<T>, cache: Arc<MetadataCache>) -> Self {
        Self {
            resolver: MetadataResolver::new(downloader.clone(), cache),
            engine: DownloadEngine::new(downloader),
            transcoder,
            history: None,
            normalized: Container::default(),
            keep_source: false,
        }
    }

    /// Set the container downloads are normalized to when preferred
    pub fn with_normalized(mut self, normalized: Container) -> Self {
        self.normalized = normalized;
        self.engine = self.engine.with_normalized(normalized);
        self
    }

    /// Keep the downloaded file after normalizing it
    pub fn keep_source(mut self, keep: bool) -> Self {
        self.keep_source = keep;
        self
    }

    /// Record the outcome of every download that got past the resolution
    pub fn with_history(mut self, history: Arc<dyn HistoryDb>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn resolver(&self) -> &MetadataResolver<D> {
        &self.resolver
    }

    pub fn engine(&self) -> &DownloadEngine<D> {
        &self.engine
    }

    /// Download the video at the URL and return the path of the final file.
    ///
    /// Block until the download is over: run it on a worker thread, or use [`Self::spawn`].
    /// The listener is called on the calling thread, so it may call [`Self::cancel`].
    pub fn execute(
        &self,
        url: &str,
        options: DownloadOptions,
        listener: &mut dyn FnMut(&Event),
    ) -> Result<PathBuf> {
        let url = VideoUrl::parse(url)?;
        let mut request = options.into_request(url);

        debug!("Resolving video {}", request.url.video_id());
        listener(&Event::Stage(Stage::Resolving));
        let document = self.resolver.resolve(request.url.as_str(), request.cookies())?;
        if document.is_live {
            info!("{} is a live broadcast, refusing it", request.url);
            return Err(Error::LiveContentUnsupported);
        }
        self.choose_formats(&mut request, &document);
        listener(&Event::Resolved(document.clone()));

        let res = self.fetch(&request, listener);
        self.remember(&request, &document, &res);
        res
    }

    /// Cancel the running download, if any
    pub fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    /// Fill the formats the caller left to us
    fn choose_formats(&self, request: &mut DownloadRequest, document: &MetadataDocument) {
        let formats = catalog::list_formats(document);

        if request.video_format.is_none() {
            request.video_format = Some(best_quality(
                catalog::video_formats(formats),
                request.prefer_normalized,
                self.normalized,
            ));
        }

        let video_lacks_audio = request
            .video_format
            .as_ref()
            .and_then(|id| document.format(id))
            .is_some_and(|f| !f.kind.has_audio());

        let audio = catalog::audio_formats(formats);
        if request.audio_format.is_none() && video_lacks_audio && !audio.is_empty() {
            request.audio_format = Some(best_quality(
                audio,
                request.prefer_normalized,
                self.normalized,
            ));
        }

        debug!("Selected format: {}", request.format_spec());
    }

    /// Download then normalize if needed
    fn fetch(
        &self,
        request: &DownloadRequest,
        listener: &mut dyn FnMut(&Event),
    ) -> Result<PathBuf> {
        listener(&Event::Stage(Stage::Downloading));
        let Some(output) = self.download(request, listener)? else {
            warn!("The download tool did not report its output file");
            return Ok(request.output_dir.clone());
        };
        info!("Downloaded {output:?}");

        if request.prefer_normalized && Container::from_path(&output) != Some(self.normalized) {
            listener(&Event::Stage(Stage::Normalizing));
            self.normalize(&output)
        } else {
            Ok(output)
        }
    }

    /// Add the outcome of the download to the history, if kept
    fn remember(
        &self,
        request: &DownloadRequest,
        document: &MetadataDocument,
        res: &Result<PathBuf>,
    ) {
        let Some(history) = &self.history else {
            return;
        };

        let (outcome, file_path, error) = match res {
            Ok(path) => (Outcome::Completed, Some(path.clone()), None),
            Err(err) if err.is_cancelled() => (Outcome::Cancelled, None, None),
            Err(err) => (Outcome::Failed, None, Some(err.to_string())),
        };
        let size = file_path
            .as_deref()
            .and_then(|path| fs::metadata(path).ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len());

        let entry = HistoryEntry {
            url: request.url.as_str().to_owned(),
            video_id: request.url.video_id().to_owned(),
            title: document.title.clone(),
            uploader: document.uploader.clone(),
            format: request.format_spec(),
            duration: document.duration,
            outcome,
            file_path,
            size,
            error,
            finished_at: OffsetDateTime::now_utc().unix_timestamp(),
        };

        // The history never changes the outcome
        if let Err(err) = history.record(&entry) {
            warn!("Could not record the download in the history: {err:?}");
        }
    }

    /// Run the engine until the download ends, forwarding its progress
    fn download(
        &self,
        request: &DownloadRequest,
        listener: &mut dyn FnMut(&Event),
    ) -> Result<Option<PathBuf>> {
        let (send, receive) = unbounded();
        self.engine.start(
            request,
            Box::new(move |event: &DownloadEvent| {
                let _ = send.send(event.clone());
            }),
        )?;

        // The sender lives in the engine listener, which is dropped after the terminal event
        for event in receive {
            let outcome = match event {
                DownloadEvent::Progress(progress) => {
                    // Skip the progress queued before a cancellation
                    if self.engine.state() != Some(SessionState::Cancelled) {
                        listener(&Event::Progress(progress));
                    }
                    continue;
                }
                DownloadEvent::Completed { output } => Ok(output),
                DownloadEvent::Failed { stderr } => Err(Error::DownloadFailed(stderr)),
                // The killed process is reaped by the engine in the background
                DownloadEvent::Cancelled => return Err(Error::Cancelled),
            };

            self.engine.wait();
            return outcome;
        }

        Err(miette!("The download ended without reporting its outcome").into())
    }

    /// Transcode the file into the normalized container, next to it
    fn normalize(&self, input: &Path) -> Result<PathBuf> {
        let output = input.with_extension(self.normalized.as_str());
        info!("Normalizing {input:?} into {output:?}");

        self.transcoder
            .normalize_container(input, &output, self.normalized)?;

        if !self.keep_source {
            if let Err(err) = fs::remove_file(input) {
                warn!("Could not remove {input:?}: {err}");
            }
        }

        Ok(output)
    }
}

impl<D, T> Orchestrator<D, T>
where
    D: StreamDownloader + 'static,
    T: StreamTransformer + 'static,
{
    /// Run [`Self::execute`] on a dedicated thread
    pub fn spawn<F>(
        self: Arc<Self>,
        url: String,
        options: DownloadOptions,
        mut listener: F,
    ) -> Result<JoinHandle<Result<PathBuf>>>
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("orchestrator".to_owned())
            .spawn(move || self.execute(&url, options, &mut listener))?;
        Ok(handle)
    }
}
