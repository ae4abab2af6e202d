use std::fmt::Display;

use miette::miette;

/// Every way a download request can end other than with a file on disk.
///
/// The variants carrying a `String` hold the external tool's stderr untouched,
/// as it is usually the only actionable information for the user
/// (e.g. "Video unavailable", "Sign in to confirm your age").
#[derive(Debug)]
pub enum Error {
    /// The URL does not point to a single video of the supported host.
    /// No process is spawned in that case.
    InvalidUrl(String),

    /// The extraction tool could not produce the metadata document.
    MetadataFetch(String),

    /// The content is a live broadcast still in progress.
    LiveContentUnsupported,

    /// `start()` was called while a download is already running.
    ConcurrentDownload,

    /// The extraction tool exited with a non-0 status while downloading.
    DownloadFailed(String),

    /// The transcoder exited with a non-0 status.
    TranscodeFailed(String),

    /// The session was explicitly cancelled. Not a failure.
    Cancelled,

    Miette(miette::Report),
}

impl Error {
    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display + Send + Sync + 'static,
        F: FnOnce() -> D,
    {
        match self {
            Error::Miette(report) => Error::Miette(report.wrap_err(f())),
            err => err,
        }
    }

    /// Cancellation is a terminal outcome of its own, not an error to report as such
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUrl(url) => write!(f, "Not a supported video URL: {url}"),
            Error::MetadataFetch(reason) => write!(f, "Could not fetch video metadata: {reason}"),
            Error::LiveContentUnsupported => {
                write!(f, "Live broadcasts in progress cannot be downloaded")
            }
            Error::ConcurrentDownload => write!(f, "A download is already running"),
            Error::DownloadFailed(stderr) => write!(f, "{}", stderr.trim_end()),
            Error::TranscodeFailed(stderr) => write!(f, "{}", stderr.trim_end()),
            Error::Cancelled => write!(f, "Download cancelled"),
            Error::Miette(report) => write!(f, "{report}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<miette::Report> for Error {
    fn from(err: miette::Report) -> Self {
        Error::Miette(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Miette(miette::Report::from_err(err))
    }
}

impl From<Error> for miette::Report {
    fn from(err: Error) -> Self {
        match err {
            Error::Miette(err) => err,
            Error::DownloadFailed(stderr) => {
                miette!("{}", stderr.trim_end()).wrap_err("Download failed")
            }
            Error::TranscodeFailed(stderr) => {
                miette!("{}", stderr.trim_end()).wrap_err("Transcoding failed")
            }
            err => miette!("{err}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
