use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Child,
};

use miette::miette;
use tracing::debug;

use super::command::{assert_success_command, run_command, spawn_piped, Capture, YT_DL, YT_DLP};
use crate::result::{Error, Result};

/// Interface for querying and downloading videos through an extraction tool
pub trait StreamDownloader: Send + Sync {
    /// Dump the metadata of the single video at the URL, as the tool's JSON document.
    ///
    /// Playlist expansion is disabled: a URL always yields exactly one document.
    /// A non-0 exit status must be reported as [`Error::MetadataFetch`]
    /// carrying the tool's error output.
    fn dump_metadata(&self, url: &str, cookies: Option<&Path>) -> Result<String>;

    /// Start the tool in download mode with the given arguments.
    ///
    /// The child must have its `stdout` and `stderr` piped.
    fn spawn_fetch(&self, args: &[OsString]) -> Result<Child>;
}

/// Interface for the [yt-dlp](https://github.com/yt-dlp/yt-dlp) program,
/// or its ancestor [youtube-dl](https://github.com/ytdl-org/youtube-dl)
#[derive(Debug, Clone)]
pub struct Ytdl {
    program: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

impl Ytdl {
    /// Verify that the `yt-dlp` or `youtube-dl` binaries are reachable
    pub fn new() -> Result<Self> {
        // Check `yt-dlp`
        if assert_success_command(YT_DLP, |cmd| cmd.arg("--version")).is_ok() {
            Ok(Self::with_program(YT_DLP))
        } else if assert_success_command(YT_DL, |cmd| cmd.arg("--version")).is_ok() {
            // Check `youtube-dl`
            Ok(Self::with_program(YT_DL))
        } else {
            Err(miette!("Neither yt-dlp nor youtube-dl found").into())
        }
    }

    /// Use the given program without checking it
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg_location: None,
        }
    }

    /// Tell the tool where to find `ffmpeg` for merging streams
    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl StreamDownloader for Ytdl {
    fn dump_metadata(&self, url: &str, cookies: Option<&Path>) -> Result<String> {
        let res = run_command(
            &self.program,
            |cmd| {
                cmd.arg("--dump-single-json").arg("--no-playlist");
                if let Some(cookies) = cookies {
                    cmd.args([OsStr::new("--cookies"), cookies.as_os_str()]);
                }
                cmd.arg("--").arg(url)
            },
            Capture::STDOUT | Capture::STDERR,
        )?;

        if res.status.success() {
            Ok(String::from_utf8_lossy(&res.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&res.stderr).into_owned();
            debug!("Metadata dump of {url} failed with {}", res.status);
            Err(Error::MetadataFetch(stderr))
        }
    }

    fn spawn_fetch(&self, args: &[OsString]) -> Result<Child> {
        Ok(spawn_piped(&self.program, |cmd| {
            if let Some(location) = &self.ffmpeg_location {
                cmd.args([OsStr::new("--ffmpeg-location"), location.as_os_str()]);
            }
            cmd.args(args)
        })?)
    }
}
