use std::path::PathBuf;

use super::progress::{LineUpdate, ProgressUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

/// Progress of a download, as sent to the listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Between 0 and 1, over every stream of the download
    pub fraction: f64,
    pub speed: String,
    pub eta: String,
}

/// Run-time state of one download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSession {
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub state: SessionState,
    /// Last file the tool reported writing to
    pub output: Option<PathBuf>,

    /// Number of streams the tool will download one after the other
    streams: usize,
    /// Zero-based index of the stream being downloaded
    stream_idx: usize,
    destinations_seen: usize,
}

impl DownloadSession {
    pub(crate) fn new(streams: usize) -> Self {
        Self {
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            state: SessionState::Running,
            output: None,
            streams: streams.max(1),
            stream_idx: 0,
            destinations_seen: 0,
        }
    }

    /// Update the session with a parsed output line.
    ///
    /// Return the new progress if the line is worth notifying the listeners about.
    pub(crate) fn apply(&mut self, update: LineUpdate) -> Option<Progress> {
        match update {
            LineUpdate::Progress(ProgressUpdate {
                percent,
                speed,
                eta,
            }) => {
                let stream_fraction = (percent / 100.0).clamp(0.0, 1.0);
                let fraction = (self.stream_idx as f64 + stream_fraction) / self.streams as f64;

                // The tool sometimes restarts a stream from 0, do not go backward
                self.progress = self.progress.max(fraction).min(1.0);
                if let Some(speed) = speed {
                    self.speed = speed;
                }
                if let Some(eta) = eta {
                    self.eta = eta;
                }

                Some(self.progress())
            }
            LineUpdate::Destination(path) => {
                if self.destinations_seen > 0 {
                    self.stream_idx = (self.stream_idx + 1).min(self.streams - 1);
                }
                self.destinations_seen += 1;
                self.output = Some(path);
                None
            }
            LineUpdate::Merging(path) => {
                self.output = Some(path);
                None
            }
            LineUpdate::AlreadyDownloaded { path, merged } => {
                self.output = Some(path);
                let fraction = if merged || self.streams == 1 {
                    1.0
                } else {
                    // Only the current stream is on disk, it stands for its destination
                    if self.destinations_seen > 0 {
                        self.stream_idx = (self.stream_idx + 1).min(self.streams - 1);
                    }
                    self.destinations_seen += 1;
                    (self.stream_idx + 1) as f64 / self.streams as f64
                };
                self.progress = self.progress.max(fraction);
                Some(self.progress())
            }
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            fraction: self.progress,
            speed: self.speed.clone(),
            eta: self.eta.clone(),
        }
    }
}
