use std::path::{Path, PathBuf};

use crate::video_url::VideoUrl;

use super::FormatId;

/// What the user asked to download
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: VideoUrl,
    pub video_format: Option<FormatId>,
    /// Separate audio track, merged with the video one by the extraction tool
    pub audio_format: Option<FormatId>,
    pub output_dir: PathBuf,
    /// Cookie jar giving access to restricted content
    pub cookies: Option<PathBuf>,
    pub prefer_normalized: bool,
}

impl DownloadRequest {
    pub fn new(url: VideoUrl, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url,
            video_format: None,
            audio_format: None,
            output_dir: output_dir.into(),
            cookies: None,
            prefer_normalized: false,
        }
    }

    pub fn with_formats(mut self, video: Option<FormatId>, audio: Option<FormatId>) -> Self {
        self.video_format = video;
        self.audio_format = audio;
        self
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn prefer_normalized(mut self, prefer: bool) -> Self {
        self.prefer_normalized = prefer;
        self
    }

    pub fn cookies(&self) -> Option<&Path> {
        self.cookies.as_deref()
    }

    /// The format specifier understood by the extraction tool.
    ///
    /// A video and a distinct audio format are joined with `+` so the tool
    /// downloads both streams and merges them.
    pub fn format_spec(&self) -> String {
        match (&self.video_format, &self.audio_format) {
            (Some(video), Some(audio)) if video != audio => format!("{video}+{audio}"),
            (Some(video), _) => video.to_string(),
            (None, Some(audio)) => audio.to_string(),
            (None, None) => FormatId::BEST.to_owned(),
        }
    }

    /// Whether the extraction tool will have to merge two streams
    pub fn is_merge(&self) -> bool {
        matches!(
            (&self.video_format, &self.audio_format),
            (Some(video), Some(audio)) if video != audio
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DownloadRequest {
        let url = VideoUrl::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        DownloadRequest::new(url, "/tmp")
    }

    #[test]
    fn format_spec_merges_distinct_streams() {
        let req = request().with_formats(Some("137".into()), Some("140".into()));
        assert_eq!(req.format_spec(), "137+140");
        assert!(req.is_merge());

        let req = request().with_formats(Some("18".into()), Some("18".into()));
        assert_eq!(req.format_spec(), "18");
        assert!(!req.is_merge());

        let req = request().with_formats(None, Some("140".into()));
        assert_eq!(req.format_spec(), "140");

        assert_eq!(request().format_spec(), "best");
    }
}
