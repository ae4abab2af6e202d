use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;

/// File containers the transcoder can normalize to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Webm,
}

impl Container {
    /// Return the extension without the leading dot.
    /// e.g. "ext"
    pub fn as_str(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
        }
    }

    /// Whether an extension, as reported in a format descriptor, is this container
    pub fn matches_ext(self, ext: &str) -> bool {
        ext.eq_ignore_ascii_case(self.as_str())
    }

    /// Parse the path file extension.
    /// Return None in case of no or unknown extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "mp4" => Some(Self::Mp4),
                "mkv" => Some(Self::Mkv),
                "webm" => Some(Self::Webm),
                _ => None,
            })
    }
}
