use std::{collections::HashSet, fmt::Display};

use serde::{Deserialize, Serialize};

/// Format identifier, as defined by the extraction tool.
///
/// The set of valid values is only known at runtime, from the tool's own output,
/// so it is kept as an opaque string and passed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatId(String);

impl FormatId {
    /// Directive letting the extraction tool pick the best quality by itself
    pub const BEST: &'static str = "best";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn best() -> Self {
        Self::new(Self::BEST)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FormatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    VideoAudio,
}

impl MediaKind {
    pub fn has_video(self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::VideoAudio)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::VideoAudio)
    }
}

/// One selectable encoding of a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: FormatId,
    pub kind: MediaKind,
    /// Container extension, without the dot
    pub ext: String,
    /// `<width>x<height>`, only for entries with a video track
    pub resolution: Option<String>,
    pub fps: Option<f64>,
    /// Audio sample rate in Hz
    pub sample_rate: Option<u32>,
    /// In kbps
    pub bitrate: Option<f64>,
    pub codec: String,
    /// In bytes. Exact if the tool knows it, approximated or estimated otherwise.
    pub filesize: Option<u64>,
    pub note: String,
}

/// Snapshot of a video as reported by the extraction tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub id: String,
    pub title: String,
    /// In seconds
    pub duration: Option<u64>,
    pub uploader: String,
    pub thumbnail: String,
    pub description: String,
    pub view_count: u64,
    pub like_count: u64,
    pub formats: Vec<FormatDescriptor>,
    pub is_live: bool,
}

impl MetadataDocument {
    /// Parse the JSON document dumped by the extraction tool
    pub fn from_tool_json(json: &str) -> serde_json::Result<Self> {
        let raw: RawInfo = serde_json::from_str(json)?;
        Ok(raw.into())
    }

    pub fn format(&self, id: &FormatId) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| &f.id == id)
    }
}

/// The subset of the extraction tool output we care about.
/// Every field is optional as the tool omits or nulls them depending on the site.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    description: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    is_live: Option<bool>,
    live_status: Option<String>,
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
    fps: Option<f64>,
    asr: Option<f64>,
    tbr: Option<f64>,
    vbr: Option<f64>,
    abr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    format_note: Option<String>,
}

/// Extensions the tool lists as formats but that are not media streams
const IGNORED_EXTENSIONS: [&str; 3] = ["mhtml", "sb3", "storyboard"];

impl From<RawInfo> for MetadataDocument {
    fn from(raw: RawInfo) -> Self {
        let duration = raw
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d as u64);

        // Keep the first occurrence of an id, the tool never repeats them in practice
        let mut seen = HashSet::new();
        let formats = raw
            .formats
            .unwrap_or_default()
            .into_iter()
            .filter_map(|f| f.into_descriptor(duration))
            .filter(|f| seen.insert(f.id.clone()))
            .collect();

        let is_live =
            raw.is_live.unwrap_or(false) || raw.live_status.as_deref() == Some("is_live");

        Self {
            id: raw.id.unwrap_or_default(),
            title: raw.title.unwrap_or_default(),
            duration,
            uploader: raw.uploader.unwrap_or_default(),
            thumbnail: raw.thumbnail.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            view_count: raw.view_count.unwrap_or_default(),
            like_count: raw.like_count.unwrap_or_default(),
            formats,
            is_live,
        }
    }
}

impl RawFormat {
    fn into_descriptor(self, duration: Option<u64>) -> Option<FormatDescriptor> {
        let id = self.format_id.filter(|id| !id.is_empty())?;
        let ext = self.ext.unwrap_or_default().to_lowercase();
        if IGNORED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }

        let is_codec = |c: &Option<String>| c.as_deref().is_some_and(|c| c != "none");
        let has_video = is_codec(&self.vcodec) || (self.vcodec.is_none() && self.height.is_some());
        let has_audio = is_codec(&self.acodec);

        let kind = match (has_video, has_audio) {
            (true, true) => MediaKind::VideoAudio,
            (true, false) => MediaKind::Video,
            (false, true) => MediaKind::Audio,
            (false, false) => return None,
        };

        let resolution = match (self.width, self.height) {
            (Some(w), Some(h)) if kind.has_video() => Some(format!("{}x{}", w as u32, h as u32)),
            _ => None,
        };

        let (bitrate, codec) = if kind.has_video() {
            (self.vbr.or(self.tbr), self.vcodec.unwrap_or_default())
        } else {
            (self.abr.or(self.tbr), self.acodec.unwrap_or_default())
        };

        // Exact size first, then the tool's approximation, then our own estimation
        let estimated = || {
            let kbps = self
                .tbr
                .or_else(|| Some(self.vbr.unwrap_or(0.0) + self.abr.unwrap_or(0.0)))?;
            let secs = duration? as f64;
            (kbps > 0.0).then(|| (kbps * 1000.0 / 8.0 * secs) as u64)
        };
        let filesize = self
            .filesize
            .or(self.filesize_approx)
            .filter(|s| *s > 0.0)
            .map(|s| s as u64)
            .or_else(estimated);

        Some(FormatDescriptor {
            id: FormatId::new(id),
            kind,
            ext,
            resolution,
            fps: self.fps.filter(|fps| *fps > 0.0),
            sample_rate: self.asr.filter(|asr| *asr > 0.0).map(|asr| asr as u32),
            bitrate: bitrate.filter(|b| *b > 0.0),
            codec,
            filesize,
            note: self.format_note.unwrap_or_default(),
        })
    }
}
