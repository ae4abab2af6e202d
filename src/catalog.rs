//! Selection and display helpers over the formats of a metadata document.
//!
//! Everything in here is pure: no tool is ever invoked.

use crate::types::{Container, FormatDescriptor, FormatId, MediaKind, MetadataDocument};

/// Return the formats in the order reported by the extraction tool
pub fn list_formats(document: &MetadataDocument) -> &[FormatDescriptor] {
    &document.formats
}

/// Formats carrying a video track, muxed with audio or not, tallest first.
///
/// Formats of the same height keep their source order.
pub fn video_formats(formats: &[FormatDescriptor]) -> Vec<&FormatDescriptor> {
    let mut video: Vec<_> = formats.iter().filter(|f| f.kind.has_video()).collect();
    video.sort_by_key(|f| std::cmp::Reverse(f.height().unwrap_or(0)));
    video
}

/// Formats carrying only an audio track, highest bitrate first.
///
/// Formats of the same bitrate keep their source order.
pub fn audio_formats(formats: &[FormatDescriptor]) -> Vec<&FormatDescriptor> {
    let mut audio: Vec<_> = formats.iter().filter(|f| f.kind == MediaKind::Audio).collect();
    audio.sort_by(|a, b| b.bitrate.unwrap_or(0.0).total_cmp(&a.bitrate.unwrap_or(0.0)));
    audio
}

/// Pick a format id from a best-first list.
///
/// When the normalized container is preferred, the first format already in that
/// container wins. Otherwise, or if there is none, the first format wins.
/// An empty list lets the extraction tool choose by itself.
pub fn best_quality<'a, I>(formats: I, prefer_normalized: bool, normalized: Container) -> FormatId
where
    I: IntoIterator<Item = &'a FormatDescriptor>,
    I::IntoIter: Clone,
{
    let formats = formats.into_iter();

    prefer_normalized
        .then(|| formats.clone().find(|f| normalized.matches_ext(&f.ext)))
        .flatten()
        .or_else(|| formats.clone().next())
        .map_or_else(FormatId::best, |f| f.id.clone())
}

/// Format a duration as `H:MM:SS`, or `M:SS` for durations under an hour
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Format a byte count with the largest fitting unit and one decimal
pub fn format_filesize(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{size:.1} {}", UNITS[unit])
}

/// Format a bitrate given in kbps
pub fn format_bitrate(kbps: f64) -> String {
    if kbps < 1000.0 {
        format!("{kbps:.0} kbps")
    } else {
        format!("{:.1} Mbps", kbps / 1000.0)
    }
}

/// Format a sample rate given in Hz
pub fn format_sample_rate(hz: u32) -> String {
    format!("{:.1} kHz", hz as f64 / 1000.0)
}

/// Prefixes of the codec strings reported by the tool, and their common name
const CODEC_NAMES: [(&str, &str); 11] = [
    ("avc1", "H.264"),
    ("avc3", "H.264"),
    ("hev1", "H.265"),
    ("hvc1", "H.265"),
    ("vp09", "VP9"),
    ("vp9", "VP9"),
    ("vp8", "VP8"),
    ("av01", "AV1"),
    ("mp4a", "AAC"),
    ("opus", "Opus"),
    ("vorbis", "Vorbis"),
];

/// Turn a codec string such as `avc1.64001F` into a readable name
pub fn simplify_codec(codec: &str) -> String {
    let lower = codec.to_lowercase();
    CODEC_NAMES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map_or_else(
            || lower.split('.').next().unwrap_or_default().to_uppercase(),
            |(_, name)| (*name).to_owned(),
        )
}

impl FormatDescriptor {
    /// Height in pixels, parsed from the `WxH` resolution
    pub fn height(&self) -> Option<u32> {
        self.resolution
            .as_deref()
            .and_then(|r| r.split_once('x'))
            .and_then(|(_, h)| h.parse().ok())
    }

    /// One-line human readable description, e.g. `1920x1080 | H.264 @2.5 Mbps | 45.3 MB`
    pub fn label(&self) -> String {
        let mut parts = vec![];

        if self.kind.has_video() {
            if let Some(resolution) = &self.resolution {
                parts.push(resolution.clone());
            }
        } else if let Some(rate) = self.sample_rate {
            parts.push(format_sample_rate(rate));
        }

        if !self.codec.is_empty() {
            let codec = simplify_codec(&self.codec);
            parts.push(match self.bitrate {
                Some(kbps) => format!("{codec} @{}", format_bitrate(kbps)),
                None => codec,
            });
        }

        if let Some(size) = self.filesize {
            parts.push(format_filesize(size));
        }

        let label = parts.join(" | ");
        format!("{label} [{}]", self.ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, kind: MediaKind, ext: &str) -> FormatDescriptor {
        FormatDescriptor {
            id: id.into(),
            kind,
            ext: ext.into(),
            resolution: None,
            fps: None,
            sample_rate: None,
            bitrate: None,
            codec: String::new(),
            filesize: None,
            note: String::new(),
        }
    }

    #[test]
    fn best_quality_policy() {
        let formats = [
            format("248", MediaKind::Video, "webm"),
            format("137", MediaKind::Video, "mp4"),
            format("140", MediaKind::Audio, "m4a"),
        ];

        assert_eq!(best_quality(&formats, false, Container::Mp4).as_str(), "248");
        assert_eq!(best_quality(&formats, true, Container::Mp4).as_str(), "137");
        assert_eq!(best_quality(&formats[2..], true, Container::Mp4).as_str(), "140");
        let none: [FormatDescriptor; 0] = [];
        assert_eq!(best_quality(&none, true, Container::Mp4).as_str(), "best");
        assert_eq!(best_quality(&none, false, Container::Mp4).as_str(), "best");
    }

    #[test]
    fn partitions_by_kind() {
        let formats = [
            format("18", MediaKind::VideoAudio, "mp4"),
            format("137", MediaKind::Video, "mp4"),
            format("140", MediaKind::Audio, "m4a"),
        ];

        let video: Vec<_> = video_formats(&formats).iter().map(|f| f.id.as_str()).collect();
        let audio: Vec<_> = audio_formats(&formats).iter().map(|f| f.id.as_str()).collect();
        assert_eq!(video, ["18", "137"]);
        assert_eq!(audio, ["140"]);

        assert_eq!(
            best_quality(video_formats(&formats), false, Container::Mp4).as_str(),
            "18"
        );
    }

    #[test]
    fn best_first_ordering() {
        let mut formats = vec![];
        for (id, resolution) in [("160", "256x144"), ("137", "1920x1080"), ("136", "1280x720")] {
            let mut f = format(id, MediaKind::Video, "mp4");
            f.resolution = Some(resolution.into());
            formats.push(f);
        }
        for (id, kbps) in [("139", 48.0), ("140", 129.0)] {
            let mut f = format(id, MediaKind::Audio, "m4a");
            f.bitrate = Some(kbps);
            formats.push(f);
        }

        let video: Vec<_> = video_formats(&formats).iter().map(|f| f.id.as_str()).collect();
        let audio: Vec<_> = audio_formats(&formats).iter().map(|f| f.id.as_str()).collect();
        assert_eq!(video, ["137", "136", "160"]);
        assert_eq!(audio, ["140", "139"]);
        assert_eq!(formats[1].height(), Some(1080));
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(45), "0:45");
        assert_eq!(format_duration(600), "10:00");
        assert_eq!(format_duration(3661), "1:01:01");
    }

    #[test]
    fn filesizes() {
        assert_eq!(format_filesize(512), "512.0 B");
        assert_eq!(format_filesize(1536), "1.5 KB");
        assert_eq!(format_filesize(1536000), "1.5 MB");
        assert_eq!(format_filesize(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn rates() {
        assert_eq!(format_bitrate(128.0), "128 kbps");
        assert_eq!(format_bitrate(2500.0), "2.5 Mbps");
        assert_eq!(format_sample_rate(44100), "44.1 kHz");
        assert_eq!(format_sample_rate(48000), "48.0 kHz");
    }

    #[test]
    fn codecs_and_labels() {
        assert_eq!(simplify_codec("avc1.64001F"), "H.264");
        assert_eq!(simplify_codec("mp4a.40.2"), "AAC");
        assert_eq!(simplify_codec("dvh1.05.01"), "DVH1");

        let mut video = format("137", MediaKind::Video, "mp4");
        video.resolution = Some("1920x1080".into());
        video.codec = "avc1.640028".into();
        video.bitrate = Some(2500.0);
        video.filesize = Some(1536000);
        assert_eq!(video.label(), "1920x1080 | H.264 @2.5 Mbps | 1.5 MB [mp4]");

        let mut audio = format("251", MediaKind::Audio, "webm");
        audio.sample_rate = Some(48000);
        audio.codec = "opus".into();
        assert_eq!(audio.label(), "48.0 kHz | Opus [webm]");
    }
}
