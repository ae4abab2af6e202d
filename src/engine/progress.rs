//! Translation of the extraction tool's textual output into structured updates.
//!
//! The tool's output is not a formal API, so every line pattern lives in here
//! and nowhere else: if the tool changes its output, only this file changes.

use std::{path::PathBuf, sync::OnceLock};

use regex::Regex;

/// A parsed progress line
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Between 0 and 100, for the stream currently downloaded
    pub percent: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineUpdate {
    Progress(ProgressUpdate),
    /// A stream started downloading to this file
    Destination(PathBuf),
    /// The downloaded streams are being merged into this file
    Merging(PathBuf),
    /// The file is already on disk, nothing to download for it.
    /// `merged` when it is the final file of a merge, so that every stream is done
    AlreadyDownloaded { path: PathBuf, merged: bool },
}

/// The percentage, e.g. "  45.2%"
macro_rules! percent {
    () => {
        r#"(?P<percent>\d+(?:\.\d+)?)%"#
    };
}
/// The optional total size, approximated or not, e.g. " of ~ 10.00MiB"
macro_rules! opt_total {
    () => {
        r#"(?:\s+of\s+~?\s*\S+)?"#
    };
}
/// The optional elapsed time of the final line, e.g. " in 00:00:05"
macro_rules! opt_elapsed {
    () => {
        r#"(?:\s+in\s+\S+)?"#
    };
}
/// The optional transfer rate, e.g. " at 1.20MiB/s"
macro_rules! opt_speed {
    () => {
        r#"(?:\s+at\s+(?P<speed>Unknown B/s|\S+))?"#
    };
}
/// The optional remaining time, e.g. " ETA 00:04"
macro_rules! opt_eta {
    () => {
        r#"(?:\s+ETA\s+(?P<eta>\S+))?"#
    };
}

/// Example: "[download]  45.2% of ~  10.00MiB at  1.20MiB/s ETA 00:04 (frag 3/10)"
const PROGRESS: &str = concat!(
    r#"^\[download\]\s+"#,
    percent!(),
    opt_total!(),
    opt_elapsed!(),
    opt_speed!(),
    opt_eta!()
);
/// Example: "[download] Destination: out/My Video.f137.mp4"
const DESTINATION: &str = r#"^\[download\]\s+Destination:\s+(?P<path>.+)$"#;
/// Example: "[Merger] Merging formats into "out/My Video.mp4""
const MERGING: &str = r#"^\[Merger\]\s+Merging formats into\s+"(?P<path>.+)"$"#;
/// Example: "[download] out/My Video.mp4 has already been downloaded and merged"
const ALREADY_DOWNLOADED: &str =
    r#"^\[download\]\s+(?P<path>.+?)\s+has already been downloaded(?P<merged> and merged)?$"#;

struct Patterns {
    progress: Regex,
    destination: Regex,
    merging: Regex,
    already_downloaded: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        progress: Regex::new(PROGRESS).unwrap(),
        destination: Regex::new(DESTINATION).unwrap(),
        merging: Regex::new(MERGING).unwrap(),
        already_downloaded: Regex::new(ALREADY_DOWNLOADED).unwrap(),
    })
}

/// Translate one output line of the extraction tool.
///
/// Lines that do not match any known pattern return `None`:
/// losing one of them is never an error.
pub fn parse_line(line: &str) -> Option<LineUpdate> {
    let line = line.trim_end();
    let patterns = patterns();

    if let Some(caps) = patterns.progress.captures(line) {
        let percent: f64 = caps["percent"].parse().ok()?;
        return Some(LineUpdate::Progress(ProgressUpdate {
            percent: percent.clamp(0.0, 100.0),
            speed: caps.name("speed").map(|m| m.as_str().to_owned()),
            eta: caps.name("eta").map(|m| m.as_str().to_owned()),
        }));
    }

    if let Some(caps) = patterns.destination.captures(line) {
        Some(LineUpdate::Destination(caps["path"].into()))
    } else if let Some(caps) = patterns.merging.captures(line) {
        Some(LineUpdate::Merging(caps["path"].into()))
    } else {
        patterns
            .already_downloaded
            .captures(line)
            .map(|caps| LineUpdate::AlreadyDownloaded {
                path: caps["path"].into(),
                merged: caps.name("merged").is_some(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(line: &str) -> ProgressUpdate {
        match parse_line(line) {
            Some(LineUpdate::Progress(p)) => p,
            other => panic!("{line:?} parsed as {other:?}"),
        }
    }

    #[test]
    fn parses_progress_lines() {
        let p = progress("[download]  45.2% of   10.00MiB at    1.20MiB/s ETA 00:04");
        assert_eq!(p.percent, 45.2);
        assert_eq!(p.speed.as_deref(), Some("1.20MiB/s"));
        assert_eq!(p.eta.as_deref(), Some("00:04"));

        let p = progress("[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)\r");
        assert_eq!(p.percent, 12.5);
        assert_eq!(p.speed.as_deref(), Some("374.36KiB/s"));
        assert_eq!(p.eta.as_deref(), Some("11:59"));

        let p = progress("[download]   0.0% of   10.00MiB at Unknown B/s ETA Unknown");
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.speed.as_deref(), Some("Unknown B/s"));
        assert_eq!(p.eta.as_deref(), Some("Unknown"));

        let p = progress("[download] 100% of   10.00MiB in 00:00:05 at 1.95MiB/s");
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.speed.as_deref(), Some("1.95MiB/s"));
        assert_eq!(p.eta, None);
    }

    #[test]
    fn parses_file_lines() {
        assert_eq!(
            parse_line("[download] Destination: out/My Video.f137.mp4"),
            Some(LineUpdate::Destination("out/My Video.f137.mp4".into()))
        );
        assert_eq!(
            parse_line(r#"[Merger] Merging formats into "out/My Video.mp4""#),
            Some(LineUpdate::Merging("out/My Video.mp4".into()))
        );
        assert_eq!(
            parse_line("[download] out/My Video.f137.mp4 has already been downloaded"),
            Some(LineUpdate::AlreadyDownloaded {
                path: "out/My Video.f137.mp4".into(),
                merged: false
            })
        );
        assert_eq!(
            parse_line("[download] out/My Video.mp4 has already been downloaded and merged"),
            Some(LineUpdate::AlreadyDownloaded {
                path: "out/My Video.mp4".into(),
                merged: true
            })
        );
    }

    #[test]
    fn skips_everything_else() {
        for line in [
            "",
            "[youtube] dQw4w9WgXcQ: Downloading webpage",
            "[info] dQw4w9WgXcQ: Downloading 1 format(s): 137+140",
            "[download] Got error: HTTP Error 503",
            "[download] 45.2 of 10MiB",
            "WARNING: [youtube] Falling back to generic n function search",
        ] {
            assert_eq!(parse_line(line), None, "{line:?}");
        }
    }
}
