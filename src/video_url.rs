use std::{fmt::Display, sync::OnceLock};

use regex::Regex;
use url::Url;

use crate::result::{Error, Result};

/// Hosts serving the watch pages we know how to download from
const WATCH_HOSTS: [&str; 6] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];
const SHORT_HOST: &str = "youtu.be";

/// Path prefixes directly followed by the video identifier
const ID_PATH_PREFIXES: [&str; 4] = ["shorts", "embed", "live", "v"];

fn video_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap())
}

/// A URL that has been checked to reference a single video of the supported host.
///
/// Construction is the only validation step, so holding one means no further
/// checks are needed before handing it to the extraction tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUrl {
    url: String,
    video_id: String,
}

impl VideoUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::InvalidUrl(input.to_owned());

        let url = Url::parse(input).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }

        let host = url.host_str().ok_or_else(invalid)?.to_lowercase();
        let mut segments = url.path_segments().ok_or_else(invalid)?.filter(|s| !s.is_empty());

        let candidate = if host == SHORT_HOST {
            // https://youtu.be/<id>
            segments.next().map(str::to_owned)
        } else if WATCH_HOSTS.contains(&host.as_str()) {
            match segments.next() {
                // https://www.youtube.com/watch?v=<id>
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                // https://www.youtube.com/shorts/<id> and friends
                Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
                    segments.next().map(str::to_owned)
                }
                _ => None,
            }
        } else {
            None
        };

        match candidate {
            Some(video_id) if video_id_re().is_match(&video_id) => Ok(Self {
                url: input.to_owned(),
                video_id,
            }),
            _ => Err(invalid()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl Display for VideoUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

impl std::str::FromStr for VideoUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_video_urls() {
        for (input, id) in [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("http://youtube.com/watch?feature=share&v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=42s", "dQw4w9WgXcQ"),
            ("https://youtu.be/dQw4w9WgXcQ?si=abc", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/shorts/aBcDeFgHi_-", "aBcDeFgHi_-"),
            ("https://www.youtube.com/embed/dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            // A playlist parameter does not make it a playlist URL
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123", "dQw4w9WgXcQ"),
        ] {
            let url = VideoUrl::parse(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(url.video_id(), id);
            assert_eq!(url.as_str(), input);
        }
    }

    #[test]
    fn rejects_everything_else() {
        for input in [
            "",
            "dQw4w9WgXcQ",
            "ftp://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://vimeo.com/123456",
            "https://www.youtube.com/",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/playlist?list=PL123",
            "https://notyoutube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/",
        ] {
            assert!(
                matches!(VideoUrl::parse(input), Err(Error::InvalidUrl(_))),
                "{input} should be rejected"
            );
        }
    }
}
