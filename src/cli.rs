use std::path::PathBuf;

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use tracing::Level;

use vidfetch::{settings::Settings, types::Container};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("VIDFETCH_", $v)
    };
}

/// Download web videos through yt-dlp, with progress tracking,
/// cached metadata and optional container normalization through ffmpeg.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The path to the configuration file.
    /// Defaults to `vidfetch/config.toml` in the user configuration directory
    #[arg(long, global = true, env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The path to the extraction tool, instead of looking for yt-dlp then youtube-dl
    #[arg(long, global = true, env = arg_env!("YTDLP_PATH"))]
    pub ytdlp: Option<PathBuf>,

    /// The path to the ffmpeg program
    #[arg(long, global = true, env = arg_env!("FFMPEG_PATH"))]
    pub ffmpeg: Option<PathBuf>,

    /// The path to the metadata cache directory
    #[arg(long, global = true, env = arg_env!("CACHE_DIR"))]
    pub cache_dir: Option<PathBuf>,

    /// The path to the download history file
    #[arg(long, global = true, env = arg_env!("HISTORY_FILE"))]
    pub history_file: Option<PathBuf>,

    /// Show more logs. Repeat for even more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only show warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the metadata and the available formats of a video
    Info {
        /// The URL of the video
        url: String,

        /// The cookie file giving access to restricted videos
        #[arg(long, env = arg_env!("COOKIES"))]
        cookies: Option<PathBuf>,
    },

    /// Download videos, one after the other
    Download(DownloadArgs),

    /// List the recent downloads
    History {
        /// Only show the last download of this URL
        url: Option<String>,

        /// The maximum number of downloads to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Only show the failed downloads
        #[arg(long, conflicts_with = "url")]
        failed: bool,
    },

    /// Forget the recorded downloads
    ClearHistory {
        /// Only forget the downloads older than this number of days
        #[arg(long)]
        older_than_days: Option<u32>,
    },

    /// Remove every cached metadata document
    ClearCache,

    /// Remove the expired cached metadata documents
    PruneCache,
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// The URLs of the videos
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// The path to the output directory
    #[arg(short, long, env = arg_env!("OUTPUT_DIR"))]
    pub out: Option<PathBuf>,

    /// The format ID of the video stream, as listed by `info`.
    /// Chosen automatically when not given
    #[arg(short = 'f', long)]
    pub video_format: Option<String>,

    /// The format ID of a separate audio stream, merged with the video one
    #[arg(short = 'a', long)]
    pub audio_format: Option<String>,

    /// The cookie file giving access to restricted videos
    #[arg(long, env = arg_env!("COOKIES"))]
    pub cookies: Option<PathBuf>,

    /// Convert the downloaded file to the normalized container if needed
    #[arg(long)]
    pub normalize: bool,

    /// The container to normalize to
    #[arg(long, value_enum)]
    pub container: Option<Container>,

    /// Keep the downloaded file after converting it
    #[arg(long)]
    pub keep_source: bool,

    /// Do not record the downloads in the history
    #[arg(long)]
    pub no_history: bool,
}

impl Args {
    /// Apply the arguments given on the command line over the settings
    pub fn override_settings(&self, settings: &mut Settings) {
        if let Some(ytdlp) = &self.ytdlp {
            settings.ytdlp_path = Some(ytdlp.clone());
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.ffmpeg_path = Some(ffmpeg.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            settings.cache_dir = cache_dir.clone();
        }
        if let Some(history_file) = &self.history_file {
            settings.history_file = history_file.clone();
        }

        match &self.command {
            Command::Info {
                cookies: Some(cookies),
                ..
            } => settings.cookies = Some(cookies.clone()),
            Command::Download(args) => args.override_settings(settings),
            _ => (),
        }
    }

    /// The log level asked by the flags, relative to the configured one
    pub fn log_level(&self, configured: Level) -> Level {
        if self.quiet {
            return Level::WARN;
        }

        match self.verbose {
            0 => configured,
            1 => configured.max(Level::DEBUG),
            _ => Level::TRACE,
        }
    }
}

impl DownloadArgs {
    fn override_settings(&self, settings: &mut Settings) {
        if let Some(out) = &self.out {
            settings.output_dir = out.clone();
        }
        if let Some(cookies) = &self.cookies {
            settings.cookies = Some(cookies.clone());
        }
        if let Some(container) = self.container {
            settings.normalized = container;
        }
        settings.prefer_normalized |= self.normalize;
        settings.keep_source |= self.keep_source;
        settings.record_history &= !self.no_history;
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn download_arguments_override_settings() {
        let args = Args::parse_from([
            "vidfetch",
            "download",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/9bZkp7q19f0",
            "--no-history",
            "-o",
            "/tmp/videos",
            "-f",
            "137",
            "--normalize",
            "--container",
            "mkv",
        ]);

        let mut settings = Settings::default();
        args.override_settings(&mut settings);

        assert_eq!(settings.output_dir, PathBuf::from("/tmp/videos"));
        assert_eq!(settings.normalized, Container::Mkv);
        assert!(settings.prefer_normalized);
        assert!(!settings.keep_source);
        assert!(!settings.record_history);

        let Command::Download(download) = args.command else {
            panic!("expected the download command");
        };
        assert_eq!(download.urls.len(), 2);
        assert_eq!(download.video_format.as_deref(), Some("137"));
        assert_eq!(download.audio_format, None);
    }

    #[test]
    fn verbosity_flags() {
        let args = Args::parse_from(["vidfetch", "-vv", "clear-cache"]);
        assert_eq!(args.log_level(Level::INFO), Level::TRACE);

        let args = Args::parse_from(["vidfetch", "prune-cache", "-v"]);
        assert_eq!(args.log_level(Level::INFO), Level::DEBUG);
        assert_eq!(args.log_level(Level::TRACE), Level::TRACE);

        let args = Args::parse_from(["vidfetch", "-q", "clear-cache"]);
        assert_eq!(args.log_level(Level::DEBUG), Level::WARN);
    }

    #[test]
    fn download_needs_a_url() {
        assert!(Args::try_parse_from(["vidfetch", "download"]).is_err());
    }

    #[test]
    fn history_arguments() {
        let args = Args::parse_from([
            "vidfetch",
            "--history-file",
            "/tmp/h.sqlite",
            "history",
            "--failed",
        ]);
        let mut settings = Settings::default();
        args.override_settings(&mut settings);
        assert_eq!(settings.history_file, PathBuf::from("/tmp/h.sqlite"));

        let Command::History { url, limit, failed } = args.command else {
            panic!("expected the history command");
        };
        assert_eq!((url, limit, failed), (None, 20, true));
    }
}
