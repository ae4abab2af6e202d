use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use serde::Deserialize;
use tracing::Level;

use crate::types::Container;

const APP_NAME: &str = "vidfetch";
const ENV_PREFIX: &str = "VIDFETCH";

/// Persistent configuration, read from a TOML file then from `VIDFETCH_*` variables.
///
/// Command-line arguments override it afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extraction tool to use instead of discovering `yt-dlp` or `youtube-dl`
    pub ytdlp_path: Option<PathBuf>,
    /// Transcoder to use instead of `ffmpeg` from the `PATH`
    pub ffmpeg_path: Option<PathBuf>,
    pub cache_dir: PathBuf,
    /// Age after which a cached metadata document is fetched again
    pub freshness_hours: u64,
    pub output_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub normalized: Container,
    pub prefer_normalized: bool,
    /// Keep the downloaded file once normalized
    pub keep_source: bool,
    /// The sqlite file recording every download outcome
    pub history_file: PathBuf,
    pub record_history: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME),
            freshness_hours: 24,
            output_dir: PathBuf::from("."),
            cookies: None,
            normalized: Container::default(),
            prefer_normalized: false,
            keep_source: false,
            history_file: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
                .join("history.sqlite"),
            record_history: true,
            log_level: "info".to_owned(),
        }
    }
}

impl Settings {
    /// Default location of the configuration file
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    }

    /// Load the settings from the given file, or from the default one if it exists
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::build(file, Environment::with_prefix(ENV_PREFIX))
    }

    fn build(file: Option<&Path>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        match file {
            Some(file) => {
                builder = builder.add_source(File::from(file).format(FileFormat::Toml));
            }
            None => {
                if let Some(file) = Self::default_file() {
                    builder = builder.add_source(
                        File::from(file)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        builder
            .add_source(environment.try_parsing(true))
            .build()
            .into_diagnostic()
            .wrap_err("Could not read the configuration")?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_hours * 60 * 60)
    }

    pub fn log_level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| miette!("Unknown log level {:?}", self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use indoc::indoc;

    use super::*;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX).source(Some(HashMap::new()))
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(
            &file,
            indoc! {r#"
                cache_dir = "/tmp/vidfetch-cache"
                freshness_hours = 2
                normalized = "mkv"
                prefer_normalized = true
                record_history = false
            "#},
        )
        .unwrap();

        let settings = Settings::build(Some(&file), no_env()).unwrap();
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/vidfetch-cache"));
        assert_eq!(settings.freshness(), Duration::from_secs(2 * 60 * 60));
        assert_eq!(settings.normalized, Container::Mkv);
        assert!(settings.prefer_normalized);
        assert!(!settings.keep_source);
        assert!(!settings.record_history);
        assert_eq!(settings.history_file, Settings::default().history_file);
        assert_eq!(settings.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "keep_source = false\nlog_level = \"warn\"\n").unwrap();

        let env = HashMap::from([
            ("VIDFETCH_KEEP_SOURCE".to_owned(), "true".to_owned()),
            ("VIDFETCH_FFMPEG_PATH".to_owned(), "/opt/ffmpeg".to_owned()),
        ]);
        let environment = Environment::with_prefix(ENV_PREFIX).source(Some(env));

        let settings = Settings::build(Some(&file), environment).unwrap();
        assert!(settings.keep_source);
        assert_eq!(settings.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg")));
        assert_eq!(settings.log_level().unwrap(), Level::WARN);
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(Settings::build(Some(&missing), no_env()).is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let settings = Settings {
            log_level: "chatty".to_owned(),
            ..Default::default()
        };
        assert!(settings.log_level().is_err());
    }
}
