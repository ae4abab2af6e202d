//! Download web videos through an external extraction tool (`yt-dlp`),
//! with cached metadata, progress tracking, cancellation, queued downloads,
//! a download history and an optional normalization pass through `ffmpeg`.

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod outside;
pub mod queue;
pub mod resolver;
pub mod result;
pub mod settings;
pub mod types;
pub mod video_url;

mod utils;
