mod command;
mod ffmpeg;
mod ytdl;

pub(crate) use command::kill_tree;
pub use command::{FFMPEG, YT_DL, YT_DLP};
pub use ffmpeg::{Ffmpeg, StreamTransformer};
pub use ytdl::{StreamDownloader, Ytdl};
