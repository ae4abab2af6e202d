use std::{
    ffi::OsStr,
    fmt::Debug,
    path::{Path, PathBuf},
};

use super::command::{assert_success_command, run_command, Capture, FFMPEG, FFXXX_DEFAULT_ARGS};
use crate::{
    result::{Error, Result},
    types::Container,
};

pub trait StreamTransformer: Send + Sync + Debug {
    /// Re-encode or repackage the input file into the target container.
    ///
    /// A non-0 exit status must be reported as [`Error::TranscodeFailed`]
    /// carrying the tool's error output.
    fn normalize_container(&self, input: &Path, output: &Path, target: Container) -> Result<()>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub fn new() -> Result<Self> {
        let ffmpeg = Self::with_program(FFMPEG);
        assert_success_command(&ffmpeg.program, |cmd| cmd.arg("-version"))?;

        Ok(ffmpeg)
    }

    /// Use the given program without checking it
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Codec selection for each target container
    fn codec_args(target: Container) -> &'static [&'static str] {
        match target {
            Container::Mp4 => &["-c:v", "libx264", "-c:a", "aac", "-movflags", "+faststart"],
            // Matroska accepts about any codec, simply repackage the streams
            Container::Mkv => &["-c", "copy"],
            Container::Webm => &["-c:v", "libvpx-vp9", "-c:a", "libopus"],
        }
    }
}

impl StreamTransformer for Ffmpeg {
    fn normalize_container(&self, input: &Path, output: &Path, target: Container) -> Result<()> {
        let res = run_command(
            &self.program,
            |cmd| {
                cmd.args(FFXXX_DEFAULT_ARGS)
                    .arg("-y")
                    .args([OsStr::new("-i"), input.as_os_str()])
                    .args(Self::codec_args(target))
                    .arg(output)
            },
            Capture::STDERR,
        )?;

        if res.status.success() {
            Ok(())
        } else {
            Err(Error::TranscodeFailed(
                String::from_utf8_lossy(&res.stderr).into_owned(),
            ))
        }
    }
}
