use std::{
    ffi::OsStr,
    process::{Child, Command, Output, Stdio},
};

use bitflags::bitflags;
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use tracing::{debug, enabled, trace, Level};

pub const YT_DL: &str = "youtube-dl";
pub const YT_DLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";
pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDIN = 0b0000001;
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

/// Run a command, returning its raw output handle.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<P, F>(program: P, f: F, capture: Capture) -> Result<Output>
where
    P: AsRef<OsStr>,
    F: FnOnce(&mut Command) -> &mut Command,
{
    let is_debug = enabled!(Level::DEBUG);
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let program = program.as_ref();
    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(get_io(capture.contains(Capture::STDIN)))
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)));

    debug!("Executing command: {cmd:?}");
    let res = cmd
        .output()
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not run {}", program.to_string_lossy()))?;

    if is_debug {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));
    }

    Ok(res)
}

/// Run the command and verify that it has returned a success status code.
pub fn assert_success_command<P, F>(program: P, f: F) -> Result<()>
where
    P: AsRef<OsStr>,
    F: FnOnce(&mut Command) -> &mut Command,
{
    let program = program.as_ref();
    let res = run_command(program, f, Capture::empty())?;
    if res.status.success() {
        Ok(())
    } else {
        Err(miette!(
            "{} did run but was not successful",
            program.to_string_lossy()
        ))
    }
}

/// Start a command with `stdout` and `stderr` piped, without waiting for it.
///
/// The caller is responsible for draining both pipes and reaping the child.
/// On unix the child leads its own process group, so that [`kill_tree`]
/// also reaches the processes it started.
pub fn spawn_piped<P, F>(program: P, f: F) -> Result<Child>
where
    P: AsRef<OsStr>,
    F: FnOnce(&mut Command) -> &mut Command,
{
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("Spawning command: {cmd:?}");
    cmd.spawn()
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not start {}", program.to_string_lossy()))
}

/// Kill a child started by [`spawn_piped`] along with every process it started.
///
/// Wrappers (shell shims, frozen executables) run the real program as a
/// grandchild that still holds the output pipes: killing only the direct
/// child would leave it running. The child itself is not reaped.
pub fn kill_tree(child: &mut Child) {
    let pid = child.id();

    #[cfg(unix)]
    let res = run_command(
        "sh",
        |cmd| cmd.arg("-c").arg(format!("kill -s KILL -- -{pid}")),
        Capture::empty(),
    );
    #[cfg(windows)]
    let res = run_command(
        "taskkill",
        |cmd| cmd.args(["/PID", &pid.to_string(), "/T", "/F"]),
        Capture::empty(),
    );
    #[cfg(not(any(unix, windows)))]
    let res: Result<Output> = Err(miette!("Process trees are not supported here"));

    match res {
        Ok(out) if out.status.success() => {}
        Ok(out) => debug!("Could not kill the process tree of {pid}: {}", out.status),
        Err(err) => debug!("Could not kill the process tree of {pid}: {err}"),
    }

    // The tree may be gone already, or the group kill unavailable
    if let Err(err) = child.kill() {
        trace!("Could not kill process {pid}: {err}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        io::Read,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn kill_tree_reaches_grandchildren() {
        // The grandchild inherits the output pipe: EOF means it is gone too
        let mut child = spawn_piped("sh", |cmd| cmd.arg("-c").arg("sleep 30; echo done")).unwrap();
        let mut stdout = child.stdout.take().unwrap();

        let start = Instant::now();
        kill_tree(&mut child);
        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        child.wait().unwrap();

        assert_eq!(out, "");
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
