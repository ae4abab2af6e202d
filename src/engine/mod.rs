//! Subprocess-driven downloads with progress tracking and cancellation.
//!
//! One [`DownloadEngine`] runs at most one download at a time. The extraction
//! tool is spawned in download mode, its output is read line by line on a
//! dedicated thread and every recognized line updates the [`DownloadSession`]
//! then is dispatched to the listener.
//!
//! Every dispatch happens while holding the session lock, after checking that
//! the session is still running and still the same one. Together with
//! [`DownloadEngine::cancel`] taking that same lock, this guarantees that no
//! event reaches the listener once `cancel()` has returned.

mod progress;
mod session;

use std::{
    ffi::OsString,
    fs,
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Child, ChildStderr, ChildStdout, ExitStatus},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use miette::{miette, IntoDiagnostic, WrapErr};
use tracing::{debug, info, trace, warn};

pub use progress::{parse_line, LineUpdate, ProgressUpdate};
pub use session::{DownloadSession, Progress, SessionState};

use crate::{
    outside::{kill_tree, StreamDownloader},
    result::{Error, Result},
    types::{Container, DownloadRequest},
    utils::MutexUtils,
};

/// Delay between two checks of the tool's exit once its output is closed
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Notification sent to the listener of a download
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress(Progress),
    /// The tool exited successfully. The output is the last file it reported
    Completed { output: Option<PathBuf> },
    /// The tool exited with a non-0 status
    Failed { stderr: String },
    Cancelled,
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress(_))
    }
}

/// Receive the events of a download.
///
/// Called on the engine's worker thread (or on the thread calling `cancel()`)
/// while the session lock is held: it must not call back into the engine.
pub type Listener = Box<dyn FnMut(&DownloadEvent) + Send>;

type ChildHandle = Arc<Mutex<Child>>;

/// Build the arguments of the tool's download mode
pub fn fetch_args(request: &DownloadRequest, normalized: Container) -> Vec<OsString> {
    let template = request.output_dir.join("%(title)s.%(ext)s");

    let mut args: Vec<OsString> = vec![
        "-f".into(),
        request.format_spec().into(),
        "--no-playlist".into(),
        "--newline".into(),
        "-o".into(),
        template.into_os_string(),
    ];

    if request.prefer_normalized && request.is_merge() {
        args.push("--merge-output-format".into());
        args.push(normalized.as_str().into());
    }

    if let Some(cookies) = request.cookies() {
        args.push("--cookies".into());
        args.push(cookies.as_os_str().to_owned());
    }

    args.push("--".into());
    args.push(request.url.as_str().into());
    args
}

enum Conclusion {
    Success,
    Failure(String),
}

#[derive(Default)]
struct Slot {
    /// Incremented on each start, so that a late worker cannot touch a newer session
    generation: u64,
    session: Option<DownloadSession>,
    listener: Option<Listener>,
    child: Option<ChildHandle>,
}

/// State shared between the engine and its worker thread
#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
}

impl Shared {
    fn dispatch_update(&self, generation: u64, update: LineUpdate) {
        self.slot.with_lock(|mut slot| {
            let slot = &mut *slot;
            if slot.generation != generation {
                return;
            }

            let Some(session) = slot
                .session
                .as_mut()
                .filter(|s| s.state == SessionState::Running)
            else {
                return;
            };

            if let Some(progress) = session.apply(update) {
                if let Some(listener) = slot.listener.as_mut() {
                    listener(&DownloadEvent::Progress(progress));
                }
            }
        })
    }

    /// End the session after the tool exited, unless it was cancelled in between
    fn conclude(&self, generation: u64, conclusion: Conclusion) {
        self.slot.with_lock(|mut slot| {
            let slot = &mut *slot;
            if slot.generation != generation {
                return;
            }
            slot.child = None;

            let Some(session) = slot
                .session
                .as_mut()
                .filter(|s| s.state == SessionState::Running)
            else {
                debug!("Download process exited after the session ended");
                return;
            };

            let event = match conclusion {
                Conclusion::Success => {
                    session.state = SessionState::Completed;
                    session.progress = 1.0;
                    DownloadEvent::Completed {
                        output: session.output.clone(),
                    }
                }
                Conclusion::Failure(stderr) => {
                    session.state = SessionState::Failed;
                    DownloadEvent::Failed { stderr }
                }
            };

            if let Some(mut listener) = slot.listener.take() {
                listener(&event);
            }
        })
    }

    /// Mark the running session as cancelled and notify the listener.
    ///
    /// Return whether a session was running, and the process to kill.
    fn cancel(&self) -> (bool, Option<ChildHandle>) {
        self.slot.with_lock(|mut slot| {
            let slot = &mut *slot;
            let Some(session) = slot
                .session
                .as_mut()
                .filter(|s| s.state == SessionState::Running)
            else {
                return (false, None);
            };

            session.state = SessionState::Cancelled;
            if let Some(mut listener) = slot.listener.take() {
                listener(&DownloadEvent::Cancelled);
            }

            (true, slot.child.take())
        })
    }

    /// Fail the session silently, the caller reporting the error itself
    fn abandon(&self, generation: u64) -> Option<ChildHandle> {
        self.slot.with_lock(|mut slot| {
            if slot.generation != generation {
                return None;
            }
            if let Some(session) = slot.session.as_mut() {
                session.state = SessionState::Failed;
            }
            slot.listener = None;
            slot.child.take()
        })
    }
}

/// Run downloads one at a time through the extraction tool
pub struct DownloadEngine<D> {
    downloader: Arc<D>,
    normalized: Container,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<D: StreamDownloader> DownloadEngine<D> {
    pub fn new(downloader: Arc<D>) -> Self {
        Self {
            downloader,
            normalized: Container::default(),
            shared: Arc::default(),
            worker: Mutex::default(),
        }
    }

    /// Set the container asked to the tool when merging streams
    pub fn with_normalized(mut self, normalized: Container) -> Self {
        self.normalized = normalized;
        self
    }

    /// Start downloading the request in the background.
    ///
    /// Fail with [`Error::ConcurrentDownload`] if a download is already running,
    /// leaving it untouched.
    pub fn start(&self, request: &DownloadRequest, listener: Listener) -> Result<()> {
        let (generation, child, stdout, stderr) = self.shared.slot.with_lock(|mut slot| {
            if slot
                .session
                .as_ref()
                .is_some_and(|s| s.state == SessionState::Running)
            {
                return Err(Error::ConcurrentDownload);
            }

            fs::create_dir_all(&request.output_dir)
                .into_diagnostic()
                .wrap_err_with(|| {
                    format!("Could not create directory {:?}", request.output_dir)
                })?;

            let args = fetch_args(request, self.normalized);
            let mut child = self.downloader.spawn_fetch(&args)?;

            let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
                kill_and_reap(&mut child);
                return Err(miette!("The download process has no piped output").into());
            };

            let child = Arc::new(Mutex::new(child));
            slot.generation += 1;
            slot.session = Some(DownloadSession::new(if request.is_merge() { 2 } else { 1 }));
            slot.listener = Some(listener);
            slot.child = Some(child.clone());

            Ok((slot.generation, child, stdout, stderr))
        })?;

        info!("Downloading {} as {}", request.url, request.format_spec());

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("download".to_owned())
            .spawn(move || drive(&shared, generation, &child, stdout, stderr));

        match spawned {
            Ok(handle) => {
                // A previous worker, if any, only has its process left to reap
                self.worker.with_lock(|mut worker| *worker = Some(handle));
                Ok(())
            }
            Err(err) => {
                if let Some(child) = self.shared.abandon(generation) {
                    child.with_lock(|mut child| kill_and_reap(&mut child));
                }
                Err(Error::from(err).wrap_err_with(|| "Could not start the download thread"))
            }
        }
    }
}

impl<D> DownloadEngine<D> {
    /// Cancel the running download, if any.
    ///
    /// The listener receives a single [`DownloadEvent::Cancelled`] and nothing
    /// after it. The tool and every process it started are killed without
    /// waiting for them. Return whether a download was cancelled.
    pub fn cancel(&self) -> bool {
        let (cancelled, child) = self.shared.cancel();
        if cancelled {
            info!("Download cancelled");
        }

        // The worker reaps the process once its output is closed
        if let Some(child) = child {
            child.with_lock(|mut child| kill_tree(&mut child));
        }

        cancelled
    }

    /// Copy of the current or last session, `None` before the first start
    pub fn snapshot(&self) -> Option<DownloadSession> {
        self.shared.slot.with_lock(|slot| slot.session.clone())
    }

    pub fn state(&self) -> Option<SessionState> {
        self.shared
            .slot
            .with_lock(|slot| slot.session.as_ref().map(|s| s.state))
    }

    pub fn is_running(&self) -> bool {
        self.state() == Some(SessionState::Running)
    }

    /// Block until the last started worker thread has exited,
    /// returning the final session
    pub fn wait(&self) -> Option<DownloadSession> {
        let handle = self.worker.with_lock(|mut worker| worker.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("The download thread panicked");
            }
        }
        self.snapshot()
    }
}

impl<D> Drop for DownloadEngine<D> {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn kill_and_reap(child: &mut Child) {
    kill_tree(child);
    if let Err(err) = child.wait() {
        debug!("Could not reap the download process: {err}");
    }
}

/// Worker thread body: follow the tool's output until it exits
fn drive(
    shared: &Shared,
    generation: u64,
    child: &Mutex<Child>,
    stdout: ChildStdout,
    mut stderr: ChildStderr,
) {
    let stderr = thread::scope(|s| {
        let collector = thread::Builder::new()
            .name("download-stderr".to_owned())
            .spawn_scoped(s, move || {
                let mut buf = Vec::new();
                if let Err(err) = stderr.read_to_end(&mut buf) {
                    warn!("Could not read the download process errors: {err}");
                }
                String::from_utf8_lossy(&buf).into_owned()
            });

        for line in BufReader::new(stdout).split(b'\n') {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Could not read the download process output: {err}");
                    break;
                }
            };

            let line = String::from_utf8_lossy(&line);
            trace!("tool: {}", line.trim_end());
            if let Some(update) = parse_line(&line) {
                shared.dispatch_update(generation, update);
            }
        }

        match collector {
            Ok(handle) => handle.join().unwrap_or_default(),
            Err(err) => {
                warn!("Could not start the error collector thread: {err}");
                String::new()
            }
        }
    });

    let conclusion = match wait_exit(child) {
        Ok(status) if status.success() => {
            debug!("Download process exited successfully");
            Conclusion::Success
        }
        Ok(status) => {
            debug!("Download process exited with {status}");
            if stderr.trim().is_empty() {
                Conclusion::Failure(format!("The download tool exited with {status}"))
            } else {
                Conclusion::Failure(stderr)
            }
        }
        Err(err) => Conclusion::Failure(format!("Could not wait for the download tool: {err}")),
    };

    shared.conclude(generation, conclusion);
}

/// Wait for the child to exit without holding its lock, so that it can still be killed
fn wait_exit(child: &Mutex<Child>) -> std::io::Result<ExitStatus> {
    loop {
        if let Some(status) = child.with_lock(|mut child| child.try_wait())? {
            return Ok(status);
        }
        thread::sleep(EXIT_POLL);
    }
}
