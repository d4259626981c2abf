//! Stream capture and muting via file-descriptor redirection.
//!
//! Capturing at the descriptor level sees everything the process writes to
//! stdout/stderr, including output from code that holds its own handle to
//! the stream. The saved descriptor duplicates are the restoration
//! snapshot: release re-points the standard descriptors at them
//! unconditionally, so redirections the protected code performed on top of
//! ours do not survive the scope.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::error::Result;
use crate::scope::{state_lock, Scope, StateGuard};

/// Readable handle over one captured stream.
///
/// Clones share the same backing sink, and contents stay readable after
/// the capture scope releases.
#[derive(Clone)]
pub struct StreamSink {
    file: Arc<NamedTempFile>,
}

impl StreamSink {
    fn create() -> io::Result<Self> {
        Ok(Self {
            file: Arc::new(NamedTempFile::new()?),
        })
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_file().as_raw_fd()
    }

    /// Everything written to the stream while the capture was active.
    pub fn contents(&self) -> Result<String> {
        let mut contents = String::new();
        File::open(self.file.path())?.read_to_string(&mut contents)?;
        Ok(contents)
    }

    /// Whether the captured output contains `needle`.
    pub fn contains(&self, needle: &str) -> Result<bool> {
        Ok(self.contents()?.contains(needle))
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("path", &self.file.path())
            .finish()
    }
}

fn dup_fd(fd: RawFd) -> io::Result<RawFd> {
    let copy = unsafe { libc::dup(fd) };
    if copy < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(copy)
    }
}

fn redirect_fd(src: RawFd, dst: RawFd) -> io::Result<()> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn flush_std_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

struct SavedStreams {
    stdout: RawFd,
    stderr: RawFd,
    _lock: StateGuard,
}

impl SavedStreams {
    fn capture(lock: StateGuard) -> Result<Self> {
        flush_std_streams();
        let stdout = dup_fd(libc::STDOUT_FILENO)?;
        let stderr = match dup_fd(libc::STDERR_FILENO) {
            Ok(fd) => fd,
            Err(error) => {
                close_fd(stdout);
                return Err(error.into());
            }
        };
        Ok(Self {
            stdout,
            stderr,
            _lock: lock,
        })
    }

    /// Re-point the standard descriptors at the saved duplicates and close
    /// the duplicates. Both restores are attempted even if the first
    /// fails.
    fn restore(self) -> Result<()> {
        flush_std_streams();
        let restored_out = redirect_fd(self.stdout, libc::STDOUT_FILENO);
        let restored_err = redirect_fd(self.stderr, libc::STDERR_FILENO);
        close_fd(self.stdout);
        close_fd(self.stderr);
        restored_out?;
        restored_err?;
        Ok(())
    }
}

/// Capture process stdout and stderr into inspectable sinks.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{scope::Guard, streams::CaptureStreams};
/// use std::io::Write;
///
/// let guard = Guard::new(CaptureStreams::new()).unwrap();
/// writeln!(std::io::stdout(), "something loud").unwrap();
/// let (stdout, _stderr) = guard.restore().unwrap().unwrap();
/// assert!(stdout.contains("something loud").unwrap());
/// ```
#[derive(Default)]
pub struct CaptureStreams {
    sinks: Option<(StreamSink, StreamSink)>,
    saved: Option<SavedStreams>,
}

impl CaptureStreams {
    /// Create a capture scope; sinks are created on acquire.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scope for CaptureStreams {
    /// `(stdout, stderr)` sinks.
    type Handle = (StreamSink, StreamSink);

    fn acquire(&mut self) -> Result<Self::Handle> {
        let saved = SavedStreams::capture(state_lock())?;
        let installed = (|| -> Result<(StreamSink, StreamSink)> {
            let stdout = StreamSink::create()?;
            let stderr = StreamSink::create()?;
            redirect_fd(stdout.raw_fd(), libc::STDOUT_FILENO)?;
            redirect_fd(stderr.raw_fd(), libc::STDERR_FILENO)?;
            Ok((stdout, stderr))
        })();
        match installed {
            Ok(sinks) => {
                tracing::debug!("stream capture installed");
                self.sinks = Some(sinks.clone());
                self.saved = Some(saved);
                Ok(sinks)
            }
            Err(error) => {
                if let Err(restore_error) = saved.restore() {
                    tracing::error!(
                        error = %restore_error,
                        "stream restore failed after aborted capture"
                    );
                }
                Err(error)
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            saved.restore()?;
            tracing::debug!("stream capture released");
        }
        self.sinks = None;
        Ok(())
    }
}

/// Silence process stdout and stderr by pointing both at the null device.
pub struct MuteStreams {
    null: Option<File>,
    saved: Option<SavedStreams>,
}

impl Default for MuteStreams {
    fn default() -> Self {
        Self::new()
    }
}

impl MuteStreams {
    /// Create a mute scope; the null device is opened on acquire.
    pub fn new() -> Self {
        Self {
            null: None,
            saved: None,
        }
    }
}

impl Scope for MuteStreams {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let saved = SavedStreams::capture(state_lock())?;
        let installed = (|| -> Result<File> {
            let null = OpenOptions::new().write(true).open("/dev/null")?;
            redirect_fd(null.as_raw_fd(), libc::STDOUT_FILENO)?;
            redirect_fd(null.as_raw_fd(), libc::STDERR_FILENO)?;
            Ok(null)
        })();
        match installed {
            Ok(null) => {
                tracing::debug!("streams muted");
                self.null = Some(null);
                self.saved = Some(saved);
                Ok(())
            }
            Err(error) => {
                if let Err(restore_error) = saved.restore() {
                    tracing::error!(
                        error = %restore_error,
                        "stream restore failed after aborted mute"
                    );
                }
                Err(error)
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            saved.restore()?;
            tracing::debug!("streams unmuted");
        }
        self.null = None;
        Ok(())
    }
}
