//! Scoped capture of `tracing` output, and test-suite logging setup.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::scope::Scope;

/// Shared buffer handle for logs captured by [`LogCapture`].
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Everything captured so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Captured output split into lines.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Whether the captured output contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    /// Discard everything captured so far.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> CapturedLogs {
        self.clone()
    }
}

/// Capture `tracing` events emitted on the current thread into a buffer.
///
/// Acquire installs a plain-format subscriber (no ANSI, no timestamps) as
/// the thread's default dispatcher; release drops the installation guard,
/// restoring whatever dispatcher was active before the scope.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{logging::LogCapture, scope::with};
///
/// with(LogCapture::new(), |logs| {
///     tracing::warn!("queue depth above threshold");
///     assert!(logs.contains("queue depth above threshold"));
/// })
/// .unwrap();
/// ```
pub struct LogCapture {
    level: Level,
    buffer: CapturedLogs,
    guard: Option<DefaultGuard>,
}

impl Default for LogCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCapture {
    /// Capture every event.
    pub fn new() -> Self {
        Self::at_level(Level::TRACE)
    }

    /// Capture events at `level` and above.
    pub fn at_level(level: Level) -> Self {
        Self {
            level,
            buffer: CapturedLogs::default(),
            guard: None,
        }
    }
}

impl Scope for LogCapture {
    type Handle = CapturedLogs;

    fn acquire(&mut self) -> Result<CapturedLogs> {
        self.buffer = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.level)
            .with_writer(self.buffer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        self.guard = Some(tracing::subscriber::set_default(subscriber));
        Ok(self.buffer.clone())
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the guard restores the previous dispatcher.
        self.guard = None;
        Ok(())
    }
}

/// Install a process-global env-filtered subscriber for test diagnostics.
///
/// Safe to call from every test; only the first call installs. The filter
/// honors `RUST_LOG` and defaults to `debug`.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::with;

    #[test]
    fn captures_events_emitted_inside_the_scope() {
        with(LogCapture::new(), |logs| {
            tracing::error!("broker unreachable");
            tracing::debug!(attempt = 2, "retrying");
            assert!(logs.contains("broker unreachable"));
            assert!(logs.contains("retrying"));
        })
        .unwrap();
    }

    #[test]
    fn stops_capturing_after_release() {
        let logs = with(LogCapture::new(), |logs| {
            tracing::info!("inside");
            logs.clone()
        })
        .unwrap();
        tracing::info!("outside");
        assert!(logs.contains("inside"));
        assert!(!logs.contains("outside"));
    }

    #[test]
    fn level_filter_drops_quieter_events() {
        with(LogCapture::at_level(Level::WARN), |logs| {
            tracing::warn!("kept");
            tracing::info!("dropped");
            assert!(logs.contains("kept"));
            assert!(!logs.contains("dropped"));
        })
        .unwrap();
    }

    #[test]
    fn lines_and_clear_operate_on_the_shared_buffer() {
        with(LogCapture::new(), |logs| {
            tracing::warn!("first");
            tracing::warn!("second");
            assert_eq!(logs.lines().len(), 2);
            logs.clear();
            assert_eq!(logs.contents(), "");
        })
        .unwrap();
    }
}
