use thiserror::Error;

/// Result type alias for patch, registry, and mock operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Error types for scoped patches and the module registry.
///
/// Restoration failures are never retried or suppressed: whatever a release
/// phase returns travels straight to the caller on the explicit-release
/// paths. The drop-based fallback logs the error instead, since `Drop`
/// cannot propagate it.
///
/// # Examples
///
/// ```rust
/// use fixture_core::error::PatchError;
///
/// let missing = PatchError::not_found("gevent.monkey");
/// assert!(missing.is_not_found());
/// assert_eq!(missing.to_string(), "no module named 'gevent.monkey'");
/// ```
#[derive(Error, Debug)]
pub enum PatchError {
    /// Import failed: the name is masked or was never registered
    #[error("no module named '{0}'")]
    ModuleNotFound(String),

    /// Dotted-path lookup resolved the module but not the attribute
    #[error("symbol not found: '{0}'")]
    SymbolNotFound(String),

    /// Stream redirection or restoration failed
    #[error("stream redirection failed: {0}")]
    Stream(#[from] std::io::Error),

    /// Failure injected into a mock via `fail_once`/`fail_with` or a staged
    /// nth-call rule
    #[error("injected failure: {0}")]
    Injected(String),
}

impl PatchError {
    /// Create a not found error for a module name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound(name.into())
    }

    /// Create a not found error for a symbol path
    pub fn symbol_not_found(path: impl Into<String>) -> Self {
        Self::SymbolNotFound(path.into())
    }

    /// Create an injected mock failure
    pub fn injected(message: impl Into<String>) -> Self {
        Self::Injected(message.into())
    }

    /// Check if this error indicates a missing module or symbol
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PatchError::ModuleNotFound(_) | PatchError::SymbolNotFound(_)
        )
    }

    /// Check if this error came from stream redirection
    pub fn is_stream(&self) -> bool {
        matches!(self, PatchError::Stream(_))
    }

    /// Check if this error was injected through a mock
    pub fn is_injected(&self) -> bool {
        matches!(self, PatchError::Injected(_))
    }
}
