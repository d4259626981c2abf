//! Fixture Core Library
//!
//! Testing-support crate that augments Rust's built-in test harness with
//! scoped state patches, a mock call-spy, and runtime skip guards. Every
//! patch is a two-phase [`scope::Scope`]: acquire installs temporary state
//! and snapshots what it replaced, release puts the snapshot back exactly —
//! including restoring absence as absence — no matter how the protected
//! code exited.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`scope`] - The scoping mechanism: `Scope`, `Guard`, `with`,
//!   `ScopeStack`, `Fixture`, `run_case`, and the process-wide state lock
//! - [`env`] - Environment-variable patches
//! - [`streams`] - Stream capture and muting via descriptor redirection
//! - [`registry`] - The module registry and its mask/stub/exists/reset
//!   patches, plus symbol lookup
//! - [`values`] - Generic attribute patches with the falsy-means-remove
//!   policy
//! - [`host`] - Host identification facts and platform-simulation patches
//! - [`mock`] - The recording call-spy with staged side effects
//! - [`skip`] - Skip guards and the `skip_if!` macro
//! - [`logging`] - Scoped `tracing` capture and test-logging setup
//! - [`error`] - Error types and result handling
//!
//! # Example
//!
//! ```rust
//! use fixture_core::{env::EnvPatch, scope::with};
//!
//! with(EnvPatch::set("APP_BROKER_URL", "memory://"), |_| {
//!     assert_eq!(std::env::var("APP_BROKER_URL").unwrap(), "memory://");
//! })
//! .unwrap();
//! assert!(std::env::var("APP_BROKER_URL").is_err());
//! ```

pub mod env;
pub mod error;
pub mod host;
pub mod logging;
pub mod mock;
pub mod registry;
pub mod scope;
pub mod skip;
pub mod streams;
pub mod values;

// Re-export commonly used types at the crate root for convenience
pub use env::EnvPatch;
pub use error::{PatchError, Result};
pub use host::{host_arch, host_family, host_os, HostFacts};
pub use logging::{init_test_logging, CapturedLogs, LogCapture};
pub use mock::{Call, Mock};
pub use registry::{
    import, lookup, registry, Attr, MaskModules, Module, ModuleExists, ModuleRegistry,
    ResetModules, StubModules,
};
pub use scope::{run_case, state_lock, with, Fixture, Guard, Scope, ScopeStack};
pub use skip::Skip;
pub use streams::{CaptureStreams, MuteStreams, StreamSink};
pub use values::{AttrTarget, ReplaceValue};

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::const_is_empty)]
    fn test_crate_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(CRATE_NAME, "fixture-core");
    }

    #[test]
    fn test_re_exports() {
        let error = PatchError::not_found("missing");
        assert!(error.is_not_found());

        let mock = Mock::named("exported");
        mock.assert_not_called();
    }
}
