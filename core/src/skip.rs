//! Runtime skip guards keyed on environment, modules, symbols, and host
//! facts.
//!
//! A skip is an out-of-band signal, not an error: checks return
//! `Option<Skip>` and the [`skip_if!`] macro consumes one by reporting the
//! reason and returning from the test early, so the runner counts the test
//! as passed rather than failed.
//!
//! The host checks read [`crate::host::facts`], so a test of the guards
//! themselves can simulate any platform with [`crate::host::host_os`].

use std::env;
use std::fmt;

use crate::host;
use crate::registry;

/// Out-of-band signal telling a test to abort without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    reason: String,
}

impl Skip {
    /// Create a skip signal with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the test is being skipped.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Unconditional skip.
pub fn always(reason: impl Into<String>) -> Option<Skip> {
    Some(Skip::new(format!("SKIP: {}", reason.into())))
}

/// Unconditional skip marking work that still needs doing.
pub fn todo(reason: impl Into<String>) -> Option<Skip> {
    Some(Skip::new(format!("TODO: {}", reason.into())))
}

/// Skip when the environment variable is set to a non-empty value.
pub fn if_env(name: &str) -> Option<Skip> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(|_| Skip::new(format!("envvar {name} set")))
}

/// Skip unless the environment variable is set to a non-empty value.
pub fn unless_env(name: &str) -> Option<Skip> {
    match env::var(name).ok().filter(|value| !value.is_empty()) {
        Some(_) => None,
        None => Some(Skip::new(format!("envvar {name} not set"))),
    }
}

/// Skip when the module resolves through the registry.
pub fn if_module(name: &str) -> Option<Skip> {
    registry::import(name)
        .ok()
        .map(|_| Skip::new(format!("module available: {name}")))
}

/// Skip unless the module resolves through the registry.
pub fn unless_module(name: &str) -> Option<Skip> {
    match registry::import(name) {
        Ok(_) => None,
        Err(_) => Some(Skip::new(format!("module not installed: {name}"))),
    }
}

/// Skip when the symbol path resolves through the registry.
pub fn if_symbol(path: &str) -> Option<Skip> {
    registry::lookup(path)
        .ok()
        .map(|_| Skip::new(format!("symbol exists: {path}")))
}

/// Skip unless the symbol path resolves through the registry.
pub fn unless_symbol(path: &str) -> Option<Skip> {
    match registry::lookup(path) {
        Ok(_) => None,
        Err(_) => Some(Skip::new(format!("missing symbol: {path}"))),
    }
}

/// Skip when running on the given operating system (prefix match, so
/// `"linux"` also matches `"linux-musl"` style overrides).
pub fn if_host_os(os: &str) -> Option<Skip> {
    host::facts()
        .get_str(host::OS)
        .filter(|current| current.starts_with(os))
        .map(|_| Skip::new(format!("does not work on {os}")))
}

/// Skip unless running on the given operating system.
pub fn unless_host_os(os: &str) -> Option<Skip> {
    match host::facts()
        .get_str(host::OS)
        .filter(|current| current.starts_with(os))
    {
        Some(_) => None,
        None => Some(Skip::new(format!("only applicable on {os}"))),
    }
}

/// Report a consumed skip signal. Used by [`skip_if!`]; call it directly
/// when rolling a custom skip flow.
pub fn report(skip: &Skip) {
    tracing::warn!(reason = %skip.reason(), "test skipped");
    eprintln!("test skipped: {skip}");
}

/// Abort the current test early when any check yields a skip signal.
///
/// # Examples
///
/// ```rust
/// use fixture_core::skip;
/// use fixture_core::skip_if;
///
/// fn test_unix_socket_cleanup() {
///     skip_if!(skip::unless_host_os("linux"), skip::if_env("CI_SMOKE_ONLY"));
///     // test body runs only on linux with CI_SMOKE_ONLY unset
/// }
/// # test_unix_socket_cleanup();
/// ```
#[macro_export]
macro_rules! skip_if {
    ($($check:expr),+ $(,)?) => {
        $(
            if let Some(skip) = $check {
                $crate::skip::report(&skip);
                return;
            }
        )+
    };
}
