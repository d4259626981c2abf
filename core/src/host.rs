//! Host identification facts and patches for simulating foreign platforms.
//!
//! Rust exposes platform identity as compile-time constants, which cannot
//! be patched in place the way a dynamic runtime allows. This module keeps
//! the identity in a process-global table instead, seeded from
//! `std::env::consts` at first use: patches rewrite entries through
//! [`ReplaceValue`], and the skip guards read the same entries, so
//! platform-conditional skips stay testable.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::values::{json_is_falsy, AttrTarget, ReplaceValue};

/// Fact key: operating system name (`linux`, `macos`, `windows`, ...).
pub const OS: &str = "os";
/// Fact key: processor architecture (`x86_64`, `aarch64`, ...).
pub const ARCH: &str = "arch";
/// Fact key: platform family (`unix`, `windows`).
pub const FAMILY: &str = "family";

static FACTS: Lazy<HostFacts> = Lazy::new(HostFacts::detect);

/// Handle to the process-global host-facts table.
pub fn facts() -> HostFacts {
    FACTS.clone()
}

/// Process-global table of host identification facts.
#[derive(Clone)]
pub struct HostFacts {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl HostFacts {
    fn detect() -> Self {
        let mut values = HashMap::new();
        values.insert(OS.to_string(), Value::from(std::env::consts::OS));
        values.insert(ARCH.to_string(), Value::from(std::env::consts::ARCH));
        values.insert(FAMILY.to_string(), Value::from(std::env::consts::FAMILY));
        Self {
            values: Arc::new(Mutex::new(values)),
        }
    }

    /// Read one fact.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    /// Read one fact as a string.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

impl AttrTarget for HostFacts {
    type Value = Value;

    fn target_name(&self) -> String {
        "host".into()
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) {
        self.values.lock().insert(name.to_string(), value);
    }

    fn remove_attr(&self, name: &str) -> Option<Value> {
        self.values.lock().remove(name)
    }

    fn is_falsy(value: &Value) -> bool {
        json_is_falsy(value)
    }
}

/// Simulate a different operating system for the duration of the scope.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{host, scope::with};
///
/// with(host::host_os("windows"), |_| {
///     assert_eq!(host::facts().get_str(host::OS).as_deref(), Some("windows"));
/// })
/// .unwrap();
/// ```
pub fn host_os(value: impl Into<Value>) -> ReplaceValue<HostFacts> {
    ReplaceValue::new(facts(), OS, value)
}

/// Simulate a different processor architecture for the duration of the
/// scope.
pub fn host_arch(value: impl Into<Value>) -> ReplaceValue<HostFacts> {
    ReplaceValue::new(facts(), ARCH, value)
}

/// Simulate a different platform family for the duration of the scope.
pub fn host_family(value: impl Into<Value>) -> ReplaceValue<HostFacts> {
    ReplaceValue::new(facts(), FAMILY, value)
}
