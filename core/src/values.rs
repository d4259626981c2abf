//! Attribute/value patches over any target with a dynamic attribute table.

use serde_json::Value;

use crate::error::Result;
use crate::scope::{state_lock, Scope, StateGuard};

/// A named object whose attributes can be read, written, and removed.
///
/// Implementors use interior mutability so a cheap-clone handle can stand
/// in for the target inside a [`ReplaceValue`] scope. The associated value
/// type carries its own falsiness rule, used by the deliberate
/// falsy-means-remove policy of [`ReplaceValue`].
pub trait AttrTarget {
    /// Attribute value type for this target.
    type Value: Clone;

    /// Human-readable identity, used in trace output.
    fn target_name(&self) -> String;

    /// Read an attribute without side effects.
    fn get_attr(&self, name: &str) -> Option<Self::Value>;

    /// Install an attribute value.
    fn set_attr(&self, name: &str, value: Self::Value);

    /// Remove an attribute, returning what was there.
    fn remove_attr(&self, name: &str) -> Option<Self::Value>;

    /// Whether installing `value` means "remove the attribute" instead.
    fn is_falsy(value: &Self::Value) -> bool;
}

/// JSON falsiness: null, false, zero, and empty strings/arrays/objects.
pub fn json_is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

struct SavedAttr<V> {
    prior: Option<V>,
    _lock: StateGuard,
}

/// Temporarily replace (or, for falsy replacements, remove) one attribute.
///
/// Round-trip identity: an attribute that existed before the scope exists
/// with its original value afterwards; one that did not exist before does
/// not exist afterwards, regardless of what was installed in between.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{host, scope::with, values::ReplaceValue};
///
/// with(ReplaceValue::new(host::facts(), host::OS, "freebsd"), |_| {
///     assert_eq!(host::facts().get_str(host::OS).as_deref(), Some("freebsd"));
/// })
/// .unwrap();
/// assert_eq!(
///     host::facts().get_str(host::OS).as_deref(),
///     Some(std::env::consts::OS)
/// );
/// ```
pub struct ReplaceValue<T: AttrTarget> {
    target: T,
    name: String,
    value: T::Value,
    saved: Option<SavedAttr<T::Value>>,
}

impl<T: AttrTarget> ReplaceValue<T> {
    /// Replace `name` on `target` with `value` for the duration of the
    /// scope. A falsy `value` removes the attribute instead.
    pub fn new(target: T, name: impl Into<String>, value: impl Into<T::Value>) -> Self {
        Self {
            target,
            name: name.into(),
            value: value.into(),
            saved: None,
        }
    }
}

impl<T: AttrTarget> Scope for ReplaceValue<T> {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let lock = state_lock();
        let prior = self.target.get_attr(&self.name);
        if T::is_falsy(&self.value) {
            self.target.remove_attr(&self.name);
        } else {
            self.target.set_attr(&self.name, self.value.clone());
        }
        tracing::debug!(
            target = %self.target.target_name(),
            name = %self.name,
            existed = prior.is_some(),
            "attribute patch installed"
        );
        self.saved = Some(SavedAttr { prior, _lock: lock });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            match saved.prior {
                Some(prior) => self.target.set_attr(&self.name, prior),
                None => {
                    self.target.remove_attr(&self.name);
                }
            }
            tracing::debug!(
                target = %self.target.target_name(),
                name = %self.name,
                "attribute patch released"
            );
        }
        Ok(())
    }
}
