//! Environment-variable patches.

use std::env;

use crate::error::Result;
use crate::scope::{state_lock, Scope, StateGuard};

enum Action {
    Set(String),
    Unset,
}

struct Saved {
    prior: Option<String>,
    _lock: StateGuard,
}

/// Temporarily set or unset one environment variable.
///
/// The prior value — or its absence — is snapshotted on acquire and
/// restored exactly on release: a variable that was unset before the scope
/// is unset again afterwards, not reset to an empty string.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{env::EnvPatch, scope::with};
///
/// with(EnvPatch::set("FIXTURE_ENV_DOC", "broker://"), |_| {
///     assert_eq!(std::env::var("FIXTURE_ENV_DOC").unwrap(), "broker://");
/// })
/// .unwrap();
/// assert!(std::env::var("FIXTURE_ENV_DOC").is_err());
/// ```
pub struct EnvPatch {
    name: String,
    action: Action,
    saved: Option<Saved>,
}

impl EnvPatch {
    /// Set `name` to `value` for the duration of the scope.
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: Action::Set(value.into()),
            saved: None,
        }
    }

    /// Remove `name` for the duration of the scope.
    pub fn unset(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: Action::Unset,
            saved: None,
        }
    }

    /// The variable this patch touches.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Scope for EnvPatch {
    type Handle = ();

    fn acquire(&mut self) -> Result<()> {
        let lock = state_lock();
        let prior = env::var(&self.name).ok();
        match &self.action {
            Action::Set(value) => env::set_var(&self.name, value),
            Action::Unset => env::remove_var(&self.name),
        }
        tracing::debug!(name = %self.name, "environment patch installed");
        self.saved = Some(Saved { prior, _lock: lock });
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(saved) = self.saved.take() {
            match saved.prior {
                Some(value) => env::set_var(&self.name, value),
                None => env::remove_var(&self.name),
            }
            tracing::debug!(name = %self.name, "environment patch released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{with, Guard};
    use proptest::prelude::*;

    #[test]
    fn previously_unset_variable_is_absent_after_release() {
        let _serial = state_lock();
        env::remove_var("FIXTURE_TEST_UNSET");
        with(EnvPatch::set("FIXTURE_TEST_UNSET", "value"), |_| {
            assert_eq!(env::var("FIXTURE_TEST_UNSET").unwrap(), "value");
        })
        .unwrap();
        assert!(env::var("FIXTURE_TEST_UNSET").is_err());
    }

    #[test]
    fn previously_set_variable_is_restored_exactly() {
        let _serial = state_lock();
        env::set_var("FIXTURE_TEST_SET", "before");
        with(EnvPatch::set("FIXTURE_TEST_SET", "during"), |_| {
            assert_eq!(env::var("FIXTURE_TEST_SET").unwrap(), "during");
        })
        .unwrap();
        assert_eq!(env::var("FIXTURE_TEST_SET").unwrap(), "before");
        env::remove_var("FIXTURE_TEST_SET");
    }

    #[test]
    fn unset_patch_removes_and_restores() {
        let _serial = state_lock();
        env::set_var("FIXTURE_TEST_REMOVED", "kept");
        with(EnvPatch::unset("FIXTURE_TEST_REMOVED"), |_| {
            assert!(env::var("FIXTURE_TEST_REMOVED").is_err());
        })
        .unwrap();
        assert_eq!(env::var("FIXTURE_TEST_REMOVED").unwrap(), "kept");
        env::remove_var("FIXTURE_TEST_REMOVED");
    }

    #[test]
    fn stacked_patches_restore_through_each_layer() {
        let _serial = state_lock();
        env::set_var("FIXTURE_TEST_STACKED", "base");
        with(EnvPatch::set("FIXTURE_TEST_STACKED", "outer"), |_| {
            with(EnvPatch::set("FIXTURE_TEST_STACKED", "inner"), |_| {
                assert_eq!(env::var("FIXTURE_TEST_STACKED").unwrap(), "inner");
            })
            .unwrap();
            assert_eq!(env::var("FIXTURE_TEST_STACKED").unwrap(), "outer");
        })
        .unwrap();
        assert_eq!(env::var("FIXTURE_TEST_STACKED").unwrap(), "base");
        env::remove_var("FIXTURE_TEST_STACKED");
    }

    #[test]
    fn guard_restores_when_dropped_mid_test() {
        let _serial = state_lock();
        env::remove_var("FIXTURE_TEST_GUARD");
        let guard = Guard::new(EnvPatch::set("FIXTURE_TEST_GUARD", "value")).unwrap();
        assert_eq!(env::var("FIXTURE_TEST_GUARD").unwrap(), "value");
        drop(guard);
        assert!(env::var("FIXTURE_TEST_GUARD").is_err());
    }

    proptest! {
        #[test]
        fn round_trip_restores_arbitrary_prior_values(
            prior in "[A-Za-z0-9_./:-]{1,32}",
            installed in "[A-Za-z0-9_./:-]{0,32}",
        ) {
            let _serial = state_lock();
            env::set_var("FIXTURE_PROP_VAR", &prior);
            with(EnvPatch::set("FIXTURE_PROP_VAR", installed.as_str()), |_| {
                assert_eq!(env::var("FIXTURE_PROP_VAR").unwrap(), installed);
            })
            .unwrap();
            prop_assert_eq!(env::var("FIXTURE_PROP_VAR").unwrap(), prior);
            env::remove_var("FIXTURE_PROP_VAR");
        }
    }
}
