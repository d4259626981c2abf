//! Mock call-spy with staged side effects and call-count assertions.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PatchError, Result};

/// One recorded invocation of a [`Mock`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    /// Arguments the mock was called with.
    pub args: Vec<Value>,
}

enum Failure {
    Once(String),
    Always(String),
}

enum NthRule {
    ReturnAfter { n: usize, value: Value },
    FailAfter { n: usize, message: String },
    FailUntilThen { n: usize, first: String, second: String },
}

struct MockState {
    name: String,
    calls: Vec<Call>,
    return_value: Value,
    failure: Option<Failure>,
    rule: Option<NthRule>,
}

/// Recording call-spy.
///
/// Clones share state, so a handle installed somewhere (for example as a
/// stub-module attribute) and the handle kept by the test observe the same
/// calls. Behavior is staged up front: a settable return value, one-shot or
/// persistent failure injection, and nth-call rules that switch behavior
/// mid-test. `n` counts from 1 and names the first affected call.
///
/// # Examples
///
/// ```rust
/// use fixture_core::mock::Mock;
/// use serde_json::json;
///
/// let mock = Mock::named("publish");
/// mock.returns(json!("ok")).on_nth_call_fail("connection lost", 3);
///
/// assert_eq!(mock.call(vec![]).unwrap(), json!("ok"));
/// assert_eq!(mock.call(vec![]).unwrap(), json!("ok"));
/// assert_eq!(mock.call(vec![]).unwrap(), json!("ok"));
/// assert!(mock.call(vec![]).is_err());
/// mock.assert_called();
/// ```
#[derive(Clone)]
pub struct Mock {
    state: Arc<Mutex<MockState>>,
}

impl Default for Mock {
    fn default() -> Self {
        Self::new()
    }
}

impl Mock {
    /// Create an anonymous mock.
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a mock with a name used in assertion messages.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                name: name.into(),
                calls: Vec::new(),
                return_value: Value::Null,
                failure: None,
                rule: None,
            })),
        }
    }

    /// The mock's name.
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Set the value returned by successful calls.
    pub fn returns(&self, value: impl Into<Value>) -> &Self {
        self.state.lock().return_value = value.into();
        self
    }

    /// Fail the next call only; later calls behave normally again.
    pub fn fail_once(&self, message: impl Into<String>) -> &Self {
        self.state.lock().failure = Some(Failure::Once(message.into()));
        self
    }

    /// Fail every call from now on.
    pub fn fail_with(&self, message: impl Into<String>) -> &Self {
        self.state.lock().failure = Some(Failure::Always(message.into()));
        self
    }

    /// Change the return value from the nth call onward.
    pub fn on_nth_call_return(&self, value: impl Into<Value>, n: usize) -> &Self {
        self.state.lock().rule = Some(NthRule::ReturnAfter {
            n,
            value: value.into(),
        });
        self
    }

    /// Let the first n calls succeed, then fail every later call.
    pub fn on_nth_call_fail(&self, message: impl Into<String>, n: usize) -> &Self {
        self.state.lock().rule = Some(NthRule::FailAfter {
            n,
            message: message.into(),
        });
        self
    }

    /// Fail with `first` up to and including the nth call, with `second`
    /// afterwards.
    pub fn on_nth_call_fail_then(
        &self,
        first: impl Into<String>,
        second: impl Into<String>,
        n: usize,
    ) -> &Self {
        self.state.lock().rule = Some(NthRule::FailUntilThen {
            n,
            first: first.into(),
            second: second.into(),
        });
        self
    }

    /// Invoke the mock: record the call, apply staged behavior, and return
    /// the current return value or the staged failure.
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        let mut state = self.state.lock();
        state.calls.push(Call { args });
        let count = state.calls.len();

        if let Some(failure) = state.failure.take() {
            let message = match failure {
                Failure::Once(message) => message,
                Failure::Always(message) => {
                    let current = message.clone();
                    state.failure = Some(Failure::Always(message));
                    current
                }
            };
            return Err(PatchError::injected(message));
        }

        match state.rule.take() {
            Some(NthRule::ReturnAfter { n, value }) => {
                if count >= n {
                    state.return_value = value;
                } else {
                    state.rule = Some(NthRule::ReturnAfter { n, value });
                }
            }
            Some(NthRule::FailAfter { n, message }) => {
                // The nth call still returns; the armed failure fires on
                // the call after it.
                if count >= n {
                    state.failure = Some(Failure::Always(message));
                } else {
                    state.rule = Some(NthRule::FailAfter { n, message });
                }
            }
            Some(NthRule::FailUntilThen { n, first, second }) => {
                if count >= n {
                    state.failure = Some(Failure::Always(second));
                } else {
                    state.rule = Some(NthRule::FailUntilThen {
                        n,
                        first: first.clone(),
                        second,
                    });
                }
                return Err(PatchError::injected(first));
            }
            None => {}
        }

        Ok(state.return_value.clone())
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// The most recent call, if any.
    pub fn last_call(&self) -> Option<Call> {
        self.state.lock().calls.last().cloned()
    }

    /// Forget recorded calls; staged behavior is kept.
    pub fn reset(&self) {
        self.state.lock().calls.clear();
    }

    /// Assert the mock was called at least once.
    pub fn assert_called(&self) {
        let state = self.state.lock();
        assert!(
            !state.calls.is_empty(),
            "Expected '{}' to have been called.",
            state.name
        );
    }

    /// Assert the mock was never called.
    pub fn assert_not_called(&self) {
        let state = self.state.lock();
        assert!(
            state.calls.is_empty(),
            "Expected '{}' to not have been called. Called {} times.",
            state.name,
            state.calls.len()
        );
    }

    /// Assert the mock was called exactly once.
    pub fn assert_called_once(&self) {
        let state = self.state.lock();
        assert!(
            state.calls.len() == 1,
            "Expected '{}' to have been called once. Called {} times.",
            state.name,
            state.calls.len()
        );
    }

    /// Assert the most recent call used exactly these arguments.
    pub fn assert_called_with(&self, args: &[Value]) {
        let state = self.state.lock();
        match state.calls.last() {
            None => panic!("Expected '{}' to have been called.", state.name),
            Some(call) => assert_eq!(
                call.args, args,
                "'{}' was last called with different arguments",
                state.name
            ),
        }
    }
}

impl PartialEq for Mock {
    /// Mocks compare by identity: two handles are equal when they share
    /// state.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for Mock {}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mock")
            .field("name", &state.name)
            .field("calls", &state.calls.len())
            .finish()
    }
}
