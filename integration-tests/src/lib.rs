//! Shared fixtures for the end-to-end suites.
//!
//! The suites in `tests/` exercise the crate the way a downstream test
//! suite would: patches bound to fixtures via `run_case`, inline guards,
//! and mocks wired through stub modules.

use fixture_core::{
    env::EnvPatch,
    scope::{Fixture, ScopeStack},
    Result,
};

/// Suite fixture that pins one environment variable for every test case
/// and counts how often its lifecycle hooks ran.
pub struct BrokerEnvFixture {
    pub name: &'static str,
    pub value: &'static str,
    pub setups: usize,
    pub teardowns: usize,
}

impl BrokerEnvFixture {
    /// Pin `name` to `value` for each test case run against this fixture.
    pub fn new(name: &'static str, value: &'static str) -> Self {
        Self {
            name,
            value,
            setups: 0,
            teardowns: 0,
        }
    }
}

impl Fixture for BrokerEnvFixture {
    fn scopes(&mut self, stack: &mut ScopeStack) -> Result<()> {
        stack.enter(EnvPatch::set(self.name, self.value))?;
        Ok(())
    }

    fn setup(&mut self) {
        self.setups += 1;
    }

    fn teardown(&mut self) {
        self.teardowns += 1;
    }
}
