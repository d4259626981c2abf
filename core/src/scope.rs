//! The resource-scoping mechanism behind every patch in this crate.
//!
//! A [`Scope`] is a two-phase unit of temporary state mutation: `acquire`
//! installs the new state and produces a handle, `release` puts the prior
//! state back. Three adapters turn a scope into something usable at a call
//! site, chosen explicitly rather than inferred:
//!
//! - [`Guard`] — RAII form for inline use inside a test body
//! - [`with`] — wraps a single closure, releasing even on panic
//! - [`ScopeStack`] + [`Fixture`] + [`run_case`] — suite form, splicing
//!   acquisition before per-test setup and release after teardown
//!
//! All patches that touch process-global state serialize on [`state_lock`],
//! a reentrant lock, so stacked patches on one thread nest freely while
//! tests on other threads wait their turn.

use std::panic::{self, AssertUnwindSafe};

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::Result;

/// Guard over the process-wide patch lock, see [`state_lock`].
pub type StateGuard = ReentrantMutexGuard<'static, ()>;

static STATE_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Take the process-wide lock serializing mutation of shared process state
/// (environment variables, the module registry, stream descriptors, host
/// facts).
///
/// Every patch holds this lock between its acquire and release phases.
/// Tests that mutate such state directly, without going through a patch,
/// should hold it too.
pub fn state_lock() -> StateGuard {
    STATE_LOCK.lock()
}

/// A two-phase resource scope.
///
/// Implementations snapshot prior state in [`acquire`](Scope::acquire) and
/// restore it exactly in [`release`](Scope::release), including restoring
/// absence as absence. `release` is called exactly once per successful
/// `acquire` by the adapters below; releasing a scope that was never
/// acquired is a no-op.
///
/// Use one of the adapters rather than driving a scope by hand: a scope
/// dropped between `acquire` and `release` leaves its state patched.
pub trait Scope {
    /// Value produced by acquire and handed to the protected code.
    type Handle;

    /// Install the temporary state, snapshotting whatever it replaces.
    fn acquire(&mut self) -> Result<Self::Handle>;

    /// Restore the snapshotted state.
    fn release(&mut self) -> Result<()>;
}

/// RAII adapter: acquires on construction, releases on drop.
///
/// The drop path cannot surface release errors, so it logs them; call
/// [`Guard::restore`] instead when a restoration failure should fail the
/// test.
///
/// # Examples
///
/// ```rust
/// use fixture_core::{env::EnvPatch, scope::Guard};
///
/// let guard = Guard::new(EnvPatch::set("FIXTURE_DOC_VAR", "quiet")).unwrap();
/// assert_eq!(std::env::var("FIXTURE_DOC_VAR").unwrap(), "quiet");
/// guard.restore().unwrap();
/// assert!(std::env::var("FIXTURE_DOC_VAR").is_err());
/// ```
pub struct Guard<S: Scope> {
    scope: S,
    handle: Option<S::Handle>,
    released: bool,
}

impl<S: Scope> Guard<S> {
    /// Acquire `scope` immediately, keeping its handle inside the guard.
    pub fn new(mut scope: S) -> Result<Self> {
        let handle = scope.acquire()?;
        Ok(Self {
            scope,
            handle: Some(handle),
            released: false,
        })
    }

    /// The handle produced by acquire. `None` only after [`Guard::restore`].
    pub fn handle(&self) -> Option<&S::Handle> {
        self.handle.as_ref()
    }

    /// Mutable access to the handle produced by acquire.
    pub fn handle_mut(&mut self) -> Option<&mut S::Handle> {
        self.handle.as_mut()
    }

    /// Release now, propagating restoration failures, and hand back the
    /// handle for post-scope inspection.
    pub fn restore(mut self) -> Result<Option<S::Handle>> {
        let handle = self.handle.take();
        self.released = true;
        self.scope.release()?;
        Ok(handle)
    }
}

impl<S: Scope> Drop for Guard<S> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(error) = self.scope.release() {
                tracing::error!(error = %error, "scope release failed during drop");
            }
        }
    }
}

/// Function adapter: acquire, run `f` with the handle, release
/// unconditionally, then return `f`'s result or resume its panic.
///
/// Release runs exactly once whether `f` returns or panics. A release error
/// after a successful run propagates; a release error while unwinding is
/// logged and the panic wins.
pub fn with<S, R>(mut scope: S, f: impl FnOnce(&mut S::Handle) -> R) -> Result<R>
where
    S: Scope,
{
    let mut handle = scope.acquire()?;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut handle)));
    let released = scope.release();
    match outcome {
        Ok(value) => {
            released?;
            Ok(value)
        }
        Err(payload) => {
            if let Err(error) = released {
                tracing::error!(error = %error, "scope release failed while unwinding");
            }
            panic::resume_unwind(payload)
        }
    }
}

trait ActiveScope {
    fn release_active(&mut self) -> Result<()>;
}

struct Active<S: Scope> {
    scope: S,
    released: bool,
}

impl<S: Scope> Active<S> {
    fn release_once(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.scope.release()
    }
}

impl<S: Scope> ActiveScope for Active<S> {
    fn release_active(&mut self) -> Result<()> {
        self.release_once()
    }
}

impl<S: Scope> Drop for Active<S> {
    fn drop(&mut self) {
        if let Err(error) = self.release_once() {
            tracing::error!(error = %error, "stacked scope release failed during drop");
        }
    }
}

/// Ordered sequence of acquired scopes bound to one fixture instance.
///
/// Scopes are appended by [`ScopeStack::enter`] and released by
/// [`ScopeStack::restore_all`] in append order. Stacks are never shared
/// between test runs: [`run_case`] builds a fresh one per invocation.
#[derive(Default)]
pub struct ScopeStack {
    active: Vec<Box<dyn ActiveScope>>,
}

impl ScopeStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `scope`, append it, and hand back its handle.
    pub fn enter<S>(&mut self, mut scope: S) -> Result<S::Handle>
    where
        S: Scope + 'static,
    {
        let handle = scope.acquire()?;
        self.active.push(Box::new(Active {
            scope,
            released: false,
        }));
        Ok(handle)
    }

    /// Number of scopes still held.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether any scopes are still held.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Release every scope in append order.
    ///
    /// The first restoration failure propagates; scopes behind it are still
    /// released best-effort when their boxes drop.
    pub fn restore_all(&mut self) -> Result<()> {
        for mut active in self.active.drain(..) {
            active.release_active()?;
        }
        Ok(())
    }
}

/// Per-test lifecycle hooks a suite fixture may provide.
///
/// [`run_case`] drives the full cycle: `scopes` acquires the fixture's
/// patches, `setup` runs with the patches in place, the test body runs,
/// `teardown` runs, and only then are the patches released. Both `setup`
/// and `teardown` default to doing nothing.
pub trait Fixture {
    /// Acquire this fixture's patches into `stack`. Runs before `setup`.
    fn scopes(&mut self, stack: &mut ScopeStack) -> Result<()> {
        let _ = stack;
        Ok(())
    }

    /// Per-test setup.
    fn setup(&mut self) {}

    /// Per-test teardown. Runs even when the test body panics.
    fn teardown(&mut self) {}
}

/// Run one test body against a fixture with a fresh scope stack.
///
/// Patches acquired in [`Fixture::scopes`] stay installed for the whole
/// test and are released, in acquisition order, after
/// [`Fixture::teardown`] — so consecutive `run_case` calls on the same
/// fixture observe pristine global state.
pub fn run_case<F: Fixture>(fixture: &mut F, test: impl FnOnce(&mut F)) -> Result<()> {
    let mut stack = ScopeStack::new();
    fixture.scopes(&mut stack)?;
    fixture.setup();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| test(fixture)));
    fixture.teardown();
    let released = stack.restore_all();
    match outcome {
        Ok(()) => released,
        Err(payload) => {
            if let Err(error) = released {
                tracing::error!(error = %error, "scope release failed while unwinding");
            }
            panic::resume_unwind(payload)
        }
    }
}
