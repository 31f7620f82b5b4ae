//! Scoped "run as this token" execution regions.
//!
//! The ambient impersonation token is modeled as state attached to the
//! *logical* execution, not to the OS thread: [`run`] installs it for the
//! duration of a closure, and [`AmbientSnapshot`] carries it across a
//! suspension so a resuming worker can re-apply it before any user code
//! runs. Restoration is unconditional cleanup performed by drop guards, so
//! error returns, panics, and cancellation all restore the caller's
//! ambient token.
//!
//! A failed OS revert/impersonate call on a restore or re-apply path
//! aborts the process: continuing with an unrestored or mismatched ambient
//! token would silently run code under the wrong security context. Setup
//! failures before the body runs are ordinary errors.

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::Error;
use crate::token::handle::TokenHandle;
use crate::token::provider::TokenProvider;

/// The ambient value: the token the current logical execution impersonates.
///
/// Holds its own duplicate of the region's target token so the raw value
/// stays live for exactly as long as some logical execution references it.
#[derive(Clone)]
struct AmbientToken {
    provider: Arc<dyn TokenProvider>,
    token: Arc<TokenHandle>,
}

thread_local! {
    static AMBIENT: RefCell<Option<AmbientToken>> = const { RefCell::new(None) };
}

fn current_ambient() -> Option<AmbientToken> {
    AMBIENT.with_borrow(Clone::clone)
}

fn set_ambient(value: Option<AmbientToken>) {
    AMBIENT.with_borrow_mut(|ambient| *ambient = value);
}

/// True when the current logical execution is inside an impersonation
/// region with a live target token.
#[must_use]
pub fn is_impersonating() -> bool {
    AMBIENT.with_borrow(Option::is_some)
}

/// Re-applies `value` to the calling OS thread, aborting on failure.
fn apply_or_abort(provider: &Arc<dyn TokenProvider>, value: Option<&AmbientToken>) {
    if let Err(err) = provider.revert_to_self() {
        abort_restore_failure(&err);
    }
    if let Some(ambient) = value {
        let applied = ambient
            .token
            .with_raw(|raw| ambient.provider.impersonate(raw));
        if let Err(err) = applied {
            abort_restore_failure(&err);
        }
    }
}

fn abort_restore_failure(err: &Error) -> ! {
    // Unrestored ambient impersonation is a privilege-confusion hazard;
    // the process must not keep running in an unknown security context.
    eprintln!("fatal: failed to restore ambient impersonation token: {err}");
    std::process::abort()
}

/// Restores a captured ambient value when the region unwinds.
struct RestoreGuard {
    provider: Arc<dyn TokenProvider>,
    saved: Option<AmbientToken>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        let saved = self.saved.take();
        apply_or_abort(&self.provider, saved.as_ref());
        set_ambient(saved);
    }
}

/// Runs `body` under `target`'s security context, restoring the caller's
/// ambient impersonation on every exit path.
///
/// Steps: capture the caller's ambient token; revert to the unimpersonated
/// process identity; if `target` is a live token, duplicate it for the
/// region's lifetime and impersonate it; run `body`; restore the captured
/// ambient. `target = None` (or the invalid sentinel) yields a region that
/// runs explicitly unimpersonated.
///
/// `body`'s return value is propagated unchanged; a panic in `body` still
/// restores before unwinding further.
///
/// # Errors
/// Provider failures while setting the region up (revert, duplicate,
/// impersonate). Failures while *restoring* are not errors: they abort the
/// process.
pub fn run<R>(
    provider: &Arc<dyn TokenProvider>,
    target: Option<&TokenHandle>,
    body: impl FnOnce() -> R,
) -> Result<R, Error> {
    let _restore = RestoreGuard {
        provider: Arc::clone(provider),
        saved: current_ambient(),
    };

    provider.revert_to_self()?;
    set_ambient(None);

    if let Some(handle) = target.filter(|handle| !handle.is_invalid()) {
        let region_token = Arc::new(handle.duplicate()?);
        region_token.with_raw(|raw| provider.impersonate(raw))?;
        set_ambient(Some(AmbientToken {
            provider: Arc::clone(provider),
            token: region_token,
        }));
    }

    Ok(body())
}

/// A captured ambient-impersonation value that can be carried to another
/// worker.
///
/// Capture it where a logical execution suspends; call
/// [`resume`](Self::resume) on the worker that continues it, *before* any
/// user code runs there.
#[derive(Clone)]
pub struct AmbientSnapshot {
    value: Option<AmbientToken>,
}

impl AmbientSnapshot {
    /// Captures the calling logical execution's ambient token.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            value: current_ambient(),
        }
    }

    /// Re-applies the captured ambient on the calling worker and returns a
    /// guard that restores the worker's previous ambient on drop.
    ///
    /// An OS failure while re-applying aborts the process (see module
    /// docs); a snapshot with no ambient token and a worker with no
    /// ambient token is a no-op.
    #[must_use]
    pub fn resume(&self) -> AmbientGuard {
        let previous = current_ambient();
        let provider = self
            .value
            .as_ref()
            .or(previous.as_ref())
            .map(|ambient| Arc::clone(&ambient.provider));
        if let Some(provider) = provider {
            apply_or_abort(&provider, self.value.as_ref());
        }
        set_ambient(self.value.clone());
        AmbientGuard { previous }
    }
}

/// Restores a worker's previous ambient token when dropped.
pub struct AmbientGuard {
    previous: Option<AmbientToken>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let provider = previous
            .as_ref()
            .map(|ambient| Arc::clone(&ambient.provider))
            .or_else(|| current_ambient().map(|ambient| ambient.provider));
        if let Some(provider) = provider {
            apply_or_abort(&provider, previous.as_ref());
        }
        set_ambient(previous);
    }
}
