//! Crash isolation for asynchronous work.
//!
//! [`shield`] polls a future inside `catch_unwind` and turns a panic into a
//! [`FaultRecord`] holding the panic message, its source location and a stack
//! trace captured *at the panic site*. The trace comes from a process-wide
//! panic hook that only intercepts panics raised while a shielded future is
//! being polled on the current thread; every other panic still reaches the
//! previously installed hook.
//!
//! [`shield_with_cleanup`] additionally guarantees that a cleanup closure runs
//! exactly once, whether the future returns, panics, or is dropped before
//! completion.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::metrics;
use futures::FutureExt;
use once_cell::sync::Lazy;
use pin_project::pin_project;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::error;

/// Diagnostic record produced for an intercepted panic.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    /// Name of the shielded unit of work.
    pub label: String,
    /// The panic payload rendered as text.
    pub message: String,
    /// `file:line:column` of the panic, when known.
    pub location: Option<String>,
    /// Stack trace captured when the panic was raised.
    pub backtrace: String,
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} panicked at {}: {}", self.label, loc, self.message),
            None => write!(f, "{} panicked: {}", self.label, self.message),
        }
    }
}

struct Captured {
    location: Option<String>,
    backtrace: String,
}

thread_local! {
    static SHIELD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

/// Chains onto whatever hook was installed when first forced.
static HOOK: Lazy<()> = Lazy::new(|| {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if SHIELD_DEPTH.with(Cell::get) == 0 {
            previous(info);
            return;
        }
        let captured = Captured {
            location: info.location().map(|l| l.to_string()),
            backtrace: Backtrace::force_capture().to_string(),
        };
        CAPTURED.with(|c| *c.borrow_mut() = Some(captured));
    }));
});

fn install_hook() {
    Lazy::force(&HOOK);
}

/// Marks the current thread as polling a shielded future for the lifetime of the guard.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        SHIELD_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        SHIELD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Future adapter that flags every poll of `inner` as shielded.
#[pin_project]
struct Shielded<F> {
    #[pin]
    inner: F,
}

impl<F: Future> Future for Shielded<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _depth = DepthGuard::enter();
        self.project().inner.poll(cx)
    }
}

/// Runs the cleanup exactly once, on drop.
struct Cleanup<C: FnOnce()>(Option<C>);

impl<C: FnOnce()> Drop for Cleanup<C> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.0.take() {
            cleanup();
        }
    }
}

/// Renders a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Polls `fut` to completion, converting a panic into a logged [`FaultRecord`].
///
/// The failed work is never retried.
pub async fn shield<F>(label: &str, fut: F) -> Result<F::Output, FaultRecord>
where
    F: Future,
{
    install_hook();

    match AssertUnwindSafe(Shielded { inner: fut }).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let captured = CAPTURED.with(|c| c.borrow_mut().take());
            let (location, backtrace) = match captured {
                Some(c) => (c.location, c.backtrace),
                None => (None, Backtrace::force_capture().to_string()),
            };
            let record = FaultRecord {
                label: label.to_string(),
                message: panic_message(payload.as_ref()),
                location,
                backtrace,
            };

            metrics::record_fault();
            error!(
                label = %record.label,
                message = %record.message,
                location = record.location.as_deref().unwrap_or("unknown"),
                backtrace = %record.backtrace,
                "Intercepted worker fault"
            );
            Err(record)
        }
    }
}

/// Like [`shield`], and runs `cleanup` exactly once on every exit path.
///
/// The cleanup also runs if the returned future is dropped before it
/// completes, e.g. when its task is aborted.
pub async fn shield_with_cleanup<F, C>(
    label: &str,
    fut: F,
    cleanup: C,
) -> Result<F::Output, FaultRecord>
where
    F: Future,
    C: FnOnce(),
{
    let _cleanup = Cleanup(Some(cleanup));
    shield(label, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_normal_return_passes_through() {
        let result = shield("ok", async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_panic_becomes_fault_record() {
        let result = shield("boom", async {
            tokio::task::yield_now().await;
            panic!("lookup exploded");
        })
        .await;

        let record: FaultRecord = result.map(|_: ()| ()).unwrap_err();
        assert_eq!(record.label, "boom");
        assert_eq!(record.message, "lookup exploded");
        assert!(record.location.as_deref().unwrap().contains("shield"));
        assert!(!record.backtrace.is_empty());
    }

    #[tokio::test]
    async fn test_formatted_panic_payload() {
        let code = 42;
        let record = shield("fmt", async move {
            panic!("code {}", code);
        })
        .await
        .map(|_: ()| ())
        .unwrap_err();
        assert_eq!(record.message, "code 42");
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_on_every_path() {
        let runs = Arc::new(AtomicUsize::new(0));

        let r = runs.clone();
        let _ = shield_with_cleanup("ok", async { 1 }, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        let r = runs.clone();
        let _ = shield_with_cleanup(
            "panic",
            async {
                panic!("x");
            },
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .map(|_: ()| ());

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_aborted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let handle = tokio::spawn(async move {
            shield_with_cleanup("stuck", std::future::pending::<()>(), move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .await
        });

        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
