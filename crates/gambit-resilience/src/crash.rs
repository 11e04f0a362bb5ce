//! Crash containment.
//!
//! A bug triggered by one player's message must not end every other game
//! on the server. [`contain`] runs a unit of work and turns a panic into an
//! error the caller can answer with `INTERNAL_ERROR`; the process-wide hook
//! from [`install_crash_recovery`] sends panic reports through `tracing`
//! so they land in the same log stream as everything else.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::ResilienceError;

static INSTALL: Once = Once::new();

/// Routes panic reports from every thread and task into `tracing`.
///
/// Tokio already isolates a panicking task from the runtime; this makes
/// sure the report reaches the log stream. The hook that was installed
/// before still runs afterwards, so the usual stderr report (and a test
/// harness's failure output) survives even with no subscriber. Safe to
/// call more than once.
pub fn install_crash_recovery() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            tracing::error!(
                thread = thread.name().unwrap_or("<unnamed>"),
                panic = %info,
                "panic"
            );
            previous(info);
        }));
        tracing::debug!("crash recovery hook installed");
    });
}

/// Runs `work`, converting a panic into [`ResilienceError::Panicked`].
///
/// `label` names the work in logs (a message kind, a sweep name).
pub fn contain<T>(label: &str, work: impl FnOnce() -> T) -> Result<T, ResilienceError> {
    panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(%label, %message, "contained panic");
        ResilienceError::Panicked {
            label: label.to_string(),
            message,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_passes_value_through() {
        assert_eq!(contain("ok", || 41 + 1).unwrap(), 42);
    }

    #[test]
    fn test_contain_catches_panic() {
        install_crash_recovery();
        let err = contain("make_move", || -> u32 { panic!("board exploded") }).unwrap_err();
        match err {
            ResilienceError::Panicked { label, message } => {
                assert_eq!(label, "make_move");
                assert_eq!(message, "board exploded");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_contain_formatted_panic_message() {
        let err = contain("sweep", || -> u32 { panic!("bad game {}", 7) }).unwrap_err();
        assert!(err.to_string().contains("bad game 7"));
    }

    #[test]
    fn test_install_crash_recovery_is_idempotent() {
        install_crash_recovery();
        install_crash_recovery();
        assert!(contain("after", || true).unwrap());
    }
}
