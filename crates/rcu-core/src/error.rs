//! Error types surfaced by the reclaimer.
//!
//! Only recoverable faults are modeled here. Precondition violations — a
//! [`crate::reclaim::ReaderHandle`] presented to a reclaimer that did not
//! produce it, an unmatched `read_unlock`, an iterator advanced past a
//! removed node — are caller bugs, not recoverable runtime conditions, and
//! are caught with `debug_assert!`/`expect()` at the point of misuse rather
//! than surfaced through `Result`.

use std::fmt;

use thiserror::Error;

/// Failure modes the reclaimer can report to a caller.
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The deferred-destructor queue could not reserve storage for a new
    /// entry.
    #[error("failed to reserve storage for a deferred destructor at generation {generation}")]
    AllocationFailure {
        /// The generation the destructor would have been tagged with.
        generation: u64,
    },
}

/// The outcome of a [`crate::reclaim::Reclaimer::defer_destroy`] call that
/// could not enqueue its destructor.
///
/// The destructor is handed back rather than dropped in place: dropping it
/// here would run the object's destructor immediately, which could race a
/// reader still traversing through the object it frees. The caller's own
/// policy decides whether to retry the call or deliberately leak
/// `destructor` (e.g. via [`std::mem::forget`]).
///
/// Does not derive `Debug`/`Error` the usual way because `Box<dyn FnOnce()
/// + Send>` has no `Debug` impl; both are implemented by hand, reporting
/// only the generation.
pub struct DeferDestroyFailure {
    /// The generation the destructor would have been tagged with.
    pub generation: u64,
    /// The destructor that could not be enqueued, returned to the caller.
    pub destructor: Box<dyn FnOnce() + Send>,
}

impl DeferDestroyFailure {
    /// The error this failure corresponds to, without the destructor.
    pub fn error(&self) -> ReclaimError {
        ReclaimError::AllocationFailure {
            generation: self.generation,
        }
    }
}

impl fmt::Debug for DeferDestroyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferDestroyFailure")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DeferDestroyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error(), f)
    }
}

impl std::error::Error for DeferDestroyFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_failure_displays_the_generation() {
        let err = ReclaimError::AllocationFailure { generation: 7 };
        assert_eq!(
            err.to_string(),
            "failed to reserve storage for a deferred destructor at generation 7"
        );
    }

    #[test]
    fn defer_destroy_failure_carries_its_destructor_back() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let ran = std::sync::Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let failure = DeferDestroyFailure {
            generation: 3,
            destructor: Box::new(move || ran2.store(true, Ordering::SeqCst)),
        };
        assert_eq!(failure.to_string(), failure.error().to_string());
        assert_eq!(
            format!("{failure:?}"),
            "DeferDestroyFailure { generation: 3, .. }"
        );
        (failure.destructor)();
        assert!(ran.load(Ordering::SeqCst));
    }
}
