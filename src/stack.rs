//! Stack growth for recursion over nested forms.
//!
//! The reader, quasiquote expansion and non-tail evaluation recurse once per level of
//! nesting. Each recursive step runs under [`ensure_sufficient_stack`], which moves onto
//! a freshly allocated stack segment when the current one is nearly exhausted.

/// Remaining stack below which a new segment is allocated
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated segment
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
