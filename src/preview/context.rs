use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Allocate a process-unique context id.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Which rendering context is active on the calling thread.
///
/// Draw calls must only be issued while the surface's context is current.
/// Passing this in explicitly, instead of consulting ambient global state,
/// lets the frame processor run against a fake in tests.
pub trait ContextBinding: Send + Sync {
    /// Context currently active on the calling thread, if any.
    fn current(&self) -> Option<ContextId>;

    /// Make `context` the active context on the calling thread.
    fn make_current(&self, context: Option<ContextId>);
}

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Per-thread binding, mirroring how GL-style contexts are made current.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadContextBinding;

impl ContextBinding for ThreadContextBinding {
    fn current(&self) -> Option<ContextId> {
        CURRENT_CONTEXT.with(Cell::get)
    }

    fn make_current(&self, context: Option<ContextId>) {
        CURRENT_CONTEXT.with(|current| current.set(context));
    }
}

/// Make `context` current unless it already is. Returns whether a switch
/// happened.
pub fn ensure_current(binding: &dyn ContextBinding, context: ContextId) -> bool {
    if binding.current() == Some(context) {
        return false;
    }
    binding.make_current(Some(context));
    true
}

/// Clear the calling thread's binding if it still points at `context`.
pub fn release_if_current(binding: &dyn ContextBinding, context: ContextId) {
    if binding.current() == Some(context) {
        binding.make_current(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_unique() {
        assert_ne!(ContextId::next(), ContextId::next());
    }

    #[test]
    fn thread_binding_starts_empty_on_new_thread() {
        let current = std::thread::spawn(|| ThreadContextBinding.current())
            .join()
            .unwrap();
        assert!(current.is_none());
    }

    #[test]
    fn ensure_current_switches_only_when_needed() {
        std::thread::spawn(|| {
            let binding = ThreadContextBinding;
            let ctx = ContextId::next();
            assert!(ensure_current(&binding, ctx));
            assert!(!ensure_current(&binding, ctx));
            assert_eq!(binding.current(), Some(ctx));

            let other = ContextId::next();
            assert!(ensure_current(&binding, other));
            assert_eq!(binding.current(), Some(other));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn binding_is_thread_scoped() {
        let ctx = ContextId::next();
        std::thread::spawn(move || ThreadContextBinding.make_current(Some(ctx)))
            .join()
            .unwrap();
        let seen = std::thread::spawn(|| ThreadContextBinding.current())
            .join()
            .unwrap();
        assert!(seen.is_none());
    }

    #[test]
    fn release_only_clears_matching_context() {
        std::thread::spawn(|| {
            let binding = ThreadContextBinding;
            let ours = ContextId::next();
            let theirs = ContextId::next();

            binding.make_current(Some(theirs));
            release_if_current(&binding, ours);
            assert_eq!(binding.current(), Some(theirs));

            binding.make_current(Some(ours));
            release_if_current(&binding, ours);
            assert!(binding.current().is_none());
        })
        .join()
        .unwrap();
    }
}
