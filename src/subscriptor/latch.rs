use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot executor: the first [`Latch::run`] executes its action, every
/// later call is a no-op.
#[derive(Debug, Default)]
pub struct Latch {
    fired: AtomicBool,
}

impl Latch {
    /// Creates an unfired latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` if this is the first call. Returns whether it ran.
    pub fn run(&self, action: impl FnOnce()) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if first {
            action();
        }

        first
    }

    /// Whether the latch has already fired.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
