use std::sync::atomic::{AtomicBool, Ordering};

/// Consumer-side cancellation shared between the controller and the readers
/// of one decode session.
///
/// Setting `interrupt` makes the next blocking read of every non-exempt
/// stream abort with EOF and raise `need_reinit`; the controller observes
/// the latter and rebuilds the session.
#[derive(Debug, Default)]
pub struct InterruptFlags {
    interrupt: AtomicBool,
    need_reinit: AtomicBool,
}

impl InterruptFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn mark_need_reinit(&self) {
        self.need_reinit.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn needs_reinit(&self) -> bool {
        self.need_reinit.load(Ordering::Acquire)
    }

    /// Reset both flags when a session is (re)installed.
    pub fn clear(&self) {
        self.interrupt.store(false, Ordering::Release);
        self.need_reinit.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_resets_both() {
        let flags = InterruptFlags::new();
        flags.interrupt();
        flags.mark_need_reinit();
        assert!(flags.is_interrupted());
        assert!(flags.needs_reinit());

        flags.clear();
        assert!(!flags.is_interrupted());
        assert!(!flags.needs_reinit());
    }
}
