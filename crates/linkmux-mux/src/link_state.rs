use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the physical link is sleeping.
pub trait LinkStateSource: Send + Sync {
    fn is_sleeping(&self) -> bool;
}

/// Link state backed by an atomic flag, toggled by whoever owns the link.
#[derive(Debug, Default)]
pub struct LinkState {
    sleeping: AtomicBool,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleep(&self) {
        self.sleeping.store(true, Ordering::SeqCst);
    }

    pub fn wake(&self) {
        self.sleeping.store(false, Ordering::SeqCst);
    }
}

impl LinkStateSource for LinkState {
    fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }
}
