use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Binary pause latch, open by default.
///
/// Workers poll the gate between chunks rather than blocking on it, so an
/// unpause takes effect within one poll interval.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    paused: Arc<AtomicBool>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// One-shot cancellation flag. Once set it never resets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_defaults_open_and_toggles() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());

        gate.pause();
        assert!(gate.is_paused());
        assert!(gate.clone().is_paused());

        gate.resume();
        assert!(!gate.is_paused());
    }

    #[test]
    fn cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());
    }
}
