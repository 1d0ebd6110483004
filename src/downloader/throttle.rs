use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Sliding-window counters shared by the download workers (writers) and the
/// AutoScaler (reader).
///
/// Two event logs over the last window: bytes moved, and hard throttle
/// events (HTTP 429/503). Everything is O(window length) under one mutex;
/// no operation suspends.
#[derive(Debug)]
pub struct ThrottleState {
    window: Duration,
    inner: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    byte_events: VecDeque<(Instant, u64)>,
    hard_errors: VecDeque<Instant>,
}

impl ThrottleState {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Window::default()),
        }
    }

    /// Records bytes downloaded by any worker.
    pub fn signal_bytes(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let now = Instant::now();
        let mut window = self.inner.lock().expect("throttle lock poisoned");
        window.byte_events.push_back((now, bytes));
        self.prune(&mut window, now);
    }

    /// Records one hard throttle event (429/503).
    pub fn signal_error(&self) {
        let now = Instant::now();
        let mut window = self.inner.lock().expect("throttle lock poisoned");
        window.hard_errors.push_back(now);
        self.prune(&mut window, now);
    }

    /// Bytes/sec averaged over the window.
    pub fn download_rate(&self) -> f64 {
        let now = Instant::now();
        let mut window = self.inner.lock().expect("throttle lock poisoned");
        self.prune(&mut window, now);

        let Some(&(first, _)) = window.byte_events.front() else {
            return 0.0;
        };
        let total: u64 = window.byte_events.iter().map(|(_, bytes)| bytes).sum();
        let duration = now.duration_since(first).as_secs_f64().max(0.001);
        total as f64 / duration
    }

    /// Hard throttle events within the window.
    pub fn error_rate(&self) -> usize {
        let now = Instant::now();
        let mut window = self.inner.lock().expect("throttle lock poisoned");
        self.prune(&mut window, now);
        window.hard_errors.len()
    }

    fn prune(&self, window: &mut Window, now: Instant) {
        let cutoff = now.checked_sub(self.window);
        let Some(cutoff) = cutoff else { return };

        while window
            .byte_events
            .front()
            .is_some_and(|&(ts, _)| ts < cutoff)
        {
            window.byte_events.pop_front();
        }
        while window.hard_errors.front().is_some_and(|&ts| ts < cutoff) {
            window.hard_errors.pop_front();
        }
    }
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}
