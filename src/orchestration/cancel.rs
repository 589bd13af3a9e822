use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cooperative cancel flag shared between a worker and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn as_atomic(&self) -> &AtomicBool {
        &self.0
    }
}

/// Sleeps `total` in `poll` slices; returns `false` when `stop` was raised.
pub fn sleep_with_stop(stop: &AtomicBool, total: Duration, poll: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(poll);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_flag_cuts_sleep_short() {
        let flag = CancelFlag::new();
        flag.cancel();
        assert!(!sleep_with_stop(
            flag.as_atomic(),
            Duration::from_secs(10),
            Duration::from_millis(50)
        ));
        flag.reset();
        assert!(sleep_with_stop(
            flag.as_atomic(),
            Duration::from_millis(1),
            Duration::from_millis(50)
        ));
    }
}
