//! Shared search signals and the time watchdog.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

/// Cross-thread search control: the stop flag and the current time limits.
/// The protocol front end flips these from its own thread (stop, ponderhit);
/// search threads only read.
pub struct SearchSignals {
    stop: AtomicBool,
    min_time_ms: AtomicI64,
    max_time_ms: AtomicI64,
    early_stop_pct: AtomicI32,
}

impl Default for SearchSignals {
    fn default() -> Self {
        SearchSignals::new()
    }
}

impl SearchSignals {
    pub fn new() -> SearchSignals {
        SearchSignals {
            stop: AtomicBool::new(false),
            min_time_ms: AtomicI64::new(-1),
            max_time_ms: AtomicI64::new(-1),
            early_stop_pct: AtomicI32::new(-1),
        }
    }

    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.set_time_limits(-1, -1, -1);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Update limits mid-search; used by `ponderhit`.
    pub fn set_time_limits(&self, min_ms: i64, max_ms: i64, early_stop_pct: i32) {
        self.min_time_ms.store(min_ms, Ordering::SeqCst);
        self.max_time_ms.store(max_ms, Ordering::SeqCst);
        self.early_stop_pct.store(early_stop_pct, Ordering::SeqCst);
    }

    pub fn min_time_ms(&self) -> i64 {
        self.min_time_ms.load(Ordering::Relaxed)
    }

    pub fn max_time_ms(&self) -> i64 {
        self.max_time_ms.load(Ordering::Relaxed)
    }

    pub fn early_stop_pct(&self) -> i32 {
        self.early_stop_pct.load(Ordering::Relaxed)
    }
}

/// Background thread that raises the stop flag when the hard time limit is
/// reached, independently of how rarely the search polls the clock.
pub struct Watchdog {
    done: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(signals: Arc<SearchSignals>, start_time: Instant) -> Watchdog {
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let handle = thread::Builder::new()
            .name("time-watchdog".into())
            .spawn(move || {
                while !done2.load(Ordering::Relaxed) {
                    let max = signals.max_time_ms();
                    if max >= 0 {
                        let elapsed = start_time.elapsed().as_millis() as i64;
                        if elapsed >= max {
                            debug!("watchdog: hard time limit {max} ms reached");
                            signals.request_stop();
                            return;
                        }
                    }
                    thread::sleep(Duration::from_millis(3));
                }
            })
            .expect("spawn watchdog thread");
        Watchdog { done, handle: Some(handle) }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_fires_at_hard_limit() {
        let signals = Arc::new(SearchSignals::new());
        signals.set_time_limits(5, 20, -1);
        let _dog = Watchdog::start(signals.clone(), Instant::now());
        assert!(!signals.should_stop());
        thread::sleep(Duration::from_millis(80));
        assert!(signals.should_stop());
    }

    #[test]
    fn watchdog_idle_without_limit() {
        let signals = Arc::new(SearchSignals::new());
        let _dog = Watchdog::start(signals.clone(), Instant::now());
        thread::sleep(Duration::from_millis(30));
        assert!(!signals.should_stop());
    }

    #[test]
    fn ponderhit_restores_limits() {
        let signals = SearchSignals::new();
        assert_eq!(signals.max_time_ms(), -1);
        signals.set_time_limits(100, 300, 75);
        assert_eq!(signals.min_time_ms(), 100);
        assert_eq!(signals.max_time_ms(), 300);
        assert_eq!(signals.early_stop_pct(), 75);
    }
}
