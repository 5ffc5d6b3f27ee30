// Clock runner - Background thread driving the tick passes

use super::Performance;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Owns the clock thread. Dropping the runner stops and joins it
pub struct ClockRunner {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClockRunner {
    /// Spawn a thread calling `performance.advance` every `period`
    pub fn spawn(performance: Performance, period: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let period = period.max(Duration::from_micros(100));

        let handle = thread::Builder::new()
            .name("playback-clock".to_string())
            .spawn(move || {
                log::debug!("Clock thread started ({:?} period)", period);
                let mut last = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    thread::sleep(period);
                    let now = Instant::now();
                    performance.advance(now - last);
                    last = now;
                }
                log::debug!("Clock thread stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Clock thread panicked");
            }
        }
    }
}

impl Drop for ClockRunner {
    fn drop(&mut self) {
        self.join();
    }
}
