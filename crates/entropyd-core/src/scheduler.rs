//! Periodic tick loops.
//!
//! Each long-running component gets its own thread and timer; the producer
//! and the processor coordinate only through the TRNG queue. Cadence is
//! best-effort: a tick that overruns its interval delays the next one, and
//! ticks are never bunched to catch up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Spawn a named periodic loop. The loop exits after finishing its current
/// tick once `shutdown` is set.
pub fn spawn_periodic<F>(
    name: &'static str,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            tracing::info!(name, interval_ms = interval.as_millis() as u64, "loop started");
            while !shutdown.load(Ordering::Relaxed) {
                let started = Instant::now();
                tick();
                if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                    interruptible_sleep(remaining, &shutdown);
                }
            }
            tracing::info!(name, "loop stopped");
        })
        .expect("failed to spawn scheduler thread")
}

/// Sleep in short steps so a shutdown request interrupts promptly.
fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(25);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::Relaxed) {
        let slice = remaining.min(step);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[test]
    fn loop_ticks_and_stops_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let handle = spawn_periodic(
            "test-loop",
            Duration::from_millis(5),
            Arc::clone(&shutdown),
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );

        while ticks.load(Ordering::Relaxed) < 3 {
            thread::sleep(Duration::from_millis(2));
        }
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(ticks.load(Ordering::Relaxed) >= 3);
    }

    #[test]
    fn shutdown_before_start_runs_no_tick() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let handle = spawn_periodic(
            "stopped-loop",
            Duration::from_millis(5),
            shutdown,
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );
        handle.join().unwrap();
        assert_eq!(ticks.load(Ordering::Relaxed), 0);
    }
}
