use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TICK_50MS: Duration = Duration::from_millis(50);

/// The world loop. Wall time is accumulated and drained in fixed steps, each step handed to
/// `on_tick` as the tick delta. The loop yields between iterations and exits once the stop
/// handle is raised.
pub struct SimLoop {}

impl SimLoop {
    /// Run fixed steps of `step` until `stop_handle` is set. `on_tick` receives the step and
    /// the caller's data. Returns the data and the number of ticks that ran.
    pub fn start<Data, F>(step: Duration, data: Data, mut on_tick: F, stop_handle: Arc<AtomicBool>) -> (Data, u64)
    where
        F: FnMut(Duration, &mut Data),
    {
        let mut data = data;
        let mut ticks = 0u64;
        let mut last = Instant::now();
        let mut accumulator = Duration::ZERO;
        loop {
            let now = Instant::now();
            accumulator += now - last;
            last = now;
            while accumulator >= step {
                on_tick(step, &mut data);
                ticks += 1;
                accumulator -= step;
            }
            if stop_handle.load(Ordering::Relaxed) {
                info!("Ending world loop due to stop handle after {ticks} ticks");
                return (data, ticks);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn runs_fixed_steps_until_stopped() {
        // Given
        let stop = Arc::new(AtomicBool::new(false));
        let stopper = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            stopper.store(true, Ordering::Relaxed);
        });

        // When
        let (steps, ticks) = SimLoop::start(
            Duration::from_millis(5),
            Vec::new(),
            |step, seen: &mut Vec<Duration>| seen.push(step),
            stop,
        );
        handle.join().unwrap();

        // Then
        assert!(ticks > 0);
        assert_eq!(steps.len() as u64, ticks);
        assert!(steps.iter().all(|s| *s == Duration::from_millis(5)));
    }
}
