//! Per-tick latency measurement for map update loops.

use std::fmt;
use std::time::{Duration, Instant};

/// Latency statistics over a run of ticks.
#[derive(Debug, Clone)]
pub struct TickStats {
    pub ticks: usize,
    pub total: Duration,
    pub fastest: Duration,
    pub slowest: Duration,
    sorted: Vec<Duration>,
}

impl TickStats {
    pub fn from_times(mut times: Vec<Duration>) -> Self {
        times.sort();
        Self {
            ticks: times.len(),
            total: times.iter().sum(),
            fastest: times.first().copied().unwrap_or(Duration::ZERO),
            slowest: times.last().copied().unwrap_or(Duration::ZERO),
            sorted: times,
        }
    }

    pub fn average(&self) -> Duration {
        match self.ticks {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    /// Tick time at percentile `p` (0-100).
    pub fn percentile(&self, p: usize) -> Duration {
        if self.sorted.is_empty() {
            return Duration::ZERO;
        }
        let index = (self.sorted.len() * p.min(100) / 100).min(self.sorted.len() - 1);
        self.sorted[index]
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99)
    }

    /// Share of ticks that overran the given budget.
    pub fn overrun_ratio(&self, budget: Duration) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        let over = self.sorted.iter().filter(|time| **time > budget).count();
        over as f64 / self.ticks as f64
    }
}

impl fmt::Display for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ticks, avg: {:.2}ms, p99: {:.2}ms, min: {:.2}ms, max: {:.2}ms",
            self.ticks,
            self.average().as_secs_f64() * 1000.0,
            self.p99().as_secs_f64() * 1000.0,
            self.fastest.as_secs_f64() * 1000.0,
            self.slowest.as_secs_f64() * 1000.0,
        )
    }
}

/// Run `tick` `count` times and time each call.
pub fn measure_ticks<F>(count: usize, mut tick: F) -> TickStats
where
    F: FnMut(usize),
{
    let mut times = Vec::with_capacity(count);
    for n in 0..count {
        let start = Instant::now();
        tick(n);
        times.push(start.elapsed());
    }
    TickStats::from_times(times)
}
