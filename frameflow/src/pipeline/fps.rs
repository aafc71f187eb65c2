//! Sliding-window frame rate

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Upper bound on remembered ticks, whatever the window.
const MAX_SAMPLES: usize = 1024;

#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    ticks: VecDeque<Instant>,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: if window.is_zero() { Duration::from_secs(1) } else { window },
            ticks: VecDeque::new(),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.ticks.push_back(now);
        if self.ticks.len() > MAX_SAMPLES {
            self.ticks.pop_front();
        }
        self.evict(now);
    }

    /// Ticks per second over the window ending at the latest tick.
    pub fn current(&self) -> f64 {
        self.ticks.len() as f64 / self.window.as_secs_f64()
    }

    /// Like [`current`](Self::current), but first forgets ticks older than
    /// the window ending at `now`.
    pub fn current_at(&mut self, now: Instant) -> f64 {
        self.evict(now);
        self.current()
    }

    pub fn reset(&mut self) {
        self.ticks.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.ticks.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.ticks.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
