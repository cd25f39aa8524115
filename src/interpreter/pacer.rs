use std::thread;
use std::time::{Duration, Instant};

/// Throttles execution to a target frequency.
///
/// After each instruction the interpreter feeds the instruction's cycle cost
/// in; the pacer compares the wall clock against the nominal time
/// `cycles / target_hz`. Running ahead of nominal sleeps the difference;
/// falling behind by more than the lag threshold reports the lag without
/// pausing execution.
#[derive(Debug, Clone)]
pub struct Pacer {
    target_hz: u64,
    lag_threshold: u64,
    origin: Option<Instant>,
    cycles: u64,
}

impl Pacer {
    /// A pacer for `target_hz` cycles per second. `0` disables pacing.
    ///
    /// The lag threshold is a tenth of a second's worth of cycles.
    pub fn new(target_hz: u64) -> Self {
        Self {
            target_hz,
            lag_threshold: (target_hz / 10).max(1),
            origin: None,
            cycles: 0,
        }
    }

    /// Configured frequency, in Hz.
    pub const fn target_hz(&self) -> u64 {
        self.target_hz
    }

    /// Account for `cost` cycles and throttle. Returns the lag in cycles
    /// when the loop is behind schedule by more than the threshold.
    pub fn pace(&mut self, cost: u64) -> Option<u64> {
        if self.target_hz == 0 {
            return None;
        }

        let origin = *self.origin.get_or_insert_with(Instant::now);
        self.cycles = self.cycles.saturating_add(cost);

        let nominal = Duration::from_secs_f64(self.cycles as f64 / self.target_hz as f64);
        let elapsed = origin.elapsed();

        if elapsed < nominal {
            thread::sleep(nominal - elapsed);
            return None;
        }

        let behind = (elapsed - nominal).as_secs_f64();
        let lag_cycles = (behind * self.target_hz as f64) as u64;

        (lag_cycles >= self.lag_threshold).then_some(lag_cycles)
    }

    /// Forget the pacing origin; the next paced instruction restarts the
    /// schedule.
    pub fn restart(&mut self) {
        self.origin = None;
        self.cycles = 0;
    }
}
