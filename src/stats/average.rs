//! Rolling averages used for throughput and latency estimates.

use std::time::Duration;

/// A fixed-size window over the most recent `N` samples.
///
/// Once full, every new sample replaces the oldest one, so the average follows
/// recent behavior instead of the whole history.
#[derive(Debug, Clone)]
pub struct AverageWindow<const N: usize> {
    values: [u64; N],
    next: usize,
    count: usize,
    total: u64,
}

impl<const N: usize> Default for AverageWindow<N> {
    fn default() -> Self {
        Self {
            values: [0; N],
            next: 0,
            count: 0,
            total: 0,
        }
    }
}

impl<const N: usize> AverageWindow<N> {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample, evicting the oldest one when the window is full.
    pub fn push_entry(&mut self, value: u64) {
        if N == 0 {
            return;
        }
        if self.count == N {
            self.total -= self.values[self.next];
        } else {
            self.count += 1;
        }
        self.values[self.next] = value;
        self.total += value;
        self.next = (self.next + 1) % N;
    }

    /// Returns the average of the samples in the window, or 0 when empty.
    pub fn calculate_average(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total / self.count as u64
        }
    }

    /// Returns the sum of the samples in the window.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the number of samples in the window.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// An [`AverageWindow`] of durations that also remembers the extremes.
#[derive(Debug, Clone)]
pub struct TimedAverageWindow<const N: usize> {
    window: AverageWindow<N>,
    minimum: Option<Duration>,
    maximum: Duration,
}

impl<const N: usize> Default for TimedAverageWindow<N> {
    fn default() -> Self {
        Self {
            window: AverageWindow::default(),
            minimum: None,
            maximum: Duration::ZERO,
        }
    }
}

impl<const N: usize> TimedAverageWindow<N> {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a duration.
    pub fn push(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.window.push_entry(micros);
        self.minimum = Some(self.minimum.map_or(duration, |m| m.min(duration)));
        self.maximum = self.maximum.max(duration);
    }

    /// Returns the average duration in the window.
    pub fn average(&self) -> Duration {
        Duration::from_micros(self.window.calculate_average())
    }

    /// Returns the summed duration of the samples in the window.
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.window.total())
    }

    /// Returns the shortest duration ever recorded.
    pub fn minimum(&self) -> Duration {
        self.minimum.unwrap_or(Duration::ZERO)
    }

    /// Returns the longest duration ever recorded.
    pub fn maximum(&self) -> Duration {
        self.maximum
    }

    /// Returns true if no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Running average, minimum, maximum and most recent value of a sample stream.
#[derive(Debug, Clone, Default)]
pub struct RunningStatistic {
    count: u64,
    sum: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
    most_recent: f64,
}

impl RunningStatistic {
    /// Records a sample.
    pub fn push_sample(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.minimum = Some(self.minimum.map_or(value, |m| m.min(value)));
        self.maximum = Some(self.maximum.map_or(value, |m| m.max(value)));
        self.most_recent = value;
    }

    /// Returns the average of all samples, or 0 when empty.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Returns the lowest sample.
    pub fn minimum(&self) -> f64 {
        self.minimum.unwrap_or(0.0)
    }

    /// Returns the highest sample.
    pub fn maximum(&self) -> f64 {
        self.maximum.unwrap_or(0.0)
    }

    /// Returns the most recent sample.
    pub fn most_recent(&self) -> f64 {
        self.most_recent
    }

    /// Returns the number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }
}
