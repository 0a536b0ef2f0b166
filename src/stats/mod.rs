//! Self-describing statistics reported by pipeline stages.
//!
//! Every stage appends [`Statistic`] records describing its current load when
//! asked through [`StreamStackEntry::collect_statistics`], and dumps its
//! tunables when it receives a `Report` request. The record is a uniform
//! `(owner, name, value, description)` tuple so dashboards and tools can render
//! any stage without knowing its type.
//!
//! # Example
//!
//! ```rust
//! use stackio::stats::{Statistic, StatisticValue};
//!
//! let stat = Statistic::integer("Storage drive (/)", "Available slots", 3, "Free read slots.");
//! assert_eq!(stat.value, StatisticValue::Integer(3));
//! assert_eq!(stat.to_string(), "Storage drive (/) / Available slots: 3");
//! ```
//!
//! [`StreamStackEntry::collect_statistics`]: crate::stack::StreamStackEntry::collect_statistics

mod average;

pub use average::{AverageWindow, RunningStatistic, TimedAverageWindow};

use std::fmt;
use std::time::Duration;

/// The value carried by a [`Statistic`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatisticValue {
    /// A plain counter.
    Integer(i64),
    /// A plain floating point value.
    Float(f64),
    /// An amount of bytes.
    ByteSize(u64),
    /// A throughput in bytes per second.
    BytesPerSecond(f64),
    /// An average duration with the observed extremes.
    TimeRange {
        /// Average duration.
        average: Duration,
        /// Shortest observed duration.
        minimum: Duration,
        /// Longest observed duration.
        maximum: Duration,
    },
    /// A single percentage in `[0, 100]`.
    Percentage(f64),
    /// An average percentage with the observed extremes.
    PercentageRange {
        /// Average percentage.
        average: f64,
        /// Lowest observed percentage.
        minimum: f64,
        /// Highest observed percentage.
        maximum: f64,
    },
    /// A yes/no setting.
    Boolean(bool),
    /// Text owned by the statistic.
    PersistentString(String),
    /// The name of another node or object.
    ReferenceString(String),
}

impl fmt::Display for StatisticValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{:.3}", v),
            Self::ByteSize(v) => write!(f, "{} bytes", v),
            Self::BytesPerSecond(v) => write!(f, "{:.2} MiB/s", v / (1024.0 * 1024.0)),
            Self::TimeRange {
                average,
                minimum,
                maximum,
            } => write!(
                f,
                "{}us (min {}us, max {}us)",
                average.as_micros(),
                minimum.as_micros(),
                maximum.as_micros()
            ),
            Self::Percentage(v) => write!(f, "{:.1}%", v),
            Self::PercentageRange {
                average,
                minimum,
                maximum,
            } => write!(f, "{:.1}% (min {:.1}%, max {:.1}%)", average, minimum, maximum),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::PersistentString(v) | Self::ReferenceString(v) => f.write_str(v),
        }
    }
}

/// A single telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistic {
    /// Name of the node that produced the record.
    pub owner: String,
    /// Name of the metric.
    pub name: &'static str,
    /// The measured or configured value.
    pub value: StatisticValue,
    /// Human readable explanation of the metric.
    pub description: &'static str,
}

impl Statistic {
    /// Creates a record from its parts.
    pub fn new(
        owner: impl Into<String>,
        name: &'static str,
        value: StatisticValue,
        description: &'static str,
    ) -> Self {
        Self {
            owner: owner.into(),
            name,
            value,
            description,
        }
    }

    /// Creates an integer record.
    pub fn integer(
        owner: impl Into<String>,
        name: &'static str,
        value: i64,
        description: &'static str,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Integer(value), description)
    }

    /// Creates a floating point record.
    pub fn float(
        owner: impl Into<String>,
        name: &'static str,
        value: f64,
        description: &'static str,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Float(value), description)
    }

    /// Creates a byte size record.
    pub fn byte_size(
        owner: impl Into<String>,
        name: &'static str,
        value: u64,
        description: &'static str,
    ) -> Self {
        Self::new(owner, name, StatisticValue::ByteSize(value), description)
    }

    /// Creates a throughput record.
    pub fn bytes_per_second(
        owner: impl Into<String>,
        name: &'static str,
        value: f64,
        description: &'static str,
    ) -> Self {
        Self::new(owner, name, StatisticValue::BytesPerSecond(value), description)
    }

    /// Creates a time range record from a timed window.
    pub fn time_range<const N: usize>(
        owner: impl Into<String>,
        name: &'static str,
        window: &TimedAverageWindow<N>,
        description: &'static str,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::TimeRange {
                average: window.average(),
                minimum: window.minimum(),
                maximum: window.maximum(),
            },
            description,
        )
    }

    /// Creates a percentage record. `fraction` is in `[0, 1]`.
    pub fn percentage(
        owner: impl Into<String>,
        name: &'static str,
        fraction: f64,
        description: &'static str,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::Percentage(fraction * 100.0),
            description,
        )
    }

    /// Creates a percentage range record from a running statistic of fractions.
    pub fn percentage_range(
        owner: impl Into<String>,
        name: &'static str,
        stat: &RunningStatistic,
        description: &'static str,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::PercentageRange {
                average: stat.average() * 100.0,
                minimum: stat.minimum() * 100.0,
                maximum: stat.maximum() * 100.0,
            },
            description,
        )
    }

    /// Creates a boolean record.
    pub fn boolean(
        owner: impl Into<String>,
        name: &'static str,
        value: bool,
        description: &'static str,
    ) -> Self {
        Self::new(owner, name, StatisticValue::Boolean(value), description)
    }

    /// Creates a record holding owned text.
    pub fn persistent_string(
        owner: impl Into<String>,
        name: &'static str,
        value: impl Into<String>,
        description: &'static str,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::PersistentString(value.into()),
            description,
        )
    }

    /// Creates a record naming another node.
    pub fn reference_string(
        owner: impl Into<String>,
        name: &'static str,
        value: impl Into<String>,
        description: &'static str,
    ) -> Self {
        Self::new(
            owner,
            name,
            StatisticValue::ReferenceString(value.into()),
            description,
        )
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}: {}", self.owner, self.name, self.value)
    }
}

/// Finds the first record with the given owner and name.
pub fn find<'a>(stats: &'a [Statistic], owner: &str, name: &str) -> Option<&'a Statistic> {
    stats.iter().find(|s| s.owner == owner && s.name == name)
}
