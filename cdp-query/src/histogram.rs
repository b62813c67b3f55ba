// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Adaptive bucket width for time histograms
//!
//! The width is picked from the span so a histogram renders roughly 20 to 50
//! buckets, never more than 100:
//!
//! | span              | width                              |
//! |-------------------|------------------------------------|
//! | more than 50 days | `span / 50` whole days             |
//! | 20 to 50 days     | 1 day                              |
//! | under 20 days     | `span / 50` whole hours, else whole minutes, else 1 minute |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const TARGET_BUCKETS: i64 = 50;
const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

/// Granularity of a histogram bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    fn seconds(self) -> i64 {
        match self {
            IntervalUnit::Minute => SECS_PER_MINUTE,
            IntervalUnit::Hour => SECS_PER_HOUR,
            IntervalUnit::Day => SECS_PER_DAY,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            IntervalUnit::Minute => "m",
            IntervalUnit::Hour => "h",
            IntervalUnit::Day => "d",
        }
    }
}

/// Bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramInterval {
    pub value: i64,
    pub unit: IntervalUnit,
}

impl HistogramInterval {
    pub fn new(value: i64, unit: IntervalUnit) -> Self {
        Self { value, unit }
    }

    /// Width for the span between `from` and `to`
    pub fn select(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::for_span((to - from).num_seconds())
    }

    /// Width for a span given in seconds
    pub fn for_span(span_secs: i64) -> Self {
        if span_secs > TARGET_BUCKETS * SECS_PER_DAY {
            return Self::new(span_secs / (TARGET_BUCKETS * SECS_PER_DAY), IntervalUnit::Day);
        }
        if span_secs < 20 * SECS_PER_DAY {
            let hours = span_secs / (TARGET_BUCKETS * SECS_PER_HOUR);
            if hours >= 1 {
                return Self::new(hours, IntervalUnit::Hour);
            }
            let minutes = span_secs / (TARGET_BUCKETS * SECS_PER_MINUTE);
            return Self::new(minutes.max(1), IntervalUnit::Minute);
        }
        Self::new(1, IntervalUnit::Day)
    }

    /// Fixed-interval expression such as `2d` or `8m`
    pub fn as_fixed_interval(&self) -> String {
        self.to_string()
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.value * self.unit.seconds())
    }
}

impl fmt::Display for HistogramInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn days(d: f64) -> i64 {
        (d * SECS_PER_DAY as f64) as i64
    }

    #[test]
    fn test_long_span_uses_days() {
        let interval = HistogramInterval::for_span(days(100.0));
        assert_eq!(interval, HistogramInterval::new(2, IntervalUnit::Day));
        assert_eq!(interval.as_fixed_interval(), "2d");
        assert_eq!(interval.duration(), Duration::days(2));
    }

    #[test]
    fn test_short_span_uses_hours() {
        assert_eq!(
            HistogramInterval::for_span(days(10.0)),
            HistogramInterval::new(4, IntervalUnit::Hour)
        );
    }

    #[test]
    fn test_very_short_span_uses_minutes() {
        let interval = HistogramInterval::for_span(days(0.3));
        assert_eq!(interval, HistogramInterval::new(8, IntervalUnit::Minute));
        assert_eq!(interval.as_fixed_interval(), "8m");
        assert_eq!(
            HistogramInterval::for_span(600),
            HistogramInterval::new(1, IntervalUnit::Minute)
        );
    }

    #[test]
    fn test_middle_span_uses_single_days() {
        for d in [20.0, 35.0, 50.0] {
            assert_eq!(
                HistogramInterval::for_span(days(d)),
                HistogramInterval::new(1, IntervalUnit::Day)
            );
        }
    }

    proptest! {
        #[test]
        fn test_bucket_count_stays_bounded(span in SECS_PER_HOUR..(5_000 * SECS_PER_DAY)) {
            let width = HistogramInterval::for_span(span).duration().num_seconds();
            let buckets = (span + width - 1) / width;
            prop_assert!((20..=100).contains(&buckets), "span {span}s gave {buckets} buckets");
        }
    }
}
