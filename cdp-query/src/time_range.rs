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

//! Time range payloads and their resolution to concrete instants
//!
//! Each side of a range is an absolute instant, a signed delta, or both:
//!
//! - absolute and delta: the delta is applied to that absolute instant
//! - delta only: applied to the other side's absolute instant, or to now
//! - neither: now
//!
//! A range that does not resolve to `from < to` is rejected.

use cdp_core::{CdpError, Result};
use chrono::{DateTime, Duration, Months, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Default page size of a time-range query
pub const DEFAULT_LIMIT: usize = 20;

/// Unit of a [`DeltaTime`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Signed offset, e.g. `-7 day`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaTime {
    pub value: i64,
    pub unit: TimeUnit,
}

impl DeltaTime {
    pub fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Shift `instant` by this delta; `None` on overflow
    ///
    /// Months and years are calendar arithmetic and clamp to the end of a
    /// shorter month.
    pub fn apply(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let fixed = |d: Option<Duration>| d.and_then(|d| instant.checked_add_signed(d));
        match self.unit {
            TimeUnit::Second => fixed(Duration::try_seconds(self.value)),
            TimeUnit::Minute => fixed(Duration::try_minutes(self.value)),
            TimeUnit::Hour => fixed(Duration::try_hours(self.value)),
            TimeUnit::Day => fixed(Duration::try_days(self.value)),
            TimeUnit::Week => fixed(Duration::try_weeks(self.value)),
            TimeUnit::Month => shift_months(instant, self.value),
            TimeUnit::Year => shift_months(instant, self.value.checked_mul(12)?),
        }
    }
}

fn shift_months(instant: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        instant.checked_add_months(magnitude)
    } else {
        instant.checked_sub_months(magnitude)
    }
}

/// One side of a time range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaTime>,
}

impl DatetimeSpec {
    pub fn absolute(instant: DateTime<Utc>) -> Self {
        Self {
            absolute: Some(instant),
            delta: None,
        }
    }

    pub fn delta(value: i64, unit: TimeUnit) -> Self {
        Self {
            absolute: None,
            delta: Some(DeltaTime::new(value, unit)),
        }
    }

    pub fn now() -> Self {
        Self::default()
    }

    fn resolve(&self, other: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let (base, delta) = match (self.absolute, self.delta) {
            (Some(absolute), delta) => (absolute, delta),
            (None, Some(delta)) => (other.unwrap_or(now), Some(delta)),
            (None, None) => (now, None),
        };
        match delta {
            Some(delta) => delta.apply(base).ok_or_else(|| CdpError::Range {
                from: base.to_rfc3339(),
                to: format!("{} {:?}", delta.value, delta.unit),
            }),
            None => Ok(base),
        }
    }
}

/// Request for a time-bounded query or histogram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangePayload {
    #[serde(default)]
    pub from: DatetimeSpec,
    #[serde(default)]
    pub to: DatetimeSpec,
    /// IANA zone name; UTC when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Textual filter
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default)]
    pub start: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for TimeRangePayload {
    fn default() -> Self {
        Self {
            from: DatetimeSpec::default(),
            to: DatetimeSpec::default(),
            time_zone: None,
            filter: None,
            start: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl TimeRangePayload {
    pub fn between(from: DatetimeSpec, to: DatetimeSpec) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    pub fn with_time_zone(mut self, zone: impl Into<String>) -> Self {
        self.time_zone = Some(zone.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_page(mut self, start: usize, limit: usize) -> Self {
        self.start = start;
        self.limit = limit;
        self
    }

    /// Requested zone, UTC when absent or blank
    pub fn timezone(&self) -> Result<Tz> {
        match self.time_zone.as_deref().map(str::trim) {
            None | Some("") => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| CdpError::InvalidTimezone(name.to_string())),
        }
    }

    /// Resolve both sides against `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResolvedRange> {
        let timezone = self.timezone()?;
        let from = self.from.resolve(self.to.absolute, now)?;
        let to = self.to.resolve(self.from.absolute, now)?;
        if from >= to {
            return Err(CdpError::Range {
                from: from.to_rfc3339(),
                to: to.to_rfc3339(),
            });
        }
        Ok(ResolvedRange { from, to, timezone })
    }
}

/// Concrete, non-empty time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub timezone: Tz,
}

impl ResolvedRange {
    pub fn span(&self) -> Duration {
        self.to - self.from
    }

    pub fn is_utc(&self) -> bool {
        self.timezone == Tz::UTC
    }

    /// `from` as RFC 3339 in the requested zone
    pub fn local_from(&self) -> String {
        self.local(self.from)
    }

    /// `to` as RFC 3339 in the requested zone
    pub fn local_to(&self) -> String {
        self.local(self.to)
    }

    fn local(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
