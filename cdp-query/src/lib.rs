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

//! CDP Query Engine
//!
//! Time-bounded searches and adaptive histograms over the persistence
//! service, plus memoized lookups for hot configuration reads.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cdp_query::{DatetimeSpec, QueryEngine, TimeRangePayload, TimeUnit};
//!
//! let engine = QueryEngine::with_expression_parser(storage);
//! let payload = TimeRangePayload::between(DatetimeSpec::delta(-7, TimeUnit::Day), DatetimeSpec::now())
//!     .with_time_zone("Europe/Warsaw")
//!     .with_filter("type == 'page-view'");
//!
//! let histogram = engine
//!     .histogram(LogicalIndex::Event, &payload, "metadata.time.insert", Some("type"))
//!     .await?;
//! ```

pub mod engine;
pub mod filter;
pub mod histogram;
pub mod lookup;
pub mod time_range;

pub use engine::{Histogram, HistogramBucket, QueryEngine};
pub use filter::{parse_filter, CompareOp, ExpressionParser, FilterTranslator, Predicate, SqlTranslator};
pub use histogram::{HistogramInterval, IntervalUnit};
pub use lookup::LookupCache;
pub use time_range::{DatetimeSpec, DeltaTime, ResolvedRange, TimeRangePayload, TimeUnit, DEFAULT_LIMIT};
