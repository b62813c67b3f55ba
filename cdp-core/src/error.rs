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

//! Error taxonomy shared by every crate of the platform core

use serde_json::Value;
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CdpError>;

/// Errors that can surface from the storage/caching/query substrate
#[derive(Debug, Error)]
pub enum CdpError {
    /// Any backend failure, already stripped of backend-native types
    #[error("Storage error: {message}")]
    Storage { message: String, details: Value },

    /// Cache entry exists but its TTL has elapsed
    #[error("Cache entry expired: {key}")]
    Expired { key: String },

    /// Logical resource name is not part of the catalog
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// Partition granularity cannot produce a partition suffix
    #[error("Invalid partitioning: {0}")]
    InvalidPartitioning(String),

    /// Textual filter could not be parsed
    #[error("Filter syntax error at {position}: {message}")]
    FilterSyntax { message: String, position: usize },

    /// Resolved time range is empty or inverted
    #[error("Invalid time range: from {from} is not before to {to}")]
    Range { from: String, to: String },

    /// Timezone name is not a known IANA zone
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CdpError {
    /// Build a storage error with structured details
    pub fn storage(message: impl Into<String>, details: Value) -> Self {
        CdpError::Storage {
            message: message.into(),
            details,
        }
    }

    /// Whether this error is the cache-expiry signal
    pub fn is_expired(&self) -> bool {
        matches!(self, CdpError::Expired { .. })
    }
}

impl From<serde_json::Error> for CdpError {
    fn from(e: serde_json::Error) -> Self {
        CdpError::Serialization(e.to_string())
    }
}
