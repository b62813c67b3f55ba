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

//! Backend-native errors
//!
//! These never leave the crate through [`crate::PersistenceService`]; they are
//! converted to `CdpError::Storage` there.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::IndexNotFound(_))
    }

    /// Structured details carried into `CdpError::Storage`
    pub fn details(&self) -> Value {
        match self {
            BackendError::Http(e) => json!({
                "kind": "http",
                "status": e.status().map(|s| s.as_u16()),
                "timeout": e.is_timeout(),
            }),
            BackendError::Api { status, body } => {
                // the engine returns JSON error bodies; keep them structured when possible
                let body = serde_json::from_str::<Value>(body).unwrap_or_else(|_| json!(body));
                json!({"kind": "api", "status": status, "body": body})
            }
            BackendError::IndexNotFound(index) => json!({"kind": "index_not_found", "index": index}),
            BackendError::Response(message) => json!({"kind": "response", "message": message}),
            BackendError::Serialization(e) => json!({"kind": "serialization", "message": e.to_string()}),
        }
    }
}
