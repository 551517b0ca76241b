// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Podstats error types

use thiserror::Error;

/// Result type for podstats operations
pub type Result<T> = std::result::Result<T, PodstatsError>;

/// Message reported to callers when an error is wrapped at the RPC boundary.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Errors that can occur anywhere in the redirect log pipeline
#[derive(Debug, Error)]
pub enum PodstatsError {
    /// Malformed input, caller's fault
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown attribute number, key id or partition
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Malformed packed record or query parameter
    #[error("Parse error: {0}")]
    Parse(String),

    /// Insufficient capability
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Unreachable partition or malformed RPC
    #[error("Transport error: {0}")]
    Transport(String),

    /// Blob store or journal unavailable, or a short write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error carrying an explicit status code end-to-end
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Wrapped failure that crossed a boundary without detail
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PodstatsError {
    /// Create a status-carrying error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        PodstatsError::Status {
            status,
            message: message.into(),
        }
    }

    /// Status code reported for this error at a boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PodstatsError::Validation(_) | PodstatsError::Parse(_) | PodstatsError::Lookup(_) => {
                400
            }
            PodstatsError::Permission(_) => 403,
            PodstatsError::Status { status, .. } => *status,
            _ => 500,
        }
    }

    /// Whether this is the distinguished status-carrying error.
    pub fn is_status(&self) -> bool {
        matches!(self, PodstatsError::Status { .. })
    }
}

impl From<serde_json::Error> for PodstatsError {
    fn from(e: serde_json::Error) -> Self {
        PodstatsError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(PodstatsError::Validation("x".into()).status_code(), 400);
        assert_eq!(PodstatsError::Permission("x".into()).status_code(), 403);
        assert_eq!(PodstatsError::status(429, "slow down").status_code(), 429);
        assert_eq!(PodstatsError::Storage("x".into()).status_code(), 500);
    }

    #[test]
    fn test_status_error_displays_message_only() {
        let e = PodstatsError::status(404, "no such show");
        assert_eq!(e.to_string(), "no such show");
        assert!(e.is_status());
    }
}
