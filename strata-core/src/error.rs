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

//! Archive error types

use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in the archive subsystem
#[derive(Debug, Error)]
pub enum StrataError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation observed a cancellation signal and stopped
    #[error("Operation cancelled")]
    Cancelled,

    /// Summarizer failed to produce a fossil
    #[error("Summarizer error: {0}")]
    Summarizer(String),

    /// A background worker has shut down and no longer accepts work
    #[error("Channel closed: {0}")]
    Closed(String),

    /// Caller supplied an argument outside the accepted domain
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StrataError {
    /// True when the error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StrataError::Cancelled)
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(e: serde_json::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for StrataError {
    fn from(e: toml::de::Error) -> Self {
        StrataError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(StrataError::Cancelled.is_cancelled());
        let io = StrataError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_cancelled());
    }

    #[test]
    fn test_serde_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: StrataError = err.into();
        assert!(matches!(converted, StrataError::Serialization(_)));
    }
}
