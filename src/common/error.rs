// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Error types for the data tier.
//!
//! [`ConnectorError`] is what a connector reports; [`DataTierError`] is what the
//! caller of an atomic request execution sees. "Not available yet" is not an
//! error: connectors report it as [`crate::connector::FetchOutcome::NotAvailable`].

use thiserror::Error;

/// Result alias for data tier operations.
pub type Result<T> = std::result::Result<T, DataTierError>;

/// Failure reported by a connector while executing or fetching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// The source rejected or failed the command.
    #[error("{0}")]
    Source(String),

    /// The connector wraps a processing failure (bad input, unsupported value).
    #[error("processing error: {0}")]
    Processing(String),

    /// The connector wraps an engine-side failure.
    #[error("component error: {0}")]
    Component(String),
}

impl ConnectorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Source(msg) | Self::Processing(msg) | Self::Component(msg) => msg,
        }
    }
}

/// Errors surfaced to the operator tree.
#[derive(Debug, Error)]
pub enum DataTierError {
    /// Source failure escalated because partial results are not supported.
    #[error("{connector}: {message}")]
    Connector { connector: String, message: String },

    #[error("processing error: {0}")]
    Processing(String),

    /// Internal invariant violation.
    #[error("component error: {0}")]
    Component(String),

    /// A value could not be converted to the column type.
    #[error("transformation error: {0}")]
    Transformation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataTierError {
    /// Escalates a connector failure for `connector`, keeping wrapped
    /// processing and component failures as their own kind.
    pub fn from_connector(connector: &str, err: ConnectorError) -> Self {
        match err {
            ConnectorError::Source(message) => Self::Connector {
                connector: connector.to_string(),
                message,
            },
            ConnectorError::Processing(msg) => Self::Processing(msg),
            ConnectorError::Component(msg) => Self::Component(msg),
        }
    }

    pub fn is_component(&self) -> bool {
        matches!(self, Self::Component(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_failure_is_prefixed_with_connector_name() {
        let err = DataTierError::from_connector("pg", ConnectorError::failed("relation missing"));
        assert_eq!(err.to_string(), "pg: relation missing");
    }

    #[test]
    fn wrapped_failures_keep_their_kind() {
        let err = DataTierError::from_connector("pg", ConnectorError::Component("oom".into()));
        assert!(err.is_component());
        let err = DataTierError::from_connector("pg", ConnectorError::Processing("bad".into()));
        assert!(matches!(err, DataTierError::Processing(msg) if msg == "bad"));
    }
}
