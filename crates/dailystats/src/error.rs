// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for each pipeline stage

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the query executor and the services behind it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("No credentials found, configure an access key and secret")]
    CredentialsMissing,

    #[error("Incomplete credentials: {0} is not set")]
    CredentialsIncomplete(String),

    #[error("Validation error (potential SQL query issue): {0}")]
    RequestValidation(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Access denied: {0}")]
    PermissionDenied(String),

    #[error("Transient service error: {0}")]
    TransientService(String),

    #[error("Query {execution_id} ended in state {state}: {reason}")]
    QueryFailed {
        execution_id: String,
        state: String,
        reason: String,
    },

    #[error("Query {execution_id} still {state} after {polls} polls ({waited:?})")]
    Timeout {
        execution_id: String,
        state: String,
        polls: usize,
        waited: Duration,
    },

    #[error("Unknown query service error: {0}")]
    Unknown(String),
}

impl QueryError {
    /// Classify a service error code and message into the taxonomy.
    ///
    /// Codes follow the AWS wire names so a real client can forward them
    /// unchanged.
    #[must_use]
    pub fn from_service_code(code: &str, message: &str) -> Self {
        let message = message.to_string();
        match code {
            "InvalidRequestException" | "ValidationException" | "ParamValidationError" => {
                Self::RequestValidation(message)
            }
            "ResourceNotFoundException" | "EntityNotFoundException" | "NoSuchBucket" => {
                Self::ResourceNotFound(message)
            }
            "AccessDeniedException" | "AccessDenied" | "UnauthorizedOperation" => {
                Self::PermissionDenied(message)
            }
            "ThrottlingException"
            | "TooManyRequestsException"
            | "InternalServerException"
            | "ServiceUnavailable"
            | "RequestTimeout" => Self::TransientService(message),
            "NoCredentialsError" => Self::CredentialsMissing,
            "PartialCredentialsError" => Self::CredentialsIncomplete(message),
            _ => Self::Unknown(format!("{code} - {message}")),
        }
    }

    /// Whether retrying the whole run later could plausibly succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_) | Self::Timeout { .. })
    }
}

/// Failures of the metrics pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Source table is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Arrow error: {0}")]
    Arrow(String),
}

impl From<arrow_schema::ArrowError> for MetricsError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        MetricsError::Arrow(e.to_string())
    }
}

/// Failures while replacing a partition in the object store
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Failed to serialize daily stats: {0}")]
    Serialize(#[from] arrow_schema::ArrowError),

    #[error("Upload of {key} was not confirmed: {reason}")]
    Unconfirmed { key: String, reason: String },
}

/// Failures while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Credentials(#[from] QueryError),

    #[error("Failed to build object store for {url}: {reason}")]
    Store { url: String, reason: String },
}

/// Outcome of a failed run, one variant per stage
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Source query failed: {0}")]
    Query(#[source] QueryError),

    #[error("Customer history query failed: {0}")]
    History(#[source] QueryError),

    #[error("Metrics computation failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error(
        "Data published to {key}, catalog not yet consistent for partition {partition_date}: {source}"
    )]
    CatalogPending {
        partition_date: NaiveDate,
        key: String,
        #[source]
        source: QueryError,
    },
}

impl JobError {
    /// True when the data is in place and only catalog registration is missing
    #[must_use]
    pub fn is_catalog_pending(&self) -> bool {
        matches!(self, Self::CatalogPending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_codes_are_classified() {
        assert_eq!(
            QueryError::from_service_code("InvalidRequestException", "line 1: bad"),
            QueryError::RequestValidation("line 1: bad".to_string())
        );
        assert!(matches!(
            QueryError::from_service_code("ResourceNotFoundException", "no db"),
            QueryError::ResourceNotFound(_)
        ));
        assert!(matches!(
            QueryError::from_service_code("AccessDeniedException", "iam"),
            QueryError::PermissionDenied(_)
        ));
        assert!(QueryError::from_service_code("ThrottlingException", "slow down").is_transient());

        let unknown = QueryError::from_service_code("Weird", "thing");
        assert_eq!(unknown.to_string(), "Unknown query service error: Weird - thing");
    }

    #[test]
    fn test_catalog_pending_message() {
        let err = JobError::CatalogPending {
            partition_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            key: "shopify/daily_stats/partition_date=2024-01-01/x.csv".to_string(),
            source: QueryError::TransientService("down".to_string()),
        };
        assert!(err.is_catalog_pending());
        assert!(err.to_string().contains("catalog not yet consistent"));
    }
}
