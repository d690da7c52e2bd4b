// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Remote query execution.
//!
//! A [`QueryService`] is the submit / status / results API of a query
//! engine. [`QueryExecutor`] drives one statement through it: submit, poll
//! with bounded backoff until a terminal state, then page the results into
//! a [`Table`](crate::Table).

mod executor;
mod local;

pub use executor::{PollPolicy, QueryExecutor};
pub use local::{CatalogTable, LocalCatalog, LocalQueryService};

use crate::error::QueryError;
use async_trait::async_trait;
use std::fmt;

/// Opaque handle returned when a query is submitted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(pub String);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution state reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    /// Parse the service's state name
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        match name.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(QueryError::Unknown(format!("unrecognized query state {other}"))),
        }
    }

    /// Polling continues only while the query is queued or running
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the reason the service attached to the last state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    pub reason: Option<String>,
}

impl QueryStatus {
    #[must_use]
    pub fn new(state: QueryState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(state: QueryState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: Some(reason.into()),
        }
    }
}

/// A statement submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub database: String,
    /// Where the service spools result files
    pub output_location: String,
}

/// One page of results.
///
/// Like the Athena API, the first page repeats the column names as its
/// first row; later pages carry data rows only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submit a statement for asynchronous execution
    async fn start_query(&self, request: &QueryRequest) -> Result<ExecutionId, QueryError>;

    /// Current state of a submitted statement
    async fn query_status(&self, id: &ExecutionId) -> Result<QueryStatus, QueryError>;

    /// Fetch up to `max_results` rows, continuing from `next_token`
    async fn result_page(
        &self,
        id: &ExecutionId,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<ResultPage, QueryError>;
}
