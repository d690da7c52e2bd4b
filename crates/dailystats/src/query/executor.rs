// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::{ExecutionId, QueryRequest, QueryService, QueryState, QueryStatus};
use crate::config::{MAX_PAGE_SIZE, PollingConfig};
use crate::error::QueryError;
use crate::table::Table;
use backon::{BackoffBuilder, ExponentialBuilder};
use diagnostics::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backoff between status polls, bounded by count and total wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f32,
    pub max_polls: usize,
    pub max_wait: Duration,
}

impl PollPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_polls)
            .build()
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_polls: config.max_polls,
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Runs statements through a [`QueryService`] to completion
#[derive(Clone)]
pub struct QueryExecutor {
    service: Arc<dyn QueryService>,
    output_location: String,
    page_size: usize,
    policy: PollPolicy,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(service: Arc<dyn QueryService>, output_location: impl Into<String>) -> Self {
        Self {
            service,
            output_location: output_location.into(),
            page_size: MAX_PAGE_SIZE,
            policy: PollPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run a query and collect every result row
    pub async fn execute(&self, query: &str, database: &str) -> Result<Table, QueryError> {
        let id = self.run_to_completion(query, database).await?;
        let table = self.fetch_results(&id).await.inspect_err(|e| {
            let reason = e.to_string();
            let execution_id = id.to_string();
            error!("Failed to fetch results for query {execution_id}: {reason}");
        })?;

        let rows = table.num_rows();
        let execution_id = id.to_string();
        info!("Query {execution_id} returned {rows} rows");
        Ok(table)
    }

    /// Run a statement that produces no row set, such as DDL
    pub async fn execute_no_result(&self, query: &str, database: &str) -> Result<(), QueryError> {
        self.run_to_completion(query, database).await.map(|_| ())
    }

    async fn run_to_completion(
        &self,
        query: &str,
        database: &str,
    ) -> Result<ExecutionId, QueryError> {
        let request = QueryRequest {
            query: query.to_string(),
            database: database.to_string(),
            output_location: self.output_location.clone(),
        };
        debug!("Submitting query to {database}: {query}");

        let id = self.service.start_query(&request).await.inspect_err(|e| {
            let reason = e.to_string();
            error!("Failed to submit query to {database}: {reason}");
        })?;

        let status = self.wait_for_terminal(&id).await.inspect_err(|e| {
            let reason = e.to_string();
            error!("Query did not complete: {reason}");
        })?;

        let execution_id = id.to_string();
        match status.state {
            QueryState::Succeeded => {
                info!("Query {execution_id} succeeded");
                Ok(id)
            }
            state => {
                let reason = status
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string());
                let state = state.to_string();
                error!("Query {execution_id} failed in state {state}: {reason}");
                Err(QueryError::QueryFailed {
                    execution_id,
                    state,
                    reason,
                })
            }
        }
    }

    async fn wait_for_terminal(&self, id: &ExecutionId) -> Result<QueryStatus, QueryError> {
        let started = Instant::now();
        let mut delays = self.policy.delays();
        let mut polls = 0usize;

        loop {
            let status = self.service.query_status(id).await?;
            polls += 1;

            let execution_id = id.to_string();
            let state = status.state.as_str();
            debug!("Query {execution_id} is in {state} state");

            if status.state.is_terminal() {
                return Ok(status);
            }

            let waited = started.elapsed();
            let next = delays
                .next()
                .filter(|delay| polls < self.policy.max_polls && waited + *delay <= self.policy.max_wait);
            match next {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(QueryError::Timeout {
                        execution_id,
                        state: state.to_string(),
                        polls,
                        waited,
                    });
                }
            }
        }
    }

    async fn fetch_results(&self, id: &ExecutionId) -> Result<Table, QueryError> {
        let mut table: Option<Table> = None;
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .service
                .result_page(id, token.as_deref(), self.page_size)
                .await?;
            pages += 1;

            let target = table.get_or_insert_with(|| Table::new(page.columns.clone()));
            let page_rows = page.rows.len();
            // Only the first page repeats the column names
            let skip = usize::from(pages == 1);
            target.extend_rows(page.rows.into_iter().skip(skip));

            let execution_id = id.to_string();
            debug!("Fetched page {pages} of query {execution_id} with {page_rows} rows");

            match page.next_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(QueryError::Unknown(format!(
                        "result pagination for {execution_id} repeated token {next}"
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(table.unwrap_or_default())
    }
}
