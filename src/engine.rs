//! Allocation engine: one submit/classify/record routine shared by the
//! single, bulk and multi-select paths.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use indexmap::IndexSet;

use crate::{
    extract::looks_like_error_page,
    ledger::Ledger,
    types::{AllocationAttempt, AllocationResult, ChatId, Origin, Outcome},
    upstream::{Session, Upstream, UpstreamError, UpstreamResponse},
};

pub const DEFAULT_SUBMIT_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("select at least one client and one range first")]
    EmptySelection,
    #[error("quantity must be a positive whole number")]
    InvalidQuantity,
}

/// Who asked for an allocation; copied onto every ledger row.
#[derive(Debug, Clone, Copy)]
pub struct AllocationContext {
    pub origin: Origin,
    pub chat_id: Option<ChatId>,
}

impl AllocationContext {
    pub fn new(origin: Origin, chat_id: ChatId) -> Self {
        Self {
            origin,
            chat_id: Some(chat_id),
        }
    }
}

/// One pending submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub client_id: String,
    pub range_token: String,
    pub quantity: u32,
}

pub struct AllocationEngine {
    upstream: Arc<dyn Upstream>,
    ledger: Arc<dyn Ledger>,
    delay: Duration,
}

impl AllocationEngine {
    pub fn new(upstream: Arc<dyn Upstream>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            upstream,
            ledger,
            delay: DEFAULT_SUBMIT_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Submit every `clients × ranges` pair, clients outer, in the sets' own
    /// order. Nothing is sent when the selection is empty or the quantity is 0.
    pub async fn allocate(
        &self,
        session: &Session,
        clients: &IndexSet<String>,
        ranges: &IndexSet<String>,
        quantity: u32,
        ctx: AllocationContext,
    ) -> Result<Vec<AllocationResult>, AllocationError> {
        if clients.is_empty() || ranges.is_empty() {
            return Err(AllocationError::EmptySelection);
        }
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity);
        }
        let requests: Vec<AllocationRequest> = clients
            .iter()
            .flat_map(|client| {
                ranges.iter().map(move |range| AllocationRequest {
                    client_id: client.clone(),
                    range_token: range.clone(),
                    quantity,
                })
            })
            .collect();
        Ok(self.run(session, &requests, ctx).await)
    }

    /// The single-pair path.
    pub async fn allocate_one(
        &self,
        session: &Session,
        request: AllocationRequest,
        ctx: AllocationContext,
    ) -> Result<AllocationResult, AllocationError> {
        if request.client_id.is_empty() || request.range_token.is_empty() {
            return Err(AllocationError::EmptySelection);
        }
        if request.quantity == 0 {
            return Err(AllocationError::InvalidQuantity);
        }
        Ok(self.submit(session, &request, ctx).await)
    }

    /// Submit pre-validated requests in order, pausing between submissions.
    /// Every request is attempted and recorded; failures never short-circuit.
    pub async fn run(
        &self,
        session: &Session,
        requests: &[AllocationRequest],
        ctx: AllocationContext,
    ) -> Vec<AllocationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            results.push(self.submit(session, request, ctx).await);
        }
        let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
        tracing::info!(
            origin = ctx.origin.as_str(),
            total = results.len(),
            succeeded,
            "allocation batch finished"
        );
        results
    }

    async fn submit(
        &self,
        session: &Session,
        request: &AllocationRequest,
        ctx: AllocationContext,
    ) -> AllocationResult {
        let response = self
            .upstream
            .submit_allocation(
                session,
                &request.client_id,
                &request.range_token,
                request.quantity,
            )
            .await;
        let outcome = classify(&response);
        if let Err(e) = &response {
            tracing::warn!(
                client_id = %request.client_id,
                range_token = %request.range_token,
                error = %e,
                "allocation request failed"
            );
        }
        self.ledger.append(&AllocationAttempt {
            timestamp: Utc::now(),
            origin: ctx.origin,
            chat_id: ctx.chat_id,
            client_id: request.client_id.clone(),
            range_token: request.range_token.clone(),
            quantity: request.quantity,
            outcome,
        });
        AllocationResult {
            client_id: request.client_id.clone(),
            range_token: request.range_token.clone(),
            outcome,
        }
    }
}

/// Transport errors first, then the soft-failure page check, then the status.
pub fn classify(response: &Result<UpstreamResponse, UpstreamError>) -> Outcome {
    match response {
        Err(_) => Outcome::Error,
        Ok(resp) if looks_like_error_page(&resp.body) => Outcome::FailedHtml,
        Ok(resp) if !resp.is_ok() => Outcome::FailedHttp(resp.status),
        Ok(_) => Outcome::Success,
    }
}

/// Operator-facing tally of a finished batch.
pub fn summarize(results: &[AllocationResult]) -> String {
    let succeeded = results.iter().filter(|r| r.outcome.is_success()).count();
    format!("{succeeded} of {} succeeded", results.len())
}
