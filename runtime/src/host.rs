//! Ready-made host loop for long-running processes.
//!
//! Serverless hosts drive [`build`](crate::build) through their own scheduler
//! (the `next` continuation). Processes that own their runtime can call
//! [`run_until_idle`] instead: it steps until the read model stops reporting
//! `Continue` and retries transient failures with backoff.

use crate::builder::{BuildRequest, StepOutcome, step};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::{EngineContext, EngineError};
use readmodel_core::cursor::ReadModelName;

/// Totals of a [`run_until_idle`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps that completed
    pub steps: usize,
    /// Events applied across all steps
    pub applied: usize,
    /// Events consumed across all steps
    pub consumed: usize,
    /// Outcome of the last step
    pub last_outcome: StepOutcome,
}

/// Step `name` until it is caught up, suspended, paused or failed.
///
/// Each step is retried under `policy` while its error is transient.
///
/// # Errors
///
/// The first non-transient error, or the last transient one once `policy`
/// is exhausted.
pub async fn run_until_idle(
    ctx: &EngineContext,
    name: &ReadModelName,
    request: &BuildRequest,
    policy: &RetryPolicy,
) -> Result<RunSummary, EngineError> {
    let mut summary = RunSummary {
        steps: 0,
        applied: 0,
        consumed: 0,
        last_outcome: StepOutcome::Continue,
    };

    while summary.last_outcome == StepOutcome::Continue {
        let report = retry_with_predicate(
            policy.clone(),
            || step(ctx, name, request),
            EngineError::is_transient,
        )
        .await?;

        summary.steps += 1;
        summary.applied += report.applied;
        summary.consumed += report.consumed;
        summary.last_outcome = report.outcome;
    }

    tracing::info!(
        read_model = %name,
        steps = summary.steps,
        applied = summary.applied,
        outcome = summary.last_outcome.label(),
        "Read model idle"
    );
    Ok(summary)
}
