//! Stage guards
//!
//! Every adapter call an execution makes runs under a stage budget and races
//! the execution's cancel signal. Dropping the losing future kills whatever
//! child process the adapter had spawned.

use std::future::Future;
use std::time::Duration;

use ferry_core::domain::failure::Stage;

use crate::adapter::{AdapterError, AdapterResult};
use crate::error::{OrchestratorError, Result};
use crate::service::cancel::CancelSignal;
use crate::service::log_sink::ExecutionLog;

/// Runs `call` within `budget`, abandoning it on cancel
pub async fn guarded<T, F>(
    stage: Stage,
    budget: Duration,
    cancel: &CancelSignal,
    call: F,
) -> Result<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestratorError::Adapter {
            stage,
            source: AdapterError::cancelled(),
        }),
        outcome = tokio::time::timeout(budget, call) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(OrchestratorError::Adapter { stage, source }),
            Err(_) => Err(OrchestratorError::Timeout { stage, budget }),
        },
    }
}

/// As [`guarded`], retrying once after `backoff` when the first attempt
/// fails with a transient adapter error
pub async fn with_retry<T, F, Fut>(
    stage: Stage,
    budget: Duration,
    backoff: Duration,
    cancel: &CancelSignal,
    log: &ExecutionLog,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    match guarded(stage, budget, cancel, attempt()).await {
        Err(err) if err.is_transient() => {
            tracing::warn!("{} failed, retrying once: {}", stage, err);
            log.warn(format!(
                "{} failed with a transient error, retrying in {}ms: {}",
                stage,
                backoff.as_millis(),
                err
            ));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(OrchestratorError::Adapter {
                        stage,
                        source: AdapterError::cancelled(),
                    });
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            guarded(stage, budget, cancel, attempt()).await
        }
        other => other,
    }
}

/// True when `err` is the result of the execution being cancelled
pub fn is_cancellation(err: &OrchestratorError) -> bool {
    matches!(
        err,
        OrchestratorError::Adapter { source, .. }
            if source.kind == crate::adapter::AdapterErrorKind::Cancelled
    )
}
