//! Bounded, order-preserving execution of independent async tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tracing::warn;

use crate::model::Limiter;

/// Why one executor slot has no value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Run `tasks` with at most `limiter`-width in flight and return their
/// outcomes in submission order.
///
/// A failing or panicking task only affects its own slot; every sibling
/// still runs to completion. Nothing is shared between tasks, so callers
/// accumulate results after this returns.
pub async fn execute_concurrently<T, E, F>(
    limiter: &Limiter,
    tasks: Vec<F>,
) -> Vec<Result<T, TaskError<E>>>
where
    F: Future<Output = Result<T, E>>,
{
    let wrapped = tasks.into_iter().enumerate().map(|(index, task)| async move {
        let _permit = limiter.acquire().await;
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::Failed(err)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(index, panic = %message, "task panicked");
                Err(TaskError::Panicked(message))
            }
        }
    });
    join_all(wrapped).await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
