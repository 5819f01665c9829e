//! Model-driven pipelines: topic categorization, relevance scoring and
//! per-topic idea clustering.

pub mod categorize;
pub mod ideas;
pub mod prompts;

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::algo::comment::Comment;
use crate::algo::schema::Schema;
use crate::error::{ModelError, PipelineError};
use crate::executor::TaskError;
use crate::model::ModelGateway;

/// Reject batches with empty or repeated comment ids.
pub fn validate_comments(comments: &[Comment]) -> Result<(), PipelineError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut issues = Vec::new();
    for (idx, comment) in comments.iter().enumerate() {
        if comment.id.trim().is_empty() {
            issues.push(format!("comment at position {idx} has an empty id"));
        } else if !seen.insert(comment.id.as_str()) {
            issues.push(format!("duplicate comment id '{}'", comment.id));
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::InputValidation { issues })
    }
}

/// A model answer row that belongs to one requested comment.
pub(crate) trait Keyed {
    fn key(&self) -> &str;
}

/// Ask for answers about `batch` until every comment has one or
/// `max_retries` re-requests are spent.
///
/// Each round prompts only for the still-missing comments. Rows for ids
/// that were not requested are ignored; the first row for an id wins.
/// A model call that fails after its own retries fails the whole batch,
/// whichever round it happens in.
pub(crate) async fn collect_by_id<R, P>(
    gateway: &ModelGateway,
    batch: &[&Comment],
    schema: &Schema,
    max_retries: u32,
    prompt: P,
) -> Result<HashMap<String, R>, ModelError>
where
    R: DeserializeOwned + Keyed,
    P: Fn(&[&Comment]) -> String,
{
    let mut answers: HashMap<String, R> = HashMap::new();
    let mut pending: Vec<&Comment> = batch.to_vec();

    for round in 0..=max_retries {
        let rows: Vec<R> = gateway.generate_typed(&prompt(&pending), schema).await?;

        let mut unknown = 0usize;
        for row in rows {
            let key = row.key().to_string();
            if pending.iter().any(|c| c.id == key) && !answers.contains_key(&key) {
                answers.insert(key, row);
            } else if !answers.contains_key(&key) {
                unknown += 1;
            }
        }
        if unknown > 0 {
            debug!(unknown, "ignored answers for ids that were not requested");
        }

        pending.retain(|c| !answers.contains_key(&c.id));
        if pending.is_empty() {
            break;
        }
        if round < max_retries {
            debug!(round = round + 1, missing = pending.len(), "re-requesting comments missing from answer");
        }
    }

    if !pending.is_empty() {
        warn!(missing = pending.len(), "comments still missing after re-requests");
    }
    Ok(answers)
}

/// Turn one executor slot into a pipeline result. A batch that failed or
/// panicked fails the whole call; its comments are not reported as
/// uncategorized.
pub(crate) fn batch_outcome<T>(
    index: usize,
    size: usize,
    result: Result<T, TaskError<ModelError>>,
) -> Result<T, PipelineError> {
    result.map_err(|err| {
        error!(batch = index, batch_size = size, error = %err, "batch failed");
        match err {
            TaskError::Failed(e) => PipelineError::Model(e),
            TaskError::Panicked(msg) => PipelineError::BatchPanicked { batch: index, message: msg },
        }
    })
}
