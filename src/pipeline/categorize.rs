//! Topic categorization and relevance scoring.
//!
//! Comments are split into token-budgeted batches; each batch is one
//! structured model request whose answer is reconciled against the requested
//! ids. Every input comment comes back exactly once: with the topics the
//! model gave it, or with an explicit empty list when the model answered
//! every re-request without placing it. A batch whose model calls fail
//! fails the whole call.
//!
//! Without a seed taxonomy the first batch runs alone and the topics it
//! produces seed the remaining batches, so batches share one vocabulary.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{batch_outcome, collect_by_id, prompts, validate_comments, Keyed};
use crate::algo::comment::{Comment, Subtopic, Topic};
use crate::algo::schema::{Property, Schema};
use crate::algo::{taxonomy, tokenizer};
use crate::config::SensemakerConfig;
use crate::error::{ModelError, PipelineError};
use crate::executor::execute_concurrently;
use crate::model::{Limiter, ModelGateway};

/// How many levels of the topic tree to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Depth {
    Topics = 1,
    Subtopics = 2,
    Themes = 3,
}

impl TryFrom<u8> for Depth {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Depth::Topics),
            2 => Ok(Depth::Subtopics),
            3 => Ok(Depth::Themes),
            other => Err(format!("categorization depth must be 1, 2 or 3, got {other}")),
        }
    }
}

impl From<Depth> for u8 {
    fn from(depth: Depth) -> u8 {
        depth as u8
    }
}

impl Depth {
    /// Answer schema for one batch. Each level makes the next one required.
    pub fn response_schema(self) -> Schema {
        let name = || Property::required("name", Schema::label());
        let leaf = Schema::object(vec![name()]);
        let subtopic = match self {
            Depth::Themes => Schema::object(vec![
                name(),
                Property::required("subtopics", Schema::array(leaf.clone())),
            ]),
            _ => leaf.clone(),
        };
        let topic = match self {
            Depth::Topics => leaf,
            _ => Schema::object(vec![
                name(),
                Property::required("subtopics", Schema::array(subtopic)),
            ]),
        };
        Schema::array(Schema::object(vec![
            Property::required("id", Schema::string()),
            Property::required("topics", Schema::array(topic)),
        ]))
    }
}

#[derive(Debug, Clone)]
pub struct CategorizeOptions {
    pub depth: Depth,
    /// Seed from the comments' prior assignments when no seed is given.
    pub use_existing: bool,
    pub seed_topics: Option<Vec<Topic>>,
    /// Advisory bounds on distinct top-level topics; never enforced.
    pub min_topics: usize,
    pub max_topics: usize,
    pub batch_size: usize,
    pub batch_token_budget: usize,
    pub max_retries: u32,
    /// Bounds how many batches run at once.
    pub limiter: Limiter,
}

impl Default for CategorizeOptions {
    fn default() -> Self {
        let cfg = SensemakerConfig::default();
        Self {
            depth: Depth::Subtopics,
            use_existing: false,
            seed_topics: None,
            min_topics: cfg.min_topics,
            max_topics: cfg.max_topics,
            batch_size: cfg.batch_size,
            batch_token_budget: cfg.batch_token_budget,
            max_retries: cfg.max_retries,
            limiter: cfg.task_limiter(),
        }
    }
}

impl CategorizeOptions {
    pub fn from_config(cfg: &SensemakerConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            depth: Depth::try_from(cfg.categorization_depth).map_err(PipelineError::invalid)?,
            use_existing: false,
            seed_topics: None,
            min_topics: cfg.min_topics,
            max_topics: cfg.max_topics,
            batch_size: cfg.batch_size,
            batch_token_budget: cfg.batch_token_budget,
            max_retries: cfg.max_retries,
            limiter: cfg.task_limiter(),
        })
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.min_topics > self.max_topics {
            return Err(PipelineError::invalid(format!(
                "min_topics ({}) exceeds max_topics ({})",
                self.min_topics, self.max_topics
            )));
        }
        if let Some(blank) = self
            .seed_topics
            .iter()
            .flatten()
            .find(|t| t.name.trim().is_empty())
        {
            return Err(PipelineError::invalid(format!(
                "seed topic has an empty name: {blank:?}"
            )));
        }
        Ok(())
    }

    fn seed(&self, comments: &[Comment]) -> Vec<Topic> {
        match &self.seed_topics {
            Some(seed) => seed.clone(),
            None if self.use_existing => taxonomy::build_taxonomy(comments),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CategorizedRow {
    id: String,
    topics: Vec<Topic>,
}

impl Keyed for CategorizedRow {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Assign topics to every comment.
///
/// The result has one entry per input comment, in input order, each with
/// `topics` set. Existing assignments are replaced as a whole.
pub async fn categorize(
    gateway: &ModelGateway,
    comments: &[Comment],
    options: &CategorizeOptions,
) -> Result<Vec<Comment>, PipelineError> {
    validate_comments(comments)?;
    options.validate()?;
    if comments.is_empty() {
        return Ok(Vec::new());
    }

    let mut seed = options.seed(comments);
    let schema = options.depth.response_schema();
    let depth = options.depth;
    let batches = tokenizer::batch_by_budget(
        comments,
        options.batch_size,
        options.batch_token_budget,
        |c| tokenizer::approx_tokens(&c.text),
    );
    info!(
        comments = comments.len(),
        batches = batches.len(),
        depth = u8::from(depth),
        seed_topics = seed.len(),
        "categorizing comments"
    );

    let mut assigned: HashMap<String, Vec<Topic>> = HashMap::new();
    let mut first_open = 0;
    if seed.is_empty() && batches.len() > 1 {
        let first = batches[0];
        let results = execute_concurrently(
            &options.limiter,
            vec![categorize_batch(gateway, first, &seed, &schema, options)],
        )
        .await;
        for result in results {
            for (id, row) in batch_outcome(0, first.len(), result)? {
                assigned.insert(id, normalize_topics(row.topics, depth));
            }
        }
        seed = taxonomy::merge_topics(
            first
                .iter()
                .filter_map(|c| assigned.get(&c.id))
                .flatten(),
        );
        info!(seed_topics = seed.len(), "taxonomy learned from first batch");
        first_open = 1;
    }

    let remaining = &batches[first_open..];
    let tasks: Vec<_> = remaining
        .iter()
        .map(|batch| categorize_batch(gateway, batch, &seed, &schema, options))
        .collect();
    let results = execute_concurrently(&options.limiter, tasks).await;
    for (idx, (batch, result)) in remaining.iter().zip(results).enumerate() {
        for (id, row) in batch_outcome(first_open + idx, batch.len(), result)? {
            assigned.insert(id, normalize_topics(row.topics, depth));
        }
    }

    let output: Vec<Comment> = comments
        .iter()
        .map(|c| {
            let mut out = c.clone();
            out.topics = Some(assigned.remove(&c.id).unwrap_or_default());
            out
        })
        .collect();

    let distinct: BTreeSet<&str> = output.iter().flat_map(|c| c.topic_names()).collect();
    if distinct.len() < options.min_topics || distinct.len() > options.max_topics {
        warn!(
            topics = distinct.len(),
            min_topics = options.min_topics,
            max_topics = options.max_topics,
            "distinct topic count outside requested range"
        );
    }
    let uncategorized = output
        .iter()
        .filter(|c| c.topics.as_ref().is_some_and(Vec::is_empty))
        .count();
    info!(topics = distinct.len(), uncategorized, "categorization complete");
    Ok(output)
}

async fn categorize_batch(
    gateway: &ModelGateway,
    batch: &[Comment],
    seed: &[Topic],
    schema: &Schema,
    options: &CategorizeOptions,
) -> Result<HashMap<String, CategorizedRow>, ModelError> {
    let refs: Vec<&Comment> = batch.iter().collect();
    let depth = u8::from(options.depth);
    collect_by_id::<CategorizedRow, _>(gateway, &refs, schema, options.max_retries, |pending| {
        prompts::categorization(pending, seed, depth, options.min_topics, options.max_topics)
    })
    .await
}

/// Project validated answers onto `depth`.
///
/// Names are already non-blank and unpadded (the schema rejects anything
/// else). Levels deeper than `depth` are cut, relevance the model volunteered
/// is cleared, and a name repeated within one comment's answer is kept once
/// with its subtopics merged.
fn normalize_topics(topics: Vec<Topic>, depth: Depth) -> Vec<Topic> {
    let mut out: Vec<Topic> = Vec::new();
    for topic in topics {
        let name = topic.name.as_str();
        let subtopics = match depth {
            Depth::Topics => Vec::new(),
            Depth::Subtopics => normalize_subtopics(topic.subtopics, 0),
            Depth::Themes => normalize_subtopics(topic.subtopics, 1),
        };
        match out.iter_mut().find(|t| t.name == name) {
            Some(existing) => {
                for sub in subtopics {
                    if !existing.subtopics.iter().any(|s| s.name == sub.name) {
                        existing.subtopics.push(sub);
                    }
                }
            }
            None => out.push(Topic {
                name: name.to_string(),
                relevance: None,
                subtopics,
            }),
        }
    }
    out
}

fn normalize_subtopics(subtopics: Vec<Subtopic>, levels_below: usize) -> Vec<Subtopic> {
    let mut out: Vec<Subtopic> = Vec::new();
    for sub in subtopics {
        let name = sub.name.as_str();
        if out.iter().any(|s| s.name == name) {
            continue;
        }
        let children = if levels_below == 0 {
            Vec::new()
        } else {
            normalize_subtopics(sub.subtopics, levels_below - 1)
        };
        out.push(Subtopic {
            name: name.to_string(),
            relevance: None,
            subtopics: children,
        });
    }
    out
}

#[derive(Debug, Deserialize)]
struct ScoredRow {
    id: String,
    topics: Vec<ScoredTopic>,
}

#[derive(Debug, Deserialize)]
struct ScoredTopic {
    name: String,
    relevance: f64,
    #[serde(default)]
    subtopics: Vec<ScoredSubtopic>,
}

#[derive(Debug, Deserialize)]
struct ScoredSubtopic {
    name: String,
    relevance: f64,
}

impl Keyed for ScoredRow {
    fn key(&self) -> &str {
        &self.id
    }
}

fn relevance_schema() -> Schema {
    let score = || Property::required("relevance", Schema::number_between(0.0, 1.0));
    let name = || Property::required("name", Schema::string());
    Schema::array(Schema::object(vec![
        Property::required("id", Schema::string()),
        Property::required(
            "topics",
            Schema::array(Schema::object(vec![
                name(),
                score(),
                Property::optional("subtopics", Schema::array(Schema::object(vec![name(), score()]))),
            ])),
        ),
    ]))
}

/// Add 0..1 relevance scores to existing topic and subtopic assignments.
///
/// Only scores are written: names and tree shape are left untouched, and a
/// topic the model did not score keeps `relevance: None`. Comments without
/// topics pass through unchanged. A failed batch fails the call.
pub async fn calculate_relevance_scores(
    gateway: &ModelGateway,
    comments: &[Comment],
    options: &CategorizeOptions,
) -> Result<Vec<Comment>, PipelineError> {
    validate_comments(comments)?;
    let scorable: Vec<Comment> = comments
        .iter()
        .filter(|c| c.topics.as_ref().is_some_and(|t| !t.is_empty()))
        .cloned()
        .collect();
    let batches = tokenizer::batch_by_budget(
        &scorable,
        options.batch_size,
        options.batch_token_budget,
        |c| tokenizer::approx_tokens(&c.text),
    );
    info!(comments = scorable.len(), batches = batches.len(), "scoring topic relevance");

    let schema = relevance_schema();
    let tasks: Vec<_> = batches
        .iter()
        .map(|batch| {
            let refs: Vec<&Comment> = batch.iter().collect();
            let schema = &schema;
            async move {
                collect_by_id::<ScoredRow, _>(gateway, &refs, schema, options.max_retries, |pending| {
                    prompts::relevance(pending)
                })
                .await
            }
        })
        .collect();
    let results = execute_concurrently(&options.limiter, tasks).await;

    let mut scored: HashMap<String, ScoredRow> = HashMap::new();
    for (idx, (batch, result)) in batches.iter().zip(results).enumerate() {
        scored.extend(batch_outcome(idx, batch.len(), result)?);
    }

    Ok(comments
        .iter()
        .map(|c| {
            let mut out = c.clone();
            if let (Some(topics), Some(row)) = (out.topics.as_mut(), scored.get(&c.id)) {
                apply_scores(topics, row);
            }
            out
        })
        .collect())
}

fn apply_scores(topics: &mut [Topic], row: &ScoredRow) {
    for topic in topics.iter_mut() {
        let Some(scored) = row.topics.iter().find(|s| s.name == topic.name) else {
            continue;
        };
        topic.relevance = Some(scored.relevance);
        for sub in topic.subtopics.iter_mut() {
            if let Some(s) = scored.subtopics.iter().find(|s| s.name == sub.name) {
                sub.relevance = Some(s.relevance);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{gateway, prompt_comments, FnModel};
    use serde_json::json;

    fn options() -> CategorizeOptions {
        CategorizeOptions {
            depth: Depth::Subtopics,
            min_topics: 1,
            max_topics: 5,
            batch_size: 2,
            ..CategorizeOptions::default()
        }
    }

    fn comments(n: usize) -> Vec<Comment> {
        (0..n)
            .map(|i| Comment::new(format!("c{i}"), format!("comment number {i}")))
            .collect()
    }

    /// Puts every comment under "Transit > Buses".
    fn transit_answer(prompt: &str) -> String {
        let rows: Vec<_> = prompt_comments(prompt)
            .into_iter()
            .map(|(id, _)| json!({"id": id, "topics": [{"name": "Transit", "subtopics": [{"name": "Buses"}]}]}))
            .collect();
        serde_json::Value::Array(rows).to_string()
    }

    #[test]
    fn depth_widens_schema() {
        let row = json!([{"id": "1", "topics": [{"name": "T"}]}]);
        assert!(Depth::Topics.response_schema().validate(&row).is_ok());
        assert!(Depth::Subtopics.response_schema().validate(&row).is_err());
        let deep = json!([{"id": "1", "topics": [{"name": "T", "subtopics": [{"name": "S", "subtopics": [{"name": "X"}]}]}]}]);
        assert!(Depth::Themes.response_schema().validate(&deep).is_ok());
        assert!(Depth::try_from(4).is_err());
    }

    #[tokio::test]
    async fn every_comment_is_categorized_exactly_once() {
        let model = FnModel::new(|prompt, _| Ok(transit_answer(prompt)));
        let input = comments(5);
        let out = categorize(&gateway(model.clone()), &input, &options())
            .await
            .unwrap();
        assert_eq!(out.len(), 5);
        for (a, b) in input.iter().zip(&out) {
            assert_eq!(a.id, b.id);
            let topics = b.topics.as_ref().unwrap();
            assert_eq!(topics[0].name, "Transit");
            assert_eq!(topics[0].subtopics[0].name, "Buses");
        }
        // Batches of two: 3 requests.
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn missing_ids_are_re_requested_and_unknown_ids_ignored() {
        let model = FnModel::new(|prompt, _| {
            let ids = prompt_comments(prompt);
            // Answer only the first requested comment, plus an invented id.
            let mut rows = vec![json!({"id": "ghost", "topics": [{"name": "X", "subtopics": []}]})];
            if let Some((id, _)) = ids.first() {
                rows.push(json!({"id": id, "topics": [{"name": "Parks", "subtopics": [{"name": "Trees"}]}]}));
            }
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let input = comments(2);
        let out = categorize(&gateway(model.clone()), &input, &options())
            .await
            .unwrap();
        assert!(out.iter().all(|c| c.topic_names().eq(["Parks"])));
        assert_eq!(model.calls(), 2);
        assert!(!out.iter().any(|c| c.has_topic("X")));
    }

    #[tokio::test]
    async fn never_answered_comment_gets_empty_topics() {
        let model = FnModel::new(|prompt, _| {
            let rows: Vec<_> = prompt_comments(prompt)
                .into_iter()
                .filter(|(id, _)| id != "c1")
                .map(|(id, _)| json!({"id": id, "topics": [{"name": "A", "subtopics": []}]}))
                .collect();
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let out = categorize(&gateway(model.clone()), &comments(2), &options())
            .await
            .unwrap();
        assert_eq!(out[0].topic_names().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(out[1].topics, Some(vec![]));
        // One initial request plus three re-requests for c1.
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn failed_batch_fails_the_call() {
        let model = FnModel::new(|prompt, _| {
            if prompt.contains("\"c2\"") {
                Err(ModelError::Transport("HTTP 503".into()))
            } else {
                Ok(transit_answer(prompt))
            }
        });
        let err = categorize(&gateway(model.clone()), &comments(4), &options())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Model(ModelError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn unseeded_batches_share_the_first_batch_taxonomy() {
        let model = FnModel::new(|prompt, call| {
            let name = match prompt.split_once("<taxonomy>\n") {
                Some((_, rest)) => rest.lines().next().unwrap_or_default().to_string(),
                None => format!("Topic{call}"),
            };
            let rows: Vec<_> = prompt_comments(prompt)
                .into_iter()
                .map(|(id, _)| json!({"id": id, "topics": [{"name": name, "subtopics": []}]}))
                .collect();
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let opts = CategorizeOptions {
            max_topics: 1,
            ..options()
        };
        let out = categorize(&gateway(model.clone()), &comments(6), &opts)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("There is no existing taxonomy"));
        assert!(prompts[1..]
            .iter()
            .all(|p| p.contains("<taxonomy>\nTopic0\n</taxonomy>")));
        let distinct: BTreeSet<&str> = out.iter().flat_map(|c| c.topic_names()).collect();
        assert_eq!(distinct.into_iter().collect::<Vec<_>>(), vec!["Topic0"]);
    }

    #[tokio::test]
    async fn blank_or_padded_names_are_regenerated() {
        let model = FnModel::new(|prompt, call| {
            let name = match call {
                0 => "  Transit ",
                1 => "",
                _ => "Transit",
            };
            let rows: Vec<_> = prompt_comments(prompt)
                .into_iter()
                .map(|(id, _)| json!({"id": id, "topics": [{"name": name, "subtopics": []}]}))
                .collect();
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let out = categorize(&gateway(model.clone()), &comments(1), &options())
            .await
            .unwrap();
        assert_eq!(out[0].topic_names().collect::<Vec<_>>(), vec!["Transit"]);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn repeated_names_in_one_answer_are_merged() {
        let model = FnModel::new(|prompt, _| {
            let rows: Vec<_> = prompt_comments(prompt)
                .into_iter()
                .map(|(id, _)| {
                    json!({"id": id, "topics": [
                        {"name": "Transit", "subtopics": [{"name": "Buses"}]},
                        {"name": "Transit", "subtopics": [{"name": "Trains"}, {"name": "Buses"}]}
                    ]})
                })
                .collect();
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let out = categorize(&gateway(model), &comments(1), &options())
            .await
            .unwrap();
        let topics = out[0].topics.as_ref().unwrap();
        assert_eq!(topics.len(), 1);
        let subs: Vec<&str> = topics[0].subtopics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(subs, vec!["Buses", "Trains"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_wait_on_the_injected_limiter() {
        let model = FnModel::new(|prompt, _| Ok(transit_answer(prompt)));
        let limiter = Limiter::bounded(1);
        let held = limiter.acquire().await;
        let opts = CategorizeOptions {
            limiter: limiter.clone(),
            ..options()
        };
        let gw = gateway(model.clone());
        let input = comments(2);

        let blocked = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            categorize(&gw, &input, &opts),
        )
        .await;
        assert!(blocked.is_err());
        assert_eq!(model.calls(), 0);

        drop(held);
        let out = categorize(&gw, &input, &opts).await.unwrap();
        assert!(out.iter().all(|c| c.has_topic("Transit")));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn depth_one_drops_subtopics_and_seed_is_in_prompt() {
        let model = FnModel::new(|prompt, _| Ok(transit_answer(prompt)));
        let opts = CategorizeOptions {
            depth: Depth::Topics,
            seed_topics: Some(vec![Topic::new("Transit")]),
            ..options()
        };
        let out = categorize(&gateway(model.clone()), &comments(1), &opts)
            .await
            .unwrap();
        assert!(out[0].topics.as_ref().unwrap()[0].subtopics.is_empty());
        assert!(model.prompts.lock().unwrap()[0].contains("<taxonomy>\nTransit\n</taxonomy>"));
    }

    #[tokio::test]
    async fn use_existing_derives_seed_from_prior_assignments() {
        let model = FnModel::new(|prompt, _| Ok(transit_answer(prompt)));
        let input = vec![Comment::new("1", "x").with_topics(vec![Topic::new("Housing")])];
        let opts = CategorizeOptions {
            use_existing: true,
            ..options()
        };
        let out = categorize(&gateway(model.clone()), &input, &opts).await.unwrap();
        assert!(model.prompts.lock().unwrap()[0].contains("Housing"));
        // Replaced atomically.
        assert_eq!(out[0].topic_names().collect::<Vec<_>>(), vec!["Transit"]);
    }

    #[tokio::test]
    async fn duplicate_ids_fail_before_any_model_call() {
        let model = FnModel::new(|prompt, _| Ok(transit_answer(prompt)));
        let input = vec![Comment::new("1", "a"), Comment::new("1", "b")];
        let err = categorize(&gateway(model.clone()), &input, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputValidation { .. }));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn relevance_scores_keep_names() {
        let model = FnModel::new(|prompt, _| {
            let rows: Vec<_> = prompt_comments(prompt)
                .into_iter()
                .map(|(id, _)| {
                    json!({"id": id, "topics": [
                        {"name": "Transit", "relevance": 0.9, "subtopics": [{"name": "Buses", "relevance": 0.4}]},
                        {"name": "Invented", "relevance": 0.2}
                    ]})
                })
                .collect();
            Ok(serde_json::Value::Array(rows).to_string())
        });
        let input = vec![
            Comment::new("1", "x").with_topics(vec![
                Topic::with_subtopics("Transit", ["Buses"]),
                Topic::new("Parks"),
            ]),
            Comment::new("2", "uncategorized"),
        ];
        let out = calculate_relevance_scores(&gateway(model.clone()), &input, &options())
            .await
            .unwrap();
        let topics = out[0].topics.as_ref().unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].relevance, Some(0.9));
        assert_eq!(topics[0].subtopics[0].relevance, Some(0.4));
        assert_eq!(topics[1].name, "Parks");
        assert_eq!(topics[1].relevance, None);
        assert_eq!(out[1], input[1]);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn failed_relevance_batch_fails_the_call() {
        let model = FnModel::new(|_, _| Err(ModelError::Transport("HTTP 503".into())));
        let input = vec![Comment::new("1", "x").with_topics(vec![Topic::new("Transit")])];
        let err = calculate_relevance_scores(&gateway(model.clone()), &input, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Model(ModelError::Exhausted { .. })));
        assert_eq!(model.calls(), 3);
    }
}
