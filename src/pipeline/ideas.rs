//! Per-topic idea clustering.
//!
//! Each topic runs GENERATE_IDEAS, then CATEGORIZE (comment → ideas), then
//! FILTER (drop low-support ideas). A phase only runs when the previous one
//! succeeded; a failure ends that topic alone and is recorded in the run
//! report. Topics run concurrently and are accumulated after all resolve.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{collect_by_id, prompts, validate_comments, Keyed};
use crate::algo::comment::{Comment, TopicWithComments};
use crate::algo::ideas::{
    assign_ideas_to_topics, filter_ideas, merge_idea_assignments, IdeaAssignments, IdeaCount,
    TopicIdeaGroup,
};
use crate::algo::schema::{Property, Schema};
use crate::algo::{taxonomy, tokenizer};
use crate::config::SensemakerConfig;
use crate::error::{ModelError, PipelineError, TopicFailure};
use crate::executor::{execute_concurrently, TaskError};
use crate::model::{Limiter, ModelGateway};

#[derive(Debug, Clone)]
pub struct IdeaOptions {
    pub min_comments: usize,
    pub max_ideas: usize,
    pub min_proposals: usize,
    pub batch_size: usize,
    pub batch_token_budget: usize,
    pub max_retries: u32,
    /// Bounds how many topics are processed at once.
    pub limiter: Limiter,
}

impl From<&SensemakerConfig> for IdeaOptions {
    fn from(cfg: &SensemakerConfig) -> Self {
        Self {
            min_comments: cfg.min_comments,
            max_ideas: cfg.max_ideas,
            min_proposals: cfg.min_proposals,
            batch_size: cfg.batch_size,
            batch_token_budget: cfg.batch_token_budget,
            max_retries: cfg.max_retries,
            limiter: cfg.task_limiter(),
        }
    }
}

impl Default for IdeaOptions {
    fn default() -> Self {
        Self::from(&SensemakerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GenerateIdeas,
    Categorize,
    Filter,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::GenerateIdeas => "generate_ideas",
            Phase::Categorize => "categorize",
            Phase::Filter => "filter",
        }
    }
}

/// Ask for up to `max_ideas` idea labels covering the topic's comments.
/// Blank or padded labels fail validation; repeated labels are kept once.
pub async fn generate_ideas(
    gateway: &ModelGateway,
    topic: &str,
    comments: &[Comment],
    max_ideas: usize,
) -> Result<Vec<String>, ModelError> {
    let refs: Vec<&Comment> = comments.iter().collect();
    let schema = Schema::array_up_to(Schema::label(), max_ideas);
    let raw: Vec<String> = gateway
        .generate_typed(&prompts::idea_generation(topic, &refs, max_ideas), &schema)
        .await?;

    let mut ideas: Vec<String> = Vec::new();
    for idea in raw {
        if !ideas.contains(&idea) {
            ideas.push(idea);
        }
    }
    Ok(ideas)
}

#[derive(Debug, Deserialize)]
struct IdeaRow {
    id: String,
    ideas: Vec<String>,
}

impl Keyed for IdeaRow {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Map each comment to the subset of `ideas` it supports.
///
/// Batches run one after another; the first failing batch fails the call.
/// Comments matched to no idea (or never answered) are absent from the map.
pub async fn categorize_ideas(
    gateway: &ModelGateway,
    topic: &str,
    ideas: &[String],
    comments: &[Comment],
    options: &IdeaOptions,
) -> Result<IdeaAssignments, ModelError> {
    let schema = Schema::array(Schema::object(vec![
        Property::required("id", Schema::string()),
        Property::required("ideas", Schema::array(Schema::one_of(ideas.iter().cloned()))),
    ]));
    let batches = tokenizer::batch_by_budget(
        comments,
        options.batch_size,
        options.batch_token_budget,
        |c| tokenizer::approx_tokens(&c.text),
    );

    let mut assignments = IdeaAssignments::new();
    for batch in batches {
        let refs: Vec<&Comment> = batch.iter().collect();
        let rows = collect_by_id::<IdeaRow, _>(gateway, &refs, &schema, options.max_retries, |pending| {
            prompts::idea_categorization(topic, ideas, pending)
        })
        .await?;
        for (id, row) in rows {
            let mut matched: Vec<String> = Vec::new();
            for idea in row.ideas {
                if !matched.contains(&idea) {
                    matched.push(idea);
                }
            }
            if !matched.is_empty() {
                assignments.insert(id, matched);
            }
        }
    }
    Ok(assignments)
}

/// Results for one topic that ran all three phases.
#[derive(Debug, Clone, Serialize)]
pub struct TopicIdeas {
    pub topic: String,
    pub comment_count: usize,
    pub generated: Vec<String>,
    pub kept: Vec<IdeaCount>,
    pub dropped: Vec<IdeaCount>,
    pub assignments: IdeaAssignments,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopicOutcome {
    Completed(TopicIdeas),
    /// Below `min_comments`; no model call was made.
    Skipped { topic: String, comment_count: usize },
}

fn failure(topic: &str, phase: Phase, err: ModelError) -> TopicFailure {
    TopicFailure {
        topic: topic.to_string(),
        phase: phase.as_str(),
        message: err.to_string(),
    }
}

/// Run the three phases for one topic.
pub async fn process_topic(
    gateway: &ModelGateway,
    group: &TopicWithComments,
    options: &IdeaOptions,
) -> Result<TopicOutcome, TopicFailure> {
    let topic = group.topic_name.as_str();
    let comment_count = group.comments.len();
    if comment_count < options.min_comments {
        info!(topic, comment_count, min_comments = options.min_comments, "skipping topic with too few comments");
        return Ok(TopicOutcome::Skipped {
            topic: topic.to_string(),
            comment_count,
        });
    }

    let generated = generate_ideas(gateway, topic, &group.comments, options.max_ideas)
        .await
        .map_err(|e| failure(topic, Phase::GenerateIdeas, e))?;
    debug!(topic, ideas = generated.len(), "ideas generated");

    let assignments = if generated.is_empty() {
        IdeaAssignments::new()
    } else {
        categorize_ideas(gateway, topic, &generated, &group.comments, options)
            .await
            .map_err(|e| failure(topic, Phase::Categorize, e))?
    };

    let filtered = filter_ideas(&generated, &assignments, options.min_proposals);
    for dropped in &filtered.dropped {
        debug!(
            topic,
            phase = Phase::Filter.as_str(),
            idea = %dropped.idea,
            count = dropped.count,
            "idea dropped for low support"
        );
    }
    info!(
        topic,
        generated = generated.len(),
        kept = filtered.kept.len(),
        filtered = filtered.dropped.len(),
        "topic ideas complete"
    );

    Ok(TopicOutcome::Completed(TopicIdeas {
        topic: topic.to_string(),
        comment_count,
        generated,
        kept: filtered.kept,
        dropped: filtered.dropped,
        assignments: filtered.assignments,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
    pub topic: String,
    pub comment_count: usize,
    pub ideas_generated: usize,
    pub ideas_kept: Vec<IdeaCount>,
    pub ideas_filtered: Vec<IdeaCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTopic {
    pub topic: String,
    /// `too_few_comments`, or the failure that ended the topic.
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdeaRunReport {
    pub topics: Vec<TopicReport>,
    pub skipped: Vec<SkippedTopic>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdeaRun {
    /// `commentId -> ideaName[]`, unioned across topics.
    pub assignments: IdeaAssignments,
    /// Ideas grouped under their most frequent topic.
    pub idea_groups: Vec<TopicIdeaGroup>,
    pub report: IdeaRunReport,
}

/// Run the idea pipeline over every topic present on `comments`.
///
/// Only invalid input is an error. Topic-level failures land in
/// `report.skipped` and the remaining topics are still reported in full.
pub async fn run_idea_pipeline(
    gateway: &ModelGateway,
    comments: &[Comment],
    options: &IdeaOptions,
) -> Result<IdeaRun, PipelineError> {
    validate_comments(comments)?;
    let groups = taxonomy::group_by_topic(comments);
    info!(topics = groups.len(), "running idea pipeline");

    let tasks: Vec<_> = groups
        .iter()
        .map(|group| process_topic(gateway, group, options))
        .collect();
    let results = execute_concurrently(&options.limiter, tasks).await;

    let mut run = IdeaRun::default();
    let mut completed: Vec<IdeaAssignments> = Vec::new();
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(TopicOutcome::Completed(ideas)) => {
                run.report.topics.push(TopicReport {
                    topic: ideas.topic,
                    comment_count: ideas.comment_count,
                    ideas_generated: ideas.generated.len(),
                    ideas_kept: ideas.kept,
                    ideas_filtered: ideas.dropped,
                });
                completed.push(ideas.assignments);
            }
            Ok(TopicOutcome::Skipped { topic, .. }) => run.report.skipped.push(SkippedTopic {
                topic,
                reason: "too_few_comments".into(),
            }),
            Err(TaskError::Failed(err)) => {
                error!(topic = %err.topic, phase = err.phase, error = %err.message, "topic failed");
                run.report.skipped.push(SkippedTopic {
                    topic: err.topic.clone(),
                    reason: err.to_string(),
                });
            }
            Err(err @ TaskError::Panicked(_)) => {
                error!(topic = %group.topic_name, error = %err, "topic failed");
                run.report.skipped.push(SkippedTopic {
                    topic: group.topic_name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    run.assignments = merge_idea_assignments(&completed);
    run.idea_groups = assign_ideas_to_topics(comments, &run.assignments);
    info!(
        completed = run.report.topics.len(),
        skipped = run.report.skipped.len(),
        ideas = run.idea_groups.iter().map(|g| g.ideas.len()).sum::<usize>(),
        "idea pipeline complete"
    );
    Ok(run)
}
