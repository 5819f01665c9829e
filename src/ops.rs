//! Shared operation wrappers for every interface.
//!
//! Each `op_*` function takes input rows as `serde_json::Value` objects and
//! returns plain JSON. Model-backed operations take a `ModelGateway`; the
//! rest are pure and synchronous. Operations that annotate comments return
//! the original rows with a column added (`topics`, `ideas`), so fields the
//! engine does not know about pass through untouched.

use serde_json::{json, Map, Value};

use crate::algo::comment::{comment_from_row, Comment, RowFields, Topic};
use crate::algo::ideas::{assign_ideas_to_topics, IdeaAssignments};
use crate::algo::{stats, taxonomy};
use crate::config::SensemakerConfig;
use crate::error::PipelineError;
use crate::model::ModelGateway;
use crate::pipeline::categorize::{self, CategorizeOptions};
use crate::pipeline::ideas::{self, IdeaOptions};
use crate::pipeline::validate_comments;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Decode every row, reporting all bad rows at once, then check ids.
pub fn parse_comments(rows: &[Value], fields: &RowFields) -> Result<Vec<Comment>, PipelineError> {
    let mut comments = Vec::with_capacity(rows.len());
    let mut issues = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        match comment_from_row(row, fields) {
            Ok(c) => comments.push(c),
            Err(e) => issues.push(format!("row {idx}: {e}")),
        }
    }
    if !issues.is_empty() {
        return Err(PipelineError::InputValidation { issues });
    }
    validate_comments(&comments)?;
    Ok(comments)
}

/// Copy `rows`, setting `column` from the comment at the same position.
fn with_column<F>(rows: &[Value], comments: &[Comment], column: &str, value: F) -> Value
where
    F: Fn(&Comment) -> Value,
{
    let out: Vec<Value> = rows
        .iter()
        .zip(comments)
        .map(|(row, comment)| {
            let mut obj = row.as_object().cloned().unwrap_or_else(Map::new);
            obj.insert(column.to_string(), value(comment));
            Value::Object(obj)
        })
        .collect();
    Value::Array(out)
}

fn topics_value(comment: &Comment) -> Value {
    json!(comment.topics.as_deref().unwrap_or(&[]))
}

/// Read an `ideas` string-array column, if rows carry one.
fn ideas_column(rows: &[Value], comments: &[Comment]) -> IdeaAssignments {
    let mut assignments = IdeaAssignments::new();
    for (row, comment) in rows.iter().zip(comments) {
        let Some(Value::Array(items)) = row.get("ideas") else {
            continue;
        };
        let ideas: Vec<String> = items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();
        if !ideas.is_empty() {
            assignments.insert(comment.id.clone(), ideas);
        }
    }
    assignments
}

fn stats_value(
    comments: &[Comment],
    assignments: &IdeaAssignments,
    thresholds: stats::IdeaStatsOptions,
) -> Value {
    let overall = stats::aggregate_votes(comments);
    let topics = stats::topic_stats(comments);
    let mut out = json!({
        "overall": overall,
        "topics": topics,
    });
    if !assignments.is_empty() {
        let groups = assign_ideas_to_topics(comments, assignments);
        let scores = stats::score_table_from_votes(comments);
        out["ideas"] = json!(stats::idea_stats(&groups, &scores, thresholds));
    }
    out
}

// ── Operations ───────────────────────────────────────────────────────────────

pub async fn op_categorize(
    gateway: &ModelGateway,
    rows: &[Value],
    fields: &RowFields,
    options: &CategorizeOptions,
) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let categorized = categorize::categorize(gateway, &comments, options).await?;
    Ok(with_column(rows, &categorized, "topics", topics_value))
}

pub async fn op_relevance(
    gateway: &ModelGateway,
    rows: &[Value],
    fields: &RowFields,
    options: &CategorizeOptions,
) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let scored = categorize::calculate_relevance_scores(gateway, &comments, options).await?;
    Ok(with_column(rows, &scored, "topics", topics_value))
}

/// Rows must already carry `topics`. Returns the rows with an `ideas`
/// column, ideas grouped by reporting topic, and the per-topic run report.
pub async fn op_ideas(
    gateway: &ModelGateway,
    rows: &[Value],
    fields: &RowFields,
    options: &IdeaOptions,
) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let run = ideas::run_idea_pipeline(gateway, &comments, options).await?;
    let annotated = with_column(rows, &comments, "ideas", |c| {
        json!(run.assignments.get(&c.id).cloned().unwrap_or_default())
    });
    Ok(json!({
        "comments": annotated,
        "idea_groups": run.idea_groups,
        "report": run.report,
    }))
}

/// Vote rollups overall, per topic and per subtopic. When rows carry an
/// `ideas` column, idea-level stats are added using vote-derived scores.
pub fn op_stats(
    rows: &[Value],
    fields: &RowFields,
    thresholds: stats::IdeaStatsOptions,
) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let assignments = ideas_column(rows, &comments);
    Ok(stats_value(&comments, &assignments, thresholds))
}

pub fn op_taxonomy(rows: &[Value], fields: &RowFields) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let tax = taxonomy::build_taxonomy(&comments);
    let counts: Vec<Value> = taxonomy::group_by_topic(&comments)
        .iter()
        .map(|g| json!({"topic": g.topic_name, "comment_count": g.comments.len()}))
        .collect();
    Ok(json!({
        "taxonomy": tax,
        "paths": taxonomy::flatten(&tax),
        "counts": counts,
    }))
}

/// Pairwise categorization disagreement across repeated runs over the same
/// rows. Each run is an array of rows carrying `topics`.
pub fn op_stability(runs: &[Vec<Value>], fields: &RowFields) -> Result<Value, PipelineError> {
    let parsed: Vec<Vec<Comment>> = runs
        .iter()
        .map(|rows| parse_comments(rows, fields))
        .collect::<Result<_, _>>()?;
    let summary = stats::categorization_stability(&parsed).ok_or_else(|| {
        PipelineError::invalid("stability needs at least two categorization runs")
    })?;
    Ok(json!({
        "runs": parsed.len(),
        "diff_rate": summary,
    }))
}

/// Full pipeline: categorize, optionally score relevance, cluster ideas,
/// then report. Relevance runs only when `cfg.calculate_relevance` is set.
pub async fn op_run(
    gateway: &ModelGateway,
    rows: &[Value],
    fields: &RowFields,
    cfg: &SensemakerConfig,
    seed_topics: Option<Vec<Topic>>,
    use_existing: bool,
) -> Result<Value, PipelineError> {
    let comments = parse_comments(rows, fields)?;
    let cat_options = CategorizeOptions {
        seed_topics,
        use_existing,
        ..CategorizeOptions::from_config(cfg)?
    };

    let categorized = categorize::categorize(gateway, &comments, &cat_options).await?;
    let scored = if cfg.calculate_relevance {
        categorize::calculate_relevance_scores(gateway, &categorized, &cat_options).await?
    } else {
        categorized
    };
    let run = ideas::run_idea_pipeline(gateway, &scored, &IdeaOptions::from(cfg)).await?;

    let annotated: Vec<Value> = rows
        .iter()
        .zip(&scored)
        .map(|(row, comment)| {
            let mut obj = row.as_object().cloned().unwrap_or_else(Map::new);
            obj.insert("topics".into(), topics_value(comment));
            obj.insert(
                "ideas".into(),
                json!(run.assignments.get(&comment.id).cloned().unwrap_or_default()),
            );
            Value::Object(obj)
        })
        .collect();

    let thresholds = stats::IdeaStatsOptions {
        consensus_threshold: cfg.consensus_threshold,
        controversy_threshold: cfg.controversy_threshold,
    };
    let tax = taxonomy::build_taxonomy(&scored);
    Ok(json!({
        "comments": annotated,
        "taxonomy": tax,
        "stats": stats_value(&scored, &run.assignments, thresholds),
        "idea_groups": run.idea_groups,
        "report": run.report,
    }))
}
