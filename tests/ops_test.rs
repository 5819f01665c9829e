use std::sync::Arc;

use async_trait::async_trait;
use sensemaker::algo::comment::RowFields;
use sensemaker::algo::stats::IdeaStatsOptions;
use sensemaker::config::SensemakerConfig;
use sensemaker::error::{ModelError, PipelineError};
use sensemaker::model::{Limiter, ModelGateway, RetryPolicy, TextModel};
use sensemaker::ops;
use sensemaker::pipeline::categorize::CategorizeOptions;
use serde_json::{json, Value};

fn voted_records() -> Vec<Value> {
    vec![
        json!({"id": "1", "text": "More buses at night", "topics": "Transit:Buses", "agrees": 10, "disagrees": 5, "passes": 0}),
        json!({"id": "2", "text": "Fix the potholes", "topics": "Transit:Roads", "agrees": 2, "disagrees": 5, "passes": 3}),
        json!({"id": "3", "text": "Plant trees", "topics": "Parks", "agrees": 0, "disagrees": 0, "passes": 0}),
    ]
}

fn topic<'a>(stats: &'a Value, name: &str) -> &'a Value {
    stats["topics"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == name)
        .unwrap()
}

#[test]
fn ops_stats_aggregates_topic_votes() {
    let result =
        ops::op_stats(&voted_records(), &RowFields::default(), IdeaStatsOptions::default())
            .unwrap();
    let transit = topic(&result, "Transit");
    assert_eq!(transit["agree_votes"], 12);
    assert_eq!(transit["disagree_votes"], 10);
    assert_eq!(transit["pass_votes"], 3);
    assert_eq!(transit["total_votes"], 25);
    assert_eq!(transit["agreement_rate"], "48.0%");
    assert_eq!(transit["comment_count"], 2);
    assert_eq!(transit["subtopics"].as_array().unwrap().len(), 2);
    assert!(result.get("ideas").is_none());
}

#[test]
fn ops_stats_zero_vote_topic() {
    let result =
        ops::op_stats(&voted_records(), &RowFields::default(), IdeaStatsOptions::default())
            .unwrap();
    let parks = topic(&result, "Parks");
    assert_eq!(parks["total_votes"], 0);
    assert_eq!(parks["agreement_rate"], "0.0%");
    assert_eq!(parks["disagreement_rate"], "0.0%");
    assert_eq!(parks["neutral_rate"], "0.0%");
}

#[test]
fn ops_stats_group_vote_columns() {
    let rows = vec![json!({
        "id": "g",
        "text": "x",
        "topics": "Safety",
        "Group-0-agree-count": 3,
        "Group-0-disagree-count": 1,
        "Group-1-agree-count": "1",
        "Group-1-disagree-count": "5",
    })];
    let result = ops::op_stats(&rows, &RowFields::default(), IdeaStatsOptions::default()).unwrap();
    assert_eq!(result["overall"]["total_votes"], 10);
    assert_eq!(result["overall"]["agreement_rate"], "40.0%");
}

#[test]
fn ops_stats_with_idea_column() {
    let mut rows = voted_records();
    rows[0]["ideas"] = json!(["Night service"]);
    rows[1]["ideas"] = json!(["Night service"]);
    let result = ops::op_stats(&rows, &RowFields::default(), IdeaStatsOptions::default()).unwrap();
    let ideas = result["ideas"].as_array().unwrap();
    assert_eq!(ideas.len(), 1);
    assert_eq!(ideas[0]["topic"], "Transit");
    assert_eq!(ideas[0]["proposal_count"], 2);
    assert_eq!(ideas[0]["scored_count"], 2);
}

#[test]
fn ops_stats_rejects_duplicate_ids() {
    let rows = vec![json!({"id": "1", "text": "a"}), json!({"id": "1", "text": "b"})];
    let err = ops::op_stats(&rows, &RowFields::default(), IdeaStatsOptions::default()).unwrap_err();
    assert!(matches!(err, PipelineError::InputValidation { .. }));
}

#[test]
fn ops_taxonomy_builds_paths() {
    let result = ops::op_taxonomy(&voted_records(), &RowFields::default()).unwrap();
    let paths: Vec<&str> = result["paths"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(
        paths,
        vec!["Transit", "Transit > Buses", "Transit > Roads", "Parks"]
    );
    assert_eq!(result["counts"][0]["comment_count"], 2);
}

#[test]
fn ops_stability_summarizes_runs() {
    let run_a = vec![
        json!({"id": "1", "text": "a", "topics": "Transit"}),
        json!({"id": "2", "text": "b", "topics": "Parks"}),
    ];
    let run_b = vec![
        json!({"id": "1", "text": "a", "topics": "Transit"}),
        json!({"id": "2", "text": "b", "topics": "Housing"}),
    ];
    let result = ops::op_stability(&[run_a.clone(), run_b], &RowFields::default()).unwrap();
    assert_eq!(result["runs"], 2);
    assert_eq!(result["diff_rate"]["mean"], 0.5);
    assert!(ops::op_stability(&[run_a], &RowFields::default()).is_err());
}

// ── Model-backed operations ──────────────────────────────────────────────────

/// Routes each prompt by its task header and answers for every comment line.
struct CivicModel;

fn listed_comments(prompt: &str) -> Vec<(String, String)> {
    prompt
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l.trim()).ok())
        .filter_map(|v| {
            Some((
                v.get("id")?.as_str()?.to_string(),
                v.get("text")?.as_str()?.to_lowercase(),
            ))
        })
        .collect()
}

#[async_trait]
impl TextModel for CivicModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let comments = listed_comments(prompt);
        let answer: Value = if prompt.starts_with("TASK: categorize comments") {
            comments
                .iter()
                .map(|(id, text)| {
                    let (topic, sub) = if text.contains("bus") {
                        ("Transit", "Buses")
                    } else {
                        ("Parks", "Trees")
                    };
                    json!({"id": id, "topics": [{"name": topic, "subtopics": [{"name": sub}]}]})
                })
                .collect()
        } else if prompt.starts_with("TASK: score topic relevance") {
            comments
                .iter()
                .map(|(id, _)| {
                    json!({"id": id, "topics": [
                        {"name": "Transit", "relevance": 0.8, "subtopics": [{"name": "Buses", "relevance": 0.6}]},
                        {"name": "Parks", "relevance": 0.7}
                    ]})
                })
                .collect()
        } else if prompt.starts_with("TASK: generate ideas") {
            if prompt.contains("\"Transit\"") {
                json!(["Night buses", "Bus shelters"])
            } else {
                json!(["More trees"])
            }
        } else {
            comments
                .iter()
                .map(|(id, text)| {
                    let ideas: Vec<&str> = if text.contains("night") {
                        vec!["Night buses"]
                    } else if text.contains("shelter") {
                        vec!["Bus shelters"]
                    } else if text.contains("tree") {
                        vec!["More trees"]
                    } else {
                        vec![]
                    };
                    json!({"id": id, "ideas": ideas})
                })
                .collect()
        };
        Ok(answer.to_string())
    }
}

fn civic_gateway() -> ModelGateway {
    ModelGateway::new(Arc::new(CivicModel), Limiter::bounded(2), RetryPolicy::immediate(2))
}

fn civic_records() -> Vec<Value> {
    vec![
        json!({"id": 1, "text": "Run buses at night", "agrees": 9, "disagrees": 1, "author": "a"}),
        json!({"id": 2, "text": "Night bus service please", "agrees": 8, "disagrees": 2}),
        json!({"id": 3, "text": "Bus shelter at Main St", "agrees": 3, "disagrees": 3}),
        json!({"id": 4, "text": "Plant trees downtown", "agrees": 5, "disagrees": 0}),
        json!({"id": 5, "text": "More trees by the river", "agrees": 4, "disagrees": 1}),
    ]
}

#[tokio::test]
async fn ops_categorize_adds_topics_column() {
    let rows = civic_records();
    let options = CategorizeOptions {
        min_topics: 1,
        ..CategorizeOptions::default()
    };
    let result = ops::op_categorize(&civic_gateway(), &rows, &RowFields::default(), &options)
        .await
        .unwrap();
    let arr = result.as_array().unwrap();
    assert_eq!(arr.len(), 5);
    assert_eq!(arr[0]["author"], "a");
    assert_eq!(arr[0]["topics"][0]["name"], "Transit");
    assert_eq!(arr[0]["topics"][0]["subtopics"][0]["name"], "Buses");
    assert_eq!(arr[3]["topics"][0]["name"], "Parks");
}

#[tokio::test]
async fn ops_run_produces_full_report() {
    let cfg = SensemakerConfig {
        min_comments: 2,
        min_proposals: 2,
        min_topics: 1,
        calculate_relevance: true,
        ..SensemakerConfig::default()
    };
    let result = ops::op_run(
        &civic_gateway(),
        &civic_records(),
        &RowFields::default(),
        &cfg,
        None,
        false,
    )
    .await
    .unwrap();

    let comments = result["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 5);
    assert_eq!(comments[0]["topics"][0]["relevance"], 0.8);
    assert_eq!(comments[0]["ideas"], json!(["Night buses"]));
    assert_eq!(comments[2]["ideas"], json!([]));

    // "Bus shelters" has one supporter and is filtered out.
    let transit = result["report"]["topics"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["topic"] == "Transit")
        .unwrap();
    assert_eq!(transit["ideas_generated"], 2);
    assert_eq!(transit["ideas_filtered"][0]["idea"], "Bus shelters");
    assert_eq!(transit["ideas_filtered"][0]["count"], 1);

    let groups = result["idea_groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    let idea_stats = result["stats"]["ideas"].as_array().unwrap();
    assert_eq!(idea_stats.len(), 2);
    assert_eq!(result["taxonomy"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn ops_run_skips_relevance_by_default() {
    let cfg = SensemakerConfig {
        min_comments: 2,
        min_proposals: 2,
        min_topics: 1,
        ..SensemakerConfig::default()
    };
    let result = ops::op_run(
        &civic_gateway(),
        &civic_records(),
        &RowFields::default(),
        &cfg,
        None,
        false,
    )
    .await
    .unwrap();
    let comments = result["comments"].as_array().unwrap();
    assert_eq!(comments[0]["topics"][0]["name"], "Transit");
    assert!(comments[0]["topics"][0].get("relevance").is_none());
    assert_eq!(comments[0]["ideas"], json!(["Night buses"]));
}

#[tokio::test]
async fn ops_ideas_reports_small_topics_as_skipped() {
    let rows = vec![
        json!({"id": "1", "text": "trees", "topics": "Parks"}),
        json!({"id": "2", "text": "night bus", "topics": "Transit"}),
    ];
    let options = sensemaker::pipeline::ideas::IdeaOptions {
        min_comments: 2,
        ..Default::default()
    };
    let result = ops::op_ideas(&civic_gateway(), &rows, &RowFields::default(), &options)
        .await
        .unwrap();
    let skipped = result["report"]["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|s| s["reason"] == "too_few_comments"));
    assert_eq!(result["comments"][0]["ideas"], json!([]));
}
