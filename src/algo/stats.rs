//! Vote and membership rollups for topics, subtopics and ideas.

use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;
use serde::Serialize;

use super::comment::Comment;
use super::ideas::TopicIdeaGroup;
use super::taxonomy;

/// Vote rollup for a group of comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteStats {
    pub total_votes: u64,
    pub agree_votes: u64,
    pub disagree_votes: u64,
    pub pass_votes: u64,
    pub agreement_rate: String,
    pub disagreement_rate: String,
    pub neutral_rate: String,
    pub comment_count: usize,
}

/// Format `part / total` as a one-decimal percentage. A zero total is `0.0%`.
pub fn format_rate(part: u64, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", part as f64 * 100.0 / total as f64)
}

/// Sum the votes of `comments`. Group tallies are collapsed into one total.
pub fn aggregate_votes<'a, I>(comments: I) -> VoteStats
where
    I: IntoIterator<Item = &'a Comment>,
{
    let (mut agree, mut disagree, mut pass, mut total) = (0u64, 0u64, 0u64, 0u64);
    let mut comment_count = 0usize;
    for comment in comments {
        comment_count += 1;
        if let Some(info) = &comment.vote_info {
            let tally = info.combined();
            agree = agree.saturating_add(tally.agree_count);
            disagree = disagree.saturating_add(tally.disagree_count);
            pass = pass.saturating_add(tally.pass_count.unwrap_or(0));
            total = total.saturating_add(tally.total_count());
        }
    }
    VoteStats {
        total_votes: total,
        agree_votes: agree,
        disagree_votes: disagree,
        pass_votes: pass,
        agreement_rate: format_rate(agree, total),
        disagreement_rate: format_rate(disagree, total),
        neutral_rate: format_rate(pass, total),
        comment_count,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtopicStats {
    pub name: String,
    #[serde(flatten)]
    pub stats: VoteStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicStats {
    pub name: String,
    #[serde(flatten)]
    pub stats: VoteStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtopics: Vec<SubtopicStats>,
}

/// Per-topic and per-subtopic rollups, largest topics first. Topics with
/// equal comment counts keep first-seen order.
pub fn topic_stats(comments: &[Comment]) -> Vec<TopicStats> {
    let tax = taxonomy::build_taxonomy(comments);
    let mut result: Vec<TopicStats> = tax
        .par_iter()
        .map(|topic| {
            let members = comments.iter().filter(|c| c.has_topic(&topic.name));
            let mut subtopics: Vec<SubtopicStats> = topic
                .subtopics
                .iter()
                .map(|sub| SubtopicStats {
                    name: sub.name.clone(),
                    stats: aggregate_votes(taxonomy::comments_in_subtopic(
                        comments,
                        &topic.name,
                        &sub.name,
                    )),
                })
                .collect();
            subtopics.sort_by(|a, b| b.stats.comment_count.cmp(&a.stats.comment_count));
            TopicStats {
                name: topic.name.clone(),
                stats: aggregate_votes(members),
                subtopics,
            }
        })
        .collect();
    result.sort_by(|a, b| b.stats.comment_count.cmp(&a.stats.comment_count));
    result
}

/// Per-comment scores joined against idea membership.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommentScores {
    pub agreement: f64,
    pub controversy: f64,
}

pub type ScoreTable = HashMap<String, CommentScores>;

/// Derive scores from vote tallies: agreement is the agree rate and
/// controversy is the difference-of-opinion rank
/// `1 - |agree_rate - disagree_rate| - pass_rate`. Comments without votes
/// are left out of the table.
pub fn score_table_from_votes(comments: &[Comment]) -> ScoreTable {
    comments
        .iter()
        .filter_map(|comment| {
            let tally = comment.vote_info.as_ref()?.combined();
            let total = tally.total_count();
            if total == 0 {
                return None;
            }
            let total = total as f64;
            let agree = tally.agree_count as f64 / total;
            let disagree = tally.disagree_count as f64 / total;
            let pass = tally.pass_count.unwrap_or(0) as f64 / total;
            Some((
                comment.id.clone(),
                CommentScores {
                    agreement: agree,
                    controversy: 1.0 - (agree - disagree).abs() - pass,
                },
            ))
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct IdeaStatsOptions {
    /// Minimum agreement score for a proposal to count as consensus.
    pub consensus_threshold: f64,
    /// Minimum controversy score for a proposal to count as controversial.
    pub controversy_threshold: f64,
}

impl Default for IdeaStatsOptions {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.7,
            controversy_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdeaStats {
    pub topic: String,
    pub idea: String,
    pub proposal_count: usize,
    /// Proposals found in the score table; only these feed the means.
    pub scored_count: usize,
    pub consensus_proposals: usize,
    pub controversial_proposals: usize,
    pub mean_agreement: Option<f64>,
    pub top3_mean_agreement: Option<f64>,
    pub mean_controversy: Option<f64>,
    pub top3_mean_controversy: Option<f64>,
}

/// Idea-level metrics. Proposals missing from `scores` are excluded from the
/// means rather than counted as zero; an idea with no scored proposal gets
/// `None` means.
pub fn idea_stats(
    groups: &[TopicIdeaGroup],
    scores: &ScoreTable,
    options: IdeaStatsOptions,
) -> Vec<IdeaStats> {
    let mut result = Vec::new();
    for group in groups {
        for idea in &group.ideas {
            let scored: Vec<CommentScores> = idea
                .comment_ids
                .iter()
                .filter_map(|id| scores.get(id).copied())
                .collect();
            let agreement: Vec<f64> = scored.iter().map(|s| s.agreement).collect();
            let controversy: Vec<f64> = scored.iter().map(|s| s.controversy).collect();
            result.push(IdeaStats {
                topic: group.topic.clone(),
                idea: idea.idea.clone(),
                proposal_count: idea.comment_ids.len(),
                scored_count: scored.len(),
                consensus_proposals: agreement
                    .iter()
                    .filter(|&&a| a >= options.consensus_threshold)
                    .count(),
                controversial_proposals: controversy
                    .iter()
                    .filter(|&&c| c >= options.controversy_threshold)
                    .count(),
                mean_agreement: mean(&agreement),
                top3_mean_agreement: top_n_mean(&agreement, 3),
                mean_controversy: mean(&controversy),
                top3_mean_controversy: top_n_mean(&controversy, 3),
            });
        }
    }
    result
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn top_n_mean(values: &[f64], n: usize) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted.truncate(n);
    mean(&sorted)
}

/// Summary of a set of measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Self> {
        let mean = mean(values)?;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Some(Self {
            mean,
            stdev: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Share of comments in `a` whose top-level topic set differs from the same
/// comment in `b`. Comments absent from `b` count as differing.
pub fn categorization_diff_rate(a: &[Comment], b: &[Comment]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let other: HashMap<&str, BTreeSet<&str>> = b
        .iter()
        .map(|c| (c.id.as_str(), c.topic_names().collect()))
        .collect();
    let differing = a
        .iter()
        .filter(|c| {
            let mine: BTreeSet<&str> = c.topic_names().collect();
            other.get(c.id.as_str()) != Some(&mine)
        })
        .count();
    differing as f64 / a.len() as f64
}

/// Pairwise categorization differences across repeated runs over the same
/// comments. `None` with fewer than two runs.
pub fn categorization_stability(runs: &[Vec<Comment>]) -> Option<Summary> {
    let mut diffs = Vec::new();
    for (idx, first) in runs.iter().enumerate() {
        for second in &runs[idx + 1..] {
            diffs.push(categorization_diff_rate(first, second));
        }
    }
    Summary::of(&diffs)
}
