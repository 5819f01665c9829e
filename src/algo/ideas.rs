//! Pure idea bookkeeping: support counting, low-support filtering, merging
//! per-topic results, and placing each idea under one reporting topic.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::comment::Comment;

/// `commentId -> ideaName[]`
pub type IdeaAssignments = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdeaCount {
    pub idea: String,
    pub count: usize,
}

/// Outcome of the filter phase for one topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilteredIdeas {
    /// Ideas meeting the support threshold, in generation order.
    pub kept: Vec<IdeaCount>,
    /// Ideas dropped for low support, with their counts.
    pub dropped: Vec<IdeaCount>,
    /// Assignments restricted to kept ideas. Comments left with no idea are
    /// removed rather than redistributed.
    pub assignments: IdeaAssignments,
}

/// Count supporting comments per idea and drop ideas below `min_proposals`.
pub fn filter_ideas(
    ideas: &[String],
    assignments: &IdeaAssignments,
    min_proposals: usize,
) -> FilteredIdeas {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for matched in assignments.values() {
        let mut seen: Vec<&str> = Vec::new();
        for idea in matched {
            if !seen.contains(&idea.as_str()) {
                seen.push(idea);
                *counts.entry(idea.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut result = FilteredIdeas::default();
    for idea in ideas {
        let count = counts.get(idea.as_str()).copied().unwrap_or(0);
        let entry = IdeaCount {
            idea: idea.clone(),
            count,
        };
        if count >= min_proposals {
            result.kept.push(entry);
        } else {
            result.dropped.push(entry);
        }
    }

    for (comment_id, matched) in assignments {
        let mut surviving: Vec<String> = Vec::new();
        for idea in matched {
            if result.kept.iter().any(|k| &k.idea == idea) && !surviving.contains(idea) {
                surviving.push(idea.clone());
            }
        }
        if !surviving.is_empty() {
            result.assignments.insert(comment_id.clone(), surviving);
        }
    }
    result
}

/// Union per-topic assignments into one map. A comment in several topics
/// accumulates ideas from each, first-seen order, without duplicates.
pub fn merge_idea_assignments<'a, I>(per_topic: I) -> IdeaAssignments
where
    I: IntoIterator<Item = &'a IdeaAssignments>,
{
    let mut merged = IdeaAssignments::new();
    for assignments in per_topic {
        for (comment_id, ideas) in assignments {
            let entry = merged.entry(comment_id.clone()).or_default();
            for idea in ideas {
                if !entry.contains(idea) {
                    entry.push(idea.clone());
                }
            }
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdeaGroup {
    pub idea: String,
    pub comment_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicIdeaGroup {
    pub topic: String,
    pub ideas: Vec<IdeaGroup>,
}

/// Place every idea under the topic that occurs most often among its member
/// comments.
///
/// Ties go to the lexicographically smallest topic name, so the result does
/// not depend on comment order. Ideas whose comments carry no topic are
/// dropped. Topics appear in first-seen order of their first placed idea.
pub fn assign_ideas_to_topics(
    comments: &[Comment],
    assignments: &IdeaAssignments,
) -> Vec<TopicIdeaGroup> {
    let by_id: HashMap<&str, &Comment> = comments.iter().map(|c| (c.id.as_str(), c)).collect();

    // Idea -> member comment ids, in comment order.
    let mut members: Vec<(String, Vec<String>)> = Vec::new();
    for comment in comments {
        let Some(ideas) = assignments.get(&comment.id) else {
            continue;
        };
        for idea in ideas {
            match members.iter_mut().find(|(name, _)| name == idea) {
                Some((_, ids)) => ids.push(comment.id.clone()),
                None => members.push((idea.clone(), vec![comment.id.clone()])),
            }
        }
    }

    let mut groups: Vec<TopicIdeaGroup> = Vec::new();
    for (idea, comment_ids) in members {
        let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
        for id in &comment_ids {
            if let Some(comment) = by_id.get(id.as_str()) {
                for topic in comment.topic_names() {
                    *tally.entry(topic).or_insert(0) += 1;
                }
            }
        }
        // BTreeMap iterates names ascending; keep the first maximum.
        let mut best: Option<(&str, usize)> = None;
        for (topic, count) in tally {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((topic, count));
            }
        }
        let Some((topic, _)) = best else {
            continue;
        };

        let group = IdeaGroup { idea, comment_ids };
        match groups.iter_mut().find(|g| g.topic == topic) {
            Some(existing) => existing.ideas.push(group),
            None => groups.push(TopicIdeaGroup {
                topic: topic.to_string(),
                ideas: vec![group],
            }),
        }
    }
    groups
}
