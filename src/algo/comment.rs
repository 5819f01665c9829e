//! Comment records, topic trees, and vote tallies.
//!
//! These are the plain data types every pipeline stage passes around. Input
//! rows arrive as loosely-typed JSON objects (the shape an upstream CSV or
//! database collaborator hands over); `comment_from_row` turns one row into a
//! `Comment` or reports why it cannot.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agree/disagree/pass counts for a single comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    #[serde(alias = "agreeCount")]
    pub agree_count: u64,
    #[serde(alias = "disagreeCount")]
    pub disagree_count: u64,
    #[serde(default, alias = "passCount", skip_serializing_if = "Option::is_none")]
    pub pass_count: Option<u64>,
}

impl VoteTally {
    pub fn new(agree_count: u64, disagree_count: u64, pass_count: Option<u64>) -> Self {
        Self {
            agree_count,
            disagree_count,
            pass_count,
        }
    }

    /// Total votes. Passes only count when the tally tracks them.
    pub fn total_count(&self) -> u64 {
        self.agree_count
            .saturating_add(self.disagree_count)
            .saturating_add(self.pass_count.unwrap_or(0))
    }

    fn add(&mut self, other: &VoteTally) {
        self.agree_count = self.agree_count.saturating_add(other.agree_count);
        self.disagree_count = self.disagree_count.saturating_add(other.disagree_count);
        self.pass_count = match (self.pass_count, other.pass_count) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
    }
}

/// Vote information attached to a comment: either one tally for all
/// respondents, or one tally per respondent group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteInfo {
    Tally(VoteTally),
    Groups(BTreeMap<String, VoteTally>),
}

impl VoteInfo {
    /// Collapse group tallies into a single tally. Group breakdown is dropped.
    pub fn combined(&self) -> VoteTally {
        match self {
            VoteInfo::Tally(tally) => *tally,
            VoteInfo::Groups(groups) => {
                let mut total = VoteTally::default();
                for tally in groups.values() {
                    total.add(tally);
                }
                total
            }
        }
    }
}

/// A nested category below a topic. Depth-3 categorization adds one more
/// level through `subtopics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtopics: Vec<Subtopic>,
}

impl Subtopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relevance: None,
            subtopics: Vec::new(),
        }
    }
}

/// A top-level category. Identity is the exact, case-sensitive name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtopics: Vec<Subtopic>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relevance: None,
            subtopics: Vec::new(),
        }
    }

    pub fn with_subtopics<I, S>(name: impl Into<String>, subtopics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            relevance: None,
            subtopics: subtopics.into_iter().map(Subtopic::new).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
    /// `None` until categorized; `Some(vec![])` when the model could not
    /// place the comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<Topic>>,
    #[serde(
        default,
        alias = "voteInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub vote_info: Option<VoteInfo>,
}

impl Comment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            topics: None,
            vote_info: None,
        }
    }

    pub fn with_votes(mut self, vote_info: VoteInfo) -> Self {
        self.vote_info = Some(vote_info);
        self
    }

    pub fn with_topics(mut self, topics: Vec<Topic>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Top-level topic names, in assignment order.
    pub fn topic_names(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .flatten()
            .map(|topic| topic.name.as_str())
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topic_names().any(|topic| topic == name)
    }
}

/// All comments assigned to one topic. Built by inverting the
/// comment → topic relation for per-topic idea generation.
#[derive(Debug, Clone)]
pub struct TopicWithComments {
    pub topic_name: String,
    pub comments: Vec<Comment>,
}

/// Column names used when decoding input rows.
#[derive(Debug, Clone)]
pub struct RowFields {
    pub id: String,
    pub text: String,
}

impl Default for RowFields {
    fn default() -> Self {
        Self {
            id: "id".into(),
            text: "text".into(),
        }
    }
}

/// Decode one input row into a `Comment`.
///
/// Votes are read from, in order of preference:
/// 1. a `vote_info` / `voteInfo` object,
/// 2. per-group columns `Group-N-agree-count` / `-disagree-count` / `-pass-count`,
/// 3. flat `agrees` / `disagrees` / `passes` columns.
///
/// Topics may be a JSON array of topic objects or a `"Topic:Subtopic;Other"`
/// string.
pub fn comment_from_row(row: &Value, fields: &RowFields) -> Result<Comment, String> {
    let obj = row
        .as_object()
        .ok_or_else(|| "input row is not a JSON object".to_string())?;

    let id = match obj.get(&fields.id) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(format!("row is missing a non-empty '{}' field", fields.id)),
    };
    let text = match obj.get(&fields.text) {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(format!("comment '{id}' is missing a '{}' string field", fields.text)),
    };

    let topics = match obj.get("topics") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(parse_topic_string(s)),
        Some(other) => Some(
            serde_json::from_value::<Vec<Topic>>(other.clone())
                .map_err(|e| format!("comment '{id}' has malformed topics: {e}"))?,
        ),
    };

    let vote_info = decode_votes(obj, &id)?;

    Ok(Comment {
        id,
        text,
        topics,
        vote_info,
    })
}

/// Parse `"Topic:Subtopic;Topic:Other;Solo"` into topic trees, merging
/// repeated topic names.
pub fn parse_topic_string(raw: &str) -> Vec<Topic> {
    let mut topics: Vec<Topic> = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (topic_name, subtopic_name) = match entry.split_once(':') {
            Some((t, s)) => (t.trim(), Some(s.trim()).filter(|s| !s.is_empty())),
            None => (entry, None),
        };
        let idx = match topics.iter().position(|t| t.name == topic_name) {
            Some(idx) => idx,
            None => {
                topics.push(Topic::new(topic_name));
                topics.len() - 1
            }
        };
        if let Some(sub) = subtopic_name {
            let topic = &mut topics[idx];
            if !topic.subtopics.iter().any(|s| s.name == sub) {
                topic.subtopics.push(Subtopic::new(sub));
            }
        }
    }
    topics
}

fn group_column_regex() -> &'static Regex {
    static GROUP_RE: OnceLock<Regex> = OnceLock::new();
    GROUP_RE.get_or_init(|| {
        Regex::new(r"(?i)^group-(\d+)-(agree|disagree|pass)-count$")
            .expect("group column regex compiles")
    })
}

fn decode_votes(
    obj: &serde_json::Map<String, Value>,
    id: &str,
) -> Result<Option<VoteInfo>, String> {
    if let Some(raw) = obj.get("vote_info").or_else(|| obj.get("voteInfo")) {
        if raw.is_null() {
            return Ok(None);
        }
        return serde_json::from_value::<VoteInfo>(raw.clone())
            .map(Some)
            .map_err(|e| format!("comment '{id}' has malformed vote info: {e}"));
    }

    let mut groups: BTreeMap<String, VoteTally> = BTreeMap::new();
    for (key, value) in obj {
        let Some(caps) = group_column_regex().captures(key) else {
            continue;
        };
        let count = vote_count(value, key, id)?;
        let tally = groups.entry(format!("Group-{}", &caps[1])).or_default();
        match caps[2].to_ascii_lowercase().as_str() {
            "agree" => tally.agree_count = count,
            "disagree" => tally.disagree_count = count,
            _ => tally.pass_count = Some(count),
        }
    }
    if !groups.is_empty() {
        return Ok(Some(VoteInfo::Groups(groups)));
    }

    let agrees = obj.get("agrees");
    let disagrees = obj.get("disagrees");
    if agrees.is_none() && disagrees.is_none() {
        return Ok(None);
    }
    let tally = VoteTally {
        agree_count: agrees.map_or(Ok(0), |v| vote_count(v, "agrees", id))?,
        disagree_count: disagrees.map_or(Ok(0), |v| vote_count(v, "disagrees", id))?,
        pass_count: obj
            .get("passes")
            .map(|v| vote_count(v, "passes", id))
            .transpose()?,
    };
    Ok(Some(VoteInfo::Tally(tally)))
}

fn vote_count(value: &Value, column: &str, id: &str) -> Result<u64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        format!("comment '{id}' has invalid vote count in '{column}': expected a non-negative integer, got {value}")
    })
}
