use serde::Deserialize;

use super::comment::{Comment, Subtopic, Topic, TopicWithComments};

/// Build the corpus-wide taxonomy from categorized comments.
///
/// Topics and subtopics are merged by exact name in first-seen order.
/// Relevance scores are per-comment and are not carried over.
pub fn build_taxonomy(comments: &[Comment]) -> Vec<Topic> {
    merge_topics(comments.iter().flat_map(|c| c.topics.iter().flatten()))
}

/// Merge topic trees by exact name, first-seen order, scores dropped.
pub fn merge_topics<'a, I>(topics: I) -> Vec<Topic>
where
    I: IntoIterator<Item = &'a Topic>,
{
    let mut taxonomy: Vec<Topic> = Vec::new();
    for topic in topics {
        let idx = match taxonomy.iter().position(|t| t.name == topic.name) {
            Some(idx) => idx,
            None => {
                taxonomy.push(Topic::new(topic.name.clone()));
                taxonomy.len() - 1
            }
        };
        merge_subtopics(&mut taxonomy[idx].subtopics, &topic.subtopics);
    }
    taxonomy
}

fn merge_subtopics(into: &mut Vec<Subtopic>, from: &[Subtopic]) {
    for sub in from {
        let idx = match into.iter().position(|s| s.name == sub.name) {
            Some(idx) => idx,
            None => {
                into.push(Subtopic::new(sub.name.clone()));
                into.len() - 1
            }
        };
        merge_subtopics(&mut into[idx].subtopics, &sub.subtopics);
    }
}

/// Flatten into `"Topic > Subtopic > Theme"` paths, parents before children.
pub fn flatten(taxonomy: &[Topic]) -> Vec<String> {
    let mut result = Vec::new();
    for topic in taxonomy {
        result.push(topic.name.clone());
        for sub in &topic.subtopics {
            flatten_recursive(sub, &topic.name, &mut result);
        }
    }
    result
}

fn flatten_recursive(sub: &Subtopic, prefix: &str, out: &mut Vec<String>) {
    let path = format!("{prefix} > {}", sub.name);
    out.push(path.clone());
    for child in &sub.subtopics {
        flatten_recursive(child, &path, out);
    }
}

/// Invert the comment → topic relation. Groups follow first-seen topic
/// order; each comment appears once per distinct topic it carries.
pub fn group_by_topic(comments: &[Comment]) -> Vec<TopicWithComments> {
    let mut groups: Vec<TopicWithComments> = Vec::new();
    for comment in comments {
        let mut seen: Vec<&str> = Vec::new();
        for name in comment.topic_names() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            match groups.iter_mut().find(|g| g.topic_name == name) {
                Some(group) => group.comments.push(comment.clone()),
                None => groups.push(TopicWithComments {
                    topic_name: name.to_string(),
                    comments: vec![comment.clone()],
                }),
            }
        }
    }
    groups
}

/// Comments carrying `subtopic` under `topic`.
pub fn comments_in_subtopic<'a>(
    comments: &'a [Comment],
    topic: &str,
    subtopic: &str,
) -> Vec<&'a Comment> {
    comments
        .iter()
        .filter(|c| {
            c.topics.iter().flatten().any(|t| {
                t.name == topic && t.subtopics.iter().any(|s| s.name == subtopic)
            })
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaxonomyDoc {
    Bare(Vec<Topic>),
    Wrapped { topics: Vec<Topic> },
}

/// Parse a seed taxonomy: either a JSON array of topics or `{"topics": [...]}`.
pub fn parse_taxonomy(json: &str) -> Result<Vec<Topic>, String> {
    let doc: TaxonomyDoc =
        serde_json::from_str(json).map_err(|e| format!("Failed to parse taxonomy: {e}"))?;
    let topics = match doc {
        TaxonomyDoc::Bare(topics) | TaxonomyDoc::Wrapped { topics } => topics,
    };
    if let Some(blank) = topics.iter().find(|t| t.name.trim().is_empty()) {
        return Err(format!("Taxonomy contains a topic with an empty name: {blank:?}"));
    }
    Ok(topics)
}

/// Load a seed taxonomy from a file path.
pub fn load_taxonomy(path: &str) -> Result<Vec<Topic>, String> {
    let json =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
    parse_taxonomy(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categorized() -> Vec<Comment> {
        vec![
            Comment::new("1", "buses late").with_topics(vec![Topic::with_subtopics(
                "Transit",
                ["Buses"],
            )]),
            Comment::new("2", "rail and parks").with_topics(vec![
                Topic::with_subtopics("Transit", ["Rail", "Buses"]),
                Topic::new("Parks"),
            ]),
            Comment::new("3", "nothing").with_topics(vec![]),
            Comment::new("4", "uncategorized"),
        ]
    }

    #[test]
    fn taxonomy_dedupes_by_name() {
        let tax = build_taxonomy(&categorized());
        assert_eq!(tax.len(), 2);
        assert_eq!(tax[0].name, "Transit");
        let subs: Vec<&str> = tax[0].subtopics.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(subs, vec!["Buses", "Rail"]);
        assert_eq!(tax[1].name, "Parks");
    }

    #[test]
    fn flatten_produces_paths() {
        let mut tax = build_taxonomy(&categorized());
        tax[0].subtopics[0].subtopics.push(Subtopic::new("Frequency"));
        let flat = flatten(&tax);
        assert_eq!(
            flat,
            vec![
                "Transit",
                "Transit > Buses",
                "Transit > Buses > Frequency",
                "Transit > Rail",
                "Parks"
            ]
        );
    }

    #[test]
    fn group_by_topic_inverts_relation() {
        let groups = group_by_topic(&categorized());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].topic_name, "Transit");
        let ids: Vec<&str> = groups[0].comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(groups[1].comments.len(), 1);
    }

    #[test]
    fn group_by_topic_counts_repeated_topic_once() {
        let c = Comment::new("x", "t").with_topics(vec![Topic::new("A"), Topic::new("A")]);
        let groups = group_by_topic(&[c]);
        assert_eq!(groups[0].comments.len(), 1);
    }

    #[test]
    fn subtopic_filter() {
        let comments = categorized();
        let buses = comments_in_subtopic(&comments, "Transit", "Buses");
        assert_eq!(buses.len(), 2);
        assert!(comments_in_subtopic(&comments, "Parks", "Buses").is_empty());
    }

    #[test]
    fn parse_taxonomy_accepts_both_shapes() {
        let bare = parse_taxonomy(r#"[{"name": "Transit", "subtopics": [{"name": "Rail"}]}]"#)
            .unwrap();
        assert_eq!(bare[0].subtopics[0].name, "Rail");
        let wrapped = parse_taxonomy(r#"{"topics": [{"name": "Parks"}]}"#).unwrap();
        assert_eq!(wrapped[0].name, "Parks");
        assert!(parse_taxonomy(r#"[{"name": " "}]"#).is_err());
        assert!(parse_taxonomy("not json").is_err());
    }
}
