use serde_json::json;

use crate::algo::comment::{Comment, Topic};
use crate::algo::taxonomy;

/// One compact JSON object per line, `{"id": .., "text": ..}`.
pub fn comment_lines(comments: &[&Comment]) -> String {
    comments
        .iter()
        .map(|c| json!({"id": c.id, "text": c.text}).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn categorized_lines(comments: &[&Comment]) -> String {
    comments
        .iter()
        .map(|c| {
            json!({"id": c.id, "text": c.text, "topics": c.topics.as_deref().unwrap_or(&[])})
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn depth_instructions(depth: u8) -> &'static str {
    match depth {
        1 => "Assign each comment one or more top-level topics. Do not add subtopics.",
        2 => "Assign each comment one or more topics, and under each topic one or more subtopics.",
        _ => "Assign each comment one or more topics, under each topic one or more subtopics, and under each subtopic one or more themes (listed as that subtopic's \"subtopics\").",
    }
}

pub fn categorization(
    comments: &[&Comment],
    seed: &[Topic],
    depth: u8,
    min_topics: usize,
    max_topics: usize,
) -> String {
    let existing = if seed.is_empty() {
        "There is no existing taxonomy. Propose concise topic names that fit the comments.".to_string()
    } else {
        format!(
            "Prefer these existing topics, written exactly as shown. Create a new topic only when none of them fits:\n<taxonomy>\n{}\n</taxonomy>",
            taxonomy::flatten(seed).join("\n")
        )
    };
    format!(
        r#"TASK: categorize comments

You are analyzing public comments from a civic deliberation. {depth_rule}
Across the whole set, aim for between {min_topics} and {max_topics} distinct top-level topics.
{existing}

Every comment id below must appear exactly once in your answer. Use the ids exactly as given.
If no topic fits a comment, return it with an empty "topics" list.

<comments>
{lines}
</comments>"#,
        depth_rule = depth_instructions(depth),
        lines = comment_lines(comments),
    )
}

pub fn relevance(comments: &[&Comment]) -> String {
    format!(
        r#"TASK: score topic relevance

Each comment below already carries topics (and possibly subtopics). For every topic and subtopic, give a relevance score between 0 and 1 describing how central it is to the comment.
Keep every topic and subtopic name exactly as given; do not add, rename or remove any.

<comments>
{lines}
</comments>"#,
        lines = categorized_lines(comments),
    )
}

pub fn idea_generation(topic: &str, comments: &[&Comment], max_ideas: usize) -> String {
    format!(
        r#"TASK: generate ideas

The comments below were all categorized under the topic "{topic}".
Identify up to {max_ideas} distinct ideas or proposals they express. Each idea is a short, specific label (at most ten words).
Do not repeat an idea under a different wording.

<comments>
{lines}
</comments>"#,
        lines = comment_lines(comments),
    )
}

pub fn idea_categorization(topic: &str, ideas: &[String], comments: &[&Comment]) -> String {
    format!(
        r#"TASK: match comments to ideas

For the topic "{topic}", decide which of the ideas below each comment supports.
Use idea names exactly as listed. A comment may support several ideas or none (return an empty "ideas" list).
Every comment id must appear exactly once in your answer.

<ideas>
{ideas}
</ideas>

<comments>
{lines}
</comments>"#,
        ideas = ideas.join("\n"),
        lines = comment_lines(comments),
    )
}
