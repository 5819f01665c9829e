use unicode_segmentation::UnicodeSegmentation;

/// Count Unicode words in `text`.
pub fn word_count(text: &str) -> usize {
    text.unicode_words().count()
}

/// Rough model-token estimate: about three words per four tokens, plus one
/// token per punctuation-heavy run the word splitter skips.
pub fn approx_tokens(text: &str) -> usize {
    let words = word_count(text);
    let symbols = text
        .split_word_bounds()
        .filter(|s| !s.trim().is_empty() && !s.chars().any(char::is_alphanumeric))
        .count();
    (words * 4).div_ceil(3) + symbols
}

/// Split `items` into contiguous batches holding at most `max_items` entries
/// and at most `max_tokens` estimated tokens. An item that alone exceeds the
/// token budget still gets a batch of its own.
pub fn batch_by_budget<'a, T, F>(
    items: &'a [T],
    max_items: usize,
    max_tokens: usize,
    cost: F,
) -> Vec<&'a [T]>
where
    F: Fn(&T) -> usize,
{
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;

    for (idx, item) in items.iter().enumerate() {
        let item_tokens = cost(item);
        let len = idx - start;
        let over_budget = len > 0 && tokens + item_tokens > max_tokens;
        if len == max_items || over_budget {
            batches.push(&items[start..idx]);
            start = idx;
            tokens = 0;
        }
        tokens += item_tokens;
    }
    if start < items.len() {
        batches.push(&items[start..]);
    }
    batches
}
