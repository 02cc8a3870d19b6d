//! Spam-signal feature extraction from raw post text.
//!
//! Pure and stateless; runs once at ingest and the result is immutable.

use crate::domain::PostFeatures;

/// Compute spam-signal features for a post body.
pub fn extract(text: &str) -> PostFeatures {
    let chars: Vec<char> = text.chars().collect();
    let mut cashtag_count = 0u32;
    let mut mention_count = 0u32;
    let mut url_count = 0u32;

    // Alphabetic chars remaining after stripping URLs, mentions and cashtags
    let mut letters = 0u64;
    let mut upper = 0u64;

    let mut i = 0;
    while i < chars.len() {
        if let Some(end) = match_url(&chars, i) {
            url_count += 1;
            i = end;
            continue;
        }
        if let Some(end) = match_mention(&chars, i) {
            mention_count += 1;
            i = end;
            continue;
        }
        if let Some(end) = match_cashtag(&chars, i) {
            cashtag_count += 1;
            i = end;
            continue;
        }
        let c = chars[i];
        if c.is_alphabetic() {
            letters += 1;
            if c.is_uppercase() {
                upper += 1;
            }
        }
        i += 1;
    }

    let caps_ratio = if letters == 0 {
        0.0
    } else {
        upper as f64 / letters as f64
    };

    PostFeatures {
        cashtag_count,
        mention_count,
        url_count,
        caps_ratio,
        is_reply: None,
        is_quote: None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `http://` or `https://` followed by at least one non-whitespace char.
/// Returns the index just past the URL.
fn match_url(chars: &[char], start: usize) -> Option<usize> {
    let rest: String = chars[start..].iter().take(8).collect();
    let scheme_len = if rest.starts_with("https://") {
        8
    } else if rest.starts_with("http://") {
        7
    } else {
        return None;
    };

    let body_start = start + scheme_len;
    let mut end = body_start;
    while end < chars.len() && !chars[end].is_whitespace() {
        end += 1;
    }
    if end == body_start {
        return None;
    }
    Some(end)
}

/// `@` followed by at least one word character.
fn match_mention(chars: &[char], start: usize) -> Option<usize> {
    if chars[start] != '@' {
        return None;
    }
    let mut end = start + 1;
    while end < chars.len() && is_word_char(chars[end]) {
        end += 1;
    }
    if end == start + 1 {
        return None;
    }
    Some(end)
}

/// `$` followed by 1-5 uppercase ASCII letters ending at a word boundary.
fn match_cashtag(chars: &[char], start: usize) -> Option<usize> {
    if chars[start] != '$' {
        return None;
    }
    let mut end = start + 1;
    while end < chars.len() && chars[end].is_ascii_uppercase() {
        end += 1;
    }
    let run = end - (start + 1);
    if run == 0 || run > 5 {
        return None;
    }
    // $ABc reads as a word, not a ticker
    if end < chars.len() && is_word_char(chars[end]) {
        return None;
    }
    Some(end)
}
