//! Marker substitution: replaces `FUZZ`, `FUZ2Z`, `FUZ3Z`, ... with the
//! payload tuple bound to one emitted request.

use crate::payload::FuzzWord;

fn marker_for_index(index: usize) -> String {
    if index == 1 {
        "FUZZ".to_string()
    } else {
        format!("FUZ{index}Z")
    }
}

/// Substitutes every marker present in `template` with its bound payload
/// value. Markers without a bound value (index beyond the tuple length) are
/// left untouched.
pub fn substitute(template: &str, words: &[FuzzWord]) -> String {
    let mut out = template.to_string();
    for (i, word) in words.iter().enumerate() {
        out = out.replace(&marker_for_index(i + 1), &word.content);
    }
    out
}

pub fn contains_marker(template: &str) -> bool {
    template.contains("FUZZ") || template.contains("FUZ2Z")
}
