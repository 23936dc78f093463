//! Single-wildcard glob matching.

/// Match `text` against `pattern`, where every `wildcard` character in the
/// pattern matches any run of characters, including an empty one. All other
/// characters match literally.
pub fn matches(pattern: &str, text: &str, wildcard: char) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last wildcard seen and the text index it resumed at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == wildcard {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, resume)) = backtrack {
            p = star + 1;
            t = resume + 1;
            backtrack = Some((star, resume + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == wildcard)
}
