use std::collections::BTreeMap;

/// Raw `key: value` pairs from the block at the head of a Markdown document
pub type FrontMatter = BTreeMap<String, String>;

const MARKER: &str = "---";

/// Split a Markdown document into its body and front matter.
///
/// The block must open on the very first line and is closed by the next
/// `---` line. Without a closing marker the document is returned untouched.
pub fn parse(text: &str) -> (&str, FrontMatter) {
    let mut front_matter = FrontMatter::new();

    let Some((first, mut rest)) = split_line(text) else {
        return (text, front_matter);
    };
    if !is_marker(first) {
        return (text, front_matter);
    }

    let mut interior = Vec::new();
    loop {
        let Some((line, remainder)) = split_line(rest) else {
            // Opened but never closed
            return (text, FrontMatter::new());
        };
        if is_marker(line) {
            rest = remainder;
            break;
        }
        interior.push(line);
        rest = remainder;
    }

    for line in interior {
        if let Some((key, value)) = parse_entry(line) {
            front_matter.insert(key.to_string(), value.to_string());
        }
    }

    (rest, front_matter)
}

/// Returns the next line (without its terminator) and everything after it
fn split_line(text: &str) -> Option<(&str, &str)> {
    if text.is_empty() {
        return None;
    }
    match text.find('\n') {
        Some(idx) => Some((&text[..idx], &text[idx + 1..])),
        None => Some((text, "")),
    }
}

fn is_marker(line: &str) -> bool {
    line.trim_end() == MARKER
}

fn parse_entry(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}
