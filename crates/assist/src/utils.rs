use std::sync::LazyLock;

use regex::Regex;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[ \t]*(python3?|py)?[ \t]*\r?\n(?s:(.*?))```").expect("regex")
});

static CODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(def\s+\w+\s*\(|class\s+\w+|import\s+[\w.]+|from\s+[\w.]+\s+import\b|if\s+.+:\s*$|for\s+.+:\s*$|while\s+.+:\s*$|try:\s*$|with\s+.+:\s*$|@\w+|print\()",
    )
    .expect("regex")
});

/// Python-tagged or untagged fenced blocks, in order of appearance.
pub fn find_code_blocks(text: &str) -> Vec<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|cap| cap.get(2).map(|m| m.as_str().trim().to_owned()))
        .filter(|block| !block.is_empty())
        .collect()
}

pub fn detect_code(text: &str) -> bool {
    if !find_code_blocks(text).is_empty() {
        return true;
    }
    if text.lines().any(|line| CODE_LINE.is_match(line.trim_start())) {
        return true;
    }
    let lines: Vec<&str> = text.lines().collect();
    let indented = lines
        .iter()
        .filter(|line| line.starts_with("    ") || line.starts_with('\t'))
        .count();
    indented > 2 && indented * 10 > lines.len() * 3
}

/// First fenced block, or else the lines that look like Python plus their
/// indented continuation.
pub fn extract_code(text: &str) -> Option<String> {
    if let Some(block) = find_code_blocks(text).into_iter().next() {
        return Some(block);
    }
    let mut code_lines: Vec<&str> = Vec::new();
    let mut in_block = false;
    for line in text.lines() {
        if CODE_LINE.is_match(line.trim()) && !line.starts_with(' ') && !line.starts_with('\t') {
            in_block = true;
            code_lines.push(line);
        } else if in_block && (line.starts_with("    ") || line.starts_with('\t')) {
            code_lines.push(line);
        } else if in_block && line.trim().is_empty() {
            code_lines.push(line);
        } else {
            in_block = false;
        }
    }
    let code = code_lines.join("\n").trim().to_owned();
    if code.is_empty() { None } else { Some(code) }
}

/// Roughly four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

pub fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_owned();
    }
    format!("{}...", slice_to_boundary(text, max_len))
}

/// Keeps the head and the tail of `text`, eliding the middle.
pub fn truncate_middle(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_owned();
    }
    let half_len = max_len / 2;
    let first_part = slice_to_boundary(text, half_len);
    let mut last_start = text.len().saturating_sub(half_len);
    while !text.is_char_boundary(last_start) {
        last_start += 1;
    }
    let last_part = &text[last_start..];
    let omitted = text.len() - first_part.len() - last_part.len();
    format!("{first_part}\n\n... [TRUNCATED {omitted} characters] ...\n\n{last_part}")
}

pub fn slice_to_boundary(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while !text.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    &text[..end]
}
