use std::fs;
use std::io;
use std::path::Path;

pub const HEADER_PREFIX: &str = "_**";
pub const HEADER_SUFFIX: &str = "**_";
const SEPARATOR: &str = "---";

/// Role carried by a turn header. The producer labels turns with text
/// containing `User` or `Agent`; anything else that still matches the
/// header shape is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
    Other,
}

impl Role {
    fn from_label(label: &str) -> Self {
        if label.starts_with("User") {
            Role::User
        } else if label.starts_with("Agent") {
            Role::Agent
        } else {
            Role::Other
        }
    }
}

/// One conversational turn: a header line plus the first meaningful line
/// that follows it. `snippet` falls back to the header's own trimmed text
/// when no content exists before EOF; such turns are content-less.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub header_index: usize,
    pub header_text: String,
    pub label: String,
    pub snippet: String,
}

impl Turn {
    /// A turn counts as content-bearing only when its snippet is a real
    /// content line, not the header-text fallback or a stray separator.
    pub fn has_content(&self) -> bool {
        !self.snippet.is_empty() && self.snippet != self.header_text && self.snippet != SEPARATOR
    }
}

/// Reads a file into LF-normalized lines. Invalid UTF-8 is substituted,
/// never an error; the producer may be mid-write when we read.
pub fn normalized_lines(path: &Path) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes)
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    Ok(text.split('\n').map(str::to_string).collect())
}

pub fn is_turn_header(line: &str) -> bool {
    line.len() > HEADER_PREFIX.len() + HEADER_SUFFIX.len()
        && line.starts_with(HEADER_PREFIX)
        && line.ends_with(HEADER_SUFFIX)
        && (line.contains("User") || line.contains("Agent"))
}

pub fn parse_lines(lines: &[String]) -> Vec<Turn> {
    let mut turns = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if !is_turn_header(line) {
            continue;
        }
        let label = line[HEADER_PREFIX.len()..line.len() - HEADER_SUFFIX.len()].to_string();
        turns.push(Turn {
            role: Role::from_label(&label),
            header_index: index,
            header_text: line.trim().to_string(),
            label,
            snippet: first_meaningful_after(lines, index),
        });
    }
    turns
}

pub fn parse(path: &Path) -> io::Result<Vec<Turn>> {
    Ok(parse_lines(&normalized_lines(path)?))
}

/// Snippets of content-bearing turns, in file order. These are the
/// fingerprints the timestamp log records, one entry per snippet.
pub fn content_snippets(turns: &[Turn]) -> Vec<&str> {
    turns
        .iter()
        .filter(|turn| turn.has_content())
        .map(|turn| turn.snippet.as_str())
        .collect()
}

/// True when at least one User-labeled block holds a meaningful line
/// before the next header. Sessions without any such block are
/// non-interactive and are never stamped.
pub fn has_user_content(lines: &[String]) -> bool {
    let mut in_user_block = false;
    for line in lines {
        if line.starts_with(HEADER_PREFIX) && line.ends_with(HEADER_SUFFIX) {
            in_user_block = line.starts_with("_**User");
            continue;
        }
        if in_user_block {
            let content = line.trim();
            if !content.is_empty() && content != SEPARATOR {
                return true;
            }
        }
    }
    false
}

fn first_meaningful_after(lines: &[String], header_index: usize) -> String {
    for line in lines.iter().skip(header_index + 1) {
        let content = line.trim();
        if content.is_empty() || content == SEPARATOR {
            continue;
        }
        return content.to_string();
    }
    lines
        .get(header_index)
        .map(|line| line.trim().to_string())
        .unwrap_or_default()
}
