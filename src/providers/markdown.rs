//! Role-header transcript parsing.
//!
//! A transcript is plain text where each turn starts with a header line such
//! as `## User`, `**Assistant:**`, or `Claude: text on the same line`. Lines
//! before the first header become the title when they form a `# Heading`.

use crate::models::Role;

/// One turn of a parsed transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// A parsed transcript file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Path relative to the extraction root.
    pub path: String,
    pub title: Option<String>,
    pub turns: Vec<Turn>,
}

/// Parse `content` with `classify` mapping header labels to roles.
///
/// Returns `None` when no role header is found.
pub fn parse_transcript(
    path: &str,
    content: &str,
    classify: &dyn Fn(&str) -> Role,
) -> Option<Transcript> {
    let mut title = None;
    let mut turns: Vec<Turn> = Vec::new();
    let mut current: Option<(Role, Vec<&str>)> = None;

    for line in content.lines() {
        if let Some((role, rest)) = role_header(line, classify) {
            if let Some((r, lines)) = current.take() {
                turns.push(make_turn(r, &lines));
            }
            let mut lines = Vec::new();
            if !rest.is_empty() {
                lines.push(rest);
            }
            current = Some((role, lines));
            continue;
        }

        match current.as_mut() {
            Some((_, lines)) => lines.push(line),
            None => {
                if title.is_none() {
                    if let Some(heading) = line.trim().strip_prefix("# ") {
                        title = Some(heading.trim().to_string());
                    }
                }
            }
        }
    }
    if let Some((r, lines)) = current.take() {
        turns.push(make_turn(r, &lines));
    }

    turns.retain(|t| !t.text.is_empty());
    if turns.is_empty() {
        return None;
    }
    Some(Transcript {
        path: path.to_string(),
        title,
        turns,
    })
}

fn make_turn(role: Role, lines: &[&str]) -> Turn {
    Turn {
        role,
        text: lines.join("\n").trim().to_string(),
    }
}

/// Recognize a role header line and return the role plus any inline text.
///
/// A header needs a marker (`#`, `**`, or a trailing colon) and a label the
/// provider recognizes, so ordinary prose such as `Note: ...` is not a header.
fn role_header<'l>(line: &'l str, classify: &dyn Fn(&str) -> Role) -> Option<(Role, &'l str)> {
    let trimmed = line.trim();
    let (hashed, body) = match trimmed.strip_prefix('#') {
        Some(rest) => (true, rest.trim_start_matches('#').trim()),
        None => (false, trimmed),
    };
    let starred = body.starts_with("**") || body.starts_with("__");

    let (label, rest, colon) = match body.find(':') {
        Some(pos) => (&body[..pos], &body[pos + 1..], true),
        None => (body, "", false),
    };
    let label = label.trim().trim_matches(|c| c == '*' || c == '_').trim();
    let rest = rest.trim_start_matches(|c| c == '*' || c == '_').trim();

    if label.is_empty() || label.len() > 32 || !(hashed || starred || colon) {
        return None;
    }
    // `# Title: something` is a heading, not a turn, unless the label is a role.
    match classify(label) {
        Role::Unknown => None,
        role => Some((role, rest)),
    }
}

/// Labels every provider understands.
pub fn generic_role(label: &str) -> Role {
    match label.trim().to_ascii_lowercase().as_str() {
        "user" | "you" | "me" | "human" | "prompt" | "question" => Role::User,
        "assistant" | "ai" | "bot" | "model" | "response" | "answer" => Role::Assistant,
        "system" => Role::System,
        _ => Role::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(label: &str) -> Role {
        match label.to_ascii_lowercase().as_str() {
            "claude" => Role::Assistant,
            other => generic_role(other),
        }
    }

    #[test]
    fn parses_hash_star_and_inline_headers() {
        let content = "# Planning a trip\n\n## User\nWhere should I go?\n\n**Claude:**\nTry Lisbon.\nIt is sunny.\n\nUser: Thanks!\n";
        let t = parse_transcript("trip.md", content, &classify).unwrap();
        assert_eq!(t.title.as_deref(), Some("Planning a trip"));
        assert_eq!(
            t.turns,
            vec![
                Turn { role: Role::User, text: "Where should I go?".into() },
                Turn { role: Role::Assistant, text: "Try Lisbon.\nIt is sunny.".into() },
                Turn { role: Role::User, text: "Thanks!".into() },
            ]
        );
    }

    #[test]
    fn prose_with_colons_is_not_a_header() {
        let content = "User: hi\nNote: this stays in the turn\n";
        let t = parse_transcript("a.md", content, &classify).unwrap();
        assert_eq!(t.turns.len(), 1);
        assert!(t.turns[0].text.contains("Note: this stays"));
    }

    #[test]
    fn no_headers_is_not_a_transcript() {
        assert!(parse_transcript("a.md", "just some notes\nmore", &classify).is_none());
    }
}
