//! Brain output adapter.
//!
//! Brain replies are free text. This is the only place that reads the line
//! tags; everything downstream works on [`Directive`] values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum Directive {
    Thought(String),
    Command(String),
    Explore(String),
}

const TAGS: [(&str, fn(String) -> Directive); 3] = [
    ("THOUGHT:", Directive::Thought),
    ("COMMAND:", Directive::Command),
    ("EXPLORE:", Directive::Explore),
];

/// Classify each line by its case-insensitive tag, in order. Untagged lines
/// and tags with nothing after them are dropped.
pub fn parse(response: &str) -> Vec<Directive> {
    response.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim();
    for (tag, build) in TAGS {
        let Some(head) = line.get(..tag.len()) else {
            continue;
        };
        if head.eq_ignore_ascii_case(tag) {
            let body = line[tag.len()..].trim();
            if body.is_empty() {
                return None;
            }
            return Some(build(body.to_string()));
        }
    }
    None
}

/// Narration and informational command for an `EXPLORE:` target.
///
/// Path-like targets are listed; anything else is looked up as a program name.
pub fn explore_plan(target: &str) -> (String, String) {
    let thought = format!("Exploring {}", target);
    let looks_like_path = target.starts_with('/')
        || target.starts_with('~')
        || target.starts_with('.')
        || target.contains('/');
    let command = if looks_like_path {
        format!("ls -la -- {}", shell_quote(target))
    } else {
        let word = target.split_whitespace().next().unwrap_or(target);
        format!("command -v -- {}", shell_quote(word))
    };
    (thought, command)
}

/// Single-quote `s` for `sh -c`
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_response() {
        let response = "Let me think.\n\
                        THOUGHT: the disk looks quiet\n\
                        command:   df -h  \n\
                        random chatter\n\
                        Explore: /var/log\n\
                        COMMAND: uptime";
        assert_eq!(
            parse(response),
            vec![
                Directive::Thought("the disk looks quiet".into()),
                Directive::Command("df -h".into()),
                Directive::Explore("/var/log".into()),
                Directive::Command("uptime".into()),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_empty_and_embedded_tags() {
        let response = "COMMAND:\n  I said COMMAND: rm -rf / once\nTHOUGHT:   ";
        assert!(parse(response).is_empty());
    }

    #[test]
    fn test_parse_handles_multibyte_lines() {
        assert!(parse("ééé").is_empty());
        assert_eq!(parse("thought: ünïcode"), vec![Directive::Thought("ünïcode".into())]);
    }

    #[test]
    fn test_explore_plan() {
        let (thought, command) = explore_plan("/etc");
        assert_eq!(thought, "Exploring /etc");
        assert_eq!(command, "ls -la -- '/etc'");

        let (_, command) = explore_plan("git history");
        assert_eq!(command, "command -v -- 'git'");
    }

    #[test]
    fn test_shell_quote_escapes_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_directive_serialization() {
        let value = serde_json::to_value(Directive::Command("ls".into())).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "command", "text": "ls"}));
    }
}
