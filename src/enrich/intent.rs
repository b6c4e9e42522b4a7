//! Intent and task-type extraction
//!
//! The language model path asks for a fixed JSON shape; the heuristic path
//! produces the same shape from keyword cues so runs without an API key
//! still annotate every message.

use serde::{Deserialize, Serialize};

use crate::text::{self, contains_code_block};

pub const INTENTS: &[&str] = &[
    "question",
    "instruction",
    "clarification",
    "feedback",
    "greeting",
    "other",
];

pub const TASK_TYPES: &[&str] = &[
    "coding",
    "debugging",
    "explanation",
    "refactoring",
    "testing",
    "documentation",
    "other",
];

pub const COMPLEXITIES: &[&str] = &["simple", "moderate", "complex"];

const PROMPT: &str = "Analyze this Claude Code message and extract structured information.
Return ONLY a JSON object with these fields:
- intent: one of [question, instruction, clarification, feedback, greeting, other]
- task_type: one of [coding, debugging, explanation, refactoring, testing, documentation, other, null]
- code_languages: array of programming languages mentioned or used (empty array if none)
- complexity: one of [simple, moderate, complex]
- has_code_block: boolean if message contains code

Message:
";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentExtraction {
    pub intent: Option<String>,
    pub task_type: Option<String>,
    #[serde(default)]
    pub code_languages: Vec<String>,
    pub complexity: Option<String>,
    pub has_code_block: Option<bool>,
}

pub fn prompt(text: &str) -> String {
    format!("{PROMPT}{text}\n\nJSON response:")
}

/// Parse a model answer. Surrounding code fences are tolerated; values
/// outside the allowed vocabularies are dropped to `None`.
pub fn parse_answer(answer: &str) -> Option<IntentExtraction> {
    let mut body = answer.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    let mut parsed: IntentExtraction = serde_json::from_str(body.trim()).ok()?;
    parsed.intent = parsed.intent.filter(|v| INTENTS.contains(&v.as_str()));
    parsed.task_type = parsed.task_type.filter(|v| TASK_TYPES.contains(&v.as_str()));
    parsed.complexity = parsed.complexity.filter(|v| COMPLEXITIES.contains(&v.as_str()));
    for lang in parsed.code_languages.iter_mut() {
        *lang = lang.to_lowercase();
    }
    Some(parsed)
}

const GREETINGS: &[&str] = &["hi", "hello", "hey", "thanks", "thank", "morning", "yo"];
const QUESTION_OPENERS: &[&str] = &[
    "how", "what", "why", "where", "when", "which", "who", "can", "could", "is", "are", "does",
    "do", "should", "would",
];
const CLARIFICATION_OPENERS: &[&str] = &["actually", "i mean", "to clarify", "no,", "sorry,", "rather"];
const IMPERATIVES: &[&str] = &[
    "add", "create", "fix", "write", "implement", "refactor", "update", "remove", "make", "run",
    "change", "build", "rename", "delete", "move", "test", "explain", "show", "use", "check",
    "please",
];
const FEEDBACK_CUES: &[&str] = &[
    "works", "worked", "perfect", "great", "still", "wrong", "broken", "doesn't", "didn't", "nice",
    "looks good",
];

/// `(task_type, cues)`, checked in order.
const TASK_CUES: &[(&str, &[&str])] = &[
    ("debugging", &["error", "bug", "panic", "traceback", "exception", "crash", "fails", "failing", "broken", "stack trace"]),
    ("testing", &["test", "tests", "assert", "coverage", "pytest", "unit test"]),
    ("refactoring", &["refactor", "rename", "clean up", "simplify", "restructure", "extract"]),
    ("documentation", &["readme", "docs", "docstring", "documentation", "comment"]),
    ("explanation", &["explain", "why", "what is", "how does", "what does", "understand"]),
    ("coding", &["implement", "function", "code", "write", "add", "create", "build", "class", "module"]),
];

const LANGUAGES: &[(&str, &[&str])] = &[
    ("rust", &["rust", "rs", "cargo"]),
    ("python", &["python", "py", "pytest"]),
    ("javascript", &["javascript", "js", "node", "npm"]),
    ("typescript", &["typescript", "ts", "tsx"]),
    ("sql", &["sql", "bigquery", "sqlite", "postgres"]),
    ("bash", &["bash", "sh", "shell", "zsh"]),
    ("java", &["java"]),
    ("go", &["golang"]),
    ("c++", &["cpp", "c++"]),
    ("yaml", &["yaml", "yml"]),
    ("json", &["json"]),
    ("html", &["html"]),
    ("css", &["css"]),
];

fn language_for(word: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(_, aliases)| aliases.contains(&word))
        .map(|(name, _)| *name)
}

/// Languages named in fence info strings, then languages mentioned in prose.
pub fn detect_languages(body: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |lang: &str| {
        if !found.iter().any(|f| f == lang) {
            found.push(lang.to_string());
        }
    };
    for line in body.lines() {
        if let Some(info) = line.trim_start().strip_prefix("```") {
            let info = info.trim().to_lowercase();
            if let Some(lang) = language_for(&info) {
                push(lang);
            }
        }
    }
    for token in text::tokenize(body) {
        let lower = token.text.to_lowercase();
        if lower.len() > 2 || lower == "go" {
            if let Some(lang) = language_for(&lower) {
                push(lang);
            }
        }
    }
    found
}

fn starts_with_any(lower: &str, openers: &[&str]) -> bool {
    openers.iter().any(|o| {
        lower.starts_with(o)
            && lower[o.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn contains_cue(lower: &str, cue: &str) -> bool {
    if cue.contains(' ') || !cue.chars().all(char::is_alphanumeric) {
        return lower.contains(cue);
    }
    text::tokenize(lower).iter().any(|t| t.text == cue)
}

/// Deterministic fallback classifier.
pub fn heuristic(body: &str) -> IntentExtraction {
    let lower = body.trim().to_lowercase();
    let words = text::word_count(&lower);
    let first = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");

    let intent = if words <= 5 && GREETINGS.contains(&first) {
        "greeting"
    } else if starts_with_any(&lower, CLARIFICATION_OPENERS) {
        "clarification"
    } else if lower.trim_end().ends_with('?') || QUESTION_OPENERS.contains(&first) {
        "question"
    } else if IMPERATIVES.contains(&first) {
        "instruction"
    } else if FEEDBACK_CUES.iter().any(|cue| contains_cue(&lower, cue)) {
        "feedback"
    } else {
        "other"
    };

    let task_type = TASK_CUES
        .iter()
        .find(|(_, cues)| cues.iter().any(|cue| contains_cue(&lower, cue)))
        .map(|(task, _)| *task)
        .unwrap_or("other");

    let has_code_block = contains_code_block(body);
    let mut tier = match words {
        0..=19 => 0,
        20..=99 => 1,
        _ => 2,
    };
    if has_code_block {
        tier = (tier + 1).min(2);
    }

    IntentExtraction {
        intent: Some(intent.to_string()),
        task_type: Some(task_type.to_string()),
        code_languages: detect_languages(body),
        complexity: Some(COMPLEXITIES[tier].to_string()),
        has_code_block: Some(has_code_block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_answer() {
        let answer = "```json\n{\"intent\":\"question\",\"task_type\":\"debugging\",\"code_languages\":[\"Rust\"],\"complexity\":\"simple\",\"has_code_block\":false}\n```";
        let parsed = parse_answer(answer).unwrap();
        assert_eq!(parsed.intent.as_deref(), Some("question"));
        assert_eq!(parsed.code_languages, vec!["rust"]);
        assert_eq!(parsed.has_code_block, Some(false));
    }

    #[test]
    fn test_parse_drops_unknown_vocabulary() {
        let parsed = parse_answer("{\"intent\":\"rant\",\"task_type\":null}").unwrap();
        assert_eq!(parsed.intent, None);
        assert_eq!(parsed.task_type, None);
        assert!(parsed.code_languages.is_empty());
    }

    #[test]
    fn test_unparseable_answer() {
        assert!(parse_answer("I think this is a question.").is_none());
    }

    #[test]
    fn test_heuristic_intents() {
        assert_eq!(heuristic("hello world").intent.as_deref(), Some("greeting"));
        assert_eq!(
            heuristic("Why does the build fail on CI?").intent.as_deref(),
            Some("question")
        );
        assert_eq!(
            heuristic("Fix the panic in the parser").intent.as_deref(),
            Some("instruction")
        );
        assert_eq!(
            heuristic("Actually, use the other file").intent.as_deref(),
            Some("clarification")
        );
        assert_eq!(
            heuristic("That still gives the same output").intent.as_deref(),
            Some("feedback")
        );
    }

    #[test]
    fn test_heuristic_task_and_languages() {
        let body = "Fix the panic in this:\n```rust\nfn main() { panic!() }\n```\nIt also breaks the python script.";
        let extraction = heuristic(body);
        assert_eq!(extraction.task_type.as_deref(), Some("debugging"));
        assert_eq!(extraction.code_languages, vec!["rust", "python"]);
        assert_eq!(extraction.has_code_block, Some(true));
        assert_eq!(extraction.complexity.as_deref(), Some("moderate"));
    }

    #[test]
    fn test_prompt_embeds_text() {
        let p = prompt("hello there");
        assert!(p.contains("Message:\nhello there"));
        assert!(p.ends_with("JSON response:"));
    }
}
