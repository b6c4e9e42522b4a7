//! Text normalisation, tokenization and keyword scoring.
//!
//! Everything here is deterministic: the same input always yields the same
//! output, which the identifier mint relies on.

use std::collections::HashMap;

const FENCE: &str = "```";

/// Normalise message content.
///
/// Outside fenced code blocks control characters are stripped and runs of
/// whitespace collapse to one space. Fenced blocks are kept byte-for-byte
/// and set on their own line. An unclosed fence runs to the end of input.
pub fn clean(raw: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut rest = raw;
    loop {
        match rest.find(FENCE) {
            Some(open) => {
                push_prose(&mut parts, &rest[..open]);
                let after_open = &rest[open + FENCE.len()..];
                match after_open.find(FENCE) {
                    Some(close) => {
                        let end = open + FENCE.len() + close + FENCE.len();
                        parts.push(rest[open..end].to_string());
                        rest = &rest[end..];
                    }
                    None => {
                        parts.push(rest[open..].trim_end().to_string());
                        break;
                    }
                }
            }
            None => {
                push_prose(&mut parts, rest);
                break;
            }
        }
    }
    parts.join("\n")
}

fn push_prose(parts: &mut Vec<String>, prose: &str) {
    // controls become blanks so stripping one can never splice a new fence
    let collapsed = prose
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if !collapsed.is_empty() {
        parts.push(collapsed);
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max_chars` characters; the flag reports truncation.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

pub fn contains_code_block(text: &str) -> bool {
    text.contains(FENCE)
}

// ============================================
// TOKENS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Pos {
    #[serde(rename = "NUM")]
    Num,
    #[serde(rename = "WORD")]
    Word,
    #[serde(rename = "PUNCT")]
    Punct,
    #[serde(rename = "SYM")]
    Sym,
}

impl Pos {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pos::Num => "NUM",
            Pos::Word => "WORD",
            Pos::Punct => "PUNCT",
            Pos::Sym => "SYM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Char offset of the token within the input.
    pub offset: usize,
    pub pos: Pos,
    pub lemma: String,
    pub is_stop: bool,
}

fn is_connector(c: char) -> bool {
    matches!(c, '\'' | '-' | '_' | '.')
}

/// Unicode-aware word tokenizer.
///
/// Maximal alphanumeric runs form words; `'`, `-`, `_` and `.` stay inside a
/// word when both neighbours are alphanumeric. Any other non-whitespace
/// character is a token on its own.
pub fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_alphanumeric() {
            i += 1;
            while i < chars.len() {
                if chars[i].is_alphanumeric() {
                    i += 1;
                } else if is_connector(chars[i])
                    && i + 1 < chars.len()
                    && chars[i + 1].is_alphanumeric()
                {
                    i += 2;
                } else {
                    break;
                }
            }
        } else {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        tokens.push(make_token(word, start));
    }
    tokens
}

fn make_token(text: String, offset: usize) -> Token {
    let pos = classify(&text);
    let lower = text.to_lowercase();
    let lemma = match pos {
        Pos::Word => lemmatize(&lower),
        _ => lower.clone(),
    };
    let is_stop = pos == Pos::Word && is_stop_word(&lower);
    Token {
        text,
        offset,
        pos,
        lemma,
        is_stop,
    }
}

fn classify(token: &str) -> Pos {
    let mut chars = token.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return Pos::Sym,
    };
    if first.is_alphanumeric() {
        if token
            .chars()
            .all(|c| c.is_numeric() || c == '.' || c == '-' || c == '_' || c == '\'')
        {
            Pos::Num
        } else {
            Pos::Word
        }
    } else if is_punctuation(first) {
        Pos::Punct
    } else {
        Pos::Sym
    }
}

fn is_punctuation(c: char) -> bool {
    let ascii = c.is_ascii_punctuation()
        && !matches!(c, '$' | '+' | '<' | '=' | '>' | '^' | '`' | '|' | '~');
    ascii
        || matches!(
            c,
            '\u{2010}'..='\u{2027}' | '\u{3001}' | '\u{3002}' | '\u{00A1}' | '\u{00BF}' | '\u{00AB}' | '\u{00BB}'
        )
}

/// Light suffix stripping; not a full stemmer.
pub fn lemmatize(lower: &str) -> String {
    let len = lower.chars().count();
    if len > 4 && lower.ends_with("ies") {
        return format!("{}y", &lower[..lower.len() - 3]);
    }
    if lower.ends_with("sses") {
        return lower[..lower.len() - 2].to_string();
    }
    if len > 5 && lower.ends_with("ing") {
        return lower[..lower.len() - 3].to_string();
    }
    if len > 4 && lower.ends_with("ed") && !lower.ends_with("eed") {
        return lower[..lower.len() - 2].to_string();
    }
    if len > 3 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
        return lower[..lower.len() - 1].to_string();
    }
    lower.to_string()
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves", "let", "lets", "let's", "i'm", "it's", "don't", "can't", "please",
];

pub fn is_stop_word(lower: &str) -> bool {
    STOP_WORDS.contains(&lower)
}

// ============================================
// SENTENCES
// ============================================

/// Split into sentences at `.`, `!`, `?` followed by whitespace, and at
/// line breaks. Fenced code blocks stay whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        split_prose(&rest[..open], &mut sentences);
        let after = &rest[open + FENCE.len()..];
        let end = after
            .find(FENCE)
            .map(|close| open + FENCE.len() + close + FENCE.len())
            .unwrap_or(rest.len());
        let block = rest[open..end].trim();
        if !block.is_empty() {
            sentences.push(block.to_string());
        }
        rest = &rest[end..];
    }
    split_prose(rest, &mut sentences);
    sentences
}

fn split_prose(prose: &str, out: &mut Vec<String>) {
    for line in prose.lines() {
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            let terminal = matches!(c, '.' | '!' | '?');
            let boundary = chars.peek().map_or(true, |n| n.is_whitespace());
            if terminal && boundary {
                // absorb runs like "?!" or "..."
                while let Some(&n) = chars.peek() {
                    if matches!(n, '.' | '!' | '?') {
                        current.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let sentence = current.trim();
                if !sentence.is_empty() {
                    out.push(sentence.to_string());
                }
                current.clear();
            }
        }
        let tail = current.trim();
        if !tail.is_empty() {
            out.push(tail.to_string());
        }
    }
}

// ============================================
// KEYWORDS
// ============================================

/// Top `top_n` keywords by term frequency, ties broken by first occurrence.
pub fn keywords(text: &str, top_n: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokenize(text).into_iter().enumerate() {
        if token.pos != Pos::Word || token.is_stop || token.text.chars().count() < 3 {
            continue;
        }
        let entry = counts
            .entry(token.text.to_lowercase())
            .or_insert((0, position));
        entry.0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(top_n).map(|(word, _)| word).collect()
}
