//! Lexicon emotion classifier
//!
//! Labels follow the GoEmotions vocabulary the hosted classifier used, cut
//! down to the ones that show up in coding sessions.

use crate::error::{Error, Result};
use crate::text::{tokenize, Pos};

pub const NEUTRAL: &str = "neutral";

/// `(label, cue lemmas)`; earlier labels win ties.
const LEXICON: &[(&str, &[&str])] = &[
    ("gratitude", &["thank", "thanks", "thx", "appreciate", "grateful"]),
    ("joy", &["great", "awesome", "perfect", "love", "nice", "excellent", "happy", "glad", "wonderful"]),
    ("approval", &["good", "works", "correct", "right", "agree", "yes", "ok", "okay", "lgtm"]),
    ("annoyance", &["still", "again", "annoying", "ugh", "frustrat", "stupid", "useless"]),
    ("disapproval", &["wrong", "incorrect", "bad", "no", "not", "broken", "fail"]),
    ("confusion", &["confus", "unclear", "understand", "weird", "strange", "huh", "why"]),
    ("curiosity", &["how", "what", "wonder", "curious", "could", "possible"]),
    ("remorse", &["sorry", "apolog", "mistake", "oops"]),
    ("excitement", &["wow", "amazing", "excit", "finally", "cool"]),
    ("nervousness", &["worry", "worri", "afraid", "risk", "careful", "nervous"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionLabel {
    pub emotion: String,
    /// 0.5..=1.0; neutral answers are 0.5.
    pub confidence: f64,
}

fn matches_cue(lemma: &str, cue: &str) -> bool {
    lemma == cue || (cue.len() >= 5 && lemma.starts_with(cue))
}

/// Classify one text. Empty or symbol-only text is an `EnrichmentFailed`.
pub fn classify(text: &str) -> Result<EmotionLabel> {
    let tokens = tokenize(text);
    if !tokens.iter().any(|t| matches!(t.pos, Pos::Word | Pos::Num)) {
        return Err(Error::EnrichmentFailed(
            "no words to classify".to_string(),
        ));
    }

    let mut scores = vec![0usize; LEXICON.len()];
    for token in tokens.iter().filter(|t| t.pos == Pos::Word) {
        let lower = token.text.to_lowercase();
        for (i, (_, cues)) in LEXICON.iter().enumerate() {
            if cues
                .iter()
                .any(|cue| matches_cue(&lower, cue) || matches_cue(&token.lemma, cue))
            {
                scores[i] += 1;
            }
        }
    }
    if text.contains('!') {
        // exclamations lean towards excitement
        if let Some(i) = LEXICON.iter().position(|(label, _)| *label == "excitement") {
            scores[i] += 1;
        }
    }

    let total: usize = scores.iter().sum();
    let best = scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (i, &s)| match best {
            Some((_, top)) if top >= s => best,
            _ if s > 0 => Some((i, s)),
            _ => best,
        });

    Ok(match best {
        Some((i, score)) => EmotionLabel {
            emotion: LEXICON[i].0.to_string(),
            confidence: round4(0.5 + 0.5 * score as f64 / total as f64),
        },
        None => EmotionLabel {
            emotion: NEUTRAL.to_string(),
            confidence: 0.5,
        },
    })
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gratitude_wins_over_joy_on_tie() {
        let label = classify("Thanks, great work").unwrap();
        assert_eq!(label.emotion, "gratitude");
        assert!(label.confidence > 0.5 && label.confidence <= 1.0);
    }

    #[test]
    fn test_plain_text_is_neutral() {
        let label = classify("the file is in src").unwrap();
        assert_eq!(label, EmotionLabel { emotion: NEUTRAL.into(), confidence: 0.5 });
    }

    #[test]
    fn test_exclamation_counts_as_excitement() {
        assert_eq!(classify("hi!").unwrap().emotion, "excitement");
    }

    #[test]
    fn test_stem_cues_match_inflections() {
        assert_eq!(classify("I am so confused by this").unwrap().emotion, "confusion");
    }

    #[test]
    fn test_symbol_only_text_fails() {
        assert!(matches!(classify("{} ;;"), Err(Error::EnrichmentFailed(_))));
        assert!(classify("").is_err());
    }
}
