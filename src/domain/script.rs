//! Dialogue script parsing and text utilities.
//!
//! Generated scripts are plain text where every non-blank line is one
//! speaker's turn, prefixed with a fixed label ("Speaker A:" or
//! "Speaker B:"). Order of turns is semantically meaningful and is
//! preserved through chunking, synthesis, and assembly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two fixed speakers a dialogue script may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    A,
    B,
}

impl Speaker {
    /// Label used in generated scripts ("Speaker A:").
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "Speaker A:",
            Self::B => "Speaker B:",
        }
    }

    /// Alias used in synthesis prompts and voice mapping ("SpeakerA").
    pub fn alias(&self) -> &'static str {
        match self {
            Self::A => "SpeakerA",
            Self::B => "SpeakerB",
        }
    }

    pub fn all() -> [Speaker; 2] {
        [Self::A, Self::B]
    }
}

/// One speaker's line of dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Errors raised while extracting dialogue turns from a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script line does not start with a speaker label: {0:?}")]
    UnlabeledLine(String),

    #[error("no dialogue found after label '{0}'")]
    EmptyTurn(&'static str),

    #[error("script contains no dialogue turns")]
    Empty,
}

/// Drop any model preamble before the first recognizable dialogue line.
///
/// If no line starts with a speaker label the script is returned
/// unchanged; extraction will reject it later with a precise error.
pub fn clean_script(script: &str) -> String {
    let lines: Vec<&str> = script.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if Speaker::all().iter().any(|s| line.starts_with(s.label())) {
            return lines[i..].join("\n");
        }
    }
    script.to_string()
}

/// Extract the ordered dialogue turns from a script.
///
/// Every non-blank line must start with one of the fixed speaker labels,
/// otherwise the whole operation fails.
pub fn extract_turns(script: &str) -> Result<Vec<DialogueTurn>, ScriptError> {
    let mut turns = Vec::new();

    for raw_line in script.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let speaker = Speaker::all()
            .into_iter()
            .find(|s| line.starts_with(s.label()))
            .ok_or_else(|| ScriptError::UnlabeledLine(line.to_string()))?;

        let text = line[speaker.label().len()..].trim();
        if text.is_empty() {
            return Err(ScriptError::EmptyTurn(speaker.label()));
        }

        turns.push(DialogueTurn {
            speaker,
            text: text.to_string(),
        });
    }

    if turns.is_empty() {
        return Err(ScriptError::Empty);
    }
    Ok(turns)
}

/// Remove leading "Speaker X:" labels from every line of a script.
///
/// Matches any single-word speaker name, not just the fixed aliases, so
/// imported scripts from older runs are also cleaned.
pub fn strip_speaker_labels(text: &str) -> String {
    text.lines()
        .map(strip_label_from_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_label_from_line(line: &str) -> &str {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix("Speaker") else {
        return line;
    };
    // Whitespace must separate "Speaker" from the name, so words like
    // "Speakers:" are left alone.
    if !rest.starts_with(char::is_whitespace) {
        return line;
    }
    let rest = rest.trim_start();
    let name_len: usize = rest
        .chars()
        .take_while(|c| c.is_alphabetic())
        .map(char::len_utf8)
        .sum();
    if name_len == 0 {
        return line;
    }
    match rest[name_len..].strip_prefix(':') {
        Some(spoken) => spoken.trim_start(),
        None => line,
    }
}

/// Count words in a script, where a word is a run of alphanumeric
/// characters, underscores, or apostrophes ("don't" counts once).
pub fn count_words(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        let word_char = c.is_alphanumeric() || c == '_' || c == '\'';
        if word_char && !in_word {
            count += 1;
        }
        in_word = word_char;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_script_drops_preamble() {
        let script = "Sure! Here's your podcast:\n\nSpeaker A: Hello.\nSpeaker B: Hi.";
        let cleaned = clean_script(script);
        assert_eq!(cleaned, "Speaker A: Hello.\nSpeaker B: Hi.");
    }

    #[test]
    fn test_clean_script_without_labels_is_unchanged() {
        let script = "no dialogue here";
        assert_eq!(clean_script(script), script);
    }

    #[test]
    fn test_extract_turns_preserves_order() {
        let script = "Speaker A: First.\n\nSpeaker B: Second.\nSpeaker A: Third.";
        let turns = extract_turns(script).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].speaker, Speaker::A);
        assert_eq!(turns[0].text, "First.");
        assert_eq!(turns[1].speaker, Speaker::B);
        assert_eq!(turns[2].text, "Third.");
    }

    #[test]
    fn test_extract_turns_rejects_unlabeled_line() {
        let script = "Speaker A: Hello.\nNarrator: this should fail";
        assert!(matches!(
            extract_turns(script),
            Err(ScriptError::UnlabeledLine(_))
        ));
    }

    #[test]
    fn test_extract_turns_rejects_empty_turn() {
        let script = "Speaker A:   ";
        assert!(matches!(extract_turns(script), Err(ScriptError::EmptyTurn(_))));
    }

    #[test]
    fn test_extract_turns_rejects_empty_script() {
        assert!(matches!(extract_turns("\n\n"), Err(ScriptError::Empty)));
    }

    #[test]
    fn test_strip_speaker_labels() {
        let text = "Speaker A: Hello world\nSpeaker B: Goodbye";
        assert_eq!(strip_speaker_labels(text), "Hello world\nGoodbye");
    }

    #[test]
    fn test_strip_speaker_labels_leaves_plain_lines() {
        let text = "Speakers: two\njust a line";
        assert_eq!(strip_speaker_labels(text), text);
    }

    #[test]
    fn test_word_count_ignores_labels() {
        let stripped = strip_speaker_labels("Speaker A: Hello world");
        assert_eq!(count_words(&stripped), 2);
    }

    #[test]
    fn test_count_words_apostrophes() {
        assert_eq!(count_words("don't stop believing"), 3);
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("  -- ,, !"), 0);
    }
}
