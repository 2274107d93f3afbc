//! Greedy byte-bounded chunking of dialogue turns.
//!
//! A synthesis prompt is the shared speech instructions plus a block of
//! speaker-prefixed dialogue lines, and the whole prompt must stay under
//! the provider's byte limit. Turns are packed into batches in their
//! original order; a turn is never reordered or split across batches.

use thiserror::Error;

use crate::domain::DialogueTurn;

/// Bytes joining instructions and dialogue in the final prompt ("\n\n").
const PROMPT_JOIN_OVERHEAD: usize = 2;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("prompt byte budget must be greater than zero")]
    ZeroBudget,

    #[error(
        "a single dialogue line ({size} bytes) exceeds the {budget}-byte prompt budget \
         and cannot be split; shorten that turn"
    )]
    OversizedTurn { size: usize, budget: usize },

    #[error("speech instructions ({size} bytes) leave no room under the {limit}-byte prompt limit")]
    InstructionsTooLarge { size: usize, limit: usize },
}

/// An ordered group of turns whose serialized lines fit one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBatch {
    pub turns: Vec<DialogueTurn>,
}

impl PromptBatch {
    /// The alias-prefixed dialogue lines, newline-joined.
    pub fn dialogue_block(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker.alias(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Serialized form of one turn as counted against the byte budget.
pub fn serialize_line(turn: &DialogueTurn) -> String {
    format!("{}: {}\n", turn.speaker.alias(), turn.text)
}

/// Byte budget left for dialogue once the shared instructions are
/// accounted for.
pub fn available_budget(prompt_byte_limit: usize, instructions: &str) -> Result<usize, ChunkError> {
    let overhead = instructions.trim().len() + PROMPT_JOIN_OVERHEAD;
    if overhead >= prompt_byte_limit {
        return Err(ChunkError::InstructionsTooLarge {
            size: overhead,
            limit: prompt_byte_limit,
        });
    }
    Ok(prompt_byte_limit - overhead)
}

/// Build the full synthesis prompt for one batch.
pub fn format_prompt(instructions: &str, batch: &PromptBatch) -> String {
    format!("{}\n\n{}", instructions.trim(), batch.dialogue_block())
        .trim()
        .to_string()
}

/// Partition `turns` into ordered batches whose serialized byte size
/// stays within `budget`.
///
/// Greedy rule: a turn joins the current batch unless it would push the
/// batch over budget, in which case the batch is closed and the turn
/// opens the next one. Concatenating all batches reproduces the input
/// exactly.
pub fn chunk_turns(turns: &[DialogueTurn], budget: usize) -> Result<Vec<PromptBatch>, ChunkError> {
    if budget == 0 {
        return Err(ChunkError::ZeroBudget);
    }

    let mut batches = Vec::new();
    let mut current: Vec<DialogueTurn> = Vec::new();
    let mut current_bytes = 0usize;

    for turn in turns {
        let line_bytes = serialize_line(turn).len();
        if line_bytes > budget {
            return Err(ChunkError::OversizedTurn {
                size: line_bytes,
                budget,
            });
        }

        if !current.is_empty() && current_bytes + line_bytes > budget {
            batches.push(PromptBatch {
                turns: std::mem::take(&mut current),
            });
            current_bytes = 0;
        }

        current.push(turn.clone());
        current_bytes += line_bytes;
    }

    if !current.is_empty() {
        batches.push(PromptBatch { turns: current });
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Speaker;

    fn turn(speaker: Speaker, text: &str) -> DialogueTurn {
        DialogueTurn {
            speaker,
            text: text.to_string(),
        }
    }

    /// Turn whose serialized line ("SpeakerA: <text>\n") is exactly
    /// `bytes` long.
    fn turn_of_bytes(bytes: usize) -> DialogueTurn {
        let overhead = "SpeakerA: \n".len();
        assert!(bytes > overhead);
        turn(Speaker::A, &"x".repeat(bytes - overhead))
    }

    #[test]
    fn test_zero_budget_is_an_error() {
        assert!(matches!(
            chunk_turns(&[turn(Speaker::A, "hi")], 0),
            Err(ChunkError::ZeroBudget)
        ));
    }

    #[test]
    fn test_batches_partition_input_in_order() {
        let turns: Vec<DialogueTurn> = (0..10)
            .map(|i| {
                turn(
                    if i % 2 == 0 { Speaker::A } else { Speaker::B },
                    &format!("line number {}", i),
                )
            })
            .collect();

        let batches = chunk_turns(&turns, 64).unwrap();
        assert!(batches.len() > 1);
        assert!(batches.iter().all(|b| !b.turns.is_empty()));

        // Every batch fits the budget.
        for batch in &batches {
            let size: usize = batch.turns.iter().map(|t| serialize_line(t).len()).sum();
            assert!(size <= 64);
        }

        // Concatenation reproduces the input exactly.
        let rejoined: Vec<DialogueTurn> =
            batches.into_iter().flat_map(|b| b.turns).collect();
        assert_eq!(rejoined, turns);
    }

    #[test]
    fn test_greedy_boundary_rule() {
        // Three turns serializing to 30, 40, and 25 bytes under a
        // 60-byte budget: 30+40 > 60 closes the first batch, 40+25 > 60
        // closes the second, so each turn lands in its own batch.
        let turns = vec![turn_of_bytes(30), turn_of_bytes(40), turn_of_bytes(25)];
        assert_eq!(serialize_line(&turns[0]).len(), 30);
        assert_eq!(serialize_line(&turns[1]).len(), 40);
        assert_eq!(serialize_line(&turns[2]).len(), 25);

        let batches = chunk_turns(&turns, 60).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].turns, vec![turns[0].clone()]);
        assert_eq!(batches[1].turns, vec![turns[1].clone()]);
        assert_eq!(batches[2].turns, vec![turns[2].clone()]);
    }

    #[test]
    fn test_adjacent_turns_share_a_batch_when_they_fit() {
        let turns = vec![turn_of_bytes(20), turn_of_bytes(20), turn_of_bytes(30)];
        let batches = chunk_turns(&turns, 40).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].turns.len(), 2);
        assert_eq!(batches[1].turns.len(), 1);
    }

    #[test]
    fn test_oversized_turn_fails_regardless_of_neighbors() {
        let turns = vec![turn_of_bytes(20), turn_of_bytes(100), turn_of_bytes(20)];
        assert!(matches!(
            chunk_turns(&turns, 60),
            Err(ChunkError::OversizedTurn { size: 100, budget: 60 })
        ));
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        assert!(chunk_turns(&[], 60).unwrap().is_empty());
    }

    #[test]
    fn test_available_budget_subtracts_instruction_overhead() {
        let instructions = "Read warmly.";
        let budget = available_budget(100, instructions).unwrap();
        assert_eq!(budget, 100 - instructions.len() - 2);
    }

    #[test]
    fn test_available_budget_rejects_oversized_instructions() {
        let instructions = "x".repeat(100);
        assert!(matches!(
            available_budget(50, &instructions),
            Err(ChunkError::InstructionsTooLarge { .. })
        ));
    }

    #[test]
    fn test_format_prompt_shape() {
        let batch = PromptBatch {
            turns: vec![turn(Speaker::A, "Hello."), turn(Speaker::B, "Hi.")],
        };
        let prompt = format_prompt("Speak in English.\n", &batch);
        assert_eq!(prompt, "Speak in English.\n\nSpeakerA: Hello.\nSpeakerB: Hi.");
    }
}
