//! Prompt assembly under a token budget.
//!
//! [`ContextAssembler`] turns a query, its retrieved chunks, and the recent
//! conversation into the message list sent to the language model. Token
//! usage is estimated with [`estimate_tokens`] (4 chars ≈ 1 token) and the
//! assembled prompt never exceeds the caller's budget.
//!
//! # Algorithm
//!
//! 1. Keep the most recent `max_history` turns; older ones are dropped.
//! 2. Reserve room for the instructions, the query, and the kept history.
//!    If that alone is over budget, drop the oldest kept turns; if the
//!    instructions and query still don't fit, fail with
//!    [`Error::PromptTooLarge`].
//! 3. Walk retrieved chunks by descending score and include each whole
//!    chunk while it fits. The first chunk that doesn't fit ends the walk;
//!    chunks are never truncated.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{recent_turns, ConversationTurn, Role, ScoredChunk};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message cost for role markers and separators.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant that answers questions \
using the provided document excerpts. Base your answer on the context below. If the context \
does not contain the answer, say that you don't know instead of guessing. When you use an \
excerpt, cite it by its bracketed number.";

const CONTEXT_HEADER: &str = "\n\nContext:\n";

/// Deterministic token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    fn estimated_tokens(&self) -> usize {
        MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&self.content)
    }
}

/// The assembled model input and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
    /// Chunks included in the prompt, best first.
    pub sources: Vec<ScoredChunk>,
    pub estimated_tokens: usize,
}

/// Estimated tokens for a full message list.
pub fn estimate_messages(messages: &[PromptMessage]) -> usize {
    messages.iter().map(PromptMessage::estimated_tokens).sum()
}

/// Builds bounded prompts from retrieved context and history.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    instructions: String,
    max_history: usize,
}

impl ContextAssembler {
    pub fn new(max_history: usize) -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_history,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Assemble a prompt whose estimate never exceeds `token_budget`.
    ///
    /// Deterministic for identical inputs.
    pub fn assemble(
        &self,
        query: &str,
        retrieved: &[ScoredChunk],
        history: &[ConversationTurn],
        token_budget: usize,
    ) -> Result<Prompt> {
        let mut history = recent_turns(history, self.max_history);

        // Instructions and query are mandatory.
        let fixed = 2 * MESSAGE_OVERHEAD_TOKENS
            + estimate_tokens(&self.instructions)
            + estimate_tokens(CONTEXT_HEADER)
            + estimate_tokens(query);
        if fixed > token_budget {
            return Err(Error::PromptTooLarge {
                estimated: fixed,
                budget: token_budget,
            });
        }

        let turn_cost =
            |t: &ConversationTurn| MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&t.content);
        let mut used = fixed + history.iter().map(turn_cost).sum::<usize>();
        while used > token_budget && !history.is_empty() {
            used -= turn_cost(&history[0]);
            history = &history[1..];
        }

        let mut ranked: Vec<&ScoredChunk> = retrieved.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut context = String::new();
        let mut sources = Vec::new();
        for scored in ranked {
            let block = render_chunk(sources.len() + 1, scored);
            let cost = estimate_tokens(&block);
            if used + cost > token_budget {
                break;
            }
            used += cost;
            context.push_str(&block);
            sources.push(scored.clone());
        }

        let mut system = String::with_capacity(self.instructions.len() + context.len() + 16);
        system.push_str(&self.instructions);
        system.push_str(CONTEXT_HEADER);
        system.push_str(&context);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::new(Role::System, system));
        messages.extend(
            history
                .iter()
                .map(|t| PromptMessage::new(t.role, t.content.clone())),
        );
        messages.push(PromptMessage::new(Role::User, query));

        let estimated_tokens = estimate_messages(&messages);
        Ok(Prompt {
            messages,
            sources,
            estimated_tokens,
        })
    }
}

fn render_chunk(number: usize, scored: &ScoredChunk) -> String {
    let chunk = &scored.chunk;
    match chunk.page {
        Some(page) => format!(
            "[{}] {} (page {})\n{}\n\n",
            number, chunk.document_id, page, chunk.text
        ),
        None => format!("[{}] {}\n{}\n\n", number, chunk.document_id, chunk.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn scored(index: usize, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                document_id: "policy.pdf".to_string(),
                index,
                text: text.to_string(),
                overlap: 0,
                page: Some(1),
                hash: String::new(),
            },
            score,
        }
    }

    fn history(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(format!("question {}", i))
                } else {
                    ConversationTurn::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn test_layout_and_order() {
        let assembler = ContextAssembler::new(8);
        let retrieved = vec![scored(0, "LOW-SCORE", 0.1), scored(1, "HIGH-SCORE", 0.9)];
        let prompt = assembler
            .assemble("What is covered?", &retrieved, &history(2), 10_000)
            .unwrap();

        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert_eq!(prompt.messages[3], PromptMessage::new(Role::User, "What is covered?"));
        let system = &prompt.messages[0].content;
        let high = system.find("HIGH-SCORE").unwrap();
        let low = system.find("LOW-SCORE").unwrap();
        assert!(high < low);
        assert!(system.contains("[1] policy.pdf (page 1)"));
        assert_eq!(prompt.sources[0].chunk.index, 1);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let assembler = ContextAssembler::new(8);
        let retrieved: Vec<ScoredChunk> = (0..20)
            .map(|i| scored(i, &"x".repeat(50 + i * 37), 1.0 - i as f32 * 0.01))
            .collect();
        for budget in [90, 120, 200, 400, 800, 1600] {
            match assembler.assemble("question?", &retrieved, &history(6), budget) {
                Ok(prompt) => {
                    assert!(prompt.estimated_tokens <= budget, "budget {}", budget);
                    assert_eq!(prompt.estimated_tokens, estimate_messages(&prompt.messages));
                }
                Err(Error::PromptTooLarge { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_chunk_dropped_whole() {
        let assembler = ContextAssembler::new(0).with_instructions("Answer.");
        let big = "y".repeat(400);
        let retrieved = vec![scored(0, "small chunk", 0.9), scored(1, &big, 0.8)];
        let prompt = assembler.assemble("q", &retrieved, &[], 60).unwrap();
        assert_eq!(prompt.sources.len(), 1);
        assert!(!prompt.messages[0].content.contains("yyyy"));
    }

    #[test]
    fn test_history_truncated_to_max() {
        let assembler = ContextAssembler::new(3);
        let prompt = assembler.assemble("q", &[], &history(7), 10_000).unwrap();
        // system + 3 turns + query
        assert_eq!(prompt.messages.len(), 5);
        assert_eq!(prompt.messages[1].content, "question 4");
        assert_eq!(prompt.messages[3].content, "question 6");
    }

    #[test]
    fn test_oldest_history_dropped_when_over_budget() {
        let assembler = ContextAssembler::new(10).with_instructions("Answer.");
        let long_turns = vec![
            ConversationTurn::user("a".repeat(400)),
            ConversationTurn::assistant("short reply"),
        ];
        let prompt = assembler.assemble("q", &[], &long_turns, 40).unwrap();
        assert_eq!(prompt.messages.len(), 3);
        assert_eq!(prompt.messages[1].content, "short reply");
        assert!(prompt.estimated_tokens <= 40);
    }

    #[test]
    fn test_query_alone_over_budget() {
        let assembler = ContextAssembler::new(4);
        let err = assembler
            .assemble(&"q".repeat(1000), &[], &[], 50)
            .unwrap_err();
        assert!(matches!(err, Error::PromptTooLarge { budget: 50, .. }));
    }

    #[test]
    fn test_deterministic() {
        let assembler = ContextAssembler::new(4);
        let retrieved = vec![scored(0, "a", 0.5), scored(1, "b", 0.5), scored(2, "c", 0.7)];
        let p1 = assembler.assemble("q", &retrieved, &history(5), 500).unwrap();
        let p2 = assembler.assemble("q", &retrieved, &history(5), 500).unwrap();
        assert_eq!(p1.messages, p2.messages);
        let order: Vec<usize> = p1.sources.iter().map(|s| s.chunk.index).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }
}
