//! Grounded response generation.
//!
//! [`LanguageModel`] is the seam to the model provider; [`ResponseGenerator`]
//! drives it either in one shot or incrementally, pushing fragments into a
//! [`FragmentSink`] as they arrive. The generator never retries: replaying
//! a stream that already delivered fragments would duplicate them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::assemble::{Prompt, PromptMessage};
use crate::error::{Error, Result};

/// Incremental model output, in generation order.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Trait for language model providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Maximum prompt size the model accepts, when known.
    fn max_context_tokens(&self) -> Option<usize> {
        None
    }

    /// Generate the full response in one call.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;

    /// Start a streaming generation.
    async fn stream(&self, messages: &[PromptMessage]) -> Result<FragmentStream>;
}

/// Receives text fragments as they are generated.
///
/// After [`discard`](FragmentSink::discard) is called, every fragment
/// appended so far belongs to a failed generation and must not be shown
/// as an answer.
pub trait FragmentSink: Send {
    fn append(&mut self, fragment: &str);

    fn discard(&mut self) {}
}

impl FragmentSink for String {
    fn append(&mut self, fragment: &str) {
        self.push_str(fragment);
    }

    fn discard(&mut self) {
        self.clear();
    }
}

/// Sink that drops every fragment.
pub struct NullSink;

impl FragmentSink for NullSink {
    fn append(&mut self, _fragment: &str) {}
}

/// Calls the language model with an assembled prompt.
#[derive(Clone)]
pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Generate the final text without streaming.
    pub async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.check_context_limit(prompt)?;
        self.model
            .complete(&prompt.messages)
            .await
            .map_err(into_generation)
    }

    /// Stream fragments into `sink` and return their concatenation.
    ///
    /// If the stream fails part-way, `sink.discard()` is called and the
    /// error is returned; nothing delivered so far is usable.
    pub async fn generate_streaming(
        &self,
        prompt: &Prompt,
        sink: &mut dyn FragmentSink,
    ) -> Result<String> {
        self.check_context_limit(prompt)?;
        let mut stream = self
            .model
            .stream(&prompt.messages)
            .await
            .map_err(into_generation)?;

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    sink.append(&fragment);
                    text.push_str(&fragment);
                }
                Err(e) => {
                    sink.discard();
                    return Err(into_generation(e));
                }
            }
        }

        Ok(text)
    }

    fn check_context_limit(&self, prompt: &Prompt) -> Result<()> {
        match self.model.max_context_tokens() {
            Some(limit) if prompt.estimated_tokens > limit => Err(Error::PromptTooLarge {
                estimated: prompt.estimated_tokens,
                budget: limit,
            }),
            _ => Ok(()),
        }
    }
}

fn into_generation(e: Error) -> Error {
    match e {
        Error::Generation(_) | Error::PromptTooLarge { .. } => e,
        other => Error::generation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::ContextAssembler;
    use futures::stream;

    /// Emits the configured fragments, optionally failing after `fail_after`.
    struct ScriptedModel {
        fragments: Vec<&'static str>,
        fail_after: Option<usize>,
        limit: Option<usize>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn max_context_tokens(&self) -> Option<usize> {
            self.limit
        }

        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
            if self.fail_after.is_some() {
                return Err(Error::generation("provider unavailable"));
            }
            Ok(self.fragments.concat())
        }

        async fn stream(&self, _messages: &[PromptMessage]) -> Result<FragmentStream> {
            let mut items: Vec<Result<String>> =
                self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(Error::generation("connection reset")));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    fn prompt() -> Prompt {
        ContextAssembler::new(4)
            .assemble("What is the meal allowance?", &[], &[], 1000)
            .unwrap()
    }

    #[tokio::test]
    async fn test_streaming_delivers_fragments_in_order() {
        let generator = ResponseGenerator::new(Arc::new(ScriptedModel {
            fragments: vec!["The ", "allowance ", "is ", "$50."],
            fail_after: None,
            limit: None,
        }));
        let mut seen: Vec<String> = Vec::new();
        struct Collect<'a>(&'a mut Vec<String>);
        impl FragmentSink for Collect<'_> {
            fn append(&mut self, fragment: &str) {
                self.0.push(fragment.to_string());
            }
        }
        let text = generator
            .generate_streaming(&prompt(), &mut Collect(&mut seen))
            .await
            .unwrap();
        assert_eq!(text, "The allowance is $50.");
        assert_eq!(seen, vec!["The ", "allowance ", "is ", "$50."]);
    }

    #[tokio::test]
    async fn test_stream_failure_discards_partial_output() {
        let generator = ResponseGenerator::new(Arc::new(ScriptedModel {
            fragments: vec!["partial ", "answer ", "never finished"],
            fail_after: Some(2),
            limit: None,
        }));
        let mut sink = String::new();
        let err = generator
            .generate_streaming(&prompt(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_non_streaming_generate() {
        let generator = ResponseGenerator::new(Arc::new(ScriptedModel {
            fragments: vec!["one", "two"],
            fail_after: None,
            limit: None,
        }));
        assert_eq!(generator.generate(&prompt()).await.unwrap(), "onetwo");
    }

    #[tokio::test]
    async fn test_context_limit_checked_before_call() {
        let generator = ResponseGenerator::new(Arc::new(ScriptedModel {
            fragments: vec!["unused"],
            fail_after: None,
            limit: Some(5),
        }));
        let err = generator.generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, Error::PromptTooLarge { budget: 5, .. }));
    }
}
