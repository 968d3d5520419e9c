//! Query pipeline: one conversation turn from question to grounded answer.
//!
//! ```text
//! embed query → search top-k → assemble prompt → generate (streaming)
//! ```
//!
//! Any failure is returned as a [`QueryError`] naming the stage. History
//! is only read here; [`QueryPipeline::turn`] records the exchange in the
//! caller's [`Conversation`] after generation succeeds, so a failed or
//! cancelled turn leaves it untouched.

use std::sync::Arc;

use ragline_core::assemble::{ContextAssembler, Prompt};
use ragline_core::embedding::Embedder;
use ragline_core::generate::{FragmentSink, NullSink, ResponseGenerator};
use ragline_core::index::VectorIndex;
use ragline_core::models::{Conversation, ConversationTurn, RetrievedContext};
use ragline_core::{Error, QueryError, QueryStage};
use tracing::debug;

use crate::retry::RetryPolicy;

/// The final text of a turn and the chunks its prompt was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: RetrievedContext,
}

pub struct QueryPipeline {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    top_k: usize,
    max_context_tokens: usize,
    retry: RetryPolicy,
}

impl QueryPipeline {
    /// # Errors
    ///
    /// [`Error::Config`] for `top_k == 0` or a zero token budget, and
    /// [`Error::DimensionMismatch`] if embedder and index disagree.
    pub fn new(
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        assembler: ContextAssembler,
        generator: ResponseGenerator,
        top_k: usize,
        max_context_tokens: usize,
    ) -> ragline_core::Result<Self> {
        if top_k == 0 {
            return Err(Error::config("retrieval.top_k must be >= 1"));
        }
        if max_context_tokens == 0 {
            return Err(Error::config("retrieval.max_context_tokens must be > 0"));
        }
        if embedder.dims() != index.dims() {
            return Err(Error::DimensionMismatch {
                expected: index.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self {
            embedder,
            index,
            assembler,
            generator,
            top_k,
            max_context_tokens,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embed `query` and return the `top_k` closest chunks.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::new(
                QueryStage::Embed,
                Error::config("query is empty"),
            ));
        }

        let embedder = &self.embedder;
        let vector = self
            .retry
            .run("embed query", || embedder.embed_query(query))
            .await
            .map_err(|e| QueryError::new(QueryStage::Embed, e))?;

        let index = &self.index;
        let vector = &vector;
        let top_k = self.top_k;
        self.retry
            .run("search", || index.search(vector, top_k))
            .await
            .map_err(|e| QueryError::new(QueryStage::Search, e))
    }

    /// Retrieve and assemble the prompt for `query` without generating.
    pub async fn prepare(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<Prompt, QueryError> {
        let retrieved = self.retrieve(query).await?;
        let prompt = self
            .assembler
            .assemble(query.trim(), &retrieved, history, self.max_context_tokens)
            .map_err(|e| QueryError::new(QueryStage::Assemble, e))?;

        debug!(
            retrieved = retrieved.len(),
            included = prompt.sources.len(),
            estimated_tokens = prompt.estimated_tokens,
            budget = self.max_context_tokens,
            "prompt assembled"
        );
        Ok(prompt)
    }

    /// Answer one query, streaming fragments into `sink`.
    ///
    /// On failure after partial output the sink has been told to discard
    /// what it received.
    pub async fn answer(
        &self,
        query: &str,
        history: &[ConversationTurn],
        sink: &mut dyn FragmentSink,
    ) -> Result<Answer, QueryError> {
        let prompt = self.prepare(query, history).await?;
        let text = self
            .generator
            .generate_streaming(&prompt, sink)
            .await
            .map_err(|e| QueryError::new(QueryStage::Generate, e))?;
        Ok(Answer {
            text,
            sources: prompt.sources,
        })
    }

    /// Answer one query with a single non-streaming model call.
    pub async fn answer_complete(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<Answer, QueryError> {
        let prompt = self.prepare(query, history).await?;
        let text = self
            .generator
            .generate(&prompt)
            .await
            .map_err(|e| QueryError::new(QueryStage::Generate, e))?;
        Ok(Answer {
            text,
            sources: prompt.sources,
        })
    }

    /// Run a full conversational turn against `conversation`.
    ///
    /// The window of the most recent turns feeds the prompt; the question
    /// and answer are appended only when generation succeeds.
    pub async fn turn(
        &self,
        conversation: &mut Conversation,
        query: &str,
        sink: Option<&mut dyn FragmentSink>,
    ) -> Result<Answer, QueryError> {
        let window = conversation.window(self.assembler.max_history());
        let answer = match sink {
            Some(sink) => self.answer(query, window, sink).await?,
            None => self.answer(query, window, &mut NullSink).await?,
        };
        conversation.record_exchange(query.trim(), answer.text.clone());
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use ragline_core::assemble::PromptMessage;
    use ragline_core::embedding::EmbeddingProvider;
    use ragline_core::generate::{FragmentStream, LanguageModel};
    use ragline_core::index::memory::InMemoryIndex;
    use ragline_core::index::Metric;
    use ragline_core::models::{Chunk, IndexEntry};
    use std::sync::Mutex;

    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> ragline_core::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("meal") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    /// Echoes the number of prompt messages it saw.
    struct CountingModel {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn complete(&self, messages: &[PromptMessage]) -> ragline_core::Result<String> {
            self.seen.lock().unwrap().push(messages.len());
            Ok(format!("{} messages", messages.len()))
        }
        async fn stream(&self, messages: &[PromptMessage]) -> ragline_core::Result<FragmentStream> {
            self.seen.lock().unwrap().push(messages.len());
            let text = format!("{} messages", messages.len());
            Ok(futures::stream::iter(vec![Ok(text)]).boxed())
        }
    }

    async fn pipeline(max_history: usize) -> (QueryPipeline, Arc<CountingModel>) {
        let index = Arc::new(InMemoryIndex::new(2, Metric::Cosine));
        let chunk = |index: usize, text: &str| Chunk {
            document_id: "policy.txt".to_string(),
            index,
            text: text.to_string(),
            overlap: 0,
            page: None,
            hash: String::new(),
        };
        index
            .upsert(&[
                IndexEntry::new(chunk(0, "meal allowance is $50"), vec![1.0, 0.0]),
                IndexEntry::new(chunk(1, "hotel cap is $200"), vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let model = Arc::new(CountingModel {
            seen: Mutex::new(Vec::new()),
        });
        let pipeline = QueryPipeline::new(
            Embedder::new(Arc::new(AxisProvider), 8).unwrap(),
            index,
            ContextAssembler::new(max_history),
            ResponseGenerator::new(model.clone()),
            1,
            1000,
        )
        .unwrap()
        .with_retry(RetryPolicy::none());
        (pipeline, model)
    }

    #[tokio::test]
    async fn retrieve_returns_top_k() {
        let (pipeline, _) = pipeline(4).await;
        let results = pipeline.retrieve("what is the meal rate?").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.index, 0);
    }

    #[tokio::test]
    async fn empty_query_fails_at_embed() {
        let (pipeline, _) = pipeline(4).await;
        let err = pipeline.retrieve("   ").await.unwrap_err();
        assert_eq!(err.stage, QueryStage::Embed);
    }

    #[tokio::test]
    async fn turn_records_exchange_and_windows_history() {
        let (pipeline, model) = pipeline(2).await;
        let mut conversation = Conversation::new();

        let first = pipeline
            .turn(&mut conversation, "meal allowance?", None)
            .await
            .unwrap();
        assert_eq!(first.sources.len(), 1);
        assert_eq!(conversation.len(), 2);

        pipeline
            .turn(&mut conversation, "and the hotel?", None)
            .await
            .unwrap();
        pipeline
            .turn(&mut conversation, "meal again?", None)
            .await
            .unwrap();
        assert_eq!(conversation.len(), 6);

        // system + at most 2 history turns + query
        assert_eq!(*model.seen.lock().unwrap(), vec![2, 4, 4]);
    }

    #[tokio::test]
    async fn assemble_failure_reported_with_stage() {
        let (pipeline, _) = pipeline(2).await;
        let long_query = format!("meal {}", "x".repeat(10_000));
        let err = pipeline.answer_complete(&long_query, &[]).await.unwrap_err();
        assert_eq!(err.stage, QueryStage::Assemble);
        assert!(matches!(err.source, Error::PromptTooLarge { .. }));
    }

    #[test]
    fn zero_top_k_rejected() {
        let index = Arc::new(InMemoryIndex::new(2, Metric::Cosine));
        let result = QueryPipeline::new(
            Embedder::new(Arc::new(AxisProvider), 8).unwrap(),
            index,
            ContextAssembler::new(2),
            ResponseGenerator::new(Arc::new(CountingModel {
                seen: Mutex::new(Vec::new()),
            })),
            0,
            1000,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
