//! `ragline ask` and `ragline chat`.
//!
//! `ask` answers one question with no history. `chat` runs a line-based
//! session on stdin, keeping the conversation in memory for the lifetime
//! of the process. Answers stream to stdout as they are generated when
//! `[llm] stream = true`.
//!
//! Pressing Ctrl-C during a chat turn cancels that turn only: the partial
//! answer is discarded and the conversation is left as it was before the
//! question. At the prompt, Ctrl-C, `/exit`, or EOF ends the session and
//! `/clear` resets the conversation.

use std::io::Write;

use anyhow::Result;
use ragline_core::generate::FragmentSink;
use ragline_core::models::{Conversation, RetrievedContext};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::app::App;
use crate::config::Config;
use crate::query::{Answer, QueryPipeline};

/// Prints fragments to stdout as they arrive.
#[derive(Default)]
pub struct StdoutSink {
    written: usize,
}

impl FragmentSink for StdoutSink {
    fn append(&mut self, fragment: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
        self.written += fragment.len();
    }

    fn discard(&mut self) {
        if self.written > 0 {
            println!();
            eprintln!("(partial answer discarded)");
        }
        self.written = 0;
    }
}

pub async fn run_ask(config: Config, question: &str) -> Result<()> {
    let stream = config.llm.stream;
    let app = App::open(config).await?;
    let pipeline = app.query()?;

    let answer = if stream {
        let mut sink = StdoutSink::default();
        let answer = pipeline.answer(question, &[], &mut sink).await?;
        println!();
        answer
    } else {
        let answer = pipeline.answer_complete(question, &[]).await?;
        println!("{}", answer.text);
        answer
    };
    print_sources(&answer.sources);
    Ok(())
}

pub async fn run_chat(config: Config) -> Result<()> {
    let stream = config.llm.stream;
    let app = App::open(config).await?;
    let pipeline = app.query()?;
    let mut conversation = Conversation::new();

    eprintln!("ragline chat: ask about your documents. /clear resets, /exit quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                conversation.clear();
                eprintln!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        tokio::select! {
            result = chat_turn(&pipeline, &mut conversation, line, stream) => {
                match result {
                    Ok(answer) => print_sources(&answer.sources),
                    Err(e) => {
                        warn!(stage = %e.stage, error = %e.source, "turn failed");
                        eprintln!("Error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                eprintln!("(cancelled)");
            }
        }
    }
    Ok(())
}

async fn chat_turn(
    pipeline: &QueryPipeline,
    conversation: &mut Conversation,
    question: &str,
    stream: bool,
) -> Result<Answer, ragline_core::QueryError> {
    if stream {
        let mut sink = StdoutSink::default();
        let answer = pipeline.turn(conversation, question, Some(&mut sink)).await?;
        println!();
        Ok(answer)
    } else {
        let answer = pipeline.turn(conversation, question, None).await?;
        println!("{}", answer.text);
        Ok(answer)
    }
}

fn prompt_marker() {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(b"> ");
    let _ = stdout.flush();
}

fn print_sources(sources: &RetrievedContext) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, scored) in sources.iter().enumerate() {
        let chunk = &scored.chunk;
        match chunk.page {
            Some(page) => println!(
                "  [{}] {} chunk {} (page {}, score {:.3})",
                i + 1,
                chunk.document_id,
                chunk.index,
                page,
                scored.score
            ),
            None => println!(
                "  [{}] {} chunk {} (score {:.3})",
                i + 1,
                chunk.document_id,
                chunk.index,
                scored.score
            ),
        }
    }
}
