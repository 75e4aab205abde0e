//! `casestream ask`: one-shot question.
//!
//! Runs a single turn against an in-memory conversation (nothing is
//! written to the stored history), prints the answer, and exits non-zero
//! when the turn failed.

use std::sync::Arc;

use cs_domain::config::Config;
use cs_sessions::MemoryStore;

use crate::events::ChatEvent;

pub async fn run(config: Config, query: String, json_output: bool) -> anyhow::Result<bool> {
    let conversation = super::open_conversation(&config, Arc::new(MemoryStore::new()))?;

    // Progress notes go to stderr so stdout stays the answer only.
    let printer = if json_output {
        None
    } else {
        let mut rx = conversation.subscribe();
        Some(tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ChatEvent::Progress { steps, .. } = event {
                    if let Some(step) = steps.last() {
                        eprintln!("\x1b[2m· {}\x1b[0m", step.message);
                    }
                }
            }
        }))
    };

    let report = conversation.submit(&query).await?;
    if let Some(printer) = printer {
        printer.abort();
    }

    if json_output {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| anyhow::anyhow!("serializing report: {e}"))?;
        println!("{json}");
    } else if report.is_answer() {
        println!("{}", report.reply.content);
        super::chat::print_citations(&report.reply.citations);
    } else {
        eprintln!("error: {}", report.reply.content);
    }

    Ok(report.is_answer())
}
