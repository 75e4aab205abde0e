//! `casestream chat`: interactive REPL.
//!
//! Reads a line at a time and submits it as a turn.  Progress notes stream
//! to stderr while the turn runs; Ctrl+C during a turn cancels it.

use std::sync::Arc;

use cs_domain::config::Config;
use cs_domain::frame::Citation;

use crate::events::ChatEvent;
use crate::gate::{Conversation, GateError, TurnReport};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(config: Config) -> anyhow::Result<()> {
    let store = super::open_store(&config)?;
    let conversation = super::open_conversation(&config, store)?;

    let printer = spawn_progress_printer(&conversation);

    let mut rl = rustyline::DefaultEditor::new()?;

    eprintln!("casestream chat  ({})", config.backend.query_url());
    eprintln!(
        "Conversation: {}  |  {} stored entries  |  /help for commands, Ctrl+D to exit",
        conversation.id(),
        conversation.history().len()
    );
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed).ok();

                if trimmed.starts_with('/') {
                    match handle_slash_command(trimmed, &conversation).await {
                        Flow::Exit => break,
                        Flow::Continue => continue,
                    }
                }

                let result = with_interrupt(&conversation, conversation.submit(trimmed)).await;
                print_result(result);
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    printer.abort();
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Flow {
    Continue,
    Exit,
}

async fn handle_slash_command(input: &str, conversation: &Arc<Conversation>) -> Flow {
    let mut parts = input.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

    match cmd {
        "/exit" | "/quit" => return Flow::Exit,

        "/regenerate" => regenerate(conversation, arg).await,

        "/clear" => match conversation.clear() {
            Ok(removed) => eprintln!("Cleared {removed} entries and the session token."),
            Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
        },

        "/sources" => match conversation.history().last_bot() {
            Some(reply) if !reply.citations.is_empty() => print_citations(&reply.citations),
            _ => eprintln!("(no sources for the last answer)"),
        },

        "/side" => {
            let open = conversation.toggle_side_content();
            eprintln!("Side panel {}", if open { "opened" } else { "closed" });
        }

        "/history" => {
            let history = conversation.history();
            if history.is_empty() {
                eprintln!("(empty)");
            } else {
                super::history::print_entries(history.entries());
            }
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /regenerate [n]  Re-ask question n (default: the last one)");
            eprintln!("  /clear           Forget history and the session token");
            eprintln!("  /sources         Show citations for the last answer");
            eprintln!("  /history         Show the conversation so far");
            eprintln!("  /side            Toggle the side panel");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    Flow::Continue
}

async fn regenerate(conversation: &Arc<Conversation>, arg: Option<&str>) {
    let history = conversation.history();
    let turns: Vec<_> = history.user_turns().map(|m| m.turn_id).collect();
    if turns.is_empty() {
        eprintln!("(nothing to regenerate)");
        return;
    }

    let index = match arg.map(str::parse::<usize>) {
        None => turns.len(),
        Some(Ok(n)) if (1..=turns.len()).contains(&n) => n,
        Some(_) => {
            eprintln!("Usage: /regenerate [n]  where n is 1..={}", turns.len());
            return;
        }
    };

    let result = with_interrupt(conversation, conversation.regenerate(turns[index - 1])).await;
    print_result(result);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive a turn to completion, cancelling it on Ctrl+C.
async fn with_interrupt<F>(conversation: &Conversation, turn: F) -> Result<TurnReport, GateError>
where
    F: std::future::Future<Output = Result<TurnReport, GateError>>,
{
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => return result,
            _ = tokio::signal::ctrl_c() => {
                if conversation.cancel() {
                    eprintln!("\x1B[2m(cancelling…)\x1B[0m");
                }
            }
        }
    }
}

fn print_result(result: Result<TurnReport, GateError>) {
    match result {
        Ok(report) if report.is_answer() => {
            println!("{}", report.reply.content);
            if !report.reply.citations.is_empty() {
                eprintln!(
                    "\x1B[2m({} source(s), /sources to list)\x1B[0m",
                    report.reply.citations.len()
                );
            }
            println!();
        }
        Ok(report) => {
            eprintln!("\x1B[31m{}\x1B[0m", report.reply.content);
            println!();
        }
        Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
    }
}

pub fn print_citations(citations: &[Citation]) {
    for (i, c) in citations.iter().enumerate() {
        println!("[{}] {} - {}", i + 1, c.source_name, c.link);
        if !c.excerpt.is_empty() {
            println!("    {}", c.excerpt);
        }
    }
}

fn spawn_progress_printer(conversation: &Conversation) -> tokio::task::JoinHandle<()> {
    let mut rx = conversation.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ChatEvent::Progress { steps, .. }) => {
                    if let Some(step) = steps.last() {
                        eprintln!("\x1B[2m· {}\x1B[0m", step.message);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
