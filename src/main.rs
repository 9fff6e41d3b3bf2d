//! researcher - console entry point.
//!
//! Reads a research question and optional context lines from stdin, runs the
//! orchestrator, and prints the answer with a usage report.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use researcher::{Config, ResearchContext, ResearchOrchestrator};

fn prompt_line(stdin: &mut impl BufRead, prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if stdin.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    let default_level = if config.debug { "debug" } else { "info" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut stdin = io::stdin().lock();
    let question = prompt_line(&mut stdin, "Research question: ")?.unwrap_or_default();
    if question.is_empty() {
        bail!("A research question is required");
    }

    println!("Context, one item per line (empty line to finish):");
    let mut context = Vec::new();
    while let Some(line) = prompt_line(&mut stdin, "> ")? {
        if line.is_empty() {
            break;
        }
        context.push(line);
    }
    drop(stdin);

    let cancel = CancellationToken::new();
    let ctx = ResearchContext::from_config(config)?.with_cancel_token(cancel.clone());
    let mut orchestrator = ResearchOrchestrator::new(ctx)?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current call");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run(question, context).await?;

    println!();
    if outcome.answered {
        println!("Answer:\n{}", outcome.answer);
    } else {
        println!("Research stopped ({:?}) before a conclusive answer.", outcome.reason);
        println!("Best available summary:\n{}", outcome.answer);
    }
    println!();
    println!("Turns: {}", outcome.turns);
    println!("Usage: {}", outcome.usage);

    Ok(())
}
