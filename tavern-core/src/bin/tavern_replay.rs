//! Replay saved AI replies against a save file, offline.
//!
//! ```bash
//! cargo run -p tavern-core --bin tavern-replay -- save.json turn1.txt turn2.txt
//! ```
//!
//! Each reply file is applied as one turn with world events disabled. The
//! change log of every turn is printed and the resulting document is written
//! next to the save as `<save>.out.json`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tavern_core::ai::{ChatMessage, ChunkSink, Collaborator, CollaboratorError};
use tavern_core::{migrate, EngineConfig, Session};
use tokio::fs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Refuses every request, so compaction leaves memory untouched.
struct Offline;

#[async_trait]
impl Collaborator for Offline {
    async fn generate_raw(
        &self,
        _messages: &[ChatMessage],
        _on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Request(
            "no collaborator during replay".to_string(),
        ))
    }
}

struct Args {
    save: PathBuf,
    replies: Vec<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut config = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next()?)),
            "--help" | "-h" => return None,
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    if positional.len() < 2 {
        return None;
    }
    let save = positional.remove(0);
    Some(Args {
        save,
        replies: positional,
        config,
    })
}

fn print_help() {
    eprintln!("Usage: tavern-replay [--config engine.json] <save.json> <response.txt>...");
    eprintln!();
    eprintln!("Applies each saved AI response as a turn (events disabled) and writes");
    eprintln!("the resulting document to <save>.out.json.");
}

fn output_path(save: &Path) -> PathBuf {
    save.with_extension("out.json")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(args) = parse_args() else {
        print_help();
        std::process::exit(2);
    };

    let config = match &args.config {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::default(),
    }
    .with_events(false);

    let raw = serde_json::from_str(&fs::read_to_string(&args.save).await?)?;
    let (doc, report) = migrate(raw);
    println!(
        "Loaded {} (schema v{} -> v3, {} hint keys stripped)",
        args.save.display(),
        report.from_version,
        report.stripped_hints
    );
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }

    let mut session = Session::from_document(doc, Offline, config);

    for (turn, path) in args.replies.iter().enumerate() {
        let reply = fs::read_to_string(path).await?;
        let report = session.apply_response(&reply, &|| false).await?;

        println!();
        println!(
            "== Turn {} ({}, parsed via {}) ==",
            turn + 1,
            path.display(),
            report.parse_strategy
        );
        print!("{}", report.change_log);
        for eviction in &report.evictions {
            println!("  memory: evicted \"{}\"", eviction.evicted.content);
        }
        for notice in &report.notices {
            println!("  notice: {notice}");
        }
    }

    let out = output_path(&args.save);
    let content = serde_json::to_string_pretty(&session.document().to_value())?;
    fs::write(&out, content).await?;
    println!();
    println!("Wrote {}", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("saves/slot1.json")),
            PathBuf::from("saves/slot1.out.json")
        );
        assert_eq!(output_path(Path::new("slot")), PathBuf::from("slot.out.json"));
    }
}
