//! CLI command implementations.
//!
//! Each `run_*` function backs one `pagewise` subcommand and prints to
//! stdout. Logs go to stderr.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;

use pagewise::config::Config;
use pagewise::context::build_context;
use pagewise::generator::create_generator;
use pagewise::models::Document;
use pagewise::reader::Reader;
use pagewise::session::{ConversationSession, ReplyEvent};
use pagewise::sqlite_store::SqliteProgressStore;

async fn build_reader(config: &Config) -> Result<Reader> {
    let store = SqliteProgressStore::open(config).await?;
    let generator = create_generator(&config.generator)?;
    Ok(Reader::new(config.clone(), Arc::new(store), generator))
}

async fn open_file(reader: &Reader, path: &Path) -> Result<Arc<Document>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    match reader.open_document(bytes, None, &file_name).await? {
        Some(document) => Ok(document),
        None => bail!("Loading {} was cancelled", file_name),
    }
}

/// Page to work on: the 1-based `--page` argument, else the saved position.
async fn resolve_page(reader: &Reader, document: &Document, page: Option<usize>) -> Result<usize> {
    match page {
        Some(0) => bail!("Pages are numbered from 1"),
        Some(p) if p > document.page_count() => bail!(
            "Page {} does not exist ({} has {} pages)",
            p,
            document.file_name,
            document.page_count()
        ),
        Some(p) => Ok(p - 1),
        None => Ok(reader.restore_page(document).await?),
    }
}

pub async fn run_open(config: &Config, path: &Path) -> Result<()> {
    let reader = build_reader(config).await?;
    let document = open_file(&reader, path).await?;
    let saved = reader.get_saved_page(document.document_key()).await?;

    println!("--- Document ---");
    println!("title:  {}", document.title);
    println!("kind:   {}", document.kind);
    println!("pages:  {}", document.page_count());
    match saved {
        Some(page) => println!("saved:  page {}", document.clamp_page(page) + 1),
        None => println!("saved:  (none)"),
    }
    println!();

    println!("--- Outline ({}) ---", document.outline().len());
    for entry in document.outline() {
        println!(
            "{}{}  (page {})",
            "  ".repeat(entry.level),
            entry.title,
            entry.page_index + 1
        );
    }

    Ok(())
}

pub async fn run_context(config: &Config, path: &Path, page: Option<usize>) -> Result<()> {
    let reader = build_reader(config).await?;
    let document = open_file(&reader, path).await?;
    let current = resolve_page(&reader, &document, page).await?;

    println!("{}", build_context(document.pages(), current));
    Ok(())
}

pub async fn run_progress(config: &Config, path: &Path, set: Option<usize>) -> Result<()> {
    let reader = build_reader(config).await?;
    let document = open_file(&reader, path).await?;

    if let Some(page) = set {
        let index = resolve_page(&reader, &document, Some(page)).await?;
        let saved = reader.save_progress(&document, index).await?;
        println!("Saved {} at page {}.", saved.document_key, saved.page_index + 1);
        return Ok(());
    }

    match reader.get_saved_page(document.document_key()).await? {
        Some(page) => println!("{}", document.clamp_page(page) + 1),
        None => println!("No saved progress for {}.", document.file_name),
    }
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    path: &Path,
    page: Option<usize>,
    question: &str,
) -> Result<()> {
    let reader = build_reader(config).await?;
    let document = open_file(&reader, path).await?;
    let current = resolve_page(&reader, &document, page).await?;

    let mut session = reader.start_session(document, current);
    let failed = print_reply(&mut session, question).await?;
    session.close();
    if failed {
        bail!("Could not answer the question");
    }
    Ok(())
}

pub async fn run_chat(config: &Config, path: &Path) -> Result<()> {
    let reader = build_reader(config).await?;
    let document = open_file(&reader, path).await?;
    let current = reader.restore_page(&document).await?;
    let mut session = reader.start_session(Arc::clone(&document), current);

    println!(
        "{} ({} pages). Commands: /page N, /next, /prev, /quit",
        document.title,
        document.page_count()
    );

    let stdin = std::io::stdin();
    loop {
        print!("[page {}] > ", session.current_page() + 1);
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let moved_to = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/next", _) => Some(session.current_page() + 1),
            ("/prev", _) => Some(session.current_page().saturating_sub(1)),
            ("/page", arg) => match arg.trim().parse::<usize>() {
                Ok(p) if p >= 1 => Some(p - 1),
                _ => {
                    eprintln!("Usage: /page N (N starts at 1)");
                    continue;
                }
            },
            (cmd, _) if cmd.starts_with('/') => {
                eprintln!("Unknown command: {}", cmd);
                continue;
            }
            _ => None,
        };

        match moved_to {
            Some(index) => {
                let index = session.set_current_page(index);
                reader.save_progress(&document, index).await?;
                println!("Now on page {} of {}.", index + 1, document.page_count());
            }
            None => {
                print_reply(&mut session, line).await?;
            }
        }
    }

    session.close();
    Ok(())
}

/// Stream one reply to stdout. Returns `true` if generation failed.
async fn print_reply(session: &mut ConversationSession, question: &str) -> Result<bool> {
    let mut printed = 0;
    let mut failed = false;
    {
        let mut events = session.submit_turn(question)?;
        while let Some(event) = events.next().await {
            match event {
                ReplyEvent::Snapshot(text) | ReplyEvent::Finished(text) => {
                    // Snapshots are cumulative; print only what is new.
                    if let Some(rest) = text.get(printed..) {
                        print!("{}", rest);
                        std::io::stdout().flush()?;
                    }
                    printed = text.len();
                }
                ReplyEvent::Failed(e) => {
                    tracing::warn!(error = %e, "could not answer");
                    failed = true;
                }
            }
        }
    }
    if failed {
        if let Some(turn) = session.turns().last() {
            print!("{}", turn.text());
        }
    }
    println!();
    Ok(failed)
}
