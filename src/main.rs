// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use tagsmith::{
    default_rules_path, sync_books, BookId, CancelToken, LibrarySnapshot, MemoryStore,
    MetadataStore, SyncRules, TagRegistry,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  tagsmith sync [options] --library <file>\n  tagsmith inspect [options] --library <file>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Sync(opts) => run_sync(opts),
            Command::Inspect(opts) => run_inspect(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Rewrite book tags according to the rule document.
    #[command(override_usage = "tagsmith sync [options] --library <file>")]
    Sync(SyncOptions),

    /// Print the tag registry the rule document would build.
    #[command(override_usage = "tagsmith inspect [options] --library <file>")]
    Inspect(InspectOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Library snapshot file to sync.
    #[arg(short, long, value_name = "file")]
    pub library: PathBuf,

    /// Rule document, defaults to the user configuration directory.
    #[arg(short, long, value_name = "file")]
    pub rules: Option<PathBuf>,

    /// Book ids to sync, defaults to every book in the library.
    #[arg(short, long, value_name = "id", value_delimiter = ',')]
    pub books: Vec<BookId>,

    /// Resolve everything but leave the library file untouched.
    #[arg(short, long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InspectOptions {
    /// Library snapshot file to read column values from.
    #[arg(short, long, value_name = "file")]
    pub library: PathBuf,

    /// Rule document, defaults to the user configuration directory.
    #[arg(short, long, value_name = "file")]
    pub rules: Option<PathBuf>,
}

fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_sync(opts: SyncOptions) -> Result<()> {
    let rules = load_rules(opts.rules.clone())?;
    let mut store = load_library(&opts.library)?;

    let book_ids = if opts.books.is_empty() {
        store.book_ids()
    } else {
        opts.books.clone()
    };

    let report = sync_books(&mut store, &rules, &book_ids, &CancelToken::new())?;
    for skipped in &report.skipped {
        warn!(book_id = skipped.book_id, reason = %skipped.reason, "book left untouched");
    }
    println!(
        "synced {} book(s), skipped {} book(s)",
        report.synced.len(),
        report.skipped.len()
    );

    if opts.dry_run {
        println!("dry run, library file left untouched");
        return Ok(());
    }

    fs::write(&opts.library, store.into_snapshot().to_string())
        .with_context(|| format!("failed to write library file {:?}", opts.library.display()))?;

    Ok(())
}

fn run_inspect(opts: InspectOptions) -> Result<()> {
    let rules = load_rules(opts.rules.clone())?;
    let store = load_library(&opts.library)?;

    let columns = rules.included_columns();
    let mut column_values = Vec::with_capacity(columns.len());
    for column in &columns {
        column_values.push((column.to_string(), store.distinct_field_values(column)?));
    }

    let registry = TagRegistry::build(&column_values, &rules);
    for tag in registry.iter() {
        println!(
            "{} [{}] prio={} used-by={} display={:?} aliases={:?} add-tags={:?}",
            tag.canonical_name,
            tag.source_collection,
            tag.priority,
            tag.usage_count,
            tag.display_name,
            tag.name_aliases,
            tag.add_tags,
        );
    }

    Ok(())
}

/// Load the rule document, falling back to built-in defaults when the
/// default path has no file yet.
fn load_rules(path: Option<PathBuf>) -> Result<SyncRules> {
    match path {
        Some(path) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("failed to read rule document {:?}", path.display()))?;
            Ok(data.parse()?)
        }
        None => {
            let path = default_rules_path()?;
            if !path.exists() {
                return Ok(SyncRules::default());
            }
            let data = fs::read_to_string(&path)
                .with_context(|| format!("failed to read rule document {:?}", path.display()))?;
            Ok(data.parse()?)
        }
    }
}

fn load_library(path: &PathBuf) -> Result<MemoryStore> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read library file {:?}", path.display()))?;
    let snapshot: LibrarySnapshot = data.parse()?;

    Ok(MemoryStore::from(snapshot))
}
