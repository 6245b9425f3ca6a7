//! # cairn - block-hash database CLI
//!
//! Command-line front end for the cairn hash database. Every subcommand
//! opens the database directory, performs one operation, and exits;
//! failures print to stderr and set a non-zero exit status.
//!
//! ```text
//! cairn create <dir>            Create a new, empty database
//! cairn import <dir> <xml>      Import a DFXML block-hash list
//! cairn import-json <dir> <js>  Import a JSON-lines export
//! cairn export-json <dir> <out> Export the database as JSON lines
//! cairn merge <dir> <other>     Merge another database into this one
//! cairn scan <dir> <hash>       Look up a block hash (hex)
//! cairn stats <dir>             Print database statistics
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=info` to see import
//! and commit summaries.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hashdb::{HashAlgorithm, HashDb, ImportOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Forensic block-hash database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty database directory.
    Create {
        dir: PathBuf,
        /// Block hash algorithm stored in the database.
        #[arg(long, default_value = "md5")]
        algorithm: String,
        /// Block size in bytes; 0 defers to the first import.
        #[arg(long, default_value_t = 0)]
        block_size: u32,
    },
    /// Import a DFXML block-hash list.
    Import {
        dir: PathBuf,
        file: PathBuf,
        /// Skip malformed records instead of aborting the import.
        #[arg(long)]
        skip_bad_records: bool,
    },
    /// Import a JSON-lines file produced by `export-json`.
    ImportJson {
        dir: PathBuf,
        file: PathBuf,
        /// Skip malformed lines instead of aborting the import.
        #[arg(long)]
        skip_bad_records: bool,
    },
    /// Export the whole database as JSON lines.
    ExportJson { dir: PathBuf, out: PathBuf },
    /// Merge another database into this one.
    Merge { dir: PathBuf, other: PathBuf },
    /// Look up a block hash (hex) and print its occurrences.
    Scan { dir: PathBuf, hash: String },
    /// Print database statistics.
    Stats { dir: PathBuf },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Create {
            dir,
            algorithm,
            block_size,
        } => {
            let algorithm = HashAlgorithm::parse(&algorithm)
                .ok_or_else(|| anyhow!("unknown hash algorithm: {algorithm}"))?;
            HashDb::create(&dir, algorithm, block_size)?;
            println!("created {} database at {}", algorithm, dir.display());
        }
        Command::Import {
            dir,
            file,
            skip_bad_records,
        } => {
            let mut db = HashDb::open(&dir)?;
            let change = db.import_dfxml_with(
                &file,
                ImportOptions {
                    skip_malformed: skip_bad_records,
                },
            )?;
            println!("{change}");
        }
        Command::ImportJson {
            dir,
            file,
            skip_bad_records,
        } => {
            let mut db = HashDb::open(&dir)?;
            let change = db.import_json_with(
                &file,
                ImportOptions {
                    skip_malformed: skip_bad_records,
                },
            )?;
            println!("{change}");
        }
        Command::ExportJson { dir, out } => {
            let db = HashDb::open_read_only(&dir)?;
            db.export_json_to_path(&out)?;
            println!("exported to {}", out.display());
        }
        Command::Merge { dir, other } => {
            let mut db = HashDb::open(&dir)?;
            let source = HashDb::open_read_only(&other)?;
            let change = db.merge_from(&source)?;
            println!("{change}");
        }
        Command::Scan { dir, hash } => {
            let db = HashDb::open_read_only(&dir)?;
            let hash = hex::decode(hash.trim()).context("hash is not valid hex")?;
            let hits = db.lookup_sources(&hash)?;
            if hits.is_empty() {
                println!("not found");
                return Ok(());
            }
            for hit in &hits {
                let names: Vec<String> = hit
                    .names
                    .iter()
                    .map(|n| format!("{}/{}", n.repository_name, n.filename))
                    .collect();
                println!(
                    "source={} offset={} file_hash={} filesize={} names={}",
                    hit.source_id,
                    hit.offset,
                    hex::encode(&hit.file_hash),
                    hit.filesize,
                    names.join(",")
                );
            }
            println!("({} occurrences)", hits.len());
        }
        Command::Stats { dir } => {
            let db = HashDb::open_read_only(&dir)?;
            let stats = db.stats();
            println!("algorithm: {}", stats.algorithm);
            println!("block_size: {}", stats.block_size);
            println!("distinct_hashes: {}", stats.distinct_hashes);
            println!("total_entries: {}", stats.total_entries);
            println!("source_count: {}", stats.source_count);
            println!("segment_count: {}", stats.segment_count);
        }
    }
    Ok(())
}
