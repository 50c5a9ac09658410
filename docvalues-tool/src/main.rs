//! Docvalues Tool - CLI for doc values segments
//!
//! # Commands
//!
//! - `build` - Write a segment's doc values from a JSONL file or stdin
//! - `info` - Show per-field encodings and sizes of a segment
//! - `check` - Verify the checksums of a segment
//! - `dump` - Print the values of one field as JSONL
//!
//! A segment is described by `<segment>.si.json` next to its `.dvm`/`.dvd`
//! files; `build` writes it and the other commands read it.
//!
//! # Examples
//!
//! ```bash
//! docvalues-tool build -d ./seg -s _0 -f price:numeric -f tags:sorted_set -i docs.jsonl
//! docvalues-tool info -d ./seg -s _0
//! docvalues-tool dump -d ./seg -s _0 -f tags --limit 10
//! ```

mod segment_ops;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use segment_ops::FieldSpec;

#[derive(Parser)]
#[command(name = "docvalues-tool")]
#[command(version, about = "CLI for building and inspecting doc values segments")]
#[command(after_help = "Use 'docvalues-tool <command> --help' for more information.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write doc values for a segment from JSONL documents
    Build {
        /// Segment directory (created if missing)
        #[arg(short, long)]
        dir: PathBuf,

        /// Segment name
        #[arg(short, long, default_value = "_0")]
        segment: String,

        /// Field to extract, as name:type (numeric, binary, sorted, sorted_set)
        #[arg(short, long = "field", required = true)]
        fields: Vec<FieldSpec>,

        /// Path to JSONL documents (omit if using --stdin)
        #[arg(short, long, required_unless_present = "stdin")]
        input: Option<PathBuf>,

        /// Read documents from stdin instead of a file
        #[arg(long, default_value = "false")]
        stdin: bool,

        /// JSON file with writer settings (block_size, address_interval, ...)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show field encodings and sizes
    Info {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "_0")]
        segment: String,
    },

    /// Verify segment checksums
    Check {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "_0")]
        segment: String,
    },

    /// Print the values of a field as JSONL
    Dump {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "_0")]
        segment: String,

        /// Field name
        #[arg(short, long)]
        field: String,

        /// Stop after this many documents
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("docvalues_tool=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            dir,
            segment,
            fields,
            input,
            stdin,
            config,
        } => {
            let input = if stdin { None } else { input };
            segment_ops::build_segment(&dir, &segment, &fields, input, config)
                .context("Failed to build segment")?;
        }
        Commands::Info { dir, segment } => {
            segment_ops::show_info(&dir, &segment).context("Failed to read segment")?;
        }
        Commands::Check { dir, segment } => {
            segment_ops::check_segment(&dir, &segment).context("Segment check failed")?;
        }
        Commands::Dump {
            dir,
            segment,
            field,
            limit,
        } => {
            segment_ops::dump_field(&dir, &segment, &field, limit)
                .with_context(|| format!("Failed to dump field {}", field))?;
        }
    }

    Ok(())
}
