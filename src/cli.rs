//! Command line interface definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::retrieval::SearchMode;

/// Retrieval core for a local document-grounded question answering tool
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a document (.txt, .md, .pdf)
    Ingest {
        /// Path to the source file
        path: PathBuf,
    },

    /// Delete a source and all derived state
    Delete {
        /// Source path as shown by `list`
        source: String,
    },

    /// List ingested sources
    List,

    /// Search the ingested documents
    Search {
        /// Query text
        query: String,

        /// Number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        limit: usize,

        /// Retrieval strategy
        #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
        mode: ModeArg,

        /// Augment results through the entity graph
        #[arg(long)]
        graph: bool,

        /// Chat model for conversational query rewriting
        #[arg(long)]
        chat_model: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build the knowledge graph for an ingested source
    BuildGraph {
        /// Source path as shown by `list`
        source: String,

        /// Extraction model name
        #[arg(long)]
        model: String,
    },

    /// Show graph build progress for a source
    GraphProgress {
        /// Source path as shown by `list`
        source: String,
    },

    /// Switch the active embedding model
    SetModel {
        /// New model name
        name: String,

        /// Confirm the destructive switch
        #[arg(long)]
        force: bool,
    },

    /// Show store and index statistics
    Status,
}

/// Retrieval strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Embedding,
    Fulltext,
    Hybrid,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Embedding => SearchMode::Embedding,
            ModeArg::Fulltext => SearchMode::Fulltext,
            ModeArg::Hybrid => SearchMode::Hybrid,
        }
    }
}
